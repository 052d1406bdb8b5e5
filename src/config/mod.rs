use crate::error::{GovernorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for the governor service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GovernorConfig {
    /// Model-server process settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Resource monitor settings
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Request admission settings
    #[serde(default)]
    pub governor: RequestGovernorConfig,
}

/// How to launch and supervise the model-server process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Directory the server runs in (also its working directory)
    #[serde(default = "default_server_dir")]
    pub server_dir: PathBuf,

    /// Entrypoint file inside `server_dir`
    #[serde(default = "default_entrypoint")]
    pub entrypoint: String,

    /// Program used to run the entrypoint
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Extra arguments passed after the entrypoint
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Loopback host the server listens on
    #[serde(default = "default_host")]
    pub host: String,

    /// Port the server listens on
    #[serde(default = "default_port")]
    pub port: u16,

    /// How long `start()` waits for the first healthy probe
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,

    /// Interval between startup health probes
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    /// Per-request timeout for `/health` and `/metrics`
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Grace period between SIGTERM and SIGKILL
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Delay before an automatic restart after an unexpected exit
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,

    /// Pause between stop and start in `restart()`
    #[serde(default = "default_restart_pause_ms")]
    pub restart_pause_ms: u64,

    /// Automatic restarts allowed before giving up
    #[serde(default = "default_max_restart_attempts")]
    pub max_restart_attempts: u32,

    /// Interval of the running-but-unhealthy check
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
}

fn default_server_dir() -> PathBuf {
    PathBuf::from("smack-server")
}

fn default_entrypoint() -> String {
    "main.py".to_string()
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8001
}

fn default_startup_timeout_ms() -> u64 {
    60_000
}

fn default_probe_interval_ms() -> u64 {
    2_000
}

fn default_probe_timeout_ms() -> u64 {
    5_000
}

fn default_stop_timeout_ms() -> u64 {
    10_000
}

fn default_restart_delay_ms() -> u64 {
    5_000
}

fn default_restart_pause_ms() -> u64 {
    2_000
}

fn default_max_restart_attempts() -> u32 {
    3
}

fn default_health_check_interval_ms() -> u64 {
    30_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_dir: default_server_dir(),
            entrypoint: default_entrypoint(),
            interpreter: default_interpreter(),
            args: Vec::new(),
            env: HashMap::new(),
            host: default_host(),
            port: default_port(),
            startup_timeout_ms: default_startup_timeout_ms(),
            probe_interval_ms: default_probe_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            restart_delay_ms: default_restart_delay_ms(),
            restart_pause_ms: default_restart_pause_ms(),
            max_restart_attempts: default_max_restart_attempts(),
            health_check_interval_ms: default_health_check_interval_ms(),
        }
    }
}

impl ServerConfig {
    /// Base URL of the server's loopback HTTP endpoint
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Full path of the entrypoint file
    pub fn entrypoint_path(&self) -> PathBuf {
        self.server_dir.join(&self.entrypoint)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn restart_pause(&self) -> Duration {
        Duration::from_millis(self.restart_pause_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    /// Validate the server section
    pub fn validate(&self) -> Result<()> {
        if self.entrypoint.is_empty() {
            return Err(GovernorError::ConfigValidationError(
                "server.entrypoint must not be empty".to_string(),
            ));
        }

        if self.interpreter.is_empty() {
            return Err(GovernorError::ConfigValidationError(
                "server.interpreter must not be empty".to_string(),
            ));
        }

        if self.port == 0 {
            return Err(GovernorError::ConfigValidationError(
                "server.port must be non-zero".to_string(),
            ));
        }

        let timings = [
            ("startup_timeout_ms", self.startup_timeout_ms),
            ("probe_interval_ms", self.probe_interval_ms),
            ("probe_timeout_ms", self.probe_timeout_ms),
            ("stop_timeout_ms", self.stop_timeout_ms),
            ("health_check_interval_ms", self.health_check_interval_ms),
        ];
        for (name, value) in timings {
            if value == 0 {
                return Err(GovernorError::ConfigValidationError(format!(
                    "server.{} must be greater than 0",
                    name
                )));
            }
        }

        Ok(())
    }
}

/// Ceilings above which the monitor raises alerts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceThresholds {
    #[serde(default = "default_max_memory_percent")]
    pub max_memory_percent: f64,

    #[serde(default = "default_max_cpu_percent")]
    pub max_cpu_percent: f64,

    #[serde(default = "default_max_queue_length")]
    pub max_queue_length: f64,

    #[serde(default = "default_max_response_time_ms")]
    pub max_response_time_ms: f64,
}

fn default_max_memory_percent() -> f64 {
    85.0
}

fn default_max_cpu_percent() -> f64 {
    80.0
}

fn default_max_queue_length() -> f64 {
    10.0
}

fn default_max_response_time_ms() -> f64 {
    30_000.0
}

impl Default for ResourceThresholds {
    fn default() -> Self {
        Self {
            max_memory_percent: default_max_memory_percent(),
            max_cpu_percent: default_max_cpu_percent(),
            max_queue_length: default_max_queue_length(),
            max_response_time_ms: default_max_response_time_ms(),
        }
    }
}

impl ResourceThresholds {
    /// Every threshold must be strictly positive
    pub fn validate(&self) -> Result<()> {
        let values = [
            ("max_memory_percent", self.max_memory_percent),
            ("max_cpu_percent", self.max_cpu_percent),
            ("max_queue_length", self.max_queue_length),
            ("max_response_time_ms", self.max_response_time_ms),
        ];
        for (name, value) in values {
            if !(value > 0.0) || !value.is_finite() {
                return Err(GovernorError::ConfigValidationError(format!(
                    "threshold {} must be greater than 0 (got {})",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Merge a partial update; the result still has to be validated
    pub fn merged(&self, update: &ThresholdsUpdate) -> Self {
        Self {
            max_memory_percent: update.max_memory_percent.unwrap_or(self.max_memory_percent),
            max_cpu_percent: update.max_cpu_percent.unwrap_or(self.max_cpu_percent),
            max_queue_length: update.max_queue_length.unwrap_or(self.max_queue_length),
            max_response_time_ms: update
                .max_response_time_ms
                .unwrap_or(self.max_response_time_ms),
        }
    }
}

/// Partial threshold update applied at runtime
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThresholdsUpdate {
    pub max_memory_percent: Option<f64>,
    pub max_cpu_percent: Option<f64>,
    pub max_queue_length: Option<f64>,
    pub max_response_time_ms: Option<f64>,
}

/// Values above which a breached threshold is reported as critical
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertCeilings {
    #[serde(default = "default_critical_percent")]
    pub memory_percent: f64,

    #[serde(default = "default_critical_percent")]
    pub cpu_percent: f64,

    #[serde(default = "default_critical_queue_length")]
    pub queue_length: f64,

    #[serde(default = "default_critical_response_time_ms")]
    pub response_time_ms: f64,
}

fn default_critical_percent() -> f64 {
    95.0
}

fn default_critical_queue_length() -> f64 {
    20.0
}

fn default_critical_response_time_ms() -> f64 {
    60_000.0
}

impl Default for AlertCeilings {
    fn default() -> Self {
        Self {
            memory_percent: default_critical_percent(),
            cpu_percent: default_critical_percent(),
            queue_length: default_critical_queue_length(),
            response_time_ms: default_critical_response_time_ms(),
        }
    }
}

/// Resource monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Interval used when the supervisor starts sampling
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,

    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    #[serde(default = "default_alert_capacity")]
    pub alert_capacity: usize,

    /// Same kind+severity alerts inside this window are suppressed
    #[serde(default = "default_alert_dedup_window_ms")]
    pub alert_dedup_window_ms: u64,

    /// Number of recent samples averaged by the performance summary
    #[serde(default = "default_summary_window")]
    pub summary_window: usize,

    /// Assumed machine memory when the server reports none
    #[serde(default = "default_fallback_total_memory_bytes")]
    pub fallback_total_memory_bytes: u64,

    #[serde(default)]
    pub thresholds: ResourceThresholds,

    #[serde(default)]
    pub ceilings: AlertCeilings,
}

fn default_sample_interval_ms() -> u64 {
    15_000
}

fn default_history_capacity() -> usize {
    100
}

fn default_alert_capacity() -> usize {
    50
}

fn default_alert_dedup_window_ms() -> u64 {
    60_000
}

fn default_summary_window() -> usize {
    10
}

fn default_fallback_total_memory_bytes() -> u64 {
    8 * 1024 * 1024 * 1024
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: default_sample_interval_ms(),
            history_capacity: default_history_capacity(),
            alert_capacity: default_alert_capacity(),
            alert_dedup_window_ms: default_alert_dedup_window_ms(),
            summary_window: default_summary_window(),
            fallback_total_memory_bytes: default_fallback_total_memory_bytes(),
            thresholds: ResourceThresholds::default(),
            ceilings: AlertCeilings::default(),
        }
    }
}

impl MonitorConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn alert_dedup_window(&self) -> Duration {
        Duration::from_millis(self.alert_dedup_window_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_interval_ms == 0 {
            return Err(GovernorError::ConfigValidationError(
                "monitor.sample_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.history_capacity == 0 || self.alert_capacity == 0 || self.summary_window == 0 {
            return Err(GovernorError::ConfigValidationError(
                "monitor capacities and summary_window must be at least 1".to_string(),
            ));
        }
        if self.fallback_total_memory_bytes == 0 {
            return Err(GovernorError::ConfigValidationError(
                "monitor.fallback_total_memory_bytes must be greater than 0".to_string(),
            ));
        }
        self.thresholds.validate()
    }
}

/// Constants of the throttle-delay formula
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThrottlePolicy {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Delay multiplier applied while the stress signal is set
    #[serde(default = "default_stress_multiplier")]
    pub stress_multiplier: f64,

    /// Queue occupancy ratio that alone triggers throttling
    #[serde(default = "default_queue_pressure_ratio")]
    pub queue_pressure_ratio: f64,
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_stress_multiplier() -> f64 {
    2.0
}

fn default_queue_pressure_ratio() -> f64 {
    0.7
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            stress_multiplier: default_stress_multiplier(),
            queue_pressure_ratio: default_queue_pressure_ratio(),
        }
    }
}

/// Request governor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestGovernorConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Fraction of resource usage at which throttling starts
    #[serde(default = "default_throttle_threshold")]
    pub throttle_threshold: f64,

    #[serde(default = "default_priority_levels")]
    pub priority_levels: u8,

    #[serde(default)]
    pub throttle: ThrottlePolicy,

    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u64,

    /// How long `shutdown()` lets active work finish
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Capacity of the wait/processing time windows
    #[serde(default = "default_latency_window")]
    pub latency_window: usize,

    /// Processing times used for the throughput estimate
    #[serde(default = "default_throughput_window")]
    pub throughput_window: usize,
}

fn default_max_concurrent() -> usize {
    4
}

fn default_max_queue_size() -> usize {
    20
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_throttle_threshold() -> f64 {
    0.8
}

fn default_priority_levels() -> u8 {
    3
}

fn default_stats_interval_ms() -> u64 {
    30_000
}

fn default_shutdown_grace_ms() -> u64 {
    10_000
}

fn default_latency_window() -> usize {
    100
}

fn default_throughput_window() -> usize {
    10
}

impl Default for RequestGovernorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_queue_size: default_max_queue_size(),
            default_timeout_ms: default_timeout_ms(),
            throttle_threshold: default_throttle_threshold(),
            priority_levels: default_priority_levels(),
            throttle: ThrottlePolicy::default(),
            stats_interval_ms: default_stats_interval_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            latency_window: default_latency_window(),
            throughput_window: default_throughput_window(),
        }
    }
}

impl RequestGovernorConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(GovernorError::ConfigValidationError(
                "governor.max_concurrent must be at least 1".to_string(),
            ));
        }

        if !(self.throttle_threshold > 0.0 && self.throttle_threshold <= 1.0) {
            return Err(GovernorError::ConfigValidationError(format!(
                "governor.throttle_threshold must be in (0, 1] (got {})",
                self.throttle_threshold
            )));
        }

        if self.priority_levels == 0 {
            return Err(GovernorError::ConfigValidationError(
                "governor.priority_levels must be at least 1".to_string(),
            ));
        }

        if self.default_timeout_ms == 0 || self.stats_interval_ms == 0 {
            return Err(GovernorError::ConfigValidationError(
                "governor timeouts and intervals must be greater than 0".to_string(),
            ));
        }

        if self.latency_window == 0 || self.throughput_window == 0 {
            return Err(GovernorError::ConfigValidationError(
                "governor latency windows must be at least 1".to_string(),
            ));
        }

        if self.throttle.stress_multiplier < 1.0 || self.throttle.queue_pressure_ratio <= 0.0 {
            return Err(GovernorError::ConfigValidationError(
                "governor.throttle multiplier must be >= 1 and queue_pressure_ratio > 0"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Merge a partial update; the result still has to be validated
    pub fn merged(&self, update: &RequestConfigUpdate) -> Self {
        let mut next = self.clone();
        if let Some(v) = update.max_concurrent {
            next.max_concurrent = v;
        }
        if let Some(v) = update.max_queue_size {
            next.max_queue_size = v;
        }
        if let Some(v) = update.default_timeout_ms {
            next.default_timeout_ms = v;
        }
        if let Some(v) = update.throttle_threshold {
            next.throttle_threshold = v;
        }
        if let Some(v) = update.priority_levels {
            next.priority_levels = v;
        }
        next
    }
}

/// Partial governor configuration update applied at runtime
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestConfigUpdate {
    pub max_concurrent: Option<usize>,
    pub max_queue_size: Option<usize>,
    pub default_timeout_ms: Option<u64>,
    pub throttle_threshold: Option<f64>,
    pub priority_levels: Option<u8>,
}

impl GovernorConfig {
    /// Load configuration from a file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<GovernorConfig> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            GovernorError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let mut config = match extension {
            "toml" => Self::parse_toml(&contents)?,
            "json" => Self::parse_json(&contents)?,
            _ => {
                return Err(GovernorError::InvalidConfig(format!(
                    "Unsupported file format: {}. Use .toml or .json",
                    extension
                )))
            }
        };

        config.expand_env_vars();

        // Relative server directories are resolved against the config file
        if config.server.server_dir.is_relative() {
            if let Some(parent) = path.parent() {
                config.server.server_dir = parent.join(&config.server.server_dir);
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn parse_toml(contents: &str) -> Result<GovernorConfig> {
        toml::from_str(contents)
            .map_err(|e| GovernorError::InvalidConfig(format!("Failed to parse TOML: {}", e)))
    }

    fn parse_json(contents: &str) -> Result<GovernorConfig> {
        serde_json::from_str(contents)
            .map_err(|e| GovernorError::InvalidConfig(format!("Failed to parse JSON: {}", e)))
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.monitor.validate()?;
        self.governor.validate()
    }

    /// Expand `$VAR` / `${VAR}` in the server directory, arguments and env values
    fn expand_env_vars(&mut self) {
        let server = &mut self.server;
        server.server_dir = PathBuf::from(expand_env_in_string(
            &server.server_dir.to_string_lossy(),
        ));
        server.args = server
            .args
            .iter()
            .map(|arg| expand_env_in_string(arg))
            .collect();
        server.env = server
            .env
            .iter()
            .map(|(k, v)| (k.clone(), expand_env_in_string(v)))
            .collect();
    }
}

fn expand_env_in_string(s: &str) -> String {
    let mut result = s.to_string();

    for (key, value) in std::env::vars() {
        result = result.replace(&format!("${{{}}}", key), &value);
        result = result.replace(&format!("${}", key), &value);
    }

    result
}
