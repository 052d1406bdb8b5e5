//! Resource sampling, bounded history and threshold alerts.

pub mod alerts;
pub mod types;

pub use alerts::{AlertLog, Readings};
pub use types::{
    AlertKind, AlertSeverity, CpuInfo, LoadAverage, MemoryInfo, PerformanceSummary,
    ResourceAlert, ResourceSample, ServerInfo,
};

use crate::config::{MonitorConfig, ResourceThresholds, ThresholdsUpdate};
use crate::error::Result;
use crate::governor::StressSignal;
use crate::process::types::{ServerMetrics, ServerStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Where the monitor reads server status and metrics from
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn status(&self) -> ServerStatus;

    /// `None` when the server's metrics are unavailable
    async fn metrics(&self) -> Option<ServerMetrics>;
}

/// Periodic resource sampler with bounded history and alerting.
///
/// Cheap to clone; clones share history, alerts and the sampler task.
#[derive(Clone)]
pub struct ResourceMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    source: Arc<dyn MetricsSource>,
    config: MonitorConfig,
    state: Mutex<MonitorState>,
    sampler: Mutex<Option<JoinHandle<()>>>,
    system: Mutex<System>,
}

struct MonitorState {
    history: VecDeque<ResourceSample>,
    alerts: AlertLog,
    thresholds: ResourceThresholds,
}

impl ResourceMonitor {
    /// Fails with `ConfigValidationError` when `config` does not validate
    pub fn new(source: Arc<dyn MetricsSource>, config: MonitorConfig) -> Result<Self> {
        config.validate()?;

        let state = MonitorState {
            history: VecDeque::with_capacity(config.history_capacity),
            alerts: AlertLog::new(config.alert_capacity, config.alert_dedup_window()),
            thresholds: config.thresholds,
        };

        Ok(Self {
            inner: Arc::new(MonitorInner {
                source,
                config,
                state: Mutex::new(state),
                sampler: Mutex::new(None),
                system: Mutex::new(System::new()),
            }),
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    /// Start periodic sampling; a no-op while already sampling
    pub fn start_sampling(&self, interval: Duration) {
        let mut sampler = lock(&self.inner.sampler);
        if sampler.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("Resource sampling already running");
            return;
        }

        info!("Starting resource monitoring (interval: {:?})", interval);
        let weak = Arc::downgrade(&self.inner);
        *sampler = Some(tokio::spawn(run_sampler(weak, interval)));
    }

    /// Stop periodic sampling; a no-op when not sampling
    pub fn stop_sampling(&self) {
        if let Some(task) = lock(&self.inner.sampler).take() {
            task.abort();
            info!("Resource monitoring stopped");
        }
    }

    pub fn is_sampling(&self) -> bool {
        lock(&self.inner.sampler)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Collect a sample, append it to history and raise alerts
    pub async fn sample(&self) -> ResourceSample {
        let sample = self.snapshot().await;
        self.record_sample(sample)
    }

    /// Collect a sample without recording it
    pub async fn snapshot(&self) -> ResourceSample {
        let (status, metrics) = tokio::join!(self.inner.source.status(), self.inner.source.metrics());
        let timestamp = Utc::now();
        let load_average = load_average();

        let memory = match metrics.as_ref().and_then(|m| m.memory) {
            Some(reported) => MemoryInfo::reported(reported),
            None => self.estimate_memory(),
        };

        let cpu = match metrics.as_ref().and_then(|m| m.cpu) {
            Some(reported) => CpuInfo::reported(reported, load_average),
            None => CpuInfo::estimated(self.available_cores(), load_average),
        };

        let total_requests = metrics.as_ref().map(|m| m.total_requests).unwrap_or(0);
        let (requests_per_minute, thresholds) = {
            let state = lock(&self.inner.state);
            let rpm = state
                .history
                .back()
                .map(|previous| requests_per_minute(previous, total_requests, timestamp))
                .unwrap_or(0);
            (rpm, state.thresholds)
        };

        let server = ServerInfo {
            running: status.running,
            healthy: status.healthy,
            queue_length: metrics.as_ref().map(|m| m.queue_length).unwrap_or(0),
            avg_response_time_ms: metrics
                .as_ref()
                .map(|m| m.avg_response_time_ms)
                .unwrap_or(0.0),
            requests_per_minute,
            total_requests,
            uptime_secs: status.uptime_secs,
        };

        let mut sample = ResourceSample {
            memory,
            cpu,
            server,
            alerts: Vec::new(),
            timestamp,
        };
        sample.alerts = alerts::evaluate(
            &Readings::from_sample(&sample),
            &thresholds,
            &self.inner.config.ceilings,
            timestamp,
        );
        sample
    }

    /// Append a collected sample to history and run the threshold check.
    ///
    /// Returns the stored sample with the alerts its check produced.
    pub fn record_sample(&self, mut sample: ResourceSample) -> ResourceSample {
        let mut state = lock(&self.inner.state);

        sample.alerts = alerts::evaluate(
            &Readings::from_sample(&sample),
            &state.thresholds,
            &self.inner.config.ceilings,
            sample.timestamp,
        );

        for alert in &sample.alerts {
            if state.alerts.push(alert.clone()) {
                warn!(
                    kind = %alert.kind,
                    severity = %alert.severity,
                    value = alert.value,
                    threshold = alert.threshold,
                    "Resource alert: {}",
                    alert.message
                );
            }
        }

        state.history.push_back(sample.clone());
        while state.history.len() > self.inner.config.history_capacity {
            state.history.pop_front();
        }

        sample
    }

    /// Samples in recording order, oldest first
    pub fn history(&self) -> Vec<ResourceSample> {
        lock(&self.inner.state).history.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<ResourceSample> {
        lock(&self.inner.state).history.back().cloned()
    }

    pub fn alerts(&self) -> Vec<ResourceAlert> {
        lock(&self.inner.state).alerts.alerts()
    }

    pub fn clear_alerts(&self) {
        lock(&self.inner.state).alerts.clear();
        info!("Resource alerts cleared");
    }

    pub fn thresholds(&self) -> ResourceThresholds {
        lock(&self.inner.state).thresholds
    }

    /// Merge and apply new thresholds; invalid values leave the old ones in place
    pub fn update_thresholds(&self, update: ThresholdsUpdate) -> Result<()> {
        let mut state = lock(&self.inner.state);
        let next = state.thresholds.merged(&update);
        next.validate()?;
        state.thresholds = next;
        info!(?next, "Resource thresholds updated");
        Ok(())
    }

    /// Whether the most recent sample breaches any threshold
    pub fn is_under_stress(&self) -> bool {
        let state = lock(&self.inner.state);
        state
            .history
            .back()
            .map(|latest| Readings::from_sample(latest).breaches(&state.thresholds))
            .unwrap_or(false)
    }

    /// Averages over the last `summary_window` samples
    pub fn performance_summary(&self) -> PerformanceSummary {
        let state = lock(&self.inner.state);
        let window = self.inner.config.summary_window;
        let skip = state.history.len().saturating_sub(window);
        let recent: Vec<&ResourceSample> = state.history.iter().skip(skip).collect();

        let Some(latest) = recent.last() else {
            return PerformanceSummary::default();
        };

        let count = recent.len() as f64;
        let mean = |f: fn(&ResourceSample) -> f64| recent.iter().map(|s| f(s)).sum::<f64>() / count;

        PerformanceSummary {
            avg_memory_percent: round2(mean(|s| s.memory.percent)),
            avg_cpu_percent: round2(mean(|s| s.cpu.percent)),
            avg_response_time_ms: mean(|s| s.server.avg_response_time_ms).round(),
            requests_per_minute: latest.server.requests_per_minute,
            alert_count: state.alerts.len(),
        }
    }

    /// Own-process memory against the configured fallback total
    fn estimate_memory(&self) -> MemoryInfo {
        let used = match sysinfo::get_current_pid() {
            Ok(pid) => {
                let mut system = lock(&self.inner.system);
                system.refresh_processes_specifics(
                    ProcessesToUpdate::Some(&[pid]),
                    true,
                    ProcessRefreshKind::everything(),
                );
                system.process(pid).map(|p| p.memory()).unwrap_or(0)
            }
            Err(e) => {
                debug!("Cannot resolve own pid for memory estimate: {}", e);
                0
            }
        };

        MemoryInfo::estimated(used, self.inner.config.fallback_total_memory_bytes)
    }

    fn available_cores(&self) -> u32 {
        let mut system = lock(&self.inner.system);
        system.refresh_cpu_usage();
        system.cpus().len().max(1) as u32
    }
}

impl StressSignal for ResourceMonitor {
    fn is_under_stress(&self) -> bool {
        ResourceMonitor::is_under_stress(self)
    }

    fn summary(&self) -> PerformanceSummary {
        self.performance_summary()
    }
}

async fn run_sampler(inner: Weak<MonitorInner>, period: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let Some(inner) = inner.upgrade() else {
            break;
        };
        let sample = ResourceMonitor { inner }.sample().await;
        debug!(
            memory_percent = sample.memory.percent,
            cpu_percent = sample.cpu.percent,
            queue_length = sample.server.queue_length,
            "Resource sample recorded"
        );
    }
}

fn requests_per_minute(previous: &ResourceSample, total_requests: u64, now: DateTime<Utc>) -> u64 {
    let elapsed_ms = (now - previous.timestamp).num_milliseconds();
    if elapsed_ms <= 0 {
        return 0;
    }

    let delta = total_requests.saturating_sub(previous.server.total_requests);
    (delta as f64 * 60_000.0 / elapsed_ms as f64).round() as u64
}

fn load_average() -> Option<LoadAverage> {
    let load = System::load_average();
    if load.one == 0.0 && load.five == 0.0 && load.fifteen == 0.0 {
        return None;
    }
    Some(LoadAverage {
        one: load.one,
        five: load.five,
        fifteen: load.fifteen,
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
