use crate::process::types::{CpuMetrics, MemoryMetrics};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Memory reading, either reported by the server or estimated locally
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryInfo {
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub percent: f64,
    /// `true` when the server reported nothing and this is our own estimate
    pub estimated: bool,
}

impl MemoryInfo {
    pub fn reported(metrics: MemoryMetrics) -> Self {
        Self {
            used_bytes: metrics.used_bytes,
            total_bytes: metrics.total_bytes,
            available_bytes: metrics.total_bytes.saturating_sub(metrics.used_bytes),
            percent: metrics.percent,
            estimated: false,
        }
    }

    pub fn estimated(used_bytes: u64, total_bytes: u64) -> Self {
        let percent = if total_bytes == 0 {
            0.0
        } else {
            used_bytes as f64 / total_bytes as f64 * 100.0
        };

        Self {
            used_bytes,
            total_bytes,
            available_bytes: total_bytes.saturating_sub(used_bytes),
            percent,
            estimated: true,
        }
    }
}

/// System load average over 1, 5 and 15 minutes
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpuInfo {
    pub percent: f64,
    pub cores: u32,
    pub load_average: Option<LoadAverage>,
    pub estimated: bool,
}

impl CpuInfo {
    pub fn reported(metrics: CpuMetrics, load_average: Option<LoadAverage>) -> Self {
        Self {
            percent: metrics.percent,
            cores: metrics.cores,
            load_average,
            estimated: false,
        }
    }

    /// Core count only; usage is unknown and reported as zero
    pub fn estimated(cores: u32, load_average: Option<LoadAverage>) -> Self {
        Self {
            percent: 0.0,
            cores,
            load_average,
            estimated: true,
        }
    }
}

/// Server-side signals taken from status and metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub running: bool,
    pub healthy: bool,
    pub queue_length: u64,
    pub avg_response_time_ms: f64,
    pub requests_per_minute: u64,
    pub total_requests: u64,
    pub uptime_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Memory,
    Cpu,
    Queue,
    ResponseTime,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertKind::Memory => write!(f, "memory"),
            AlertKind::Cpu => write!(f, "cpu"),
            AlertKind::Queue => write!(f, "queue"),
            AlertKind::ResponseTime => write!(f, "response_time"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSeverity::Warning => write!(f, "warning"),
            AlertSeverity::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAlert {
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
}

/// One point-in-time resource snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub memory: MemoryInfo,
    pub cpu: CpuInfo,
    pub server: ServerInfo,
    /// Alerts this sample's own threshold check produced
    pub alerts: Vec<ResourceAlert>,
    pub timestamp: DateTime<Utc>,
}

/// Averages over the most recent samples
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub avg_memory_percent: f64,
    pub avg_cpu_percent: f64,
    pub avg_response_time_ms: f64,
    pub requests_per_minute: u64,
    pub alert_count: usize,
}
