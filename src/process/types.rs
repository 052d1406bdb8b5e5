use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Point-in-time view of the model-server process, derived on demand
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub running: bool,
    pub healthy: bool,
    pub model_loaded: bool,
    pub error: Option<String>,
    pub uptime_secs: Option<u64>,
    pub pid: Option<u32>,
}

impl ServerStatus {
    pub fn not_running() -> Self {
        Self {
            running: false,
            healthy: false,
            model_loaded: false,
            error: Some("Server is not running".to_string()),
            uptime_secs: None,
            pid: None,
        }
    }

    pub fn unhealthy(error: String, uptime: Option<Duration>, pid: Option<u32>) -> Self {
        Self {
            running: true,
            healthy: false,
            model_loaded: false,
            error: Some(error),
            uptime_secs: uptime.map(|d| d.as_secs()),
            pid,
        }
    }

    pub fn healthy(model_loaded: bool, uptime: Option<Duration>, pid: Option<u32>) -> Self {
        Self {
            running: true,
            healthy: true,
            model_loaded,
            error: None,
            uptime_secs: uptime.map(|d| d.as_secs()),
            pid,
        }
    }
}

/// Memory usage reported by the model server
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetrics {
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub percent: f64,
}

/// CPU usage reported by the model server
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuMetrics {
    pub percent: f64,
    pub cores: u32,
}

/// Metrics served by the model server's `/metrics` endpoint.
///
/// The payload is untrusted: every field is read individually and a missing or
/// wrongly typed field falls back to its default. `memory` and `cpu` are `None`
/// when their whole section is absent so callers can fall back to local
/// estimates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerMetrics {
    pub memory: Option<MemoryMetrics>,
    pub cpu: Option<CpuMetrics>,
    pub model_status: Option<String>,
    pub queue_length: u64,
    pub avg_response_time_ms: f64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
}

impl ServerMetrics {
    /// Parse the server's nested JSON shape.
    ///
    /// ```text
    /// { memory:   { used, total, percentage },
    ///   cpu:      { usage, cores },
    ///   model:    { status, queue_length, average_response_time },   // seconds
    ///   requests: { total, successful, failed } }
    /// ```
    pub fn from_json(value: &Value) -> Self {
        let memory = value.get("memory").filter(|v| v.is_object()).map(|m| MemoryMetrics {
            used_bytes: read_u64(m, "used"),
            total_bytes: read_u64(m, "total"),
            percent: read_f64(m, "percentage"),
        });

        let cpu = value.get("cpu").filter(|v| v.is_object()).map(|c| CpuMetrics {
            percent: read_f64(c, "usage"),
            cores: read_u64(c, "cores").min(u32::MAX as u64) as u32,
        });

        let model = value.get("model");
        let requests = value.get("requests");

        Self {
            memory,
            cpu,
            model_status: model
                .and_then(|m| m.get("status"))
                .and_then(Value::as_str)
                .map(str::to_string),
            queue_length: model.map(|m| read_u64(m, "queue_length")).unwrap_or(0),
            avg_response_time_ms: model
                .map(|m| read_f64(m, "average_response_time") * 1000.0)
                .unwrap_or(0.0),
            total_requests: requests.map(|r| read_u64(r, "total")).unwrap_or(0),
            successful_requests: requests.map(|r| read_u64(r, "successful")).unwrap_or(0),
            failed_requests: requests.map(|r| read_u64(r, "failed")).unwrap_or(0),
        }
    }
}

/// Body of a successful `/health` probe
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthReport {
    pub model_loaded: bool,
}

impl HealthReport {
    /// `model_loaded` is optional and read loosely (bool, number or string)
    pub fn from_json(value: &Value) -> Self {
        let model_loaded = match value.get("model_loaded") {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            Some(Value::String(s)) => !s.is_empty() && s != "false" && s != "0",
            _ => false,
        };
        Self { model_loaded }
    }
}

fn read_f64(value: &Value, key: &str) -> f64 {
    value
        .get(key)
        .and_then(Value::as_f64)
        .filter(|f| f.is_finite())
        .unwrap_or(0.0)
}

fn read_u64(value: &Value, key: &str) -> u64 {
    match value.get(key) {
        Some(v) => v
            .as_u64()
            .or_else(|| v.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        None => 0,
    }
}
