use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Processing time assumed before any request has completed
pub const DEFAULT_PROCESSING_MS: f64 = 5_000.0;

/// Fixed-capacity window of the most recent values
#[derive(Debug, Clone)]
pub struct RollingWindow {
    values: VecDeque<f64>,
    capacity: usize,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: f64) {
        self.values.push_back(value);
        while self.values.len() > self.capacity {
            self.values.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn mean(&self) -> Option<f64> {
        self.mean_of_last(self.values.len())
    }

    /// Mean of the newest `n` values
    pub fn mean_of_last(&self, n: usize) -> Option<f64> {
        let n = n.min(self.values.len());
        if n == 0 {
            return None;
        }
        let sum: f64 = self.values.iter().rev().take(n).sum();
        Some(sum / n as f64)
    }
}

/// Governor counters and latency averages
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GovernorStats {
    pub total_requests: u64,
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
    pub queued: usize,
    pub active: usize,
    pub avg_wait_ms: f64,
    pub avg_processing_ms: f64,
    pub throughput_per_minute: u64,
}

/// Accumulates outcomes; averages are refreshed by `recompute`
#[derive(Debug, Clone)]
pub struct StatsTracker {
    total_requests: u64,
    completed: u64,
    failed: u64,
    rejected: u64,
    wait_ms: RollingWindow,
    processing_ms: RollingWindow,
    throughput_window: usize,
    avg_wait_ms: f64,
    avg_processing_ms: f64,
    throughput_per_minute: u64,
}

impl StatsTracker {
    pub fn new(latency_window: usize, throughput_window: usize) -> Self {
        Self {
            total_requests: 0,
            completed: 0,
            failed: 0,
            rejected: 0,
            wait_ms: RollingWindow::new(latency_window),
            processing_ms: RollingWindow::new(latency_window),
            throughput_window,
            avg_wait_ms: 0.0,
            avg_processing_ms: 0.0,
            throughput_per_minute: 0,
        }
    }

    pub fn record_submitted(&mut self) {
        self.total_requests += 1;
    }

    pub fn record_rejected(&mut self) {
        self.rejected += 1;
    }

    pub fn record_completed(&mut self, wait: Duration, processing: Duration) {
        self.completed += 1;
        self.wait_ms.push(wait.as_secs_f64() * 1000.0);
        self.processing_ms.push(processing.as_secs_f64() * 1000.0);
    }

    pub fn record_failed(&mut self) {
        self.failed += 1;
    }

    pub fn recompute(&mut self) {
        self.avg_wait_ms = self.wait_ms.mean().unwrap_or(0.0);
        self.avg_processing_ms = self.processing_ms.mean().unwrap_or(0.0);
        self.throughput_per_minute = match self.processing_ms.mean_of_last(self.throughput_window) {
            Some(mean) if mean > 0.0 => (60_000.0 / mean).round() as u64,
            _ => 0,
        };
    }

    /// Mean processing time, or the default before any completion
    pub fn expected_processing_ms(&self) -> f64 {
        self.processing_ms.mean().unwrap_or(DEFAULT_PROCESSING_MS)
    }

    pub fn snapshot(&self, queued: usize, active: usize) -> GovernorStats {
        GovernorStats {
            total_requests: self.total_requests,
            completed: self.completed,
            failed: self.failed,
            rejected: self.rejected,
            queued,
            active,
            avg_wait_ms: self.avg_wait_ms,
            avg_processing_ms: self.avg_processing_ms,
            throughput_per_minute: self.throughput_per_minute,
        }
    }
}
