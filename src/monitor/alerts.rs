//! Threshold evaluation and the de-duplicated alert log.

use crate::config::{AlertCeilings, ResourceThresholds};
use crate::monitor::types::{AlertKind, AlertSeverity, ResourceAlert, ResourceSample};
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

/// The four values checked against thresholds
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Readings {
    pub memory_percent: f64,
    pub cpu_percent: f64,
    pub queue_length: f64,
    pub response_time_ms: f64,
}

impl Readings {
    pub fn from_sample(sample: &ResourceSample) -> Self {
        Self {
            memory_percent: sample.memory.percent,
            cpu_percent: sample.cpu.percent,
            queue_length: sample.server.queue_length as f64,
            response_time_ms: sample.server.avg_response_time_ms,
        }
    }

    fn checks(
        &self,
        thresholds: &ResourceThresholds,
        ceilings: &AlertCeilings,
    ) -> [(AlertKind, f64, f64, f64); 4] {
        [
            (
                AlertKind::Memory,
                self.memory_percent,
                thresholds.max_memory_percent,
                ceilings.memory_percent,
            ),
            (
                AlertKind::Cpu,
                self.cpu_percent,
                thresholds.max_cpu_percent,
                ceilings.cpu_percent,
            ),
            (
                AlertKind::Queue,
                self.queue_length,
                thresholds.max_queue_length,
                ceilings.queue_length,
            ),
            (
                AlertKind::ResponseTime,
                self.response_time_ms,
                thresholds.max_response_time_ms,
                ceilings.response_time_ms,
            ),
        ]
    }

    /// Whether any reading is above its threshold
    pub fn breaches(&self, thresholds: &ResourceThresholds) -> bool {
        self.checks(thresholds, &AlertCeilings::default())
            .iter()
            .any(|(_, value, threshold, _)| value > threshold)
    }
}

/// Build one alert per breached threshold
pub fn evaluate(
    readings: &Readings,
    thresholds: &ResourceThresholds,
    ceilings: &AlertCeilings,
    now: DateTime<Utc>,
) -> Vec<ResourceAlert> {
    readings
        .checks(thresholds, ceilings)
        .into_iter()
        .filter(|(_, value, threshold, _)| value > threshold)
        .map(|(kind, value, threshold, ceiling)| {
            let severity = if value > ceiling {
                AlertSeverity::Critical
            } else {
                AlertSeverity::Warning
            };
            ResourceAlert {
                kind,
                severity,
                message: alert_message(kind, value, threshold),
                value,
                threshold,
                timestamp: now,
            }
        })
        .collect()
}

fn alert_message(kind: AlertKind, value: f64, threshold: f64) -> String {
    match kind {
        AlertKind::Memory => format!("High memory usage: {:.1}%", value),
        AlertKind::Cpu => format!("High CPU usage: {:.1}%", value),
        AlertKind::Queue => format!("Long request queue: {} requests", value),
        AlertKind::ResponseTime => {
            format!("Slow response time: {:.0}ms (limit {:.0}ms)", value, threshold)
        }
    }
}

/// Bounded alert history that drops repeats of a recent kind+severity
#[derive(Debug, Clone)]
pub struct AlertLog {
    alerts: VecDeque<ResourceAlert>,
    capacity: usize,
    dedup_window: Duration,
}

impl AlertLog {
    pub fn new(capacity: usize, dedup_window: std::time::Duration) -> Self {
        Self {
            alerts: VecDeque::with_capacity(capacity),
            capacity,
            dedup_window: Duration::from_std(dedup_window).unwrap_or(Duration::MAX),
        }
    }

    /// Record `alert` unless a matching one was raised inside the window.
    ///
    /// Returns `true` when the alert was recorded.
    pub fn push(&mut self, alert: ResourceAlert) -> bool {
        let duplicate = self.alerts.iter().any(|existing| {
            existing.kind == alert.kind
                && existing.severity == alert.severity
                && alert.timestamp - existing.timestamp < self.dedup_window
        });
        if duplicate {
            return false;
        }

        self.alerts.push_back(alert);
        while self.alerts.len() > self.capacity {
            self.alerts.pop_front();
        }
        true
    }

    pub fn alerts(&self) -> Vec<ResourceAlert> {
        self.alerts.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn clear(&mut self) {
        self.alerts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_alert(at: DateTime<Utc>) -> ResourceAlert {
        ResourceAlert {
            kind: AlertKind::Memory,
            severity: AlertSeverity::Warning,
            message: "High memory usage: 90.0%".to_string(),
            value: 90.0,
            threshold: 85.0,
            timestamp: at,
        }
    }

    #[test]
    fn test_evaluate_severity_ceilings() {
        let readings = Readings {
            memory_percent: 90.0,
            cpu_percent: 97.0,
            queue_length: 25.0,
            response_time_ms: 100.0,
        };

        let alerts = evaluate(
            &readings,
            &ResourceThresholds::default(),
            &AlertCeilings::default(),
            Utc::now(),
        );

        assert_eq!(alerts.len(), 3);
        assert_eq!(alerts[0].kind, AlertKind::Memory);
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);
        assert_eq!(alerts[1].kind, AlertKind::Cpu);
        assert_eq!(alerts[1].severity, AlertSeverity::Critical);
        assert_eq!(alerts[2].kind, AlertKind::Queue);
        assert_eq!(alerts[2].severity, AlertSeverity::Critical);
        assert_eq!(alerts[2].threshold, 10.0);
    }

    #[test]
    fn test_value_equal_to_threshold_is_not_a_breach() {
        let readings = Readings {
            memory_percent: 85.0,
            cpu_percent: 80.0,
            queue_length: 10.0,
            response_time_ms: 30_000.0,
        };
        let thresholds = ResourceThresholds::default();

        assert!(!readings.breaches(&thresholds));
        assert!(evaluate(&readings, &thresholds, &AlertCeilings::default(), Utc::now()).is_empty());
    }

    #[test]
    fn test_dedup_within_window() {
        let mut log = AlertLog::new(50, std::time::Duration::from_secs(60));
        let t0 = Utc::now();

        assert!(log.push(memory_alert(t0)));
        assert!(!log.push(memory_alert(t0 + Duration::seconds(30))));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_dedup_window_expires() {
        let mut log = AlertLog::new(50, std::time::Duration::from_secs(60));
        let t0 = Utc::now();

        assert!(log.push(memory_alert(t0)));
        assert!(log.push(memory_alert(t0 + Duration::seconds(61))));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_different_severity_is_not_a_duplicate() {
        let mut log = AlertLog::new(50, std::time::Duration::from_secs(60));
        let t0 = Utc::now();

        let mut critical = memory_alert(t0);
        critical.severity = AlertSeverity::Critical;

        assert!(log.push(memory_alert(t0)));
        assert!(log.push(critical));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut log = AlertLog::new(3, std::time::Duration::ZERO);
        let t0 = Utc::now();

        for i in 0..5 {
            let mut alert = memory_alert(t0 + Duration::seconds(i));
            alert.value = i as f64;
            assert!(log.push(alert));
        }

        let values: Vec<f64> = log.alerts().iter().map(|a| a.value).collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0]);

        log.clear();
        assert!(log.is_empty());
    }
}
