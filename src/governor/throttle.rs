use crate::config::{RequestGovernorConfig, ThrottlePolicy};
use crate::monitor::PerformanceSummary;
use std::time::Duration;

/// Whether a new request should be delayed before it is queued
pub fn should_throttle(
    stressed: bool,
    summary: &PerformanceSummary,
    queue_length: usize,
    config: &RequestGovernorConfig,
) -> bool {
    if stressed {
        return true;
    }

    let usage_limit = config.throttle_threshold * 100.0;
    if summary.avg_memory_percent > usage_limit || summary.avg_cpu_percent > usage_limit {
        return true;
    }

    queue_length as f64 > config.max_queue_size as f64 * config.throttle.queue_pressure_ratio
}

/// `base × (1 + min(queue/max, 1)) × (multiplier if stressed)`
pub fn throttle_delay(
    policy: &ThrottlePolicy,
    queue_length: usize,
    max_queue_size: usize,
    stressed: bool,
) -> Duration {
    let occupancy = if max_queue_size == 0 {
        if queue_length == 0 {
            0.0
        } else {
            1.0
        }
    } else {
        (queue_length as f64 / max_queue_size as f64).min(1.0)
    };

    let stress_factor = if stressed {
        policy.stress_multiplier
    } else {
        1.0
    };

    let delay_ms = policy.base_delay_ms as f64 * (1.0 + occupancy) * stress_factor;
    Duration::from_millis(delay_ms.round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stressed_delay_with_seven_of_ten_queued() {
        let delay = throttle_delay(&ThrottlePolicy::default(), 7, 10, true);
        assert_eq!(delay, Duration::from_millis(3400));
    }

    #[test]
    fn test_delay_bounds() {
        let policy = ThrottlePolicy::default();
        assert_eq!(throttle_delay(&policy, 0, 10, false), Duration::from_millis(1000));
        assert_eq!(throttle_delay(&policy, 25, 10, false), Duration::from_millis(2000));
        assert_eq!(throttle_delay(&policy, 25, 10, true), Duration::from_millis(4000));
        assert_eq!(throttle_delay(&policy, 0, 0, false), Duration::from_millis(1000));
    }

    #[test]
    fn test_should_throttle_conditions() {
        let config = RequestGovernorConfig {
            max_queue_size: 10,
            ..Default::default()
        };
        let calm = PerformanceSummary::default();

        assert!(!should_throttle(false, &calm, 0, &config));
        assert!(should_throttle(true, &calm, 0, &config));
        assert!(!should_throttle(false, &calm, 7, &config));
        assert!(should_throttle(false, &calm, 8, &config));

        let busy = PerformanceSummary {
            avg_cpu_percent: 81.0,
            ..Default::default()
        };
        assert!(should_throttle(false, &busy, 0, &config));
    }
}
