use crate::config::ServerConfig;
use std::time::{Duration, SystemTime};

/// Bounded automatic-restart policy for unexpected server exits
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestartPolicy {
    /// Restarts allowed before giving up
    pub max_attempts: u32,
    /// Delay before each restart attempt
    pub delay: Duration,
}

impl RestartPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.max_restart_attempts, config.restart_delay())
    }

    /// Check whether another restart may be attempted
    pub fn should_restart(&self, tracker: &RestartTracker) -> bool {
        tracker.attempts() < self.max_attempts
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

/// Decision taken after an unexpected exit
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RestartDecision {
    /// Restart after `delay`; `attempt` counts from 1
    Restart { attempt: u32, delay: Duration },
    /// Attempts exhausted, stay stopped
    GiveUp { attempts: u32 },
}

/// Counts restart attempts since the last successful start
#[derive(Debug, Clone, Default)]
pub struct RestartTracker {
    attempts: u32,
    last_attempt: Option<SystemTime>,
}

impl RestartTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_attempt_time(&self) -> Option<SystemTime> {
        self.last_attempt
    }

    /// Consult the policy and, when allowed, record the attempt
    pub fn next(&mut self, policy: &RestartPolicy) -> RestartDecision {
        if !policy.should_restart(self) {
            return RestartDecision::GiveUp {
                attempts: self.attempts,
            };
        }

        self.attempts += 1;
        self.last_attempt = Some(SystemTime::now());
        RestartDecision::Restart {
            attempt: self.attempts,
            delay: policy.delay,
        }
    }

    /// Reset after the server became healthy
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.last_attempt = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_defaults() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay, Duration::from_secs(5));
    }

    #[test]
    fn test_tracker_allows_exactly_max_attempts() {
        let policy = RestartPolicy::new(3, Duration::from_millis(10));
        let mut tracker = RestartTracker::new();

        for expected in 1..=3 {
            assert_eq!(
                tracker.next(&policy),
                RestartDecision::Restart {
                    attempt: expected,
                    delay: Duration::from_millis(10)
                }
            );
        }

        assert_eq!(tracker.next(&policy), RestartDecision::GiveUp { attempts: 3 });
        assert_eq!(tracker.next(&policy), RestartDecision::GiveUp { attempts: 3 });
        assert_eq!(tracker.attempts(), 3);
    }

    #[test]
    fn test_tracker_reset() {
        let policy = RestartPolicy::new(1, Duration::ZERO);
        let mut tracker = RestartTracker::new();

        tracker.next(&policy);
        assert!(tracker.last_attempt_time().is_some());
        assert!(!policy.should_restart(&tracker));

        tracker.reset();
        assert_eq!(tracker.attempts(), 0);
        assert!(tracker.last_attempt_time().is_none());
        assert!(policy.should_restart(&tracker));
    }

    #[test]
    fn test_zero_attempts_never_restarts() {
        let policy = RestartPolicy::new(0, Duration::ZERO);
        let mut tracker = RestartTracker::new();
        assert_eq!(tracker.next(&policy), RestartDecision::GiveUp { attempts: 0 });
    }
}
