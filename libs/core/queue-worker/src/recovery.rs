//! Processor health states and the supervised-restart policy.

use std::time::Duration;

use strum::Display;

/// Externally observable health of the processing loop.
///
/// Published over a `watch` channel so hosts can alert on recovery
/// progress and terminal failure without the process crashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ProcessorHealth {
    /// Not started yet, or cleanly shut down.
    Stopped,
    /// The subscription is receiving.
    Running,
    /// The broker reported an error and the subscription is no longer
    /// active.
    StoppedFaulted,
    /// A restart sequence is in progress.
    Restarting,
    /// The restart budget was exhausted; the processor is left stopped
    /// until another broker error event arrives naturally.
    TerminallyFailed,
}

/// Bounded exponential backoff for subscription restarts.
///
/// The delay before attempt `n` is `initial_delay * 2^(n-1)`: with the
/// defaults the sequence is 5 s, 10 s, 20 s. A fresh budget is granted for
/// every broker error event; the policy never self-schedules beyond it.
#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    /// Number of restart attempts per error event.
    pub max_attempts: u32,
    /// Delay before the first attempt; doubles after each failure.
    pub initial_delay: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(5),
        }
    }
}

impl RecoveryPolicy {
    /// Delay before the given 1-based attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.initial_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_budget() {
        let policy = RecoveryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = RecoveryPolicy::default();

        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(20));
    }

    #[test]
    fn test_health_rendering() {
        assert_eq!(ProcessorHealth::Running.to_string(), "running");
        assert_eq!(
            ProcessorHealth::StoppedFaulted.to_string(),
            "stopped_faulted"
        );
        assert_eq!(
            ProcessorHealth::TerminallyFailed.to_string(),
            "terminally_failed"
        );
    }
}
