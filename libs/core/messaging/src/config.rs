//! Flat settings for a queue or topic-subscription consumer.

use std::time::Duration;

use serde::Deserialize;

fn default_max_auto_lock_renewal() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_max_concurrent_calls() -> usize {
    10
}

/// Configuration for one messaging entity, bound from the host's
/// configuration source as a flat section.
///
/// A queue is addressed by `entity_name` alone; a topic subscription by
/// `entity_name` plus `subscription_name`.
///
/// # Example
///
/// ```rust
/// use messaging::MessagingSettings;
///
/// let settings = MessagingSettings::new("orders", "amqp://broker.internal")
///     .with_subscription("billing")
///     .with_max_concurrent_calls(4);
///
/// assert_eq!(settings.subscription_name.as_deref(), Some("billing"));
/// assert!(!settings.auto_complete);
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct MessagingSettings {
    /// Queue or topic name.
    pub entity_name: String,

    /// Subscription name when the entity is a topic; `None` for queues.
    #[serde(default)]
    pub subscription_name: Option<String>,

    /// Connection string for the broker.
    pub connection_string: String,

    /// Maximum duration the message lock is automatically renewed while a
    /// handler is still working. Default: 30 minutes.
    #[serde(default = "default_max_auto_lock_renewal")]
    pub max_auto_lock_renewal: Duration,

    /// Maximum number of deliveries handled concurrently. Default: 10.
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,

    /// Broker-native automatic acknowledgment. When enabled the worker
    /// skips its explicit complete/abandon decisions. Default: off, so the
    /// explicit lifecycle policy applies.
    #[serde(default)]
    pub auto_complete: bool,
}

impl MessagingSettings {
    /// Create settings for a queue with defaults for everything else.
    pub fn new(entity_name: impl Into<String>, connection_string: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            subscription_name: None,
            connection_string: connection_string.into(),
            max_auto_lock_renewal: default_max_auto_lock_renewal(),
            max_concurrent_calls: default_max_concurrent_calls(),
            auto_complete: false,
        }
    }

    /// Address a topic subscription instead of a queue.
    pub fn with_subscription(mut self, subscription: impl Into<String>) -> Self {
        self.subscription_name = Some(subscription.into());
        self
    }

    /// Set the maximum lock auto-renewal duration.
    pub fn with_max_auto_lock_renewal(mut self, duration: Duration) -> Self {
        self.max_auto_lock_renewal = duration;
        self
    }

    /// Set the maximum number of concurrent deliveries.
    pub fn with_max_concurrent_calls(mut self, count: usize) -> Self {
        self.max_concurrent_calls = count.max(1);
        self
    }

    /// Enable or disable broker-native automatic acknowledgment.
    pub fn with_auto_complete(mut self, enabled: bool) -> Self {
        self.auto_complete = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = MessagingSettings::new("orders", "amqp://localhost");

        assert_eq!(settings.entity_name, "orders");
        assert!(settings.subscription_name.is_none());
        assert_eq!(settings.max_auto_lock_renewal, Duration::from_secs(1800));
        assert_eq!(settings.max_concurrent_calls, 10);
        assert!(!settings.auto_complete);
    }

    #[test]
    fn test_builder() {
        let settings = MessagingSettings::new("orders", "amqp://localhost")
            .with_subscription("audit")
            .with_max_concurrent_calls(0)
            .with_auto_complete(true);

        assert_eq!(settings.subscription_name.as_deref(), Some("audit"));
        // Concurrency is clamped to at least one delivery at a time.
        assert_eq!(settings.max_concurrent_calls, 1);
        assert!(settings.auto_complete);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let settings: MessagingSettings = serde_json::from_str(
            r#"{"entity_name": "orders", "connection_string": "amqp://broker"}"#,
        )
        .unwrap();

        assert_eq!(settings.max_concurrent_calls, 10);
        assert!(!settings.auto_complete);
        assert!(settings.subscription_name.is_none());
    }
}
