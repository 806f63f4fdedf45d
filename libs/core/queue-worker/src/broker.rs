//! Broker subscription boundary.
//!
//! A broker backend implements three traits: [`BrokerConnection`] (the
//! entry point), [`QueueProcessor`] (a started subscription emitting
//! delivery and error events) and [`BrokerSender`] (outbound transmit).
//!
//! The push-callback model of broker SDKs is re-expressed here as an
//! explicit channel: a started processor publishes [`ProcessorEvent`]s
//! into a bounded `mpsc` channel that the worker loop consumes. This makes
//! the concurrency bound and cancellation behavior explicit and testable
//! instead of relying on hidden SDK thread-pool behavior.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use messaging::{MessageContext, MessagingSettings};
use tokio::sync::mpsc;

use crate::error::BrokerError;

/// Address of a broker entity: a queue, or a topic plus subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityPath {
    /// A point-to-point queue.
    Queue(String),
    /// A named subscription on a topic.
    Subscription {
        /// Topic name.
        topic: String,
        /// Subscription name.
        subscription: String,
    },
}

impl EntityPath {
    /// Derive the entity path from flat settings: a subscription name
    /// turns the entity into a topic subscription, otherwise it is a
    /// queue.
    pub fn from_settings(settings: &MessagingSettings) -> Self {
        match &settings.subscription_name {
            Some(subscription) => Self::Subscription {
                topic: settings.entity_name.clone(),
                subscription: subscription.clone(),
            },
            None => Self::Queue(settings.entity_name.clone()),
        }
    }

    /// The canonical address string (`queue` or `topic/subscription`).
    pub fn address(&self) -> String {
        match self {
            Self::Queue(name) => name.clone(),
            Self::Subscription {
                topic,
                subscription,
            } => format!("{topic}/{subscription}"),
        }
    }
}

impl fmt::Display for EntityPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

/// Options applied when creating a processor for an entity.
#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    /// Maximum duration the delivery lock is renewed automatically.
    pub max_auto_lock_renewal: Duration,
    /// Maximum number of concurrent deliveries handed to the worker.
    pub max_concurrent_calls: usize,
    /// Broker-native automatic acknowledgment.
    pub auto_complete: bool,
}

impl From<&MessagingSettings> for ProcessorOptions {
    fn from(settings: &MessagingSettings) -> Self {
        Self {
            max_auto_lock_renewal: settings.max_auto_lock_renewal,
            max_concurrent_calls: settings.max_concurrent_calls.max(1),
            auto_complete: settings.auto_complete,
        }
    }
}

/// Broker-assigned metadata accompanying one delivery.
#[derive(Debug, Clone, Default)]
pub struct DeliveryMetadata {
    /// Broker-assigned message id, when present on the wire message.
    pub message_id: Option<String>,
    /// Correlation id from the wire message.
    pub correlation_id: Option<String>,
    /// Subject / routing label from the wire message.
    pub subject: Option<String>,
    /// Remaining time-to-live.
    pub time_to_live: Option<Duration>,
    /// Broker-attached custom properties.
    pub properties: HashMap<String, serde_json::Value>,
    /// How many times this message has been delivered (1 for the first
    /// attempt).
    pub delivery_count: u32,
}

/// One message handed to the worker by the broker.
///
/// Carries the raw payload text, the broker metadata, and the lifecycle
/// guard through which exactly one terminal action will be issued.
pub struct Delivery {
    /// Raw payload text as received from the wire.
    pub body: String,
    /// Broker-assigned metadata.
    pub metadata: DeliveryMetadata,
    /// Lifecycle guard for this delivery.
    pub context: MessageContext,
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("metadata", &self.metadata)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// Context for an error reported by the broker layer.
#[derive(Debug)]
pub struct ProcessorError {
    /// The broker operation that failed (e.g. `receive`, `renew_lock`).
    pub source_operation: String,
    /// Broker namespace or host.
    pub namespace: String,
    /// Entity the processor is attached to.
    pub entity: String,
    /// The underlying failure.
    pub error: BrokerError,
}

impl fmt::Display for ProcessorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed for {}/{}: {}",
            self.source_operation, self.namespace, self.entity, self.error
        )
    }
}

/// Event emitted by a started processor.
#[derive(Debug)]
pub enum ProcessorEvent {
    /// An inbound message ready for handling.
    Delivery(Delivery),
    /// A broker-reported processing error.
    Error(ProcessorError),
}

/// A subscription to a queue or topic-subscription.
///
/// `start` arms the subscription and returns the bounded event channel;
/// calling it again after a fault re-arms the subscription with a fresh
/// channel. The processor and its connection are owned by one worker for
/// their whole lifetime.
#[async_trait]
pub trait QueueProcessor: Send {
    /// Start (or restart) receiving. Returns the event stream for this
    /// activation.
    async fn start(&mut self) -> Result<mpsc::Receiver<ProcessorEvent>, BrokerError>;

    /// Stop receiving. In-flight deliveries keep their settlement handles.
    async fn stop(&mut self) -> Result<(), BrokerError>;

    /// Whether the subscription is currently receiving.
    fn is_active(&self) -> bool;
}

/// Wire message produced by the outbound path.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    /// Serialized payload text.
    pub body: String,
    /// Payload content type (`application/json`).
    pub content_type: String,
    /// Message id copied from the envelope.
    pub message_id: String,
    /// Correlation id copied from the envelope.
    pub correlation_id: Option<String>,
    /// Subject copied from the envelope.
    pub subject: Option<String>,
    /// Time-to-live copied from the envelope.
    pub time_to_live: Option<Duration>,
    /// Custom properties copied from the envelope.
    pub properties: HashMap<String, serde_json::Value>,
}

/// Outbound transmit primitive for one queue or topic.
#[async_trait]
pub trait BrokerSender: Send + Sync {
    /// Transmit one wire message.
    async fn send(&self, message: OutboundMessage) -> Result<(), BrokerError>;
}

/// An open connection to a broker.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Create a processor for the given entity.
    async fn create_processor(
        &self,
        entity: &EntityPath,
        options: ProcessorOptions,
    ) -> Result<Box<dyn QueueProcessor>, BrokerError>;

    /// Create a sender for the given queue or topic.
    async fn create_sender(&self, entity: &str) -> Result<Box<dyn BrokerSender>, BrokerError>;

    /// Release the connection.
    async fn close(&self) -> Result<(), BrokerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_path_from_settings() {
        let queue = MessagingSettings::new("orders", "amqp://broker");
        assert_eq!(
            EntityPath::from_settings(&queue),
            EntityPath::Queue("orders".to_string())
        );

        let subscription = queue.clone().with_subscription("billing");
        let path = EntityPath::from_settings(&subscription);
        assert_eq!(path.address(), "orders/billing");
    }

    #[test]
    fn test_processor_options_from_settings() {
        let settings = MessagingSettings::new("orders", "amqp://broker")
            .with_max_concurrent_calls(4)
            .with_auto_complete(true);
        let options = ProcessorOptions::from(&settings);

        assert_eq!(options.max_concurrent_calls, 4);
        assert!(options.auto_complete);
        assert_eq!(options.max_auto_lock_renewal, Duration::from_secs(1800));
    }

    #[test]
    fn test_processor_error_display() {
        let err = ProcessorError {
            source_operation: "receive".to_string(),
            namespace: "inmemory".to_string(),
            entity: "orders".to_string(),
            error: BrokerError::connection("link detached"),
        };

        assert_eq!(
            err.to_string(),
            "receive failed for inmemory/orders: connection error: link detached"
        );
    }
}
