//! Consumer contract and per-delivery consumer resolution.

use async_trait::async_trait;

use crate::envelope::Message;
use crate::error::ConsumeError;

/// Contract for consuming messages of a specific payload type.
///
/// Returning `Err` is the sole signal of application-level failure;
/// returning `Ok(())` the sole signal of success. The consumer never
/// settles the message itself; acknowledgment policy belongs to the
/// processing loop, keeping business logic decoupled from the broker.
///
/// On shutdown the worker cancels in-flight `consume` futures by dropping
/// them, so implementations should be cancel safe at their await points.
///
/// # Example
///
/// ```rust,ignore
/// struct OrderPlacedConsumer {
///     orders: Arc<OrderRepository>,
/// }
///
/// #[async_trait]
/// impl MessageConsumer<OrderPlaced> for OrderPlacedConsumer {
///     async fn consume(&self, message: &Message<OrderPlaced>) -> Result<(), ConsumeError> {
///         self.orders
///             .record(&message.body)
///             .await
///             .map_err(|e| ConsumeError::with_source("recording order failed", e))
///     }
/// }
/// ```
#[async_trait]
pub trait MessageConsumer<T>: Send + Sync {
    /// Consume one message.
    async fn consume(&self, message: &Message<T>) -> Result<(), ConsumeError>;
}

/// Factory resolving one consumer instance per delivery.
///
/// The worker calls [`create`](ConsumerFactory::create) for every inbound
/// delivery and drops the returned consumer when that delivery's handling
/// ends, on every exit path, including abandon and dead-letter. Per-
/// delivery resources therefore live in the consumer and are released by
/// its `Drop`.
///
/// Any `Fn() -> C` closure is a factory, which keeps simple call sites
/// free of boilerplate:
///
/// ```rust,ignore
/// let worker = QueueWorker::new(connection, settings, || OrderPlacedConsumer::new(repo.clone()));
/// ```
pub trait ConsumerFactory<T>: Send + Sync {
    /// The consumer type this factory resolves.
    type Consumer: MessageConsumer<T> + Send;

    /// Resolve a consumer scoped to one delivery.
    fn create(&self) -> Self::Consumer;
}

impl<T, C, F> ConsumerFactory<T> for F
where
    F: Fn() -> C + Send + Sync,
    C: MessageConsumer<T> + Send,
{
    type Consumer = C;

    fn create(&self) -> C {
        (self)()
    }
}

/// A consumer that accepts every message (for testing).
#[derive(Debug, Clone, Default)]
pub struct NoOpConsumer;

#[async_trait]
impl<T: Send + Sync> MessageConsumer<T> for NoOpConsumer {
    async fn consume(&self, _message: &Message<T>) -> Result<(), ConsumeError> {
        Ok(())
    }
}

/// A consumer that rejects every message (for testing).
#[derive(Debug, Clone)]
pub struct FailingConsumer {
    message: String,
}

impl FailingConsumer {
    /// Create a consumer failing with the given error message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl<T: Send + Sync> MessageConsumer<T> for FailingConsumer {
    async fn consume(&self, _message: &Message<T>) -> Result<(), ConsumeError> {
        Err(ConsumeError::new(&self.message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_consumer_accepts() {
        let consumer = NoOpConsumer;
        let message = Message::new("hello".to_string());

        assert!(consumer.consume(&message).await.is_ok());
    }

    #[tokio::test]
    async fn test_failing_consumer_rejects() {
        let consumer = FailingConsumer::new("downstream offline");
        let message = Message::new(1u32);

        let err = consumer.consume(&message).await.unwrap_err();
        assert_eq!(err.to_string(), "downstream offline");
    }

    #[tokio::test]
    async fn test_closure_factory_resolves_per_delivery() {
        let factory = || NoOpConsumer;

        let first = ConsumerFactory::<String>::create(&factory);
        let second = ConsumerFactory::<String>::create(&factory);

        let message = Message::new("m".to_string());
        assert!(first.consume(&message).await.is_ok());
        assert!(second.consume(&message).await.is_ok());
    }
}
