//! The receive-dispatch-acknowledge loop.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use messaging::{
    ConsumerFactory, DeadLetterReason, Message, MessageConsumer, MessagingSettings,
};
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::broker::{
    BrokerConnection, Delivery, DeliveryMetadata, EntityPath, ProcessorEvent, ProcessorOptions,
    QueueProcessor,
};
use crate::error::WorkerError;
use crate::metrics::WorkerMetrics;
use crate::recovery::{ProcessorHealth, RecoveryPolicy};

/// Background worker consuming one queue or topic-subscription.
///
/// The worker owns its broker connection and subscription for its whole
/// lifetime. Each inbound delivery is handled on its own task, bounded by
/// `max_concurrent_calls`; a single delivery's steps (decode, dispatch,
/// settle) are strictly sequential while deliveries complete out of order
/// relative to each other.
///
/// # Example
///
/// ```rust,ignore
/// let broker = InMemoryBroker::new();
/// let settings = MessagingSettings::new("orders", "inmemory://local")
///     .with_max_concurrent_calls(8);
///
/// let worker = QueueWorker::new(
///     Box::new(broker.clone()),
///     settings,
///     || OrderPlacedConsumer::new(repo.clone()),
/// )
/// .await?;
///
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// tokio::spawn(worker.run(shutdown_rx));
/// ```
pub struct QueueWorker<T, F>
where
    T: DeserializeOwned + Send + Sync + 'static,
    F: ConsumerFactory<T> + 'static,
{
    connection: Box<dyn BrokerConnection>,
    processor: Box<dyn QueueProcessor>,
    factory: Arc<F>,
    settings: MessagingSettings,
    recovery: RecoveryPolicy,
    semaphore: Arc<Semaphore>,
    metrics: WorkerMetrics,
    health_tx: watch::Sender<ProcessorHealth>,
    health_rx: watch::Receiver<ProcessorHealth>,
    _payload: PhantomData<fn() -> T>,
}

impl<T, F> QueueWorker<T, F>
where
    T: DeserializeOwned + Send + Sync + 'static,
    F: ConsumerFactory<T> + 'static,
    F::Consumer: 'static,
{
    /// Create a worker over an open broker connection.
    ///
    /// The subscription is created here (queue, or topic plus subscription
    /// from the settings) but receiving does not start until
    /// [`run`](QueueWorker::run).
    pub async fn new(
        connection: Box<dyn BrokerConnection>,
        settings: MessagingSettings,
        factory: F,
    ) -> Result<Self, WorkerError> {
        let entity = EntityPath::from_settings(&settings);
        let options = ProcessorOptions::from(&settings);
        let max_concurrent = options.max_concurrent_calls;
        let processor = connection.create_processor(&entity, options).await?;
        let (health_tx, health_rx) = watch::channel(ProcessorHealth::Stopped);

        Ok(Self {
            connection,
            processor,
            factory: Arc::new(factory),
            metrics: WorkerMetrics::new(&entity.address()),
            settings,
            recovery: RecoveryPolicy::default(),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            health_tx,
            health_rx,
            _payload: PhantomData,
        })
    }

    /// Override the restart policy (defaults to 3 attempts at 5 s base).
    pub fn with_recovery_policy(mut self, policy: RecoveryPolicy) -> Self {
        self.recovery = policy;
        self
    }

    /// Watch channel reporting the processor's health.
    pub fn health(&self) -> watch::Receiver<ProcessorHealth> {
        self.health_rx.clone()
    }

    /// Run the worker until the shutdown signal turns true.
    ///
    /// The loop starts the broker subscription and then consumes its event
    /// channel: deliveries are dispatched on bounded concurrent tasks,
    /// error events drive the supervised restart sequence. On shutdown the
    /// subscription is stopped, in-flight deliveries are drained, and the
    /// connection is released.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
        info!(
            entity = %EntityPath::from_settings(&self.settings),
            max_concurrent_calls = %self.settings.max_concurrent_calls,
            auto_complete = %self.settings.auto_complete,
            "Starting queue worker"
        );

        let mut events = self.processor.start().await?;
        self.set_health(ProcessorHealth::Running);

        let mut tasks: JoinSet<()> = JoinSet::new();

        // Separate receiver for the select's shutdown branch so its future's
        // borrow does not conflict with the `&mut shutdown` the arm bodies
        // need (for `recover` and the closed-channel wait). The clone observes
        // the same signal.
        let mut shutdown_signal = shutdown.clone();

        loop {
            tokio::select! {
                _ = async { let _ = shutdown_signal.wait_for(|stop| *stop).await; } => {
                    info!("Shutdown signal received, stopping queue worker");
                    break;
                }

                event = events.recv() => match event {
                    Some(ProcessorEvent::Delivery(delivery)) => {
                        self.metrics.delivery_received();

                        if delivery.metadata.delivery_count > 1 {
                            debug!(
                                message_id = ?delivery.metadata.message_id,
                                delivery_count = delivery.metadata.delivery_count,
                                "Handling redelivered message"
                            );
                        }

                        let permit = self
                            .semaphore
                            .clone()
                            .acquire_owned()
                            .await
                            .expect("semaphore closed");
                        let factory = Arc::clone(&self.factory);
                        let metrics = self.metrics.clone();
                        let auto_complete = self.settings.auto_complete;

                        tasks.spawn(async move {
                            handle_delivery::<T, F>(delivery, factory, metrics, auto_complete)
                                .await;
                            drop(permit);
                        });

                        // Reap tasks that already finished.
                        while tasks.try_join_next().is_some() {}
                    }

                    Some(ProcessorEvent::Error(processor_error)) => {
                        error!(
                            source = %processor_error.source_operation,
                            namespace = %processor_error.namespace,
                            entity = %processor_error.entity,
                            error = %processor_error.error,
                            "Broker reported a processing error"
                        );

                        if !self.processor.is_active() {
                            self.set_health(ProcessorHealth::StoppedFaulted);
                            match self.recover(&mut shutdown).await {
                                Ok(Some(receiver)) => {
                                    events = receiver;
                                    self.set_health(ProcessorHealth::Running);
                                }
                                Ok(None) => break,
                                Err(_) => self.set_health(ProcessorHealth::TerminallyFailed),
                            }
                        }
                    }

                    None => {
                        if *self.health_rx.borrow() == ProcessorHealth::TerminallyFailed {
                            // The processor stays stopped until shutdown;
                            // only a fresh error event could re-arm it, and
                            // a closed channel cannot carry one.
                            let _ = shutdown.wait_for(|stop| *stop).await;
                            break;
                        }

                        warn!("Delivery event channel closed unexpectedly");
                        self.set_health(ProcessorHealth::StoppedFaulted);
                        match self.recover(&mut shutdown).await {
                            Ok(Some(receiver)) => {
                                events = receiver;
                                self.set_health(ProcessorHealth::Running);
                            }
                            Ok(None) => break,
                            Err(_) => self.set_health(ProcessorHealth::TerminallyFailed),
                        }
                    }
                }
            }
        }

        if let Err(e) = self.processor.stop().await {
            warn!(error = %e, "Failed to stop processor cleanly");
        }

        // Let in-flight deliveries finish before releasing the connection.
        while tasks.join_next().await.is_some() {}

        if let Err(e) = self.connection.close().await {
            warn!(error = %e, "Failed to close broker connection cleanly");
        }

        self.set_health(ProcessorHealth::Stopped);
        info!("Queue worker stopped");
        Ok(())
    }

    /// Restart the subscription with bounded exponential backoff.
    ///
    /// Returns the fresh event channel on success, `None` when shutdown
    /// interrupted the sequence, or `RecoveryExhausted` once the budget is
    /// spent.
    async fn recover(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<mpsc::Receiver<ProcessorEvent>>, WorkerError> {
        self.set_health(ProcessorHealth::Restarting);

        for attempt in 1..=self.recovery.max_attempts {
            let delay = self.recovery.delay_for_attempt(attempt);
            warn!(
                attempt,
                max_attempts = self.recovery.max_attempts,
                delay_secs = delay.as_secs(),
                "Waiting before subscription restart"
            );

            tokio::select! {
                _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => return Ok(None),
                _ = tokio::time::sleep(delay) => {}
            }

            match self.processor.start().await {
                Ok(receiver) => {
                    info!(attempt, "Broker subscription restarted");
                    self.metrics.processor_restarted();
                    return Ok(Some(receiver));
                }
                Err(e) => {
                    error!(attempt, error = %e, "Subscription restart failed");
                }
            }
        }

        error!(
            attempts = self.recovery.max_attempts,
            "Restart budget exhausted; processor left stopped"
        );
        Err(WorkerError::RecoveryExhausted {
            attempts: self.recovery.max_attempts,
        })
    }

    fn set_health(&self, health: ProcessorHealth) {
        self.metrics.health(health);
        let _ = self.health_tx.send(health);
    }
}

/// Handle one delivery end to end.
///
/// Whatever goes wrong inside the decode-dispatch-settle steps, the
/// delivery is never left neither acknowledged nor released: any error is
/// answered with a final abandon so the broker can redeliver.
async fn handle_delivery<T, F>(
    delivery: Delivery,
    factory: Arc<F>,
    metrics: WorkerMetrics,
    auto_complete: bool,
) where
    T: DeserializeOwned + Send + Sync,
    F: ConsumerFactory<T>,
{
    let Delivery {
        body,
        metadata,
        mut context,
    } = delivery;

    if let Err(e) =
        dispatch::<T, F>(&body, metadata, &factory, &mut context, auto_complete, &metrics).await
    {
        warn!(error = %e, "Delivery handling failed, abandoning");
        if !auto_complete && !context.is_settled() {
            if let Err(abandon_err) = context.abandon().await {
                error!(
                    error = %abandon_err,
                    "Failed to abandon delivery; the message redelivers when its lock expires"
                );
            }
        }
    }
}

/// Decode the payload, merge broker metadata into the envelope, dispatch
/// to a per-delivery consumer, and settle.
async fn dispatch<T, F>(
    body: &str,
    metadata: DeliveryMetadata,
    factory: &Arc<F>,
    context: &mut messaging::MessageContext,
    auto_complete: bool,
    metrics: &WorkerMetrics,
) -> Result<(), WorkerError>
where
    T: DeserializeOwned + Send + Sync,
    F: ConsumerFactory<T>,
{
    debug!(
        message_id = ?metadata.message_id,
        delivery_count = metadata.delivery_count,
        body_len = body.len(),
        "Received delivery"
    );

    let payload = match serde_json::from_str::<Option<T>>(body) {
        Err(parse_error) => {
            warn!(
                message_id = ?metadata.message_id,
                error = %parse_error,
                "Payload failed to deserialize, dead-lettering"
            );
            context
                .dead_letter(
                    DeadLetterReason::DeserializationFailed,
                    Some(parse_error.to_string()),
                )
                .await?;
            metrics.delivery_dead_lettered("DeserializationFailed");
            return Ok(());
        }
        Ok(None) => {
            warn!(
                message_id = ?metadata.message_id,
                "Payload deserialized to null, dead-lettering"
            );
            context
                .dead_letter(DeadLetterReason::DeserializationReturnedNull, None)
                .await?;
            metrics.delivery_dead_lettered("DeserializationReturnedNull");
            return Ok(());
        }
        Ok(Some(payload)) => payload,
    };

    let message = envelope_from_delivery(payload, metadata);

    // One consumer instance per delivery; dropped on every exit path.
    let consumer = factory.create();

    let started = Instant::now();
    let outcome = consumer.consume(&message).await;
    metrics.consume_duration(started.elapsed());

    match outcome {
        Ok(()) => {
            if !auto_complete {
                context.complete().await?;
            }
            metrics.delivery_completed();
            debug!(message_id = %message.message_id, "Delivery completed");
        }
        Err(consume_error) => {
            warn!(
                message_id = %message.message_id,
                error = %consume_error,
                "Consumer failed, abandoning for redelivery"
            );
            if !auto_complete {
                context.abandon().await?;
            }
            metrics.delivery_abandoned();
        }
    }

    Ok(())
}

/// Build the envelope for a decoded payload, merging broker metadata.
///
/// Broker-supplied id, correlation, subject and TTL take precedence over
/// anything the payload carried; broker properties are folded in with
/// first-write-wins semantics.
fn envelope_from_delivery<T>(payload: T, metadata: DeliveryMetadata) -> Message<T> {
    let mut message = Message::new(payload);
    if let Some(id) = metadata.message_id {
        message.message_id = id;
    }
    message.correlation_id = metadata.correlation_id;
    message.subject = metadata.subject;
    message.time_to_live = metadata.time_to_live;
    message.merge_properties(metadata.properties);
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    #[test]
    fn test_envelope_from_delivery_prefers_broker_metadata() {
        let metadata = DeliveryMetadata {
            message_id: Some("broker-id".to_string()),
            correlation_id: Some("corr-1".to_string()),
            subject: Some("orders".to_string()),
            time_to_live: Some(Duration::from_secs(120)),
            properties: HashMap::from([("region".to_string(), json!("eu"))]),
            delivery_count: 1,
        };

        let message = envelope_from_delivery("payload", metadata);

        assert_eq!(message.message_id, "broker-id");
        assert_eq!(message.correlation_id.as_deref(), Some("corr-1"));
        assert_eq!(message.subject.as_deref(), Some("orders"));
        assert_eq!(message.time_to_live, Some(Duration::from_secs(120)));
        assert_eq!(message.properties["region"], json!("eu"));
    }

    #[test]
    fn test_envelope_from_delivery_generates_id_when_absent() {
        let message = envelope_from_delivery(42u32, DeliveryMetadata::default());

        assert!(!message.message_id.is_empty());
        assert!(message.correlation_id.is_none());
        assert!(message.properties.is_empty());
    }

    #[test]
    fn test_null_body_decodes_to_none() {
        let decoded: Option<u32> = serde_json::from_str("null").unwrap();
        assert!(decoded.is_none());

        assert!(serde_json::from_str::<Option<u32>>("not json").is_err());
        assert_eq!(serde_json::from_str::<Option<u32>>("7").unwrap(), Some(7));
    }
}
