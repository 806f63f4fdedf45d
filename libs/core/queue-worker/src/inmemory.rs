//! In-memory broker backend.
//!
//! Implements the full broker boundary against process-local queues. Used
//! by the integration tests and for local development runs without a live
//! broker. Besides the queue itself it keeps ledgers of completed,
//! abandoned and dead-lettered messages, applies a delivery-count poison
//! policy on abandon, and offers fault-injection hooks so recovery
//! behavior can be driven deterministically.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use messaging::{MessageContext, SettleError, Settlement};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::broker::{
    BrokerConnection, BrokerSender, Delivery, DeliveryMetadata, EntityPath, OutboundMessage,
    ProcessorError, ProcessorEvent, ProcessorOptions, QueueProcessor,
};
use crate::error::BrokerError;

const PUMP_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// A wire message held by the in-memory broker.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    /// Serialized payload text.
    pub body: String,
    /// Payload content type.
    pub content_type: String,
    /// Message id.
    pub message_id: String,
    /// Correlation id.
    pub correlation_id: Option<String>,
    /// Subject / routing label.
    pub subject: Option<String>,
    /// Time-to-live.
    pub time_to_live: Option<Duration>,
    /// Custom properties.
    pub properties: HashMap<String, serde_json::Value>,
    /// Number of times the message has been delivered.
    pub delivery_count: u32,
}

impl From<OutboundMessage> for StoredMessage {
    fn from(message: OutboundMessage) -> Self {
        Self {
            body: message.body,
            content_type: message.content_type,
            message_id: message.message_id,
            correlation_id: message.correlation_id,
            subject: message.subject,
            time_to_live: message.time_to_live,
            properties: message.properties,
            delivery_count: 0,
        }
    }
}

/// A message on the dead-letter ledger, annotated for inspection.
#[derive(Debug, Clone)]
pub struct DeadLetteredMessage {
    /// The wire message as it was when dead-lettered.
    pub message: StoredMessage,
    /// Dead-letter reason.
    pub reason: String,
    /// Optional error description.
    pub description: Option<String>,
    /// When the message was dead-lettered.
    pub dead_lettered_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<StoredMessage>,
    completed: Vec<StoredMessage>,
    dead_lettered: Vec<DeadLetteredMessage>,
    abandoned: u64,
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<String, QueueState>,
}

struct ProcessorShared {
    entity: String,
    active: AtomicBool,
    event_tx: Mutex<Option<mpsc::Sender<ProcessorEvent>>>,
}

/// Process-local broker.
///
/// Clones share the same state, so tests keep a handle for enqueueing and
/// ledger assertions while the worker owns another as its connection.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    processors: Arc<Mutex<Vec<Arc<ProcessorShared>>>>,
    fail_next_starts: Arc<AtomicU32>,
    start_attempts: Arc<AtomicU32>,
    max_delivery_count: u32,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Create a broker with the default poison policy (10 deliveries).
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            processors: Arc::new(Mutex::new(Vec::new())),
            fail_next_starts: Arc::new(AtomicU32::new(0)),
            start_attempts: Arc::new(AtomicU32::new(0)),
            max_delivery_count: 10,
        }
    }

    /// Set how many deliveries a message survives before an abandon moves
    /// it to the dead-letter ledger instead of requeueing it.
    pub fn with_max_delivery_count(mut self, count: u32) -> Self {
        self.max_delivery_count = count.max(1);
        self
    }

    /// Enqueue a wire message.
    pub fn enqueue(&self, entity: &str, message: OutboundMessage) {
        let mut state = self.lock_state();
        state
            .queues
            .entry(entity.to_string())
            .or_default()
            .pending
            .push_back(StoredMessage::from(message));
    }

    /// Enqueue a bare JSON payload with generated metadata.
    pub fn enqueue_json(&self, entity: &str, body: impl Into<String>) {
        self.enqueue(
            entity,
            OutboundMessage {
                body: body.into(),
                content_type: "application/json".to_string(),
                message_id: uuid::Uuid::new_v4().to_string(),
                correlation_id: None,
                subject: None,
                time_to_live: None,
                properties: HashMap::new(),
            },
        );
    }

    /// Messages waiting for delivery.
    pub fn pending(&self, entity: &str) -> usize {
        self.lock_state()
            .queues
            .get(entity)
            .map_or(0, |q| q.pending.len())
    }

    /// Completed-message ledger.
    pub fn completed(&self, entity: &str) -> Vec<StoredMessage> {
        self.lock_state()
            .queues
            .get(entity)
            .map_or_else(Vec::new, |q| q.completed.clone())
    }

    /// Dead-letter ledger.
    pub fn dead_lettered(&self, entity: &str) -> Vec<DeadLetteredMessage> {
        self.lock_state()
            .queues
            .get(entity)
            .map_or_else(Vec::new, |q| q.dead_lettered.clone())
    }

    /// How many times messages on this entity have been abandoned.
    pub fn abandoned(&self, entity: &str) -> u64 {
        self.lock_state()
            .queues
            .get(entity)
            .map_or(0, |q| q.abandoned)
    }

    /// How many times processors attempted to start, failed attempts
    /// included.
    pub fn start_attempts(&self) -> u32 {
        self.start_attempts.load(Ordering::SeqCst)
    }

    /// Make the next `count` processor starts fail.
    pub fn fail_next_starts(&self, count: u32) {
        self.fail_next_starts.store(count, Ordering::SeqCst);
    }

    /// Report a broker fault on the most recent processor: the
    /// subscription goes inactive and an error event is emitted, as a
    /// degraded connection would.
    pub async fn fault(&self, description: &str) {
        let shared = {
            let processors = self.lock_processors();
            processors.last().cloned()
        };

        if let Some(shared) = shared {
            shared.active.store(false, Ordering::SeqCst);
            let tx = shared
                .event_tx
                .lock()
                .expect("processor event lock poisoned")
                .clone();
            if let Some(tx) = tx {
                let _ = tx
                    .send(ProcessorEvent::Error(ProcessorError {
                        source_operation: "receive".to_string(),
                        namespace: "inmemory".to_string(),
                        entity: shared.entity.clone(),
                        error: BrokerError::connection(description),
                    }))
                    .await;
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().expect("broker state lock poisoned")
    }

    fn lock_processors(&self) -> MutexGuard<'_, Vec<Arc<ProcessorShared>>> {
        self.processors.lock().expect("processor list lock poisoned")
    }
}

#[async_trait]
impl BrokerConnection for InMemoryBroker {
    async fn create_processor(
        &self,
        entity: &EntityPath,
        options: ProcessorOptions,
    ) -> Result<Box<dyn QueueProcessor>, BrokerError> {
        let shared = Arc::new(ProcessorShared {
            entity: entity.address(),
            active: AtomicBool::new(false),
            event_tx: Mutex::new(None),
        });
        self.lock_processors().push(shared.clone());

        Ok(Box::new(InMemoryProcessor {
            state: self.state.clone(),
            shared,
            options,
            fail_next_starts: self.fail_next_starts.clone(),
            start_attempts: self.start_attempts.clone(),
            max_delivery_count: self.max_delivery_count,
            pump: None,
        }))
    }

    async fn create_sender(&self, entity: &str) -> Result<Box<dyn BrokerSender>, BrokerError> {
        Ok(Box::new(InMemorySender {
            state: self.state.clone(),
            entity: entity.to_string(),
        }))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        for shared in self.lock_processors().iter() {
            shared.active.store(false, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct InMemoryProcessor {
    state: Arc<Mutex<BrokerState>>,
    shared: Arc<ProcessorShared>,
    options: ProcessorOptions,
    fail_next_starts: Arc<AtomicU32>,
    start_attempts: Arc<AtomicU32>,
    max_delivery_count: u32,
    pump: Option<JoinHandle<()>>,
}

#[async_trait]
impl QueueProcessor for InMemoryProcessor {
    async fn start(&mut self) -> Result<mpsc::Receiver<ProcessorEvent>, BrokerError> {
        self.start_attempts.fetch_add(1, Ordering::SeqCst);

        let injected_failure = self
            .fail_next_starts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected_failure {
            return Err(BrokerError::subscription("injected start failure"));
        }

        if let Some(pump) = self.pump.take() {
            pump.abort();
        }

        let capacity = self.options.max_concurrent_calls.max(1) * 2;
        let (tx, rx) = mpsc::channel(capacity);
        *self
            .shared
            .event_tx
            .lock()
            .expect("processor event lock poisoned") = Some(tx.clone());
        self.shared.active.store(true, Ordering::SeqCst);

        debug!(entity = %self.shared.entity, "In-memory processor started");

        self.pump = Some(tokio::spawn(pump(
            self.state.clone(),
            self.shared.clone(),
            tx,
            self.options.auto_complete,
            self.max_delivery_count,
        )));

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), BrokerError> {
        self.shared.active.store(false, Ordering::SeqCst);
        self.shared
            .event_tx
            .lock()
            .expect("processor event lock poisoned")
            .take();
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        debug!(entity = %self.shared.entity, "In-memory processor stopped");
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }
}

async fn pump(
    state: Arc<Mutex<BrokerState>>,
    shared: Arc<ProcessorShared>,
    tx: mpsc::Sender<ProcessorEvent>,
    auto_complete: bool,
    max_delivery_count: u32,
) {
    loop {
        if !shared.active.load(Ordering::SeqCst) {
            break;
        }

        let next = {
            let mut guard = state.lock().expect("broker state lock poisoned");
            let queue = guard.queues.entry(shared.entity.clone()).or_default();
            let mut message = queue.pending.pop_front();
            if let Some(stored) = message.as_mut() {
                stored.delivery_count += 1;
                if auto_complete {
                    queue.completed.push(stored.clone());
                }
            }
            message
        };

        match next {
            Some(stored) => {
                let metadata = DeliveryMetadata {
                    message_id: Some(stored.message_id.clone()),
                    correlation_id: stored.correlation_id.clone(),
                    subject: stored.subject.clone(),
                    time_to_live: stored.time_to_live,
                    properties: stored.properties.clone(),
                    delivery_count: stored.delivery_count,
                };
                let delivery = Delivery {
                    body: stored.body.clone(),
                    metadata,
                    context: MessageContext::new(Box::new(InMemorySettlement {
                        state: state.clone(),
                        entity: shared.entity.clone(),
                        max_delivery_count,
                        message: Some(stored),
                    })),
                };

                if tx.send(ProcessorEvent::Delivery(delivery)).await.is_err() {
                    break;
                }
            }
            None => tokio::time::sleep(PUMP_POLL_INTERVAL).await,
        }
    }
}

struct InMemorySettlement {
    state: Arc<Mutex<BrokerState>>,
    entity: String,
    max_delivery_count: u32,
    message: Option<StoredMessage>,
}

impl InMemorySettlement {
    fn take_message(&mut self) -> Result<StoredMessage, SettleError> {
        self.message
            .take()
            .ok_or_else(|| SettleError::new("message already settled"))
    }
}

#[async_trait]
impl Settlement for InMemorySettlement {
    async fn complete(&mut self) -> Result<(), SettleError> {
        let message = self.take_message()?;
        let mut state = self.state.lock().expect("broker state lock poisoned");
        state
            .queues
            .entry(self.entity.clone())
            .or_default()
            .completed
            .push(message);
        Ok(())
    }

    async fn abandon(&mut self) -> Result<(), SettleError> {
        let message = self.take_message()?;
        let mut state = self.state.lock().expect("broker state lock poisoned");
        let queue = state.queues.entry(self.entity.clone()).or_default();
        queue.abandoned += 1;

        // Poison policy: past the delivery-count budget the broker parks
        // the message instead of requeueing it.
        if message.delivery_count >= self.max_delivery_count {
            queue.dead_lettered.push(DeadLetteredMessage {
                message,
                reason: "MaxDeliveryCountExceeded".to_string(),
                description: None,
                dead_lettered_at: Utc::now(),
            });
        } else {
            queue.pending.push_back(message);
        }
        Ok(())
    }

    async fn dead_letter(
        &mut self,
        reason: &str,
        description: Option<&str>,
    ) -> Result<(), SettleError> {
        let message = self.take_message()?;
        let mut state = self.state.lock().expect("broker state lock poisoned");
        state
            .queues
            .entry(self.entity.clone())
            .or_default()
            .dead_lettered
            .push(DeadLetteredMessage {
                message,
                reason: reason.to_string(),
                description: description.map(str::to_string),
                dead_lettered_at: Utc::now(),
            });
        Ok(())
    }
}

struct InMemorySender {
    state: Arc<Mutex<BrokerState>>,
    entity: String,
}

#[async_trait]
impl BrokerSender for InMemorySender {
    async fn send(&self, message: OutboundMessage) -> Result<(), BrokerError> {
        let mut state = self.state.lock().expect("broker state lock poisoned");
        state
            .queues
            .entry(self.entity.clone())
            .or_default()
            .pending
            .push_back(StoredMessage::from(message));
        Ok(())
    }
}
