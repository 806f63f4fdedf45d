//! Queue worker framework for reliable message consumption.
//!
//! This library sits between a message-queue broker and application-level
//! [`MessageConsumer`](messaging::MessageConsumer) implementations. It owns
//! the receive-dispatch-acknowledge loop: deliveries are decoded into typed
//! envelopes, dispatched to a per-delivery consumer instance, and settled
//! exactly once (complete, abandon, or dead-letter). When the broker
//! subscription degrades, a supervisory restart loop recovers it with
//! bounded exponential backoff.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐     ┌─────────────────────┐     ┌────────────────┐
//! │   QueueSender  │────▶│       Broker        │────▶│  QueueWorker   │
//! │ (serialize +   │     │ (queue / topic +    │     │ (decode, merge │
//! │  transmit)     │     │  subscription)      │     │  dispatch,     │
//! └────────────────┘     └─────────────────────┘     │  settle)       │
//!                                  │                 └────────────────┘
//!                                  ▼                         │
//!                        ┌─────────────────┐        ┌────────────────┐
//!                        │   Dead-letter   │        │ MessageConsumer│
//!                        │    channel      │        │ (your logic)   │
//!                        └─────────────────┘        └────────────────┘
//! ```
//!
//! # Failure policy
//!
//! - Malformed payload: dead-letter `DeserializationFailed`, consumer not
//!   invoked.
//! - Null payload: dead-letter `DeserializationReturnedNull`.
//! - Consumer error: abandon. Application failures may be transient, so
//!   the broker redelivers; its delivery-count poison policy is the outer
//!   safety net.
//! - Broker-reported errors: logged; when the subscription is no longer
//!   active, it is restarted up to 3 times with 5 s / 10 s / 20 s delays.
//!   Exhausting the budget leaves the processor stopped and reports
//!   [`ProcessorHealth::TerminallyFailed`] without crashing the host.
//!
//! # Key Features
//!
//! - **Bounded concurrency**: at most `max_concurrent_calls` deliveries
//!   in flight, enforced by a semaphore over the delivery event channel
//! - **Scoped consumers**: one consumer instance per delivery, dropped on
//!   every exit path
//! - **Graceful shutdown**: stop the subscription, drain in-flight
//!   deliveries, release the connection
//! - **In-memory backend**: [`InMemoryBroker`] for tests and local runs

mod broker;
mod error;
mod inmemory;
pub mod metrics;
mod recovery;
mod sender;
mod worker;

pub use broker::{
    BrokerConnection, BrokerSender, Delivery, DeliveryMetadata, EntityPath, OutboundMessage,
    ProcessorError, ProcessorEvent, ProcessorOptions, QueueProcessor,
};
pub use error::{BrokerError, WorkerError};
pub use inmemory::{DeadLetteredMessage, InMemoryBroker, StoredMessage};
pub use metrics::WorkerMetrics;
pub use recovery::{ProcessorHealth, RecoveryPolicy};
pub use sender::QueueSender;
pub use worker::QueueWorker;

// Re-export from messaging
pub use messaging::{
    ConsumerFactory, DeadLetterReason, Message, MessageConsumer, MessageContext,
    MessagingSettings, Settlement, SettlementState,
};
