//! Message lifecycle guard.
//!
//! A received message must end in exactly one of three terminal actions:
//! completed, abandoned, or dead-lettered. [`MessageContext`] wraps the
//! broker's native settlement primitives and enforces that at most one
//! terminal action ever reaches the broker for a given delivery.

use async_trait::async_trait;
use strum::Display;
use tracing::debug;

use crate::error::{DeadLetterReason, SettleError};

/// Broker-native settlement primitives for one delivery.
///
/// Queue backends implement this for whatever their wire protocol calls
/// acknowledgment, release and dead-lettering. Implementations do not need
/// to guard against repeated calls; [`MessageContext`] does that.
#[async_trait]
pub trait Settlement: Send {
    /// Remove the message from the queue (successful processing).
    async fn complete(&mut self) -> Result<(), SettleError>;

    /// Return the message to the queue for redelivery.
    async fn abandon(&mut self) -> Result<(), SettleError>;

    /// Move the message to the dead-letter channel, annotated with a
    /// reason and an optional description.
    async fn dead_letter(
        &mut self,
        reason: &str,
        description: Option<&str>,
    ) -> Result<(), SettleError>;
}

/// Lifecycle state of a delivery.
///
/// Transitions are one-way: `Pending` moves to exactly one terminal state
/// and never leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SettlementState {
    /// No terminal action has reached the broker yet.
    Pending,
    /// The message was completed and removed from the queue.
    Completed,
    /// The message was returned to the queue for redelivery.
    Abandoned,
    /// The message was moved to the dead-letter channel.
    DeadLettered,
}

/// Per-delivery guard over the broker's settlement primitives.
///
/// Only the first successful terminal call reaches the broker; every later
/// call is a no-op returning `Ok`. A failed broker call leaves the state
/// `Pending` so the caller can retry or let the message redeliver when its
/// lock expires. The same applies when an in-flight call is cancelled by
/// dropping its future before the broker acknowledged.
///
/// The guard is owned by the processing loop for the duration of one
/// delivery and is never shared across deliveries.
pub struct MessageContext {
    settlement: Box<dyn Settlement>,
    state: SettlementState,
}

impl MessageContext {
    /// Wrap broker settlement primitives in a fresh, pending guard.
    pub fn new(settlement: Box<dyn Settlement>) -> Self {
        Self {
            settlement,
            state: SettlementState::Pending,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SettlementState {
        self.state
    }

    /// Whether a terminal action has already reached the broker.
    pub fn is_settled(&self) -> bool {
        self.state != SettlementState::Pending
    }

    /// Mark the message as successfully processed and remove it from the
    /// queue. No-op if the delivery is already settled.
    pub async fn complete(&mut self) -> Result<(), SettleError> {
        if self.is_settled() {
            debug!(state = %self.state, "Ignoring complete on settled delivery");
            return Ok(());
        }
        self.settlement.complete().await?;
        self.state = SettlementState::Completed;
        Ok(())
    }

    /// Return the message to the queue for redelivery. No-op if the
    /// delivery is already settled.
    pub async fn abandon(&mut self) -> Result<(), SettleError> {
        if self.is_settled() {
            debug!(state = %self.state, "Ignoring abandon on settled delivery");
            return Ok(());
        }
        self.settlement.abandon().await?;
        self.state = SettlementState::Abandoned;
        Ok(())
    }

    /// Move the message to the dead-letter channel. No-op if the delivery
    /// is already settled.
    pub async fn dead_letter(
        &mut self,
        reason: DeadLetterReason,
        description: Option<String>,
    ) -> Result<(), SettleError> {
        if self.is_settled() {
            debug!(state = %self.state, "Ignoring dead-letter on settled delivery");
            return Ok(());
        }
        self.settlement
            .dead_letter(&reason.to_string(), description.as_deref())
            .await?;
        self.state = SettlementState::DeadLettered;
        Ok(())
    }
}

impl std::fmt::Debug for MessageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageContext")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingSettlement {
        completes: Arc<AtomicUsize>,
        abandons: Arc<AtomicUsize>,
        dead_letters: Arc<Mutex<Vec<(String, Option<String>)>>>,
        fail_next: bool,
    }

    #[async_trait]
    impl Settlement for RecordingSettlement {
        async fn complete(&mut self) -> Result<(), SettleError> {
            if self.fail_next {
                self.fail_next = false;
                return Err(SettleError::new("broker unavailable"));
            }
            self.completes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn abandon(&mut self) -> Result<(), SettleError> {
            self.abandons.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn dead_letter(
            &mut self,
            reason: &str,
            description: Option<&str>,
        ) -> Result<(), SettleError> {
            self.dead_letters
                .lock()
                .unwrap()
                .push((reason.to_string(), description.map(str::to_string)));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_only_first_terminal_action_reaches_broker() {
        let completes = Arc::new(AtomicUsize::new(0));
        let abandons = Arc::new(AtomicUsize::new(0));
        let dead_letters = Arc::new(Mutex::new(Vec::new()));
        let settlement = RecordingSettlement {
            completes: completes.clone(),
            abandons: abandons.clone(),
            dead_letters: dead_letters.clone(),
            ..Default::default()
        };

        let mut context = MessageContext::new(Box::new(settlement));
        assert_eq!(context.state(), SettlementState::Pending);

        context.complete().await.unwrap();
        assert_eq!(context.state(), SettlementState::Completed);

        // Every later call is a no-op returning Ok.
        context.complete().await.unwrap();
        context.abandon().await.unwrap();
        context
            .dead_letter(DeadLetterReason::Other("late".into()), None)
            .await
            .unwrap();

        assert_eq!(completes.load(Ordering::SeqCst), 1);
        assert_eq!(abandons.load(Ordering::SeqCst), 0);
        assert!(dead_letters.lock().unwrap().is_empty());
        assert_eq!(context.state(), SettlementState::Completed);
    }

    #[tokio::test]
    async fn test_failed_settlement_leaves_state_pending() {
        let completes = Arc::new(AtomicUsize::new(0));
        let settlement = RecordingSettlement {
            completes: completes.clone(),
            fail_next: true,
            ..Default::default()
        };

        let mut context = MessageContext::new(Box::new(settlement));

        assert!(context.complete().await.is_err());
        assert_eq!(context.state(), SettlementState::Pending);

        // A retry after the failure still reaches the broker once.
        context.complete().await.unwrap();
        assert_eq!(completes.load(Ordering::SeqCst), 1);
        assert_eq!(context.state(), SettlementState::Completed);
    }

    #[tokio::test]
    async fn test_dead_letter_passes_reason_and_description() {
        let settlement = RecordingSettlement::default();
        let dead_letters = settlement.dead_letters.clone();

        let mut context = MessageContext::new(Box::new(settlement));
        context
            .dead_letter(
                DeadLetterReason::DeserializationFailed,
                Some("expected value at line 1".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(context.state(), SettlementState::DeadLettered);
        let recorded = dead_letters.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, "DeserializationFailed");
        assert_eq!(
            recorded[0].1.as_deref(),
            Some("expected value at line 1")
        );
    }

    #[tokio::test]
    async fn test_abandon_then_others_noop() {
        let abandons = Arc::new(AtomicUsize::new(0));
        let completes = Arc::new(AtomicUsize::new(0));
        let settlement = RecordingSettlement {
            abandons: abandons.clone(),
            completes: completes.clone(),
            ..Default::default()
        };

        let mut context = MessageContext::new(Box::new(settlement));
        context.abandon().await.unwrap();
        context.complete().await.unwrap();

        assert_eq!(abandons.load(Ordering::SeqCst), 1);
        assert_eq!(completes.load(Ordering::SeqCst), 0);
        assert_eq!(context.state(), SettlementState::Abandoned);
    }
}
