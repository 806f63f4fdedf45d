//! Fire-and-forget realtime fan-out.
//!
//! [`RealtimeSender`] is the push-path contract: deliver a message to all
//! currently connected subscribers, best effort, without acknowledgments
//! or retries. [`BroadcastHub`] is the in-process realization over a
//! `tokio::sync::broadcast` channel; a vendor-hosted push service would be
//! another implementation of the same trait.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

/// Error from a realtime send.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// The underlying push infrastructure rejected the message.
    #[error("send error: {0}")]
    Send(String),
}

/// Contract for broadcasting a message to all connected subscribers.
///
/// Sends are fire-and-forget: delivering to zero subscribers is success,
/// and no redelivery happens for subscribers that miss a message.
#[async_trait]
pub trait RealtimeSender<T>: Send + Sync {
    /// Broadcast one message.
    async fn send(&self, message: &T) -> Result<(), RealtimeError>;
}

/// In-process broadcast hub.
///
/// Subscribers obtain a receiver via [`subscribe`](BroadcastHub::subscribe)
/// and observe every message sent while they stay connected. A subscriber
/// that lags more than the channel capacity misses the oldest messages;
/// the fire-and-forget contract makes no attempt to recover them.
pub struct BroadcastHub<T> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> BroadcastHub<T> {
    /// Create a hub retaining up to `capacity` undelivered messages per
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Connect a new subscriber.
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }

    /// Number of currently connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T> Clone for BroadcastHub<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> RealtimeSender<T> for BroadcastHub<T> {
    async fn send(&self, message: &T) -> Result<(), RealtimeError> {
        // A send without subscribers is not an error; the message simply
        // had no audience.
        let delivered = self.sender.send(message.clone()).unwrap_or(0);
        debug!(subscribers = delivered, "Broadcast message");
        Ok(())
    }
}
