//! Outbound queue sender.

use std::marker::PhantomData;

use messaging::Message;
use serde::Serialize;
use tracing::debug;

use crate::broker::{BrokerConnection, BrokerSender, OutboundMessage};
use crate::error::BrokerError;

/// Typed sender transmitting [`Message`] envelopes to one queue or topic.
///
/// The body is serialized to a self-describing JSON text payload; the
/// envelope's id, subject, correlation id, TTL and properties are copied
/// onto the wire message verbatim. There is no retry logic here; failed
/// sends surface to the caller.
pub struct QueueSender<T> {
    sender: Box<dyn BrokerSender>,
    entity: String,
    _payload: PhantomData<fn(T)>,
}

impl<T: Serialize + Send + Sync> QueueSender<T> {
    /// Create a sender for the given queue or topic.
    pub async fn new(
        connection: &dyn BrokerConnection,
        entity: impl Into<String>,
    ) -> Result<Self, BrokerError> {
        let entity = entity.into();
        let sender = connection.create_sender(&entity).await?;
        Ok(Self {
            sender,
            entity,
            _payload: PhantomData,
        })
    }

    /// The queue or topic this sender transmits to.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Serialize and transmit one envelope.
    pub async fn send(&self, message: &Message<T>) -> Result<(), BrokerError> {
        let body = serde_json::to_string(&message.body)?;

        let outbound = OutboundMessage {
            body,
            content_type: "application/json".to_string(),
            message_id: message.message_id.clone(),
            correlation_id: message.correlation_id.clone(),
            subject: message.subject.clone(),
            time_to_live: message.time_to_live,
            properties: message.properties.clone(),
        };

        self.sender.send(outbound).await?;

        debug!(
            entity = %self.entity,
            message_id = %message.message_id,
            "Message sent"
        );

        Ok(())
    }

    /// Transmit several envelopes sequentially.
    pub async fn send_batch(&self, messages: &[Message<T>]) -> Result<(), BrokerError> {
        for message in messages {
            self.send(message).await?;
        }

        debug!(
            entity = %self.entity,
            count = messages.len(),
            "Batch sent"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct CapturingSender {
        sent: Arc<Mutex<Vec<OutboundMessage>>>,
    }

    #[async_trait]
    impl BrokerSender for CapturingSender {
        async fn send(&self, message: OutboundMessage) -> Result<(), BrokerError> {
            self.sent.lock().expect("sent lock poisoned").push(message);
            Ok(())
        }
    }

    fn sender_over<T: Serialize + Send + Sync>(
        capture: &CapturingSender,
    ) -> QueueSender<T> {
        QueueSender {
            sender: Box::new(capture.clone()),
            entity: "orders".to_string(),
            _payload: PhantomData,
        }
    }

    #[tokio::test]
    async fn test_send_copies_envelope_metadata() {
        let capture = CapturingSender::default();
        let sender = sender_over::<Vec<u32>>(&capture);

        let message = Message::new(vec![1, 2, 3])
            .with_message_id("m-1")
            .with_correlation_id("c-1")
            .with_subject("order.created")
            .with_time_to_live(Duration::from_secs(60))
            .with_property("priority", "high");

        sender.send(&message).await.unwrap();

        let sent = capture.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let wire = &sent[0];
        assert_eq!(wire.body, "[1,2,3]");
        assert_eq!(wire.content_type, "application/json");
        assert_eq!(wire.message_id, "m-1");
        assert_eq!(wire.correlation_id.as_deref(), Some("c-1"));
        assert_eq!(wire.subject.as_deref(), Some("order.created"));
        assert_eq!(wire.time_to_live, Some(Duration::from_secs(60)));
        assert_eq!(wire.properties["priority"], json!("high"));
    }

    #[tokio::test]
    async fn test_send_batch_transmits_in_order() {
        let capture = CapturingSender::default();
        let sender = sender_over::<u32>(&capture);

        let messages = vec![
            Message::new(1).with_message_id("a"),
            Message::new(2).with_message_id("b"),
        ];

        sender.send_batch(&messages).await.unwrap();

        let sent = capture.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].message_id, "a");
        assert_eq!(sent[1].message_id, "b");
    }
}
