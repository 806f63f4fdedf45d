//! Message envelope carrying a typed payload plus transport metadata.

use std::collections::HashMap;
use std::time::Duration;

use uuid::Uuid;

/// A message envelope wrapping a strongly-typed payload and common
/// messaging metadata.
///
/// The envelope is pure data: it imposes no serialization or transport
/// requirements of its own. Senders fill it in before handing it to a
/// queue sender; receivers reconstruct it from wire data merged with the
/// broker's delivery metadata.
///
/// # Example
///
/// ```rust
/// use messaging::Message;
/// use std::time::Duration;
///
/// #[derive(Clone)]
/// struct OrderPlaced { order_id: u64 }
///
/// let message = Message::new(OrderPlaced { order_id: 42 })
///     .with_subject("order.placed")
///     .with_correlation_id("req-7731")
///     .with_time_to_live(Duration::from_secs(30 * 60));
///
/// assert_eq!(message.subject.as_deref(), Some("order.placed"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Message<T> {
    /// Unique identifier for this message. Generated at construction when
    /// the sender does not supply one.
    pub message_id: String,

    /// Optional identifier grouping related messages or correlating
    /// request/response flows.
    pub correlation_id: Option<String>,

    /// Optional subject or routing key describing the purpose or category
    /// of the message.
    pub subject: Option<String>,

    /// Optional time-to-live. Transports may discard the message after
    /// this interval.
    pub time_to_live: Option<Duration>,

    /// Free-form metadata map. Keys are unique; see
    /// [`merge_properties`](Message::merge_properties) for merge semantics.
    pub properties: HashMap<String, serde_json::Value>,

    /// The strongly-typed payload.
    pub body: T,
}

impl<T> Message<T> {
    /// Create an envelope around a payload with a freshly generated
    /// message id and no other metadata.
    pub fn new(body: T) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            correlation_id: None,
            subject: None,
            time_to_live: None,
            properties: HashMap::new(),
            body,
        }
    }

    /// Set the message id.
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = id.into();
        self
    }

    /// Set the correlation id.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Set the subject.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Set the time-to-live.
    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    /// Attach a custom property.
    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Merge properties into the envelope, skipping any key that is
    /// already present (first write wins).
    ///
    /// Receivers use this to fold broker-attached properties into an
    /// envelope without clobbering values the envelope already carries.
    pub fn merge_properties<I>(&mut self, properties: I)
    where
        I: IntoIterator<Item = (String, serde_json::Value)>,
    {
        for (key, value) in properties {
            self.properties.entry(key).or_insert(value);
        }
    }

    /// Map the payload, keeping all metadata.
    pub fn map_body<U>(self, f: impl FnOnce(T) -> U) -> Message<U> {
        Message {
            message_id: self.message_id,
            correlation_id: self.correlation_id,
            subject: self.subject,
            time_to_live: self.time_to_live,
            properties: self.properties,
            body: f(self.body),
        }
    }
}

impl<T> From<T> for Message<T> {
    fn from(body: T) -> Self {
        Message::new(body)
    }
}
