use crate::errors::{DecodeError, PublishError};

use super::events::{decode_event, IntegrationEvent};

/// Header carrying the event type name on the broker.
pub const MESSAGE_TYPE_HEADER: &str = "messageTypeName";

/// Wire record exchanged between the publisher and the search-sync worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEnvelope {
    pub message_type_name: String,
    /// Serialized event body; opaque to the broker.
    pub message: Vec<u8>,
    /// Partition key, the owning aggregate's id.
    pub key: Option<String>,
}

impl MessageEnvelope {
    pub fn from_event(event: &IntegrationEvent) -> Result<Self, PublishError> {
        Ok(Self {
            message_type_name: event.type_name().to_string(),
            message: event.to_json()?.into_bytes(),
            key: Some(event.aggregate_id().to_string()),
        })
    }

    pub fn decode(&self) -> Result<IntegrationEvent, DecodeError> {
        decode_event(&self.message_type_name, &self.message)
    }
}

/// A message pulled from the broker together with its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub envelope: MessageEnvelope,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::ProductDeleted;

    #[test]
    fn envelope_carries_type_name_and_aggregate_key() {
        let event = IntegrationEvent::ProductDeleted(ProductDeleted {
            product_id: "p3".to_string(),
        });
        let envelope = MessageEnvelope::from_event(&event).expect("envelope");

        assert_eq!(envelope.message_type_name, "ProductDeleted");
        assert_eq!(envelope.key.as_deref(), Some("p3"));
        assert_eq!(envelope.message, br#"{"productId":"p3"}"#.to_vec());
        assert_eq!(envelope.decode().expect("decode"), event);
    }

    #[test]
    fn unknown_envelope_type_does_not_decode() {
        let envelope = MessageEnvelope {
            message_type_name: "Unknown".to_string(),
            message: b"{}".to_vec(),
            key: None,
        };
        assert!(matches!(envelope.decode(), Err(DecodeError::UnknownType(_))));
    }
}
