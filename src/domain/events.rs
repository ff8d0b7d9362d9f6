//! Integration events published from the catalog outbox.
//!
//! The set of known events is closed: [`EventKind::resolve`] maps a type name
//! to one of [`EventKind::ALL`] and nothing else. The outbox tailer uses it to
//! decode `payload_type` + `payload`, the search-sync worker uses it to decode
//! a broker envelope.

use serde::{Deserialize, Serialize};

use crate::errors::DecodeError;

pub const PRODUCT_AGGREGATE: &str = "Product";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductCreated {
    pub product_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Decimal price as a string to avoid floating-point issues, e.g. "9.99"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductUpdated {
    pub product_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDeleted {
    pub product_id: String,
}

/// Every event the pipeline knows how to carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrationEvent {
    ProductCreated(ProductCreated),
    ProductUpdated(ProductUpdated),
    ProductDeleted(ProductDeleted),
}

impl IntegrationEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            IntegrationEvent::ProductCreated(_) => EventKind::ProductCreated,
            IntegrationEvent::ProductUpdated(_) => EventKind::ProductUpdated,
            IntegrationEvent::ProductDeleted(_) => EventKind::ProductDeleted,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind().type_name()
    }

    /// Aggregate the event belongs to; the Kafka topic is derived from it.
    pub fn aggregate_type(&self) -> &'static str {
        PRODUCT_AGGREGATE
    }

    /// Identifier of the owning aggregate, used as the partition key.
    pub fn aggregate_id(&self) -> &str {
        match self {
            IntegrationEvent::ProductCreated(e) => &e.product_id,
            IntegrationEvent::ProductUpdated(e) => &e.product_id,
            IntegrationEvent::ProductDeleted(e) => &e.product_id,
        }
    }

    /// Serialize the event body (without the type name).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            IntegrationEvent::ProductCreated(e) => serde_json::to_string(e),
            IntegrationEvent::ProductUpdated(e) => serde_json::to_string(e),
            IntegrationEvent::ProductDeleted(e) => serde_json::to_string(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ProductCreated,
    ProductUpdated,
    ProductDeleted,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [
        EventKind::ProductCreated,
        EventKind::ProductUpdated,
        EventKind::ProductDeleted,
    ];

    pub fn type_name(self) -> &'static str {
        match self {
            EventKind::ProductCreated => "ProductCreated",
            EventKind::ProductUpdated => "ProductUpdated",
            EventKind::ProductDeleted => "ProductDeleted",
        }
    }

    /// Look up a registered type name. Matching is exact.
    pub fn resolve(type_name: &str) -> Option<EventKind> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.type_name() == type_name)
    }

    /// Deserialize `payload` into the shape this kind stands for.
    pub fn decode(self, payload: &[u8]) -> Result<IntegrationEvent, DecodeError> {
        let malformed = |source| DecodeError::Malformed {
            type_name: self.type_name().to_string(),
            source,
        };

        // `null` deserializes into nothing rather than an error.
        let value: Option<serde_json::Value> = serde_json::from_slice(payload).map_err(malformed)?;
        let value = value.ok_or(DecodeError::Null)?;

        let event = match self {
            EventKind::ProductCreated => {
                IntegrationEvent::ProductCreated(serde_json::from_value(value).map_err(malformed)?)
            }
            EventKind::ProductUpdated => {
                IntegrationEvent::ProductUpdated(serde_json::from_value(value).map_err(malformed)?)
            }
            EventKind::ProductDeleted => {
                IntegrationEvent::ProductDeleted(serde_json::from_value(value).map_err(malformed)?)
            }
        };
        Ok(event)
    }
}

/// Resolve `type_name` and decode `payload` in one step.
pub fn decode_event(type_name: &str, payload: &[u8]) -> Result<IntegrationEvent, DecodeError> {
    let kind =
        EventKind::resolve(type_name).ok_or_else(|| DecodeError::UnknownType(type_name.to_string()))?;
    kind.decode(payload)
}
