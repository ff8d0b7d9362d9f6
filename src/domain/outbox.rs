use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DecodeError;

use super::events::{decode_event, IntegrationEvent};

/// An outbox row as announced on the notification channel.
///
/// The trigger sends `row_to_json(NEW)`, so column names arrive in
/// snake_case; the camelCase names are accepted as well.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: String,
    #[serde(default, alias = "creationTime")]
    pub creation_time: Option<DateTime<Utc>>,
    #[serde(alias = "payloadType")]
    pub payload_type: String,
    pub payload: String,
}

impl OutboxMessage {
    /// Parse a notification body. A JSON `null` body is reported as
    /// [`DecodeError::Null`].
    pub fn from_notification(body: &str) -> Result<Self, DecodeError> {
        let parsed: Option<OutboxMessage> =
            serde_json::from_str(body).map_err(|source| DecodeError::Malformed {
                type_name: "OutboxMessage".to_string(),
                source,
            })?;
        parsed.ok_or(DecodeError::Null)
    }

    /// Resolve `payload_type` and deserialize `payload` into that event.
    pub fn to_event(&self) -> Result<IntegrationEvent, DecodeError> {
        decode_event(&self.payload_type, self.payload.as_bytes())
    }
}

/// A point in the outbox ordered by `(creation_time, id)`.
///
/// Rows written in one transaction share `creation_time`, so the time alone
/// cannot tell which of them have been read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxPosition {
    pub creation_time: DateTime<Utc>,
    /// `None` covers every row at `creation_time`.
    pub after_id: Option<String>,
}

impl OutboxPosition {
    /// Includes the rows created exactly at `creation_time`.
    pub fn at(creation_time: DateTime<Utc>) -> Self {
        Self {
            creation_time,
            after_id: None,
        }
    }

    /// Just past `message`; `None` when the message carries no timestamp.
    pub fn after(message: &OutboxMessage) -> Option<Self> {
        message.creation_time.map(|creation_time| Self {
            creation_time,
            after_id: Some(message.id.clone()),
        })
    }

    /// Whether a row at `(creation_time, id)` lies past this position.
    pub fn admits(&self, creation_time: DateTime<Utc>, id: &str) -> bool {
        match &self.after_id {
            None => creation_time >= self.creation_time,
            Some(after_id) => {
                creation_time > self.creation_time
                    || (creation_time == self.creation_time && id > after_id.as_str())
            }
        }
    }
}
