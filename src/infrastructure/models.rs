use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::domain::outbox::OutboxMessage;
use crate::schema::outbox_messages;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = outbox_messages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OutboxRow {
    pub id: Uuid,
    pub creation_time: DateTime<Utc>,
    pub payload_type: String,
    pub payload: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = outbox_messages)]
pub struct NewOutboxRow {
    pub id: Uuid,
    pub payload_type: String,
    pub payload: String,
}

impl From<OutboxRow> for OutboxMessage {
    fn from(row: OutboxRow) -> Self {
        OutboxMessage {
            id: row.id.to_string(),
            creation_time: Some(row.creation_time),
            payload_type: row.payload_type,
            payload: row.payload,
        }
    }
}
