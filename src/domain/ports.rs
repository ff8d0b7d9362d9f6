use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::errors::{BrokerError, NotifierError, PublishError, SearchIndexError};

use super::dead_letter::DeadLetter;
use super::document::ProductDocument;
use super::envelope::Delivery;
use super::errors::DomainError;
use super::events::IntegrationEvent;
use super::outbox::{OutboxMessage, OutboxPosition};

/// Sends an event to the broker.
///
/// `Ok` means the broker durably accepted the event. An error is transient;
/// the caller decides whether to retry.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &IntegrationEvent) -> Result<(), PublishError>;
}

/// Live stream of notification bodies from one `LISTEN` connection.
///
/// The stream ends (`recv` returns `None`) when the listener stops. A fault
/// on the connection is sent as the last item.
pub struct Subscription {
    pub notifications: mpsc::Receiver<Result<String, NotifierError>>,
}

/// Opens a connection to the primary store and subscribes to a channel.
#[async_trait]
pub trait ChangeNotifier: Send + Sync {
    /// Resolves once `LISTEN` has been issued successfully.
    async fn listen(&self, channel: &str) -> Result<Subscription, NotifierError>;
}

/// Broker consumer used by the search-sync worker.
#[async_trait]
pub trait MessageSource: Send + Sync {
    fn subscribe(&mut self, topics: &[String]) -> Result<(), BrokerError>;

    /// Wait up to `timeout` for the next message. `Ok(None)` means nothing
    /// arrived in time.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<Delivery>, BrokerError>;

    /// Mark `delivery` as handled so it is not consumed again by the group.
    fn commit(&mut self, delivery: &Delivery) -> Result<(), BrokerError>;
}

/// Durable destination for messages that permanently failed processing.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn send(&self, letter: &DeadLetter) -> Result<(), PublishError>;
}

/// Write side of the search index. Both operations are idempotent.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn upsert(&self, document: &ProductDocument) -> Result<(), SearchIndexError>;
    async fn delete(&self, id: &str) -> Result<(), SearchIndexError>;
}

/// Read access to stored outbox rows, used to catch up after a reconnect.
pub trait OutboxRepository: Send + Sync + 'static {
    /// Rows past `from`, ordered by `(creation_time, id)`.
    fn load_since(&self, from: &OutboxPosition, limit: i64)
        -> Result<Vec<OutboxMessage>, DomainError>;

    /// The store's clock, in the same terms as `creation_time`.
    fn current_time(&self) -> Result<DateTime<Utc>, DomainError>;
}
