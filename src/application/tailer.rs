//! Bridges outbox change notifications to the event publisher.
//!
//! One connection, one `LISTEN`, one draining loop. Notifications are
//! handled strictly in arrival order and each publish is awaited before the
//! next notification is looked at. Any fault tears the connection down and
//! the whole connect-listen-drain sequence starts over after a fixed delay.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};

use crate::domain::outbox::{OutboxMessage, OutboxPosition};
use crate::domain::ports::{ChangeNotifier, EventPublisher, OutboxRepository};
use crate::errors::{NotifierError, PublishError, TailerError};
use crate::shutdown::Shutdown;

/// Channel the `outbox_messages` insert trigger notifies on.
pub const DEFAULT_CHANNEL: &str = "outbox_messages";
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_CATCH_UP_BATCH: i64 = 500;

#[derive(Debug, Clone)]
pub struct TailerConfig {
    pub connection_string: String,
    pub channel: String,
    pub reconnect_delay: Duration,
    /// Replay rows created while disconnected before resuming live notifications.
    pub catch_up: bool,
    pub catch_up_batch: i64,
}

impl TailerConfig {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            channel: DEFAULT_CHANNEL.to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            catch_up: false,
            catch_up_batch: DEFAULT_CATCH_UP_BATCH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailOutcome {
    Published,
    Dropped,
}

pub struct OutboxTailer<N, P> {
    config: TailerConfig,
    notifier: N,
    publisher: P,
    repository: Option<Arc<dyn OutboxRepository>>,
}

impl<N: ChangeNotifier, P: EventPublisher> OutboxTailer<N, P> {
    pub fn new(config: TailerConfig, notifier: N, publisher: P) -> Self {
        Self {
            config,
            notifier,
            publisher,
            repository: None,
        }
    }

    /// Source for the catch-up sweep; only read when `catch_up` is enabled.
    pub fn with_repository(mut self, repository: Arc<dyn OutboxRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Run until `shutdown` fires. Only a missing connection string is fatal;
    /// every other failure is logged and retried.
    pub async fn run(&self, shutdown: Shutdown) -> Result<(), TailerError> {
        if self.config.connection_string.trim().is_empty() {
            return Err(TailerError::MissingConnectionString);
        }

        // creation_time of the newest row seen so far, seeded from the store
        // clock on the first subscription when catching up
        let mut cursor: Option<DateTime<Utc>> = None;

        loop {
            match self.listen_once(&shutdown, &mut cursor).await {
                Ok(()) => break,
                Err(e) => error!(
                    "Outbox tailer failed on channel '{}': {}; reconnecting in {:?}",
                    self.config.channel, e, self.config.reconnect_delay
                ),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }

        info!("Outbox tailer on channel '{}' stopped", self.config.channel);
        Ok(())
    }

    /// Returns `Ok(())` only when cancelled.
    async fn listen_once(
        &self,
        shutdown: &Shutdown,
        cursor: &mut Option<DateTime<Utc>>,
    ) -> Result<(), TailerError> {
        let mut subscription = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            subscription = self.notifier.listen(&self.config.channel) => subscription?,
        };
        info!(
            "Listening for outbox notifications on channel '{}'",
            self.config.channel
        );

        if self.config.catch_up {
            if let Some(repository) = &self.repository {
                if cursor.is_none() {
                    // Anything committed from here on is either announced
                    // live or picked up by a later sweep.
                    *cursor = Some(store_time(repository).await?);
                }
                self.catch_up(repository, shutdown, cursor).await?;
            }
        }

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                next = subscription.notifications.recv() => next,
            };

            match next {
                Some(Ok(body)) => {
                    let Some(message) = parse_notification(&body) else {
                        continue;
                    };
                    self.forward(&message).await?;
                    advance(cursor, message.creation_time);
                }
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(NotifierError::ConnectionLost("listener stopped".to_string()).into())
                }
            }
        }
    }

    /// Forward stored rows created at or after `cursor` that the live path
    /// may have missed. Rows already forwarded at that exact time are sent
    /// again; consumers tolerate duplicates.
    async fn catch_up(
        &self,
        repository: &Arc<dyn OutboxRepository>,
        shutdown: &Shutdown,
        cursor: &mut Option<DateTime<Utc>>,
    ) -> Result<(), TailerError> {
        let Some(from) = *cursor else {
            return Ok(());
        };
        let limit = self.config.catch_up_batch.max(1);
        let mut position = OutboxPosition::at(from);
        let mut replayed = 0usize;

        while !shutdown.is_triggered() {
            let repo = Arc::clone(repository);
            let page = position.clone();
            let rows = tokio::task::spawn_blocking(move || repo.load_since(&page, limit))
                .await
                .map_err(|e| TailerError::CatchUp(e.to_string()))?
                .map_err(|e| TailerError::CatchUp(e.to_string()))?;
            let count = rows.len();
            let start = position.clone();

            for message in rows {
                self.forward(&message).await?;
                advance(cursor, message.creation_time);
                if let Some(next) = OutboxPosition::after(&message) {
                    position = next;
                }
                replayed += 1;
            }

            if (count as i64) < limit || position == start {
                break;
            }
        }

        if replayed > 0 {
            info!("Replayed {} outbox message(s) after reconnect", replayed);
        }
        Ok(())
    }

    /// Decode one notification body and publish the event it carries.
    pub async fn handle_notification(&self, body: &str) -> Result<TailOutcome, PublishError> {
        match parse_notification(body) {
            Some(message) => self.forward(&message).await,
            None => Ok(TailOutcome::Dropped),
        }
    }

    /// Undecodable messages are dropped with a warning; only a publish
    /// failure is returned.
    async fn forward(&self, message: &OutboxMessage) -> Result<TailOutcome, PublishError> {
        let event = match message.to_event() {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    "Dropping outbox message {} (type '{}'): {}",
                    message.id, message.payload_type, e
                );
                return Ok(TailOutcome::Dropped);
            }
        };

        self.publisher.publish(&event).await?;
        debug!(
            "Published outbox message {} as {} for {}",
            message.id,
            event.type_name(),
            event.aggregate_id()
        );
        Ok(TailOutcome::Published)
    }
}

async fn store_time(repository: &Arc<dyn OutboxRepository>) -> Result<DateTime<Utc>, TailerError> {
    let repo = Arc::clone(repository);
    tokio::task::spawn_blocking(move || repo.current_time())
        .await
        .map_err(|e| TailerError::CatchUp(e.to_string()))?
        .map_err(|e| TailerError::CatchUp(e.to_string()))
}

fn parse_notification(body: &str) -> Option<OutboxMessage> {
    match OutboxMessage::from_notification(body) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!("Dropping unreadable outbox notification: {}", e);
            None
        }
    }
}

fn advance(cursor: &mut Option<DateTime<Utc>>, seen: Option<DateTime<Utc>>) {
    if let Some(seen) = seen {
        if cursor.map_or(true, |current| seen > current) {
            *cursor = Some(seen);
        }
    }
}
