//! Search-sync worker: broker envelopes in, search index mutations out.
//!
//! One logical loop per worker. The outer loop (re)subscribes, the inner
//! loop polls and processes one message at a time. A message whose handler
//! keeps failing is retried under [`RetryPolicy`] and then handed to the
//! dead-letter sink; it never stops the loop.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::dead_letter::DeadLetter;
use crate::domain::envelope::Delivery;
use crate::domain::events::IntegrationEvent;
use crate::domain::ports::{DeadLetterSink, MessageSource};
use crate::errors::{BrokerError, DecodeError, HandlerError};
use crate::shutdown::Shutdown;

use super::registry::{EventHandler, HandlerRegistry, MessageContext};

pub type AcceptEvent = Arc<dyn Fn(&IntegrationEvent) -> bool + Send + Sync>;

/// Bounded retry with exponential backoff for handler failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Clone)]
pub struct WorkerOptions {
    pub group_id: String,
    pub topics: Vec<String>,
    /// Display name used in logs and dead letters.
    pub name: String,
    pub accept_event: AcceptEvent,
    pub poll_timeout: Duration,
    pub idle_delay: Duration,
    pub resubscribe_delay: Duration,
    pub retry: RetryPolicy,
}

impl WorkerOptions {
    pub fn new(group_id: impl Into<String>, topics: Vec<String>, name: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            topics,
            name: name.into(),
            accept_event: Arc::new(|_| true),
            poll_timeout: Duration::from_millis(100),
            idle_delay: Duration::from_millis(100),
            resubscribe_delay: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        }
    }

    pub fn accept_event(
        mut self,
        predicate: impl Fn(&IntegrationEvent) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.accept_event = Arc::new(predicate);
        self
    }
}

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Handled,
    /// Type name not registered; no handler lookup was attempted.
    Unresolved,
    Malformed,
    Filtered,
    NoHandler,
    DeadLettered,
    /// Retries exhausted and the dead-letter sink failed as well.
    Lost,
    Cancelled,
}

pub struct SearchSyncWorker<S, D> {
    options: WorkerOptions,
    name: Arc<str>,
    source: S,
    registry: Arc<HandlerRegistry>,
    dead_letters: D,
}

impl<S: MessageSource, D: DeadLetterSink> SearchSyncWorker<S, D> {
    pub fn new(
        options: WorkerOptions,
        source: S,
        registry: Arc<HandlerRegistry>,
        dead_letters: D,
    ) -> Self {
        let name = Arc::from(options.name.as_str());
        Self {
            options,
            name,
            source,
            registry,
            dead_letters,
        }
    }

    /// Run until `shutdown` fires. There is no other terminal state.
    pub async fn run(&mut self, shutdown: Shutdown) {
        info!(
            "[{}] starting (group '{}', topics {:?}, handlers {:?})",
            self.name,
            self.options.group_id,
            self.options.topics,
            self.registry.kinds()
        );
        if self.registry.is_empty() {
            warn!("[{}] no handlers registered; every message will be skipped", self.name);
        }

        while !shutdown.is_triggered() {
            match self.source.subscribe(&self.options.topics) {
                Ok(()) => {
                    if let Err(e) = self.poll_loop(&shutdown).await {
                        error!("[{}] consumer loop failed: {}", self.name, e);
                    }
                }
                Err(e) => error!("[{}] subscribe failed: {}", self.name, e),
            }

            if shutdown.is_triggered() {
                break;
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.options.resubscribe_delay) => {}
            }
        }

        info!("[{}] stopped", self.name);
    }

    /// Returns `Ok(())` only when cancelled.
    async fn poll_loop(&mut self, shutdown: &Shutdown) -> Result<(), BrokerError> {
        while !shutdown.is_triggered() {
            let polled = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                polled = self.source.poll(self.options.poll_timeout) => polled?,
            };

            let Some(delivery) = polled else {
                tokio::select! {
                    _ = shutdown.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(self.options.idle_delay) => {}
                }
                continue;
            };

            let outcome = self.process(&delivery, shutdown).await;
            if outcome == ProcessOutcome::Cancelled {
                // Left uncommitted so the group redelivers it.
                return Ok(());
            }
            if let Err(e) = self.source.commit(&delivery) {
                warn!(
                    "[{}] failed to commit {}/{}@{}: {}",
                    self.name, delivery.topic, delivery.partition, delivery.offset, e
                );
            }
        }
        Ok(())
    }

    /// Resolve, filter and dispatch one delivery.
    pub async fn process(&self, delivery: &Delivery, shutdown: &Shutdown) -> ProcessOutcome {
        let envelope = &delivery.envelope;

        let event = match envelope.decode() {
            Ok(event) => event,
            Err(DecodeError::UnknownType(type_name)) => {
                warn!(
                    "[{}] dropping message of unknown type '{}' ({}/{}@{})",
                    self.name, type_name, delivery.topic, delivery.partition, delivery.offset
                );
                return ProcessOutcome::Unresolved;
            }
            Err(e) => {
                warn!("[{}] dropping undecodable message: {}", self.name, e);
                return ProcessOutcome::Malformed;
            }
        };
        let kind = event.kind();

        if !(self.options.accept_event)(&event) {
            debug!(
                "[{}] {} for {} filtered out",
                self.name,
                kind.type_name(),
                event.aggregate_id()
            );
            return ProcessOutcome::Filtered;
        }

        let Some(handler) = self.registry.handler_for(kind) else {
            warn!(
                "[{}] no handler registered for {}",
                self.name,
                kind.type_name()
            );
            return ProcessOutcome::NoHandler;
        };

        self.dispatch(handler, &event, delivery, shutdown).await
    }

    async fn dispatch(
        &self,
        handler: Arc<dyn EventHandler>,
        event: &IntegrationEvent,
        delivery: &Delivery,
        shutdown: &Shutdown,
    ) -> ProcessOutcome {
        let correlation_id = Uuid::new_v4();
        let max_attempts = self.options.retry.max_attempts.max(1);
        let mut attempt = 1;

        let last_error = loop {
            let ctx = MessageContext::new(
                correlation_id,
                self.name.clone(),
                event,
                attempt,
                shutdown.clone(),
            );
            let error = match invoke(handler.as_ref(), event, &ctx).await {
                Ok(()) => {
                    debug!(
                        "[{}] handled {} for {} (correlation {})",
                        self.name,
                        event.type_name(),
                        event.aggregate_id(),
                        correlation_id
                    );
                    return ProcessOutcome::Handled;
                }
                Err(e) => e,
            };
            drop(ctx);

            if attempt >= max_attempts {
                break error;
            }

            let delay = self.options.retry.backoff(attempt);
            warn!(
                "[{}] handler for {} failed (attempt {}/{}), retrying in {:?}: {}",
                self.name,
                event.type_name(),
                attempt,
                max_attempts,
                delay,
                error
            );
            tokio::select! {
                _ = shutdown.cancelled() => return ProcessOutcome::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        };

        error!(
            "[{}] handler for {} failed after {} attempt(s): {}",
            self.name,
            event.type_name(),
            attempt,
            last_error
        );

        let letter = DeadLetter {
            delivery: delivery.clone(),
            error: last_error.to_string(),
            attempts: attempt,
            worker: self.options.name.clone(),
            failed_at: Utc::now(),
        };
        match self.dead_letters.send(&letter).await {
            Ok(()) => {
                info!(
                    "[{}] {} for {} moved to dead letters",
                    self.name,
                    event.type_name(),
                    event.aggregate_id()
                );
                ProcessOutcome::DeadLettered
            }
            Err(e) => {
                error!(
                    "[{}] could not dead-letter {} for {}, message lost: {}",
                    self.name,
                    event.type_name(),
                    event.aggregate_id(),
                    e
                );
                ProcessOutcome::Lost
            }
        }
    }
}

/// Call the handler, turning a panic into an ordinary failure.
async fn invoke(
    handler: &dyn EventHandler,
    event: &IntegrationEvent,
    ctx: &MessageContext,
) -> Result<(), HandlerError> {
    match AssertUnwindSafe(handler.handle(event, ctx)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(HandlerError::Panicked(message))
        }
    }
}
