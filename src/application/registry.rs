use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::events::{EventKind, IntegrationEvent};
use crate::errors::{HandlerError, RegistryError};
use crate::shutdown::Shutdown;

/// Per-message scope handed to a handler.
///
/// A fresh context is built for every attempt and dropped when the attempt
/// ends, so nothing leaks from one message into the next.
#[derive(Clone)]
pub struct MessageContext {
    pub correlation_id: Uuid,
    pub worker: Arc<str>,
    pub message_type: &'static str,
    pub key: Option<String>,
    /// 1-based.
    pub attempt: u32,
    pub shutdown: Shutdown,
}

impl MessageContext {
    pub fn new(
        correlation_id: Uuid,
        worker: Arc<str>,
        event: &IntegrationEvent,
        attempt: u32,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            correlation_id,
            worker,
            message_type: event.type_name(),
            key: Some(event.aggregate_id().to_string()),
            attempt,
            shutdown,
        }
    }
}

/// Applies one kind of event to the search index.
///
/// The pipeline may deliver the same event more than once; implementations
/// must be idempotent.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &IntegrationEvent, ctx: &MessageContext)
        -> Result<(), HandlerError>;
}

/// Maps an event kind to at most one handler.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<EventKind, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        kind: EventKind,
        handler: Arc<dyn EventHandler>,
    ) -> Result<&mut Self, RegistryError> {
        if self.handlers.contains_key(&kind) {
            return Err(RegistryError::DuplicateHandler(kind.type_name()));
        }
        self.handlers.insert(kind, handler);
        Ok(self)
    }

    pub fn handler_for(&self, kind: EventKind) -> Option<Arc<dyn EventHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.handlers.keys().map(|k| k.type_name()).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
