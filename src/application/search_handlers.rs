use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::document::ProductDocument;
use crate::domain::events::{EventKind, IntegrationEvent};
use crate::domain::ports::SearchIndex;
use crate::errors::{HandlerError, RegistryError};

use super::registry::{EventHandler, HandlerRegistry, MessageContext};

/// Keeps product documents in the search index in line with product events.
pub struct ProductIndexHandler<S> {
    index: S,
}

impl<S: SearchIndex> ProductIndexHandler<S> {
    pub fn new(index: S) -> Self {
        Self { index }
    }
}

#[async_trait]
impl<S: SearchIndex> EventHandler for ProductIndexHandler<S> {
    async fn handle(
        &self,
        event: &IntegrationEvent,
        ctx: &MessageContext,
    ) -> Result<(), HandlerError> {
        match event {
            IntegrationEvent::ProductCreated(e) => {
                self.index.upsert(&ProductDocument::from(e)).await?;
            }
            IntegrationEvent::ProductUpdated(e) => {
                self.index.upsert(&ProductDocument::from(e)).await?;
            }
            IntegrationEvent::ProductDeleted(e) => {
                self.index.delete(&e.product_id).await?;
            }
        }
        log::debug!(
            "[{}] indexed {} for product {} (correlation {})",
            ctx.worker,
            ctx.message_type,
            event.aggregate_id(),
            ctx.correlation_id
        );
        Ok(())
    }
}

/// Register one shared [`ProductIndexHandler`] for every product event.
pub fn register_product_handlers<S: SearchIndex + 'static>(
    registry: &mut HandlerRegistry,
    index: S,
) -> Result<(), RegistryError> {
    let handler: Arc<dyn EventHandler> = Arc::new(ProductIndexHandler::new(index));
    for kind in [
        EventKind::ProductCreated,
        EventKind::ProductUpdated,
        EventKind::ProductDeleted,
    ] {
        registry.register(kind, handler.clone())?;
    }
    Ok(())
}
