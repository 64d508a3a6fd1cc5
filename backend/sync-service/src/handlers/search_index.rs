//! Search index handler.
//!
//! Upserts post documents on publish/update and removes them on delete.
//! Index-not-ready and transport failures are transient; the upsert itself
//! is idempotent, so redeliveries cannot create duplicate documents.

use crate::clients::{PostDocument, SearchIndexClient};
use async_trait::async_trait;
use event_bus::{EventHandler, HandlerError};
use event_schema::{
    EventEnvelope, EventType, PostDeletedEvent, PostPublishedEvent, SearchIndexUpdateEvent,
};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
enum IndexOp {
    Upsert(PostDocument),
    Delete(Uuid),
    Skip,
}

fn index_op_for(envelope: &EventEnvelope) -> Result<IndexOp, HandlerError> {
    match envelope.event_type {
        EventType::PostPublished => {
            let event: PostPublishedEvent = envelope.decode().map_err(HandlerError::permanent)?;
            Ok(IndexOp::Upsert(PostDocument {
                id: event.post_id,
                author_id: event.author_id,
                title: event.title,
                content: event.content,
                updated_at: event.published_at,
            }))
        }
        EventType::SearchIndexUpdate => {
            let event: SearchIndexUpdateEvent =
                envelope.decode().map_err(HandlerError::permanent)?;
            Ok(IndexOp::Upsert(PostDocument {
                id: event.post_id,
                author_id: event.author_id,
                title: event.title,
                content: event.content,
                updated_at: event.updated_at,
            }))
        }
        EventType::PostDeleted => {
            let event: PostDeletedEvent = envelope.decode().map_err(HandlerError::permanent)?;
            Ok(IndexOp::Delete(event.post_id))
        }
        _ => Ok(IndexOp::Skip),
    }
}

pub struct SearchIndexHandler {
    search: SearchIndexClient,
}

impl SearchIndexHandler {
    pub const NAME: &'static str = "search-index";

    pub fn new(search: SearchIndexClient) -> Self {
        Self { search }
    }
}

#[async_trait]
impl EventHandler for SearchIndexHandler {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        match index_op_for(envelope)? {
            IndexOp::Upsert(doc) => {
                let id = doc.id;
                self.search
                    .upsert_post(&doc)
                    .await
                    .map_err(HandlerError::transient)?;
                debug!(post_id = %id, "Post document upserted");
            }
            IndexOp::Delete(post_id) => {
                self.search
                    .delete_post(post_id)
                    .await
                    .map_err(HandlerError::transient)?;
                debug!(post_id = %post_id, "Post document removed");
            }
            IndexOp::Skip => {}
        }
        Ok(())
    }
}
