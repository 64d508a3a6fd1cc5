//! Document archive handler.
//!
//! Mirrors post snapshots into the ClickHouse archive. Conflict policy is
//! last-write-wins keyed by post id plus the envelope timestamp, so
//! redeliveries and out-of-order snapshots collapse to the newest version.

use crate::clients::{ArchiveClient, ArchivedPost};
use async_trait::async_trait;
use event_bus::{EventHandler, HandlerError};
use event_schema::{EventEnvelope, EventType, PostSyncedEvent};
use tracing::debug;

pub struct ArchiveSyncHandler {
    archive: ArchiveClient,
}

impl ArchiveSyncHandler {
    pub const NAME: &'static str = "archive-sync";

    pub fn new(archive: ArchiveClient) -> Self {
        Self { archive }
    }
}

fn archived_post_for(envelope: &EventEnvelope) -> Result<Option<ArchivedPost>, HandlerError> {
    if envelope.event_type != EventType::PostSynced {
        return Ok(None);
    }
    let event: PostSyncedEvent = envelope.decode().map_err(HandlerError::permanent)?;
    Ok(Some(ArchivedPost {
        post_id: event.post_id,
        author_id: event.author_id,
        title: event.title,
        content: event.content,
        status: event.status,
        version: envelope.produced_at,
    }))
}

#[async_trait]
impl EventHandler for ArchiveSyncHandler {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let Some(post) = archived_post_for(envelope)? else {
            return Ok(());
        };
        let post_id = post.post_id;
        self.archive
            .upsert_post(&post)
            .await
            .map_err(HandlerError::transient)?;
        debug!(post_id = %post_id, version = %post.version, "Post archived");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_version_comes_from_envelope_timestamp() {
        let event = PostSyncedEvent {
            post_id: Uuid::new_v4(),
            author_id: Uuid::new_v4(),
            title: "hi".to_string(),
            content: "body".to_string(),
            status: "published".to_string(),
            updated_at: Utc::now(),
        };
        let envelope = EventEnvelope::new(
            EventType::PostSynced,
            event.post_id.to_string(),
            serde_json::to_value(&event).unwrap(),
        );

        let post = archived_post_for(&envelope).unwrap().unwrap();
        assert_eq!(post.post_id, event.post_id);
        assert_eq!(post.version, envelope.produced_at);
    }

    #[test]
    fn test_unrelated_event_is_skipped() {
        let envelope = EventEnvelope::new(
            EventType::PostLiked,
            "post-1",
            serde_json::json!({}),
        );
        assert!(archived_post_for(&envelope).unwrap().is_none());
    }

    #[test]
    fn test_malformed_payload_is_permanent() {
        let envelope = EventEnvelope::new(
            EventType::PostSynced,
            "post-1",
            serde_json::json!({"nope": true}),
        );
        assert!(matches!(
            archived_post_for(&envelope).unwrap_err(),
            HandlerError::Permanent(_)
        ));
    }
}
