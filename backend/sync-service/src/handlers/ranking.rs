//! Ranking recompute trigger.
//!
//! On interaction events, pushes the affected post id onto the Redis
//! recompute set consumed by the scheduled ranking aggregation job. This
//! handler only signals; it never computes scores itself. Set semantics
//! make the signal idempotent.

use async_trait::async_trait;
use event_bus::{EventHandler, HandlerError};
use event_schema::{EventEnvelope, EventType, PostLikedEvent, PostReadEvent};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;
use uuid::Uuid;

pub struct RankingTriggerHandler {
    redis: ConnectionManager,
    queue_key: String,
}

impl RankingTriggerHandler {
    pub const NAME: &'static str = "ranking-trigger";

    pub fn new(redis: ConnectionManager, queue_key: impl Into<String>) -> Self {
        Self {
            redis,
            queue_key: queue_key.into(),
        }
    }
}

/// Post id to signal for recompute, if this envelope is an interaction.
fn recompute_signal_for(envelope: &EventEnvelope) -> Result<Option<Uuid>, HandlerError> {
    match envelope.event_type {
        EventType::PostLiked => {
            let event: PostLikedEvent = envelope.decode().map_err(HandlerError::permanent)?;
            Ok(Some(event.post_id))
        }
        EventType::PostRead => {
            let event: PostReadEvent = envelope.decode().map_err(HandlerError::permanent)?;
            Ok(Some(event.post_id))
        }
        _ => Ok(None),
    }
}

#[async_trait]
impl EventHandler for RankingTriggerHandler {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let Some(post_id) = recompute_signal_for(envelope)? else {
            return Ok(());
        };

        let mut conn = self.redis.clone();
        let _: u64 = conn
            .sadd(&self.queue_key, post_id.to_string())
            .await
            .map_err(HandlerError::transient)?;

        debug!(post_id = %post_id, queue = %self.queue_key, "Ranking recompute signalled");
        Ok(())
    }
}
