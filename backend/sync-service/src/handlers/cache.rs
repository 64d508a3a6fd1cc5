//! Cache invalidation handler.
//!
//! Evicts the Redis keys affected by post and profile changes. Deletes are
//! naturally idempotent, so a redelivered envelope re-deletes an
//! already-absent key without harm.

use async_trait::async_trait;
use event_bus::{EventHandler, HandlerError};
use event_schema::{
    CacheInvalidateEvent, EventEnvelope, EventType, PostPublishedEvent, ProfileUpdatedEvent,
};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

/// Cache key for a single post snapshot.
pub fn post_cache_key(post_id: &uuid::Uuid) -> String {
    format!("post:{}", post_id)
}

/// Cache key for a user's profile snapshot.
pub fn profile_cache_key(user_id: &uuid::Uuid) -> String {
    format!("user:profile:{}", user_id)
}

/// First page of the published-post listing, rebuilt on demand.
pub const PUBLISHED_LIST_KEY: &str = "posts:published:first";

pub struct CacheInvalidationHandler {
    redis: ConnectionManager,
}

impl CacheInvalidationHandler {
    pub const NAME: &'static str = "cache-invalidation";

    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

/// Keys to evict for this envelope; empty for event types this handler
/// does not care about. Malformed payloads are permanent failures.
fn cache_keys_for(envelope: &EventEnvelope) -> Result<Vec<String>, HandlerError> {
    match envelope.event_type {
        EventType::PostPublished => {
            let event: PostPublishedEvent = envelope.decode().map_err(HandlerError::permanent)?;
            Ok(vec![
                post_cache_key(&event.post_id),
                PUBLISHED_LIST_KEY.to_string(),
            ])
        }
        EventType::ProfileUpdated => {
            let event: ProfileUpdatedEvent = envelope.decode().map_err(HandlerError::permanent)?;
            Ok(vec![profile_cache_key(&event.user_id)])
        }
        EventType::CacheInvalidate => {
            let event: CacheInvalidateEvent = envelope.decode().map_err(HandlerError::permanent)?;
            Ok(event.keys)
        }
        _ => Ok(Vec::new()),
    }
}

#[async_trait]
impl EventHandler for CacheInvalidationHandler {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let keys = cache_keys_for(envelope)?;
        if keys.is_empty() {
            return Ok(());
        }

        let mut conn = self.redis.clone();
        let deleted: u64 = conn.del(&keys).await.map_err(HandlerError::transient)?;
        debug!(
            event_type = %envelope.event_type,
            key = %envelope.key,
            evicted = deleted,
            "Cache keys evicted"
        );
        Ok(())
    }
}
