//! Producer boundary used by the primary-store write path.
//!
//! Callers publish only after the triggering mutation has committed, so the
//! bus never announces state that might roll back. The producer validates
//! the envelope before the broker sees it: an empty key or unserializable
//! payload is a programming error and is rejected, never retried.

use crate::broker::{Broker, Offset};
use crate::error::PublishError;
use crate::retry::RetryPolicy;
use event_schema::{EventEnvelope, EventType};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct EventProducer {
    broker: Arc<dyn Broker>,
    retry: RetryPolicy,
}

impl EventProducer {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Serialize `payload` into an envelope and append it to `topic`.
    /// Per-key ordering is preserved across all producer instances.
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        key: &str,
        event_type: EventType,
        payload: &T,
    ) -> Result<Offset, PublishError> {
        if key.is_empty() {
            return Err(PublishError::Rejected(
                "empty partition key".to_string(),
            ));
        }
        let payload = serde_json::to_value(payload)
            .map_err(|e| PublishError::Rejected(format!("unserializable payload: {}", e)))?;
        let envelope = EventEnvelope::new(event_type, key, payload);
        self.publish_envelope(topic, &envelope).await
    }

    /// Append a pre-built envelope. Used by dead-letter replay, which must
    /// preserve the original payload and produced-at timestamp.
    pub async fn publish_envelope(
        &self,
        topic: &str,
        envelope: &EventEnvelope,
    ) -> Result<Offset, PublishError> {
        if envelope.key.is_empty() {
            return Err(PublishError::Rejected(
                "empty partition key".to_string(),
            ));
        }
        let offset = self.broker.publish(topic, envelope).await?;
        debug!(
            topic,
            key = %envelope.key,
            event_type = %envelope.event_type,
            offset,
            "Event published"
        );
        Ok(offset)
    }

    /// Publish with bounded exponential backoff on `Unavailable`.
    /// `Rejected` surfaces immediately; it will not succeed on retry.
    pub async fn publish_with_retry<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        key: &str,
        event_type: EventType,
        payload: &T,
    ) -> Result<Offset, PublishError> {
        let mut attempt = 0u32;
        loop {
            match self.publish(topic, key, event_type, payload).await {
                Ok(offset) => return Ok(offset),
                Err(rejected @ PublishError::Rejected(_)) => return Err(rejected),
                Err(unavailable @ PublishError::Unavailable(_)) => {
                    if self.retry.is_exhausted(attempt) {
                        return Err(unavailable);
                    }
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        topic,
                        key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Broker unavailable, retrying publish"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
