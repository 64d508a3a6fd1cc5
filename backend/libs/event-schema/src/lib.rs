use chrono::{DateTime, Utc};
/// Event schemas for all Kafka topics across Parley services.
///
/// Every message on the bus is an [`EventEnvelope`]: a type tag, a partition
/// key, an opaque JSON payload and delivery metadata. The envelope is the
/// only thing the broker layer understands; the typed payload structs in
/// [`events`] are decoded per event type right before handler dispatch.
use serde::{Deserialize, Serialize};

// Typed payloads for each event family
pub mod events;
// Topic names and event-type -> topic mapping
pub mod topics;

pub use events::*;

/// Semantic event tag carried by every envelope.
///
/// Handlers dispatch on this tag and decode the payload accordingly; an
/// unknown or mismatched payload for a given tag is a permanent failure,
/// not a retryable one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PostPublished,
    PostDeleted,
    PostSynced,
    ProfileUpdated,
    UserRegistered,
    ContentChecked,
    CacheInvalidate,
    SearchIndexUpdate,
    PostLiked,
    PostRead,
    SmsRequested,
    EmailRequested,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PostPublished => "post_published",
            EventType::PostDeleted => "post_deleted",
            EventType::PostSynced => "post_synced",
            EventType::ProfileUpdated => "profile_updated",
            EventType::UserRegistered => "user_registered",
            EventType::ContentChecked => "content_checked",
            EventType::CacheInvalidate => "cache_invalidate",
            EventType::SearchIndexUpdate => "search_index_update",
            EventType::PostLiked => "post_liked",
            EventType::PostRead => "post_read",
            EventType::SmsRequested => "sms_requested",
            EventType::EmailRequested => "email_requested",
        }
    }

    /// The coarse event family this type is published on.
    pub fn topic(&self) -> &'static str {
        match self {
            EventType::PostPublished | EventType::PostDeleted => topics::POSTS,
            EventType::PostSynced => topics::SYNC,
            EventType::ProfileUpdated | EventType::UserRegistered => topics::USERS,
            EventType::ContentChecked => topics::CHECKS,
            EventType::CacheInvalidate => topics::CACHE,
            EventType::SearchIndexUpdate => topics::SEARCH,
            EventType::PostLiked | EventType::PostRead => topics::INTERACTIONS,
            EventType::SmsRequested | EventType::EmailRequested => topics::NOTIFICATIONS,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "post_published" => Ok(EventType::PostPublished),
            "post_deleted" => Ok(EventType::PostDeleted),
            "post_synced" => Ok(EventType::PostSynced),
            "profile_updated" => Ok(EventType::ProfileUpdated),
            "user_registered" => Ok(EventType::UserRegistered),
            "content_checked" => Ok(EventType::ContentChecked),
            "cache_invalidate" => Ok(EventType::CacheInvalidate),
            "search_index_update" => Ok(EventType::SearchIndexUpdate),
            "post_liked" => Ok(EventType::PostLiked),
            "post_read" => Ok(EventType::PostRead),
            "sms_requested" => Ok(EventType::SmsRequested),
            "email_requested" => Ok(EventType::EmailRequested),
            other => Err(format!("unknown event type: {}", other)),
        }
    }
}

/// Canonical wire message for all topics.
///
/// All envelopes published with the same `key` on the same topic land in the
/// same partition and are delivered in publish order. `produced_at` is
/// advisory metadata and never drives ordering decisions. `attempt` starts
/// at 0 and is incremented by the consumer runtime on redelivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_type: EventType,
    /// Ordering / partition key, typically the owning entity's identifier.
    /// Must be non-empty; producers reject empty keys before publish.
    pub key: String,
    pub payload: serde_json::Value,
    pub produced_at: DateTime<Utc>,
    pub attempt: u32,
}

impl EventEnvelope {
    pub fn new(
        event_type: EventType,
        key: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_type,
            key: key.into(),
            payload,
            produced_at: Utc::now(),
            attempt: 0,
        }
    }

    /// Decode the payload into the typed event struct for this envelope.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_event_type_wire_names() {
        assert_eq!(EventType::PostPublished.as_str(), "post_published");
        assert_eq!(EventType::SmsRequested.as_str(), "sms_requested");
        assert_eq!(
            serde_json::to_string(&EventType::ContentChecked).unwrap(),
            "\"content_checked\""
        );
    }

    #[test]
    fn test_event_type_topic_mapping() {
        assert_eq!(EventType::PostPublished.topic(), topics::POSTS);
        assert_eq!(EventType::PostDeleted.topic(), topics::POSTS);
        assert_eq!(EventType::PostSynced.topic(), topics::SYNC);
        assert_eq!(EventType::SmsRequested.topic(), topics::NOTIFICATIONS);
        assert_eq!(EventType::PostLiked.topic(), topics::INTERACTIONS);
    }

    #[test]
    fn test_envelope_round_trip() {
        let event = PostPublishedEvent {
            post_id: Uuid::new_v4(),
            author_id: Uuid::new_v4(),
            title: "hi".to_string(),
            content: "first post".to_string(),
            published_at: Utc::now(),
        };
        let envelope = EventEnvelope::new(
            EventType::PostPublished,
            event.post_id.to_string(),
            serde_json::to_value(&event).unwrap(),
        );

        let bytes = serde_json::to_vec(&envelope).unwrap();
        let decoded: EventEnvelope = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(decoded.event_type, EventType::PostPublished);
        assert_eq!(decoded.key, envelope.key);
        assert_eq!(decoded.attempt, 0);
        let payload: PostPublishedEvent = decoded.decode().unwrap();
        assert_eq!(payload.post_id, event.post_id);
        assert_eq!(payload.title, "hi");
    }

    #[test]
    fn test_decode_mismatched_payload_fails() {
        let envelope = EventEnvelope::new(
            EventType::SmsRequested,
            "user-7",
            serde_json::json!({"unexpected": true}),
        );
        assert!(envelope.decode::<SmsRequestedEvent>().is_err());
    }
}
