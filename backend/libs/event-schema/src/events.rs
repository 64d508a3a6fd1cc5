//! Typed payloads carried by [`crate::EventEnvelope`].
//!
//! Payloads are entity snapshots or deltas, serialized to JSON on the wire.
//! Consumers decode them with [`crate::EventEnvelope::decode`] after
//! dispatching on the envelope's event type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// POST LIFECYCLE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostPublishedEvent {
    pub post_id: Uuid,
    pub author_id: Uuid,
    pub title: String,
    pub content: String,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostDeletedEvent {
    pub post_id: Uuid,
    pub author_id: Uuid,
    pub deleted_at: DateTime<Utc>,
}

/// Snapshot of a post destined for the document archive. The archive applies
/// last-write-wins keyed by `post_id` plus the envelope timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostSyncedEvent {
    pub post_id: Uuid,
    pub author_id: Uuid,
    pub title: String,
    pub content: String,
    pub status: String,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// USER LIFECYCLE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRegisteredEvent {
    pub user_id: Uuid,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileUpdatedEvent {
    pub user_id: Uuid,
    pub nickname: String,
    pub about: Option<String>,
    pub avatar_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// CONTENT CHECK
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckVerdict {
    Approved,
    Rejected,
}

/// Verdict from the content-check workflow. Drives the publish-or-reject
/// transition in the originating post's state machine downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentCheckedEvent {
    pub post_id: Uuid,
    pub check_id: Uuid,
    pub verdict: CheckVerdict,
    pub reason: Option<String>,
    pub checked_at: DateTime<Utc>,
}

// ============================================================================
// CACHE / SEARCH COMMANDS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheInvalidateEvent {
    /// Fully qualified cache keys to evict.
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchIndexUpdateEvent {
    pub post_id: Uuid,
    pub author_id: Uuid,
    pub title: String,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// INTERACTIONS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostLikedEvent {
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub liked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostReadEvent {
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub read_at: DateTime<Utc>,
}

// ============================================================================
// NOTIFICATIONS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsRequestedEvent {
    pub user_id: Uuid,
    pub phone: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRequestedEvent {
    pub user_id: Uuid,
    pub address: String,
    pub subject: String,
    pub body: String,
}
