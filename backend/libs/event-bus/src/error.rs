//! Error taxonomy for the event bus.
//!
//! Producer errors surface synchronously to the caller. Handler errors
//! never propagate past the consumer runtime; they are converted into
//! retry or dead-letter decisions.

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by [`crate::producer::EventProducer::publish`].
#[derive(Error, Debug)]
pub enum PublishError {
    /// Broker unreachable or backpressured; safe to retry with backoff.
    #[error("broker unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),

    /// Malformed envelope (empty key, unserializable payload, unknown
    /// topic). Never retried; surfaced to the caller.
    #[error("publish rejected: {0}")]
    Rejected(String),
}

/// Errors from broker subscribe/pull/commit plumbing.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("topic {topic} already exists with {existing} partitions")]
    TopicExists { topic: String, existing: usize },

    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("broker error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Handler failure classification, decided by the handler itself.
///
/// `Transient` failures are retried with capped exponential backoff up to
/// the retry policy's attempt budget; `Permanent` failures short-circuit
/// straight to the dead-letter sink.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("transient handler failure: {0}")]
    Transient(#[source] anyhow::Error),

    #[error("permanent handler failure: {0}")]
    Permanent(#[source] anyhow::Error),
}

impl HandlerError {
    pub fn transient(err: impl Into<anyhow::Error>) -> Self {
        HandlerError::Transient(err.into())
    }

    pub fn permanent(err: impl Into<anyhow::Error>) -> Self {
        HandlerError::Permanent(err.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, HandlerError::Transient(_))
    }
}

/// Result type for dead-letter sink operations
pub type DeadLetterResult<T> = Result<T, DeadLetterError>;

/// Errors from the dead-letter sink.
#[derive(Error, Debug)]
pub enum DeadLetterError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("dead-letter record not found: {0}")]
    NotFound(Uuid),

    #[error("replay failed: {0}")]
    ReplayFailed(#[from] PublishError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
