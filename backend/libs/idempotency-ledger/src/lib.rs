//! # Idempotency Ledger
//!
//! Durable record of already-applied `(handler, event key, event type)`
//! triples, used to suppress duplicate side effects under at-least-once
//! delivery. The consumer runtime checks the ledger before invoking a
//! handler and writes an entry only after the handler's side effect is
//! durably applied; the entry write happens-before the offset commit, so a
//! crash between the two results in a safe redelivery rather than a lost or
//! doubled side effect.
//!
//! Two implementations:
//! - [`PgIdempotencyLedger`]: PostgreSQL-backed, shared across service
//!   instances. `INSERT ... ON CONFLICT DO NOTHING` makes concurrent marks
//!   first-writer-wins with no cross-key locking.
//! - [`InMemoryLedger`]: process-local, for tests and local development.
//!
//! Entries must outlive the broker's maximum redelivery window; after that
//! they are garbage-collected by [`IdempotencyLedger::cleanup_expired`],
//! typically from a periodic task in the consuming service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use event_schema::EventType;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, info};

mod error;

pub use error::{LedgerError, LedgerResult};

/// Maximum stored length for handler names and event keys.
const MAX_KEY_LEN: usize = 255;

/// Durable ledger of processed events, keyed by
/// `(handler name, event key, event type)`.
#[async_trait]
pub trait IdempotencyLedger: Send + Sync {
    /// Check whether the handler already applied this event.
    async fn is_processed(
        &self,
        handler: &str,
        event_key: &str,
        event_type: EventType,
    ) -> LedgerResult<bool>;

    /// Record that the handler applied this event. Returns `true` if this
    /// call inserted the entry, `false` if another writer got there first.
    /// The latter is not an error; redeliveries racing is expected.
    async fn mark_processed(
        &self,
        handler: &str,
        event_key: &str,
        event_type: EventType,
    ) -> LedgerResult<bool>;

    /// Delete entries older than the retention window. Returns the number
    /// of entries removed.
    async fn cleanup_expired(&self) -> LedgerResult<u64>;
}

fn validate_entry(handler: &str, event_key: &str) -> LedgerResult<()> {
    if handler.is_empty() {
        return Err(LedgerError::InvalidKey(
            "handler name cannot be empty".to_string(),
        ));
    }
    if event_key.is_empty() {
        return Err(LedgerError::InvalidKey(
            "event key cannot be empty".to_string(),
        ));
    }
    if event_key.len() > MAX_KEY_LEN {
        return Err(LedgerError::InvalidKey(format!(
            "event key too long: {} characters (max {})",
            event_key.len(),
            MAX_KEY_LEN
        )));
    }
    Ok(())
}

/// PostgreSQL-backed ledger.
///
/// Thread-safe and shareable across tasks via `Arc`. Requires the
/// `processed_events` migration from `migrations/`.
#[derive(Clone)]
pub struct PgIdempotencyLedger {
    pool: PgPool,
    retention: Duration,
}

impl PgIdempotencyLedger {
    /// # Arguments
    ///
    /// * `pool` - PostgreSQL connection pool
    /// * `retention` - how long entries are kept; must outlast the broker's
    ///   maximum redelivery window (7 days is a safe default for a broker
    ///   retention of 3 days)
    pub fn new(pool: PgPool, retention: Duration) -> Self {
        Self { pool, retention }
    }
}

#[async_trait]
impl IdempotencyLedger for PgIdempotencyLedger {
    async fn is_processed(
        &self,
        handler: &str,
        event_key: &str,
        event_type: EventType,
    ) -> LedgerResult<bool> {
        validate_entry(handler, event_key)?;

        let row: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM processed_events
                WHERE handler_name = $1 AND event_key = $2 AND event_type = $3
            )
            "#,
        )
        .bind(handler)
        .bind(event_key)
        .bind(event_type.as_str())
        .fetch_one(&self.pool)
        .await?;

        if row.0 {
            debug!(handler, event_key, event_type = %event_type, "Event already processed");
        }

        Ok(row.0)
    }

    async fn mark_processed(
        &self,
        handler: &str,
        event_key: &str,
        event_type: EventType,
    ) -> LedgerResult<bool> {
        validate_entry(handler, event_key)?;

        // ON CONFLICT DO NOTHING: two redeliveries racing is safe, the
        // second writer is a no-op.
        let result = sqlx::query(
            r#"
            INSERT INTO processed_events (handler_name, event_key, event_type, processed_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (handler_name, event_key, event_type) DO NOTHING
            "#,
        )
        .bind(handler)
        .bind(event_key)
        .bind(event_type.as_str())
        .execute(&self.pool)
        .await?;

        let was_inserted = result.rows_affected() > 0;
        if was_inserted {
            debug!(handler, event_key, event_type = %event_type, "Ledger entry written");
        } else {
            debug!(handler, event_key, event_type = %event_type, "Ledger entry already present");
        }

        Ok(was_inserted)
    }

    async fn cleanup_expired(&self) -> LedgerResult<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.retention).map_err(|e| {
                LedgerError::Unavailable(anyhow::anyhow!("invalid retention duration: {}", e))
            })?;

        let result = sqlx::query("DELETE FROM processed_events WHERE processed_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            info!(deleted, cutoff = %cutoff, "Cleaned up expired ledger entries");
        }

        Ok(deleted)
    }
}

/// Process-local ledger for tests and single-node development.
///
/// Each entry is an independent map slot; concurrent marks on the same
/// triple resolve first-writer-wins through the map's entry API.
#[derive(Default)]
pub struct InMemoryLedger {
    entries: DashMap<(String, String, EventType), DateTime<Utc>>,
    retention: Option<Duration>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            retention: Some(retention),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl IdempotencyLedger for InMemoryLedger {
    async fn is_processed(
        &self,
        handler: &str,
        event_key: &str,
        event_type: EventType,
    ) -> LedgerResult<bool> {
        validate_entry(handler, event_key)?;
        Ok(self
            .entries
            .contains_key(&(handler.to_string(), event_key.to_string(), event_type)))
    }

    async fn mark_processed(
        &self,
        handler: &str,
        event_key: &str,
        event_type: EventType,
    ) -> LedgerResult<bool> {
        validate_entry(handler, event_key)?;
        let key = (handler.to_string(), event_key.to_string(), event_type);
        match self.entries.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Utc::now());
                Ok(true)
            }
        }
    }

    async fn cleanup_expired(&self) -> LedgerResult<u64> {
        let Some(retention) = self.retention else {
            return Ok(0);
        };
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention).map_err(|e| {
                LedgerError::Unavailable(anyhow::anyhow!("invalid retention duration: {}", e))
            })?;
        let before = self.entries.len();
        self.entries.retain(|_, processed_at| *processed_at >= cutoff);
        Ok((before - self.entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_entry() {
        assert!(validate_entry("search-index", "post-42").is_ok());
        assert!(validate_entry("search-index", &"x".repeat(255)).is_ok());

        let err = validate_entry("", "post-42").unwrap_err();
        assert!(matches!(err, LedgerError::InvalidKey(_)));

        let err = validate_entry("search-index", "").unwrap_err();
        assert!(matches!(err, LedgerError::InvalidKey(_)));

        let err = validate_entry("search-index", &"x".repeat(256)).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn test_in_memory_mark_and_check() {
        let ledger = InMemoryLedger::new();

        assert!(!ledger
            .is_processed("cache", "post-1", EventType::PostPublished)
            .await
            .unwrap());

        assert!(ledger
            .mark_processed("cache", "post-1", EventType::PostPublished)
            .await
            .unwrap());

        assert!(ledger
            .is_processed("cache", "post-1", EventType::PostPublished)
            .await
            .unwrap());

        // Second mark is a no-op, not an error
        assert!(!ledger
            .mark_processed("cache", "post-1", EventType::PostPublished)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_in_memory_entries_are_independent_per_triple() {
        let ledger = InMemoryLedger::new();
        ledger
            .mark_processed("cache", "post-1", EventType::PostPublished)
            .await
            .unwrap();

        // Different handler, same key/type
        assert!(!ledger
            .is_processed("search-index", "post-1", EventType::PostPublished)
            .await
            .unwrap());
        // Same handler, different type
        assert!(!ledger
            .is_processed("cache", "post-1", EventType::PostDeleted)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_in_memory_concurrent_marks_single_winner() {
        use std::sync::Arc;

        let ledger = Arc::new(InMemoryLedger::new());
        let mut tasks = Vec::new();
        for _ in 0..10 {
            let ledger = ledger.clone();
            tasks.push(tokio::spawn(async move {
                ledger
                    .mark_processed("sms", "user-7", EventType::SmsRequested)
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1, "exactly one concurrent mark may win");
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn test_in_memory_cleanup_without_retention_is_noop() {
        let ledger = InMemoryLedger::new();
        ledger
            .mark_processed("cache", "post-1", EventType::PostPublished)
            .await
            .unwrap();
        assert_eq!(ledger.cleanup_expired().await.unwrap(), 0);
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn test_in_memory_cleanup_expired() {
        let ledger = InMemoryLedger::with_retention(Duration::from_secs(0));
        ledger
            .mark_processed("cache", "post-1", EventType::PostPublished)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let deleted = ledger.cleanup_expired().await.unwrap();
        assert_eq!(deleted, 1);
        assert!(ledger.is_empty());
    }
}
