//! Dead-letter sink: durable store for envelopes whose retry budget was
//! exhausted or that failed permanently.
//!
//! Records are never replayed automatically. Operational tooling lists
//! them read-only; [`DeadLetterQueue::replay`] is the explicit re-publish
//! action, resetting the attempt counter and stamping `replayed_at`.

use crate::broker::Offset;
use crate::error::{DeadLetterError, DeadLetterResult};
use crate::producer::EventProducer;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_schema::{EventEnvelope, EventType};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Classification of the failure that dead-lettered the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Retry budget exhausted on transient failures
    Transient,
    /// Handler classified the failure as non-retryable
    Permanent,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Transient => "transient",
            FailureClass::Permanent => "permanent",
        }
    }
}

/// Original envelope plus its failure history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub id: Uuid,
    pub topic: String,
    pub partition: i32,
    pub group: String,
    pub handler: String,
    pub event_type: EventType,
    pub event_key: String,
    pub payload: serde_json::Value,
    pub produced_at: DateTime<Utc>,
    /// 0-based index of the last delivered attempt.
    pub attempts: u32,
    pub failure_class: FailureClass,
    pub last_error: String,
    pub first_failed_at: DateTime<Utc>,
    pub last_failed_at: DateTime<Utc>,
    pub replayed_at: Option<DateTime<Utc>>,
}

impl DeadLetterRecord {
    /// Rebuild the envelope for replay, with the attempt counter reset.
    pub fn to_envelope(&self) -> EventEnvelope {
        EventEnvelope {
            event_type: self.event_type,
            key: self.event_key.clone(),
            payload: self.payload.clone(),
            produced_at: self.produced_at,
            attempt: 0,
        }
    }
}

/// Durable store for dead-lettered envelopes.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn record(&self, record: &DeadLetterRecord) -> DeadLetterResult<()>;

    /// Read-only listing for operational tooling, most recent first.
    async fn list(&self, limit: i64) -> DeadLetterResult<Vec<DeadLetterRecord>>;

    async fn get(&self, id: Uuid) -> DeadLetterResult<Option<DeadLetterRecord>>;

    async fn mark_replayed(&self, id: Uuid) -> DeadLetterResult<()>;
}

/// PostgreSQL-backed sink. Requires the `dead_letter_events` migration.
#[derive(Clone)]
pub struct PgDeadLetterSink {
    pool: PgPool,
}

impl PgDeadLetterSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &sqlx::postgres::PgRow) -> DeadLetterResult<DeadLetterRecord> {
        let event_type: String = row.try_get("event_type")?;
        let event_type = EventType::from_str(&event_type)
            .map_err(|e| DeadLetterError::Database(sqlx::Error::Decode(e.into())))?;
        let failure_class: String = row.try_get("failure_class")?;
        let failure_class = match failure_class.as_str() {
            "permanent" => FailureClass::Permanent,
            _ => FailureClass::Transient,
        };
        Ok(DeadLetterRecord {
            id: row.try_get("id")?,
            topic: row.try_get("topic")?,
            partition: row.try_get("partition")?,
            group: row.try_get("group_name")?,
            handler: row.try_get("handler_name")?,
            event_type,
            event_key: row.try_get("event_key")?,
            payload: row.try_get("payload")?,
            produced_at: row.try_get("produced_at")?,
            attempts: row.try_get::<i32, _>("attempts")? as u32,
            failure_class,
            last_error: row.try_get("last_error")?,
            first_failed_at: row.try_get("first_failed_at")?,
            last_failed_at: row.try_get("last_failed_at")?,
            replayed_at: row.try_get("replayed_at")?,
        })
    }
}

#[async_trait]
impl DeadLetterSink for PgDeadLetterSink {
    async fn record(&self, record: &DeadLetterRecord) -> DeadLetterResult<()> {
        sqlx::query(
            r#"
            INSERT INTO dead_letter_events (
                id, topic, partition, group_name, handler_name,
                event_type, event_key, payload, produced_at,
                attempts, failure_class, last_error,
                first_failed_at, last_failed_at, replayed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(&record.topic)
        .bind(record.partition)
        .bind(&record.group)
        .bind(&record.handler)
        .bind(record.event_type.as_str())
        .bind(&record.event_key)
        .bind(&record.payload)
        .bind(record.produced_at)
        .bind(record.attempts as i32)
        .bind(record.failure_class.as_str())
        .bind(&record.last_error)
        .bind(record.first_failed_at)
        .bind(record.last_failed_at)
        .bind(record.replayed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self, limit: i64) -> DeadLetterResult<Vec<DeadLetterRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, topic, partition, group_name, handler_name,
                   event_type, event_key, payload, produced_at,
                   attempts, failure_class, last_error,
                   first_failed_at, last_failed_at, replayed_at
            FROM dead_letter_events
            ORDER BY last_failed_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn get(&self, id: Uuid) -> DeadLetterResult<Option<DeadLetterRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, topic, partition, group_name, handler_name,
                   event_type, event_key, payload, produced_at,
                   attempts, failure_class, last_error,
                   first_failed_at, last_failed_at, replayed_at
            FROM dead_letter_events
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn mark_replayed(&self, id: Uuid) -> DeadLetterResult<()> {
        let result = sqlx::query(
            "UPDATE dead_letter_events SET replayed_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DeadLetterError::NotFound(id));
        }
        Ok(())
    }
}

/// Process-local sink for tests and local development.
#[derive(Default)]
pub struct InMemoryDeadLetterSink {
    records: tokio::sync::Mutex<Vec<DeadLetterRecord>>,
}

impl InMemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    async fn record(&self, record: &DeadLetterRecord) -> DeadLetterResult<()> {
        let mut records = self.records.lock().await;
        if !records.iter().any(|r| r.id == record.id) {
            records.push(record.clone());
        }
        Ok(())
    }

    async fn list(&self, limit: i64) -> DeadLetterResult<Vec<DeadLetterRecord>> {
        let records = self.records.lock().await;
        let mut listed: Vec<DeadLetterRecord> = records.clone();
        listed.sort_by(|a, b| b.last_failed_at.cmp(&a.last_failed_at));
        listed.truncate(limit as usize);
        Ok(listed)
    }

    async fn get(&self, id: Uuid) -> DeadLetterResult<Option<DeadLetterRecord>> {
        let records = self.records.lock().await;
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    async fn mark_replayed(&self, id: Uuid) -> DeadLetterResult<()> {
        let mut records = self.records.lock().await;
        match records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.replayed_at = Some(Utc::now());
                Ok(())
            }
            None => Err(DeadLetterError::NotFound(id)),
        }
    }
}

/// Operational facade over a sink: inspection plus explicit replay.
pub struct DeadLetterQueue {
    sink: Arc<dyn DeadLetterSink>,
    producer: EventProducer,
}

impl DeadLetterQueue {
    pub fn new(sink: Arc<dyn DeadLetterSink>, producer: EventProducer) -> Self {
        Self { sink, producer }
    }

    pub async fn list(&self, limit: i64) -> DeadLetterResult<Vec<DeadLetterRecord>> {
        self.sink.list(limit).await
    }

    /// Re-publish a dead-lettered envelope to its original topic with the
    /// attempt counter reset. Explicit operator action, never automatic.
    pub async fn replay(&self, id: Uuid) -> DeadLetterResult<Offset> {
        let record = self
            .sink
            .get(id)
            .await?
            .ok_or(DeadLetterError::NotFound(id))?;

        if let Some(replayed_at) = record.replayed_at {
            warn!(%id, %replayed_at, "Replaying an already-replayed dead letter");
        }

        let envelope = record.to_envelope();
        let offset = self.producer.publish_envelope(&record.topic, &envelope).await?;
        self.sink.mark_replayed(id).await?;

        info!(
            %id,
            topic = %record.topic,
            event_key = %record.event_key,
            offset,
            "Dead letter replayed"
        );
        Ok(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> DeadLetterRecord {
        DeadLetterRecord {
            id: Uuid::new_v4(),
            topic: "posts".to_string(),
            partition: 0,
            group: "search-index".to_string(),
            handler: "search-index".to_string(),
            event_type: EventType::PostPublished,
            event_key: "post-42".to_string(),
            payload: serde_json::json!({"title": "hi"}),
            produced_at: Utc::now(),
            attempts: 4,
            failure_class: FailureClass::Transient,
            last_error: "index not ready".to_string(),
            first_failed_at: Utc::now(),
            last_failed_at: Utc::now(),
            replayed_at: None,
        }
    }

    #[tokio::test]
    async fn test_in_memory_record_and_list() {
        let sink = InMemoryDeadLetterSink::new();
        let record = sample_record();
        sink.record(&record).await.unwrap();
        // Duplicate record by id is a no-op
        sink.record(&record).await.unwrap();

        let listed = sink.list(10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].event_key, "post-42");
        assert_eq!(listed[0].attempts, 4);
    }

    #[tokio::test]
    async fn test_mark_replayed_missing_record() {
        let sink = InMemoryDeadLetterSink::new();
        let err = sink.mark_replayed(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, DeadLetterError::NotFound(_)));
    }

    #[test]
    fn test_to_envelope_resets_attempt() {
        let mut record = sample_record();
        record.attempts = 7;
        let envelope = record.to_envelope();
        assert_eq!(envelope.attempt, 0);
        assert_eq!(envelope.key, "post-42");
        assert_eq!(envelope.event_type, EventType::PostPublished);
    }
}
