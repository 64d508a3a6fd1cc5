//! Document archive client.
//!
//! Mirrors relational post rows into ClickHouse for analytics and backup.
//! The table is a ReplacingMergeTree keyed by post id with the envelope
//! timestamp as the version column, so replays and out-of-order deliveries
//! collapse last-write-wins.

use chrono::{DateTime, Utc};
use clickhouse::{Client, Row};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("ClickHouse client error: {0}")]
    Client(#[from] clickhouse::error::Error),
}

#[derive(Debug, Clone, Serialize, Row)]
pub struct ArchivedPost {
    #[serde(with = "clickhouse::serde::uuid")]
    pub post_id: Uuid,
    #[serde(with = "clickhouse::serde::uuid")]
    pub author_id: Uuid,
    pub title: String,
    pub content: String,
    pub status: String,
    /// Envelope produced-at; the ReplacingMergeTree version column
    #[serde(with = "clickhouse::serde::chrono::datetime64::millis")]
    pub version: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ArchiveClient {
    client: Client,
}

impl ArchiveClient {
    pub async fn new(url: &str) -> Result<Self, ArchiveError> {
        let client = Client::default()
            .with_url(url)
            .with_compression(clickhouse::Compression::Lz4);

        let instance = Self { client };
        instance.ensure_schema().await?;
        Ok(instance)
    }

    async fn ensure_schema(&self) -> Result<(), ArchiveError> {
        self.client
            .query(
                r#"
                CREATE TABLE IF NOT EXISTS archived_posts (
                    post_id UUID,
                    author_id UUID,
                    title String,
                    content String,
                    status String,
                    version DateTime64(3)
                ) ENGINE = ReplacingMergeTree(version)
                ORDER BY post_id
                "#,
            )
            .execute()
            .await?;
        Ok(())
    }

    pub async fn upsert_post(&self, post: &ArchivedPost) -> Result<(), ArchiveError> {
        let mut insert = self.client.insert("archived_posts")?;
        insert.write(post).await?;
        insert.end().await?;
        Ok(())
    }
}
