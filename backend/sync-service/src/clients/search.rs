//! Search index client for post documents.

use chrono::{DateTime, Utc};
use elasticsearch::{
    http::transport::{BuildError, SingleNodeConnectionPool, TransportBuilder},
    DeleteParts, Elasticsearch, IndexParts,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid Elasticsearch URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("failed to build transport: {0}")]
    TransportBuild(#[from] BuildError),
    #[error("transport error: {0}")]
    Transport(#[from] elasticsearch::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostDocument {
    pub id: Uuid,
    pub author_id: Uuid,
    pub title: String,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SearchIndexClient {
    client: Elasticsearch,
    post_index: String,
}

impl SearchIndexClient {
    pub fn new(url: &str, post_index: impl Into<String>) -> Result<Self, SearchError> {
        let url = Url::parse(url)?;
        let pool = SingleNodeConnectionPool::new(url);
        let transport = TransportBuilder::new(pool).build()?;
        Ok(Self {
            client: Elasticsearch::new(transport),
            post_index: post_index.into(),
        })
    }

    /// Index the document, replacing any existing version. Upserts are
    /// naturally idempotent: re-applying the same document is a no-op for
    /// the index's visible state.
    pub async fn upsert_post(&self, doc: &PostDocument) -> Result<(), SearchError> {
        let id = doc.id.to_string();
        let response = self
            .client
            .index(IndexParts::IndexId(&self.post_index, &id))
            .body(doc)
            .send()
            .await?;
        response.error_for_status_code()?;
        Ok(())
    }

    /// Remove the document. Deleting an already-absent document is a no-op.
    pub async fn delete_post(&self, post_id: Uuid) -> Result<(), SearchError> {
        let id = post_id.to_string();
        let response = self
            .client
            .delete(DeleteParts::IndexId(&self.post_index, &id))
            .send()
            .await?;
        if response.status_code().as_u16() == 404 {
            return Ok(());
        }
        response.error_for_status_code()?;
        Ok(())
    }
}
