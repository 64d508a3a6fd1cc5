//! Content-check workflow client.
//!
//! The check itself is an external collaborator; this client submits the
//! post and returns the verdict. The moderation handler turns the verdict
//! into a `content_checked` event.

use async_trait::async_trait;
use event_schema::CheckVerdict;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CheckError {
    /// Workflow unreachable or overloaded; retryable
    #[error("content-check workflow unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),

    /// Workflow rejected the submission itself; not retryable
    #[error("content-check submission rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub check_id: Uuid,
    pub verdict: CheckVerdict,
    pub reason: Option<String>,
}

#[async_trait]
pub trait ContentChecker: Send + Sync {
    async fn check(&self, post_id: Uuid, title: &str, content: &str)
        -> Result<CheckOutcome, CheckError>;
}

#[derive(Debug, Serialize)]
struct CheckRequest<'a> {
    post_id: Uuid,
    title: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    check_id: Uuid,
    verdict: CheckVerdict,
    reason: Option<String>,
}

#[derive(Clone)]
pub struct HttpContentChecker {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpContentChecker {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ContentChecker for HttpContentChecker {
    async fn check(
        &self,
        post_id: Uuid,
        title: &str,
        content: &str,
    ) -> Result<CheckOutcome, CheckError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&CheckRequest {
                post_id,
                title,
                content,
            })
            .send()
            .await
            .map_err(|e| CheckError::Unavailable(e.into()))?;

        let status = response.status();
        if status.is_client_error() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CheckError::Rejected(format!("{}: {}", status, detail)));
        }
        if !status.is_success() {
            return Err(CheckError::Unavailable(anyhow::anyhow!(
                "workflow returned status {}",
                status
            )));
        }

        let body: CheckResponse = response
            .json()
            .await
            .map_err(|e| CheckError::Unavailable(e.into()))?;

        Ok(CheckOutcome {
            check_id: body.check_id,
            verdict: body.verdict,
            reason: body.reason,
        })
    }
}
