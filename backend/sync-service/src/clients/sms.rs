//! SMS provider client.

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SmsError {
    /// Provider took too long; retryable
    #[error("sms provider timeout: {0}")]
    Timeout(#[source] reqwest::Error),

    /// Provider asked us to slow down; retryable
    #[error("sms provider rate limited")]
    RateLimited,

    /// Recipient number the provider will never accept; not retryable
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("sms provider error: {0}")]
    Provider(#[source] anyhow::Error),
}

impl SmsError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SmsError::InvalidRecipient(_))
    }
}

#[derive(Debug, Serialize)]
struct SendSmsRequest<'a> {
    to: &'a str,
    from: &'a str,
    body: &'a str,
}

#[derive(Clone)]
pub struct SmsClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    sender: String,
}

impl SmsClient {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            sender: sender.into(),
        }
    }

    pub async fn send(&self, phone: &str, body: &str) -> Result<(), SmsError> {
        if phone.trim().is_empty() {
            return Err(SmsError::InvalidRecipient("empty phone number".to_string()));
        }

        let request = SendSmsRequest {
            to: phone,
            from: &self.sender,
            body,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SmsError::Timeout(e)
                } else {
                    SmsError::Provider(e.into())
                }
            })?;

        match response.status().as_u16() {
            200..=299 => {
                debug!(to = phone, "SMS dispatched");
                Ok(())
            }
            429 => Err(SmsError::RateLimited),
            400 | 422 => {
                let detail = response.text().await.unwrap_or_default();
                Err(SmsError::InvalidRecipient(detail))
            }
            status => Err(SmsError::Provider(anyhow::anyhow!(
                "provider returned status {}",
                status
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(SmsError::RateLimited.is_retryable());
        assert!(SmsError::Provider(anyhow::anyhow!("503")).is_retryable());
        assert!(!SmsError::InvalidRecipient("bad number".to_string()).is_retryable());
    }

    #[tokio::test]
    async fn test_empty_recipient_rejected_before_request() {
        let client = SmsClient::new("http://localhost:1/v1/sms", "key", "Parley");
        let err = client.send("", "hello").await.unwrap_err();
        assert!(matches!(err, SmsError::InvalidRecipient(_)));
    }
}
