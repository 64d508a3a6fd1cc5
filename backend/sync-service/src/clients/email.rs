//! Async email transport wrapper (SMTP or no-op).

use crate::config::SmtpConfig;
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum EmailError {
    /// Address that will never be deliverable; not retryable
    #[error("invalid recipient address: {0}")]
    InvalidRecipient(String),

    #[error("smtp configuration error: {0}")]
    Config(String),

    /// Transport-level failure; retryable
    #[error("smtp transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    #[error("message build error: {0}")]
    Build(#[from] lettre::error::Error),
}

impl EmailError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EmailError::Transport(_))
    }
}

/// If the SMTP host is empty, operates in no-op mode (logs only). Useful
/// for development and testing without email infrastructure.
#[derive(Clone)]
pub struct EmailClient {
    transport: Option<Arc<AsyncSmtpTransport<Tokio1Executor>>>,
    from: Mailbox,
}

impl EmailClient {
    pub fn new(config: &SmtpConfig) -> Result<Self, EmailError> {
        let from = config
            .from
            .parse::<Mailbox>()
            .map_err(|e| EmailError::Config(format!("invalid SMTP_FROM address: {}", e)))?;

        let transport = if config.host.trim().is_empty() {
            warn!("SMTP host not configured; email client will operate in no-op mode");
            None
        } else {
            let builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| EmailError::Config(format!("failed to configure SMTP transport: {}", e)))?
                .port(config.port);

            let builder = if let (Some(username), Some(password)) =
                (&config.username, &config.password)
            {
                builder.credentials(Credentials::new(username.clone(), password.clone()))
            } else {
                builder
            };

            Some(Arc::new(builder.build()))
        };

        Ok(Self { transport, from })
    }

    pub async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), EmailError> {
        let to = recipient
            .parse::<Mailbox>()
            .map_err(|e| EmailError::InvalidRecipient(format!("{}: {}", recipient, e)))?;

        let Some(transport) = &self.transport else {
            info!(to = recipient, subject, "Email suppressed (no-op mode)");
            return Ok(());
        };

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(header::ContentType::TEXT_PLAIN)
            .body(body.to_string())?;

        transport.send(message).await?;
        info!(to = recipient, subject, "Email dispatched");
        Ok(())
    }
}
