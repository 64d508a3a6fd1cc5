//! Email dispatch handler.
//!
//! Like SMS, email dispatch relies on the runtime's ledger check for
//! duplicate suppression. SMTP transport failures are transient; an
//! unparseable recipient address is permanent.

use crate::clients::{EmailClient, EmailError};
use async_trait::async_trait;
use event_bus::{EventHandler, HandlerError};
use event_schema::{EmailRequestedEvent, EventEnvelope, EventType};
use tracing::info;

pub struct EmailHandler {
    email: EmailClient,
}

impl EmailHandler {
    pub const NAME: &'static str = "notification-email";

    pub fn new(email: EmailClient) -> Self {
        Self { email }
    }
}

fn classify(err: EmailError) -> HandlerError {
    if err.is_retryable() {
        HandlerError::transient(err)
    } else {
        HandlerError::permanent(err)
    }
}

#[async_trait]
impl EventHandler for EmailHandler {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        if envelope.event_type != EventType::EmailRequested {
            return Ok(());
        }
        let event: EmailRequestedEvent = envelope.decode().map_err(HandlerError::permanent)?;

        self.email
            .send(&event.address, &event.subject, &event.body)
            .await
            .map_err(classify)?;

        info!(user_id = %event.user_id, "Email dispatched");
        Ok(())
    }
}
