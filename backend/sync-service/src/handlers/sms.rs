//! SMS dispatch handler.
//!
//! Dispatching an SMS is not naturally idempotent; the runtime's ledger
//! check is what prevents a double send on redelivery. This handler only
//! classifies provider failures: rate limits and timeouts are transient,
//! an invalid recipient is permanent.

use crate::clients::{SmsClient, SmsError};
use async_trait::async_trait;
use event_bus::{EventHandler, HandlerError};
use event_schema::{EventEnvelope, EventType, SmsRequestedEvent};
use tracing::info;

pub struct SmsHandler {
    sms: SmsClient,
}

impl SmsHandler {
    pub const NAME: &'static str = "notification-sms";

    pub fn new(sms: SmsClient) -> Self {
        Self { sms }
    }
}

fn classify(err: SmsError) -> HandlerError {
    if err.is_retryable() {
        HandlerError::transient(err)
    } else {
        HandlerError::permanent(err)
    }
}

#[async_trait]
impl EventHandler for SmsHandler {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        if envelope.event_type != EventType::SmsRequested {
            return Ok(());
        }
        let event: SmsRequestedEvent = envelope.decode().map_err(HandlerError::permanent)?;

        self.sms
            .send(&event.phone, &event.body)
            .await
            .map_err(classify)?;

        info!(user_id = %event.user_id, "SMS dispatched");
        Ok(())
    }
}
