//! Handler seam between the consumer runtime and a derived store.

use crate::error::HandlerError;
use async_trait::async_trait;
use event_schema::EventEnvelope;

/// A pure mapping from one event family to one derived-store effect.
///
/// Handlers must be idempotent with respect to re-applying the same
/// payload: under at-least-once delivery the runtime may invoke them again
/// for an envelope whose side effect already landed but whose ledger entry
/// did not. Side effects that are not naturally idempotent (SMS, email)
/// rely on the runtime's ledger check to suppress the second invocation.
///
/// The error classification is the handler's decision: `Transient` for
/// store-unavailable/timeout/rate-limit conditions, `Permanent` for
/// malformed payloads and invalid recipients.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable name, used as the ledger namespace for this handler's
    /// processed entries. Changing it resets duplicate suppression.
    fn name(&self) -> &'static str;

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError>;
}
