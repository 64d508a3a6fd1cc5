//! Cross-store synchronization service.
//!
//! Consumes the platform's event topics and propagates primary-store
//! changes into the derived stores: Redis cache, search index, document
//! archive, moderation workflow, notification providers and the ranking
//! recompute queue. One consumer group per handler; delivery semantics
//! (ordering, duplicate suppression, retry, dead-lettering) live in the
//! `event-bus` runtime.

pub mod clients;
pub mod config;
pub mod handlers;
