//! # Event Bus
//!
//! Event transport for Parley's cross-store synchronization: producers,
//! a broker abstraction with Kafka and in-memory implementations, and the
//! consumer group runtime that dispatches envelopes to per-store handlers
//! with duplicate suppression, bounded retry and dead-lettering.
//!
//! Delivery is at-least-once with idempotent application: the
//! [`consumer::ConsumerGroup`] checks the idempotency ledger before every
//! handler invocation and writes the ledger entry before committing the
//! offset, so duplicates and redeliveries are suppressed rather than
//! prevented. Ordering is guaranteed per partition key only; handlers must
//! not assume any cross-key or cross-topic order.
//!
//! ## Usage
//!
//! ```ignore
//! use event_bus::{ConsumerConfig, ConsumerGroup, EventProducer, InMemoryBroker};
//! use event_schema::{topics, EventType};
//! use std::sync::Arc;
//!
//! # async fn example(handler: Arc<dyn event_bus::EventHandler>) -> anyhow::Result<()> {
//! let broker = Arc::new(InMemoryBroker::with_topics(&[(topics::POSTS, 8)])?);
//! let ledger = Arc::new(idempotency_ledger::InMemoryLedger::new());
//! let dead_letters = Arc::new(event_bus::InMemoryDeadLetterSink::new());
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let runtime = ConsumerGroup::new(
//!     broker.clone(),
//!     ledger,
//!     dead_letters,
//!     ConsumerConfig::default(),
//!     shutdown_rx,
//! );
//! let subscription = runtime
//!     .subscribe(topics::POSTS, "search-index", handler)
//!     .await?;
//!
//! let producer = EventProducer::new(broker);
//! producer
//!     .publish(topics::POSTS, "post-42", EventType::PostPublished, &serde_json::json!({}))
//!     .await?;
//!
//! shutdown_tx.send(true)?;
//! subscription.join().await;
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod consumer;
pub mod dead_letter;
pub mod error;
pub mod handler;
pub mod kafka;
pub mod memory;
pub mod metrics;
pub mod producer;
pub mod retry;

pub use broker::{Broker, Delivered, Offset, PartitionStream};
pub use consumer::{ConsumerConfig, ConsumerGroup, Subscription};
pub use dead_letter::{
    DeadLetterQueue, DeadLetterRecord, DeadLetterSink, FailureClass, InMemoryDeadLetterSink,
    PgDeadLetterSink,
};
pub use error::{BrokerError, DeadLetterError, DeadLetterResult, HandlerError, PublishError};
pub use handler::EventHandler;
pub use kafka::{KafkaBroker, KafkaBrokerConfig};
pub use memory::InMemoryBroker;
pub use producer::EventProducer;
pub use retry::RetryPolicy;
