//! Consumer group runtime: pulls envelopes per owned partition, dispatches
//! to the registered handler, and manages offset commit, retry and
//! dead-lettering.
//!
//! One worker task per owned partition; workers run concurrently across
//! partitions and strictly sequentially within one, so a slow handler
//! throttles only its own partition. Failure isolation is per-partition: a
//! stuck partition never blocks another partition's progress.
//!
//! Commit protocol per envelope:
//! 1. Ledger lookup by (handler, key, type); a hit commits the offset
//!    without re-invoking side effects.
//! 2. Handler invocation under a bounded deadline; a deadline overrun is a
//!    transient failure.
//! 3. On success, the ledger entry is written before the offset commit. A
//!    crash between the two redelivers the envelope; the ledger check then
//!    makes the redelivery a no-op.
//! 4. Transient failures redeliver in place after capped exponential
//!    backoff; permanent failures and retry exhaustion write a dead-letter
//!    record and commit the offset so the partition is never stalled.

use crate::broker::{Broker, PartitionStream};
use crate::dead_letter::{DeadLetterRecord, DeadLetterSink, FailureClass};
use crate::error::{BrokerError, HandlerError};
use crate::handler::EventHandler;
use crate::metrics::ConsumerMetrics;
use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use event_schema::EventEnvelope;
use idempotency_ledger::IdempotencyLedger;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub retry: RetryPolicy,
    /// Deadline per handler invocation; exceeding it counts as a
    /// transient failure.
    pub handler_timeout: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            handler_timeout: Duration::from_secs(30),
        }
    }
}

/// Shared runtime for all consumer groups of a service instance.
///
/// Holds only the handles it needs (broker, ledger, dead-letter sink); no
/// ambient registry. Each [`subscribe`](ConsumerGroup::subscribe) spawns
/// the partition workers for one (topic, group, handler) binding.
pub struct ConsumerGroup {
    broker: Arc<dyn Broker>,
    ledger: Arc<dyn IdempotencyLedger>,
    dead_letters: Arc<dyn DeadLetterSink>,
    config: ConsumerConfig,
    shutdown: watch::Receiver<bool>,
}

impl ConsumerGroup {
    pub fn new(
        broker: Arc<dyn Broker>,
        ledger: Arc<dyn IdempotencyLedger>,
        dead_letters: Arc<dyn DeadLetterSink>,
        config: ConsumerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            broker,
            ledger,
            dead_letters,
            config,
            shutdown,
        }
    }

    /// Join `group` on `topic` and dispatch every delivered envelope to
    /// `handler`. Returns a [`Subscription`] owning the partition workers.
    pub async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<Subscription, BrokerError> {
        let streams = self.broker.subscribe(topic, group).await?;
        let metrics = ConsumerMetrics::new(group);

        info!(
            topic,
            group,
            handler = handler.name(),
            partitions = streams.len(),
            "Consumer group subscribed"
        );

        let mut tasks = Vec::with_capacity(streams.len());
        for stream in streams {
            let worker = PartitionWorker {
                stream,
                handler: handler.clone(),
                ledger: self.ledger.clone(),
                dead_letters: self.dead_letters.clone(),
                group: group.to_string(),
                retry: self.config.retry.clone(),
                handler_timeout: self.config.handler_timeout,
                metrics: metrics.clone(),
                shutdown: self.shutdown.clone(),
            };
            tasks.push(tokio::spawn(worker.run()));
        }

        Ok(Subscription {
            topic: topic.to_string(),
            group: group.to_string(),
            tasks,
        })
    }
}

/// A running subscription; dropping it detaches the workers, [`join`]
/// waits for them to finish after shutdown is signalled.
pub struct Subscription {
    topic: String,
    group: String,
    tasks: Vec<JoinHandle<()>>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Wait for all partition workers to stop. In-flight handler
    /// invocations finish and land their commit or dead-letter decision
    /// before a worker exits.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(topic = %self.topic, group = %self.group, error = %e, "Partition worker panicked");
            }
        }
    }
}

enum Outcome {
    /// Commit the offset: handled, duplicate-suppressed, or dead-lettered.
    Commit,
    /// Shutdown interrupted a backoff wait; leave the offset uncommitted
    /// so the envelope is redelivered after restart.
    Abandon,
}

struct PartitionWorker {
    stream: Box<dyn PartitionStream>,
    handler: Arc<dyn EventHandler>,
    ledger: Arc<dyn IdempotencyLedger>,
    dead_letters: Arc<dyn DeadLetterSink>,
    group: String,
    retry: RetryPolicy,
    handler_timeout: Duration,
    metrics: ConsumerMetrics,
    shutdown: watch::Receiver<bool>,
}

impl PartitionWorker {
    async fn run(mut self) {
        debug!(
            topic = self.stream.topic(),
            partition = self.stream.partition(),
            handler = self.handler.name(),
            "Partition worker started"
        );

        loop {
            if *self.shutdown.borrow() {
                break;
            }
            let delivered = tokio::select! {
                _ = shutdown_signalled(&mut self.shutdown) => break,
                next = self.stream.next() => match next {
                    Ok(Some(delivered)) => delivered,
                    Ok(None) => break,
                    Err(e) => {
                        error!(
                            topic = self.stream.topic(),
                            partition = self.stream.partition(),
                            error = %e,
                            "Failed to pull from partition"
                        );
                        if !self.backoff(0).await {
                            break;
                        }
                        continue;
                    }
                },
            };

            let offset = delivered.offset;
            match self.process(delivered.envelope).await {
                Outcome::Commit => {
                    if let Err(e) = self.stream.commit(offset).await {
                        warn!(
                            topic = self.stream.topic(),
                            partition = self.stream.partition(),
                            offset,
                            error = %e,
                            "Failed to commit offset"
                        );
                    }
                }
                Outcome::Abandon => break,
            }
        }

        debug!(
            topic = self.stream.topic(),
            partition = self.stream.partition(),
            handler = self.handler.name(),
            "Partition worker stopped"
        );
    }

    async fn process(&mut self, mut envelope: EventEnvelope) -> Outcome {
        let handler_name = self.handler.name();
        let mut first_failed_at: Option<DateTime<Utc>> = None;

        loop {
            // Duplicate suppression. Ledger unavailability blocks the
            // commit decision instead of risking a duplicate side effect.
            match self
                .ledger
                .is_processed(handler_name, &envelope.key, envelope.event_type)
                .await
            {
                Ok(true) => {
                    debug!(
                        handler = handler_name,
                        key = %envelope.key,
                        event_type = %envelope.event_type,
                        "Duplicate envelope suppressed"
                    );
                    self.metrics.duplicates_suppressed.inc();
                    return Outcome::Commit;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(handler = handler_name, error = %e, "Ledger check failed, delaying");
                    if !self.backoff(envelope.attempt).await {
                        return Outcome::Abandon;
                    }
                    continue;
                }
            }

            let result = match tokio::time::timeout(
                self.handler_timeout,
                self.handler.handle(&envelope),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(HandlerError::Transient(anyhow::anyhow!(
                    "handler deadline of {:?} exceeded",
                    self.handler_timeout
                ))),
            };

            match result {
                Ok(()) => {
                    // Ledger write happens-before offset commit.
                    loop {
                        match self
                            .ledger
                            .mark_processed(handler_name, &envelope.key, envelope.event_type)
                            .await
                        {
                            Ok(_) => {
                                self.metrics.consumed.inc();
                                return Outcome::Commit;
                            }
                            Err(e) => {
                                warn!(
                                    handler = handler_name,
                                    key = %envelope.key,
                                    error = %e,
                                    "Ledger write failed, retrying before commit"
                                );
                                if !self.backoff(envelope.attempt).await {
                                    return Outcome::Abandon;
                                }
                            }
                        }
                    }
                }
                Err(HandlerError::Permanent(cause)) => {
                    let now = Utc::now();
                    let first = first_failed_at.unwrap_or(now);
                    return self
                        .dead_letter(&envelope, FailureClass::Permanent, &cause, first, now)
                        .await;
                }
                Err(HandlerError::Transient(cause)) => {
                    let now = Utc::now();
                    let first = *first_failed_at.get_or_insert(now);
                    if self.retry.is_exhausted(envelope.attempt) {
                        return self
                            .dead_letter(&envelope, FailureClass::Transient, &cause, first, now)
                            .await;
                    }
                    warn!(
                        handler = handler_name,
                        key = %envelope.key,
                        attempt = envelope.attempt,
                        error = %cause,
                        "Transient handler failure, scheduling redelivery"
                    );
                    self.metrics.retries.inc();
                    if !self.backoff(envelope.attempt).await {
                        return Outcome::Abandon;
                    }
                    envelope.attempt += 1;
                }
            }
        }
    }

    async fn dead_letter(
        &mut self,
        envelope: &EventEnvelope,
        failure_class: FailureClass,
        cause: &anyhow::Error,
        first_failed_at: DateTime<Utc>,
        last_failed_at: DateTime<Utc>,
    ) -> Outcome {
        let record = DeadLetterRecord {
            id: Uuid::new_v4(),
            topic: self.stream.topic().to_string(),
            partition: self.stream.partition(),
            group: self.group.clone(),
            handler: self.handler.name().to_string(),
            event_type: envelope.event_type,
            event_key: envelope.key.clone(),
            payload: envelope.payload.clone(),
            produced_at: envelope.produced_at,
            attempts: envelope.attempt,
            failure_class,
            last_error: format!("{:#}", cause),
            first_failed_at,
            last_failed_at,
            replayed_at: None,
        };

        loop {
            match self.dead_letters.record(&record).await {
                Ok(()) => {
                    self.metrics.dead_lettered.inc();
                    // Alert-worthy: the envelope will not be applied
                    // without an explicit replay.
                    error!(
                        handler = self.handler.name(),
                        topic = self.stream.topic(),
                        partition = self.stream.partition(),
                        key = %envelope.key,
                        event_type = %envelope.event_type,
                        attempts = envelope.attempt,
                        failure_class = failure_class.as_str(),
                        error = %record.last_error,
                        "Envelope dead-lettered"
                    );
                    return Outcome::Commit;
                }
                Err(e) => {
                    warn!(
                        handler = self.handler.name(),
                        key = %envelope.key,
                        error = %e,
                        "Dead-letter write failed, retrying"
                    );
                    if !self.backoff(envelope.attempt).await {
                        return Outcome::Abandon;
                    }
                }
            }
        }
    }

    /// Sleep the retry backoff for `attempt`, or return `false` if
    /// shutdown was signalled during the wait.
    async fn backoff(&mut self, attempt: u32) -> bool {
        let delay = self.retry.backoff(attempt);
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = shutdown_signalled(&mut self.shutdown) => false,
        }
    }
}

/// Resolves when shutdown is signalled or the sender is dropped.
async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    if *rx.borrow() {
        return;
    }
    while rx.changed().await.is_ok() {
        if *rx.borrow() {
            return;
        }
    }
    // Sender dropped: treat as shutdown
}
