//! In-memory broker: partitioned append-only logs with per-group committed
//! offsets. Used by the runtime test suites and for local development
//! without a Kafka cluster.
//!
//! Group semantics are deliberately simple: the subscribing member owns all
//! partitions of the topic. Rebalancing across members is the production
//! broker's job.

use crate::broker::{partition_for_key, Broker, Delivered, Offset, PartitionStream};
use crate::error::{BrokerError, PublishError};
use async_trait::async_trait;
use dashmap::DashMap;
use event_schema::EventEnvelope;
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};

struct PartitionLog {
    records: RwLock<Vec<EventEnvelope>>,
    appended: Notify,
}

impl PartitionLog {
    fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            appended: Notify::new(),
        }
    }
}

struct TopicLog {
    partitions: Vec<Arc<PartitionLog>>,
}

/// Committed offsets keyed by (topic, group, partition); the stored value
/// is the next offset to deliver.
type CommittedOffsets = DashMap<(String, String, i32), Offset>;

#[derive(Default)]
pub struct InMemoryBroker {
    topics: DashMap<String, Arc<TopicLog>>,
    committed: Arc<CommittedOffsets>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `topic` with a fixed partition count. Creating an existing
    /// topic with the same count is a no-op; a different count is a
    /// breaking operation and is rejected.
    pub fn create_topic(&self, topic: &str, partitions: usize) -> Result<(), BrokerError> {
        if partitions == 0 {
            return Err(BrokerError::Other(anyhow::anyhow!(
                "topic {} needs at least one partition",
                topic
            )));
        }
        if let Some(existing) = self.topics.get(topic) {
            let existing = existing.partitions.len();
            if existing == partitions {
                return Ok(());
            }
            return Err(BrokerError::TopicExists {
                topic: topic.to_string(),
                existing,
            });
        }
        let log = TopicLog {
            partitions: (0..partitions).map(|_| Arc::new(PartitionLog::new())).collect(),
        };
        self.topics.insert(topic.to_string(), Arc::new(log));
        Ok(())
    }

    /// Convenience constructor for tests and local wiring.
    pub fn with_topics(topics: &[(&str, usize)]) -> Result<Self, BrokerError> {
        let broker = Self::new();
        for (topic, partitions) in topics {
            broker.create_topic(topic, *partitions)?;
        }
        Ok(broker)
    }

    pub fn partition_count(&self, topic: &str) -> Option<usize> {
        self.topics.get(topic).map(|t| t.partitions.len())
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, topic: &str, envelope: &EventEnvelope) -> Result<Offset, PublishError> {
        if envelope.key.is_empty() {
            return Err(PublishError::Rejected("empty partition key".to_string()));
        }
        let log = self
            .topics
            .get(topic)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| PublishError::Rejected(format!("unknown topic: {}", topic)))?;

        let partition = partition_for_key(&envelope.key, log.partitions.len());
        let partition_log = &log.partitions[partition];

        let mut records = partition_log.records.write().await;
        records.push(envelope.clone());
        let offset = (records.len() - 1) as Offset;
        drop(records);
        partition_log.appended.notify_waiters();

        Ok(offset)
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Vec<Box<dyn PartitionStream>>, BrokerError> {
        let log = self
            .topics
            .get(topic)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| BrokerError::UnknownTopic(topic.to_string()))?;

        let mut streams: Vec<Box<dyn PartitionStream>> = Vec::with_capacity(log.partitions.len());
        for (partition, partition_log) in log.partitions.iter().enumerate() {
            let partition = partition as i32;
            let cursor = self
                .committed
                .get(&(topic.to_string(), group.to_string(), partition))
                .map(|next| *next)
                .unwrap_or(0);
            streams.push(Box::new(MemoryPartitionStream {
                topic: topic.to_string(),
                group: group.to_string(),
                partition,
                log: partition_log.clone(),
                committed: self.committed.clone(),
                cursor,
            }));
        }
        Ok(streams)
    }
}

struct MemoryPartitionStream {
    topic: String,
    group: String,
    partition: i32,
    log: Arc<PartitionLog>,
    committed: Arc<CommittedOffsets>,
    /// Next offset to deliver; starts at the group's committed offset.
    cursor: Offset,
}

#[async_trait]
impl PartitionStream for MemoryPartitionStream {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn partition(&self) -> i32 {
        self.partition
    }

    async fn next(&mut self) -> Result<Option<Delivered>, BrokerError> {
        loop {
            // Arm the notification before checking the log so an append
            // racing the check cannot be missed.
            let appended = self.log.appended.notified();
            {
                let records = self.log.records.read().await;
                if (self.cursor as usize) < records.len() {
                    let delivered = Delivered {
                        offset: self.cursor,
                        envelope: records[self.cursor as usize].clone(),
                    };
                    self.cursor += 1;
                    return Ok(Some(delivered));
                }
            }
            appended.await;
        }
    }

    async fn commit(&mut self, offset: Offset) -> Result<(), BrokerError> {
        self.committed.insert(
            (self.topic.clone(), self.group.clone(), self.partition),
            offset + 1,
        );
        Ok(())
    }
}
