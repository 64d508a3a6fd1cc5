//! Kafka-backed broker.
//!
//! Publishing goes through a `FutureProducer` with idempotence enabled; the
//! envelope's key doubles as the Kafka record key, so librdkafka's keyed
//! partitioner and the runtime agree on the ordering domain. Consumption
//! uses a `StreamConsumer` with auto-commit disabled and one split
//! partition queue per owned partition; offsets are committed only after
//! the runtime's commit decision.

use crate::broker::{Broker, Delivered, Offset, PartitionStream};
use crate::error::{BrokerError, PublishError};
use async_trait::async_trait;
use event_schema::EventEnvelope;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::consumer::stream_consumer::StreamPartitionQueue;
use rdkafka::consumer::DefaultConsumerContext;
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{ClientConfig, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct KafkaBrokerConfig {
    pub brokers: String,
    /// Producer send timeout
    pub send_timeout: Duration,
    /// Timeout for the metadata fetch that discovers partition counts
    pub metadata_timeout: Duration,
    pub session_timeout_ms: u32,
    /// Where a brand-new group starts reading
    pub auto_offset_reset: String,
}

impl Default for KafkaBrokerConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            send_timeout: Duration::from_secs(5),
            metadata_timeout: Duration::from_secs(10),
            session_timeout_ms: 30_000,
            auto_offset_reset: "earliest".to_string(),
        }
    }
}

pub struct KafkaBroker {
    producer: FutureProducer,
    config: KafkaBrokerConfig,
}

impl KafkaBroker {
    pub fn new(config: KafkaBrokerConfig) -> Result<Self, BrokerError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set(
                "message.timeout.ms",
                config.send_timeout.as_millis().to_string(),
            )
            .create()?;

        Ok(Self { producer, config })
    }

    pub fn with_brokers(brokers: &str) -> Result<Self, BrokerError> {
        Self::new(KafkaBrokerConfig {
            brokers: brokers.to_string(),
            ..Default::default()
        })
    }
}

fn classify_publish_error(err: KafkaError) -> PublishError {
    match err.rdkafka_error_code() {
        Some(
            RDKafkaErrorCode::UnknownTopic
            | RDKafkaErrorCode::UnknownTopicOrPartition
            | RDKafkaErrorCode::MessageSizeTooLarge
            | RDKafkaErrorCode::InvalidMessage,
        ) => PublishError::Rejected(err.to_string()),
        _ => PublishError::Unavailable(err.into()),
    }
}

#[async_trait]
impl Broker for KafkaBroker {
    async fn publish(&self, topic: &str, envelope: &EventEnvelope) -> Result<Offset, PublishError> {
        if envelope.key.is_empty() {
            return Err(PublishError::Rejected("empty partition key".to_string()));
        }
        let payload = serde_json::to_vec(envelope)
            .map_err(|e| PublishError::Rejected(format!("unserializable envelope: {}", e)))?;

        let record = FutureRecord::to(topic)
            .key(&envelope.key)
            .payload(&payload);

        match self.producer.send(record, self.config.send_timeout).await {
            Ok((_, offset)) => Ok(offset),
            Err((err, _)) => Err(classify_publish_error(err)),
        }
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Vec<Box<dyn PartitionStream>>, BrokerError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.config.brokers)
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.config.auto_offset_reset)
            .set("session.timeout.ms", self.config.session_timeout_ms.to_string())
            .set("enable.partition.eof", "false")
            .create()?;
        let consumer = Arc::new(consumer);

        consumer.subscribe(&[topic])?;

        let metadata = consumer.fetch_metadata(Some(topic), self.config.metadata_timeout)?;
        let partitions = metadata
            .topics()
            .iter()
            .find(|t| t.name() == topic)
            .map(|t| t.partitions().len())
            .unwrap_or(0);
        if partitions == 0 {
            return Err(BrokerError::UnknownTopic(topic.to_string()));
        }

        let mut streams: Vec<Box<dyn PartitionStream>> = Vec::with_capacity(partitions);
        for partition in 0..partitions as i32 {
            let queue = consumer
                .split_partition_queue(topic, partition)
                .ok_or_else(|| {
                    BrokerError::Other(anyhow::anyhow!(
                        "failed to split partition queue for {}-{}",
                        topic,
                        partition
                    ))
                })?;
            streams.push(Box::new(KafkaPartitionStream {
                topic: topic.to_string(),
                partition,
                consumer: consumer.clone(),
                queue,
            }));
        }

        // With split partition queues the main consumer must still be
        // polled to drive the group protocol (heartbeats, rebalances);
        // messages land on the split queues, not here.
        let driver = consumer.clone();
        let driver_topic = topic.to_string();
        tokio::spawn(async move {
            loop {
                match driver.recv().await {
                    Ok(message) => warn!(
                        topic = %driver_topic,
                        partition = message.partition(),
                        "Message on undivided queue, partition not split"
                    ),
                    Err(e) => {
                        warn!(topic = %driver_topic, error = %e, "Kafka driver poll error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        info!(topic, group, partitions, "Kafka consumer subscribed");
        Ok(streams)
    }
}

struct KafkaPartitionStream {
    topic: String,
    partition: i32,
    consumer: Arc<StreamConsumer>,
    queue: StreamPartitionQueue<DefaultConsumerContext>,
}

#[async_trait]
impl PartitionStream for KafkaPartitionStream {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn partition(&self) -> i32 {
        self.partition
    }

    async fn next(&mut self) -> Result<Option<Delivered>, BrokerError> {
        loop {
            let message = self.queue.recv().await?;
            let offset = message.offset();
            let Some(payload) = message.payload() else {
                warn!(
                    topic = %self.topic,
                    partition = self.partition,
                    offset,
                    "Empty message payload, skipping"
                );
                continue;
            };
            match serde_json::from_slice::<EventEnvelope>(payload) {
                Ok(envelope) => return Ok(Some(Delivered { offset, envelope })),
                Err(e) => {
                    // Undecodable bytes cannot be dispatched to a handler;
                    // skip past them rather than stall the partition.
                    warn!(
                        topic = %self.topic,
                        partition = self.partition,
                        offset,
                        error = %e,
                        "Failed to decode envelope, skipping"
                    );
                    continue;
                }
            }
        }
    }

    async fn commit(&mut self, offset: Offset) -> Result<(), BrokerError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&self.topic, self.partition, rdkafka::Offset::Offset(offset + 1))?;
        self.consumer.commit(&tpl, CommitMode::Async)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_error_classification() {
        let rejected = classify_publish_error(KafkaError::MessageProduction(
            RDKafkaErrorCode::UnknownTopicOrPartition,
        ));
        assert!(matches!(rejected, PublishError::Rejected(_)));

        let rejected = classify_publish_error(KafkaError::MessageProduction(
            RDKafkaErrorCode::MessageSizeTooLarge,
        ));
        assert!(matches!(rejected, PublishError::Rejected(_)));

        let unavailable =
            classify_publish_error(KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull));
        assert!(matches!(unavailable, PublishError::Unavailable(_)));

        let unavailable = classify_publish_error(KafkaError::MessageProduction(
            RDKafkaErrorCode::BrokerTransportFailure,
        ));
        assert!(matches!(unavailable, PublishError::Unavailable(_)));
    }
}
