//! Moderation check handler.
//!
//! On `post_published`, submits the post to the content-check workflow and
//! publishes a `content_checked` event with the verdict. The downstream
//! publish-or-reject transition on the post's state machine belongs to the
//! content service, not this handler.

use crate::clients::{CheckError, ContentChecker};
use async_trait::async_trait;
use chrono::Utc;
use event_bus::{EventHandler, EventProducer, HandlerError, PublishError};
use event_schema::{ContentCheckedEvent, EventEnvelope, EventType, PostPublishedEvent};
use std::sync::Arc;
use tracing::info;

pub struct ModerationCheckHandler {
    checker: Arc<dyn ContentChecker>,
    producer: EventProducer,
    checks_topic: String,
}

impl ModerationCheckHandler {
    pub const NAME: &'static str = "moderation-check";

    pub fn new(
        checker: Arc<dyn ContentChecker>,
        producer: EventProducer,
        checks_topic: impl Into<String>,
    ) -> Self {
        Self {
            checker,
            producer,
            checks_topic: checks_topic.into(),
        }
    }
}

#[async_trait]
impl EventHandler for ModerationCheckHandler {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        if envelope.event_type != EventType::PostPublished {
            return Ok(());
        }
        let event: PostPublishedEvent = envelope.decode().map_err(HandlerError::permanent)?;

        let outcome = self
            .checker
            .check(event.post_id, &event.title, &event.content)
            .await
            .map_err(|e| match e {
                CheckError::Unavailable(_) => HandlerError::transient(e),
                CheckError::Rejected(_) => HandlerError::permanent(e),
            })?;

        let verdict_event = ContentCheckedEvent {
            post_id: event.post_id,
            check_id: outcome.check_id,
            verdict: outcome.verdict,
            reason: outcome.reason,
            checked_at: Utc::now(),
        };

        self.producer
            .publish_with_retry(
                &self.checks_topic,
                &event.post_id.to_string(),
                EventType::ContentChecked,
                &verdict_event,
            )
            .await
            .map_err(|e| match e {
                PublishError::Unavailable(_) => HandlerError::transient(e),
                PublishError::Rejected(_) => HandlerError::permanent(e),
            })?;

        info!(
            post_id = %event.post_id,
            verdict = ?verdict_event.verdict,
            "Content check verdict published"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::CheckOutcome;
    use event_bus::{Broker, InMemoryBroker, PartitionStream};
    use event_schema::{topics, CheckVerdict};
    use std::sync::Mutex;
    use uuid::Uuid;

    struct StaticChecker {
        verdict: CheckVerdict,
        checked: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl ContentChecker for StaticChecker {
        async fn check(
            &self,
            post_id: Uuid,
            _title: &str,
            _content: &str,
        ) -> Result<CheckOutcome, CheckError> {
            self.checked.lock().unwrap().push(post_id);
            Ok(CheckOutcome {
                check_id: Uuid::new_v4(),
                verdict: self.verdict,
                reason: None,
            })
        }
    }

    #[tokio::test]
    async fn test_verdict_is_published_to_checks_topic() {
        let broker = Arc::new(InMemoryBroker::with_topics(&[(topics::CHECKS, 1)]).unwrap());
        let checker = Arc::new(StaticChecker {
            verdict: CheckVerdict::Rejected,
            checked: Mutex::new(Vec::new()),
        });
        let handler = ModerationCheckHandler::new(
            checker.clone(),
            EventProducer::new(broker.clone()),
            topics::CHECKS,
        );

        let event = PostPublishedEvent {
            post_id: Uuid::new_v4(),
            author_id: Uuid::new_v4(),
            title: "hi".to_string(),
            content: "spam spam".to_string(),
            published_at: Utc::now(),
        };
        let envelope = EventEnvelope::new(
            EventType::PostPublished,
            event.post_id.to_string(),
            serde_json::to_value(&event).unwrap(),
        );

        handler.handle(&envelope).await.unwrap();
        assert_eq!(checker.checked.lock().unwrap().as_slice(), &[event.post_id]);

        let mut streams = broker.subscribe(topics::CHECKS, "probe").await.unwrap();
        let delivered = streams[0].next().await.unwrap().unwrap();
        assert_eq!(delivered.envelope.event_type, EventType::ContentChecked);
        let verdict: ContentCheckedEvent = delivered.envelope.decode().unwrap();
        assert_eq!(verdict.post_id, event.post_id);
        assert_eq!(verdict.verdict, CheckVerdict::Rejected);
    }

    #[tokio::test]
    async fn test_unrelated_event_is_ignored() {
        let broker = Arc::new(InMemoryBroker::with_topics(&[(topics::CHECKS, 1)]).unwrap());
        let checker = Arc::new(StaticChecker {
            verdict: CheckVerdict::Approved,
            checked: Mutex::new(Vec::new()),
        });
        let handler = ModerationCheckHandler::new(
            checker.clone(),
            EventProducer::new(broker),
            topics::CHECKS,
        );

        let envelope = EventEnvelope::new(
            EventType::PostDeleted,
            "post-1",
            serde_json::json!({}),
        );
        handler.handle(&envelope).await.unwrap();
        assert!(checker.checked.lock().unwrap().is_empty());
    }
}
