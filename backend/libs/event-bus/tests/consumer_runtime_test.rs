//! Integration tests for the consumer group runtime.
//!
//! These run entirely against the in-memory broker, ledger and dead-letter
//! sink and verify the delivery contract:
//! 1. Per-key ordering: handler invocation order equals publish order
//! 2. Duplicate suppression via the idempotency ledger
//! 3. Retry exhaustion dead-letters exactly once and never stalls the partition
//! 4. Permanent failures short-circuit the retry budget
//! 5. Partition isolation under a stuck handler
//! 6. The SMS retry-then-success scenario
//! 7. Explicit dead-letter replay
//! 8. Graceful shutdown finishes in-flight work

use event_bus::{
    Broker, ConsumerConfig, ConsumerGroup, DeadLetterQueue, DeadLetterSink, EventHandler,
    EventProducer, FailureClass, HandlerError, InMemoryBroker, InMemoryDeadLetterSink,
    PartitionStream, RetryPolicy,
};
use event_schema::{topics, EventEnvelope, EventType};
use idempotency_ledger::{IdempotencyLedger, InMemoryLedger};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

struct TestBus {
    broker: Arc<InMemoryBroker>,
    ledger: Arc<InMemoryLedger>,
    dead_letters: Arc<InMemoryDeadLetterSink>,
    runtime: ConsumerGroup,
    shutdown_tx: watch::Sender<bool>,
}

impl TestBus {
    fn new(topics: &[(&str, usize)], config: ConsumerConfig) -> Self {
        let broker = Arc::new(InMemoryBroker::with_topics(topics).unwrap());
        let ledger = Arc::new(InMemoryLedger::new());
        let dead_letters = Arc::new(InMemoryDeadLetterSink::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runtime = ConsumerGroup::new(
            broker.clone(),
            ledger.clone(),
            dead_letters.clone(),
            config,
            shutdown_rx,
        );
        Self {
            broker,
            ledger,
            dead_letters,
            runtime,
            shutdown_tx,
        }
    }

    fn producer(&self) -> EventProducer {
        EventProducer::new(self.broker.clone())
    }
}

fn fast_retry(max_attempts: u32) -> ConsumerConfig {
    ConsumerConfig {
        retry: RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(2),
            max_delay: Duration::from_millis(10),
        },
        handler_timeout: Duration::from_secs(30),
    }
}

const WAIT_TICK: Duration = Duration::from_millis(10);
const WAIT_ROUNDS: u32 = 500;

async fn wait_for_count(what: &str, counter: &AtomicU32, expected: u32) {
    for _ in 0..WAIT_ROUNDS {
        if counter.load(Ordering::SeqCst) == expected {
            return;
        }
        tokio::time::sleep(WAIT_TICK).await;
    }
    panic!("timed out waiting for {}", what);
}

async fn wait_for_dead_letters(sink: &InMemoryDeadLetterSink, expected: usize) {
    for _ in 0..WAIT_ROUNDS {
        if sink.list(100).await.unwrap().len() == expected {
            return;
        }
        tokio::time::sleep(WAIT_TICK).await;
    }
    panic!("timed out waiting for {} dead letters", expected);
}

async fn wait_for_ledger_entry(
    ledger: &InMemoryLedger,
    handler: &str,
    key: &str,
    event_type: EventType,
) {
    for _ in 0..WAIT_ROUNDS {
        if ledger.is_processed(handler, key, event_type).await.unwrap() {
            return;
        }
        tokio::time::sleep(WAIT_TICK).await;
    }
    panic!("timed out waiting for ledger entry {}/{}", handler, key);
}

/// Handler that records every successfully handled envelope.
struct Recorder {
    name: &'static str,
    invocations: AtomicU32,
    seen: Mutex<Vec<EventEnvelope>>,
}

impl Recorder {
    fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            invocations: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen_keys(&self) -> Vec<String> {
        self.seen.lock().unwrap().iter().map(|e| e.key.clone()).collect()
    }
}

#[async_trait::async_trait]
impl EventHandler for Recorder {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(envelope.clone());
        Ok(())
    }
}

/// Handler that fails with `Transient` for the first `failures`
/// invocations of each delivery, then succeeds.
struct FlakyHandler {
    name: &'static str,
    failures: u32,
    invocations: AtomicU32,
    successes: AtomicU32,
}

impl FlakyHandler {
    fn new(name: &'static str, failures: u32) -> Arc<Self> {
        Arc::new(Self {
            name,
            failures,
            invocations: AtomicU32::new(0),
            successes: AtomicU32::new(0),
        })
    }
}

#[async_trait::async_trait]
impl EventHandler for FlakyHandler {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn handle(&self, _envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let attempt = self.invocations.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            Err(HandlerError::transient(anyhow::anyhow!(
                "provider timeout"
            )))
        } else {
            self.successes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}

/// Handler whose failure mode is fixed: always transient, or always
/// permanent, switchable to success for replay tests.
struct FailingHandler {
    name: &'static str,
    permanent: bool,
    succeed: AtomicBool,
    invocations: AtomicU32,
}

impl FailingHandler {
    fn new(name: &'static str, permanent: bool) -> Arc<Self> {
        Arc::new(Self {
            name,
            permanent,
            succeed: AtomicBool::new(false),
            invocations: AtomicU32::new(0),
        })
    }
}

#[async_trait::async_trait]
impl EventHandler for FailingHandler {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn handle(&self, _envelope: &EventEnvelope) -> Result<(), HandlerError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if self.succeed.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.permanent {
            Err(HandlerError::permanent(anyhow::anyhow!("malformed payload")))
        } else {
            Err(HandlerError::transient(anyhow::anyhow!("store unavailable")))
        }
    }
}

#[tokio::test]
async fn test_per_key_delivery_order_matches_publish_order() {
    // One key, every event type once: all envelopes share a partition and
    // none is a ledger duplicate of another.
    const TYPES: [EventType; 12] = [
        EventType::PostPublished,
        EventType::PostDeleted,
        EventType::PostSynced,
        EventType::ProfileUpdated,
        EventType::UserRegistered,
        EventType::ContentChecked,
        EventType::CacheInvalidate,
        EventType::SearchIndexUpdate,
        EventType::PostLiked,
        EventType::PostRead,
        EventType::SmsRequested,
        EventType::EmailRequested,
    ];

    let bus = TestBus::new(&[(topics::POSTS, 4)], fast_retry(3));
    let handler = Recorder::new("order-recorder");
    let subscription = bus
        .runtime
        .subscribe(topics::POSTS, "order-recorder", handler.clone())
        .await
        .unwrap();

    let producer = bus.producer();
    for (seq, event_type) in TYPES.iter().enumerate() {
        producer
            .publish(topics::POSTS, "post-1", *event_type, &json!({"seq": seq}))
            .await
            .unwrap();
    }

    wait_for_count(
        "all envelopes handled",
        &handler.invocations,
        TYPES.len() as u32,
    )
    .await;

    let seqs: Vec<u64> = handler
        .seen
        .lock()
        .unwrap()
        .iter()
        .map(|e| e.payload["seq"].as_u64().unwrap())
        .collect();
    assert_eq!(seqs, (0..TYPES.len() as u64).collect::<Vec<u64>>());

    bus.shutdown_tx.send(true).unwrap();
    subscription.join().await;
}

#[tokio::test]
async fn test_identical_redelivery_short_circuits_via_ledger() {
    let bus = TestBus::new(&[(topics::POSTS, 4)], fast_retry(3));
    let handler = Recorder::new("search-index");
    let subscription = bus
        .runtime
        .subscribe(topics::POSTS, "search-index", handler.clone())
        .await
        .unwrap();

    let envelope = EventEnvelope::new(
        EventType::PostPublished,
        "post-42",
        json!({"title": "hi"}),
    );
    // Publish the identical envelope twice, simulating broker redelivery
    bus.broker.publish(topics::POSTS, &envelope).await.unwrap();
    bus.broker.publish(topics::POSTS, &envelope).await.unwrap();

    wait_for_ledger_entry(
        &bus.ledger,
        "search-index",
        "post-42",
        EventType::PostPublished,
    )
    .await;
    // Give the duplicate time to flow through the worker
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(
        handler.invocations.load(Ordering::SeqCst),
        1,
        "second delivery must not reach the handler"
    );
    assert!(bus.dead_letters.list(10).await.unwrap().is_empty());

    bus.shutdown_tx.send(true).unwrap();
    subscription.join().await;
}

#[tokio::test]
async fn test_retry_exhaustion_dead_letters_once_and_does_not_stall() {
    let max_attempts = 4;
    let bus = TestBus::new(&[(topics::SYNC, 1)], fast_retry(max_attempts));
    let handler = FailingHandler::new("archive-sync", false);
    let subscription = bus
        .runtime
        .subscribe(topics::SYNC, "archive-sync", handler.clone())
        .await
        .unwrap();

    let producer = bus.producer();
    producer
        .publish(topics::SYNC, "post-9", EventType::PostSynced, &json!({"rev": 1}))
        .await
        .unwrap();

    wait_for_dead_letters(&bus.dead_letters, 1).await;

    assert_eq!(handler.invocations.load(Ordering::SeqCst), max_attempts);
    let record = &bus.dead_letters.list(10).await.unwrap()[0];
    assert_eq!(record.failure_class, FailureClass::Transient);
    assert_eq!(record.attempts, max_attempts - 1);
    assert_eq!(record.event_key, "post-9");

    // Offset was committed after dead-lettering: the next envelope on the
    // same partition is delivered, the partition is not stalled.
    producer
        .publish(topics::SYNC, "post-9", EventType::PostSynced, &json!({"rev": 2}))
        .await
        .unwrap();

    wait_for_dead_letters(&bus.dead_letters, 2).await;
    assert_eq!(handler.invocations.load(Ordering::SeqCst), max_attempts * 2);

    bus.shutdown_tx.send(true).unwrap();
    subscription.join().await;
}

#[tokio::test]
async fn test_permanent_failure_short_circuits_retry() {
    let bus = TestBus::new(&[(topics::POSTS, 1)], fast_retry(5));
    let handler = FailingHandler::new("cache-invalidation", true);
    let subscription = bus
        .runtime
        .subscribe(topics::POSTS, "cache-invalidation", handler.clone())
        .await
        .unwrap();

    bus.producer()
        .publish(topics::POSTS, "post-3", EventType::PostPublished, &json!({}))
        .await
        .unwrap();

    wait_for_dead_letters(&bus.dead_letters, 1).await;

    assert_eq!(handler.invocations.load(Ordering::SeqCst), 1);
    let record = &bus.dead_letters.list(10).await.unwrap()[0];
    assert_eq!(record.failure_class, FailureClass::Permanent);
    assert_eq!(record.attempts, 0);

    bus.shutdown_tx.send(true).unwrap();
    subscription.join().await;
}

/// Handler that never returns for one specific key.
struct StallOn {
    stuck_key: String,
    recorder: Arc<Recorder>,
}

#[async_trait::async_trait]
impl EventHandler for StallOn {
    fn name(&self) -> &'static str {
        "stall-prone"
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        if envelope.key == self.stuck_key {
            std::future::pending::<()>().await;
        }
        self.recorder.handle(envelope).await
    }
}

#[tokio::test]
async fn test_stuck_partition_does_not_delay_other_partitions() {
    let bus = TestBus::new(
        &[(topics::POSTS, 2)],
        ConsumerConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(2),
                max_delay: Duration::from_millis(10),
            },
            // Large enough that the stalled invocation never times out
            // within the test window
            handler_timeout: Duration::from_secs(120),
        },
    );

    let producer = bus.producer();
    let keys: Vec<String> = (0..32).map(|i| format!("post-{}", i)).collect();
    for key in &keys {
        producer
            .publish(topics::POSTS, key, EventType::PostPublished, &json!({}))
            .await
            .unwrap();
    }

    // Probe the key -> partition assignment with a throwaway group
    let mut by_partition: HashMap<i32, Vec<String>> = HashMap::new();
    let mut probe = bus.broker.subscribe(topics::POSTS, "probe").await.unwrap();
    for stream in &mut probe {
        loop {
            match tokio::time::timeout(Duration::from_millis(20), stream.next()).await {
                Ok(Ok(Some(delivered))) => by_partition
                    .entry(stream.partition())
                    .or_default()
                    .push(delivered.envelope.key.clone()),
                _ => break,
            }
        }
    }
    assert_eq!(by_partition.len(), 2, "keys should spread over both partitions");

    let stuck_partition = *by_partition.keys().min().unwrap();
    let stuck_keys = by_partition[&stuck_partition].clone();
    let live_partition = *by_partition.keys().max().unwrap();
    let live_keys = by_partition[&live_partition].clone();

    let recorder = Recorder::new("stall-prone");
    let handler = Arc::new(StallOn {
        // First envelope of the stuck partition stalls its worker forever
        stuck_key: stuck_keys[0].clone(),
        recorder: recorder.clone(),
    });
    let _subscription = bus
        .runtime
        .subscribe(topics::POSTS, "stall-prone", handler)
        .await
        .unwrap();

    wait_for_count(
        "live partition fully drained",
        &recorder.invocations,
        live_keys.len() as u32,
    )
    .await;

    let seen = recorder.seen_keys();
    assert_eq!(seen, live_keys, "live partition delivered in order, stuck one untouched");
    for key in &seen {
        assert!(!stuck_keys.contains(key));
    }
    // Workers for the stuck partition are still parked inside the handler;
    // the test runtime tears them down.
}

#[tokio::test]
async fn test_sms_provider_timeout_twice_then_success_sends_once() {
    let bus = TestBus::new(&[(topics::NOTIFICATIONS, 2)], fast_retry(5));
    let handler = FlakyHandler::new("notification-sms", 2);
    let subscription = bus
        .runtime
        .subscribe(topics::NOTIFICATIONS, "notification-sms", handler.clone())
        .await
        .unwrap();

    bus.producer()
        .publish(
            topics::NOTIFICATIONS,
            "user-7",
            EventType::SmsRequested,
            &json!({"phone": "+15550100", "body": "your code is 4242"}),
        )
        .await
        .unwrap();

    wait_for_count("sms dispatched", &handler.successes, 1).await;

    assert_eq!(handler.invocations.load(Ordering::SeqCst), 3);
    assert!(bus
        .ledger
        .is_processed("notification-sms", "user-7", EventType::SmsRequested)
        .await
        .unwrap());
    assert!(bus.dead_letters.list(10).await.unwrap().is_empty());

    bus.shutdown_tx.send(true).unwrap();
    subscription.join().await;
}

#[tokio::test]
async fn test_dead_letter_replay_is_explicit_and_resets_attempts() {
    let bus = TestBus::new(&[(topics::POSTS, 1)], fast_retry(2));
    let handler = FailingHandler::new("search-index", false);
    let subscription = bus
        .runtime
        .subscribe(topics::POSTS, "search-index", handler.clone())
        .await
        .unwrap();

    bus.producer()
        .publish(topics::POSTS, "post-42", EventType::PostPublished, &json!({"title": "hi"}))
        .await
        .unwrap();

    wait_for_dead_letters(&bus.dead_letters, 1).await;
    let record_id = bus.dead_letters.list(10).await.unwrap()[0].id;

    // Nothing is replayed automatically
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(bus.dead_letters.list(10).await.unwrap().len(), 1);

    // The store recovers; an operator replays the record explicitly
    handler.succeed.store(true, Ordering::SeqCst);
    let queue = DeadLetterQueue::new(bus.dead_letters.clone(), bus.producer());
    queue.replay(record_id).await.unwrap();

    wait_for_ledger_entry(
        &bus.ledger,
        "search-index",
        "post-42",
        EventType::PostPublished,
    )
    .await;

    let record = bus.dead_letters.get(record_id).await.unwrap().unwrap();
    assert!(record.replayed_at.is_some());

    bus.shutdown_tx.send(true).unwrap();
    subscription.join().await;
}

/// Handler whose single invocation takes a while, to race with shutdown.
struct SlowHandler {
    recorder: Arc<Recorder>,
}

#[async_trait::async_trait]
impl EventHandler for SlowHandler {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        self.recorder.handle(envelope).await
    }
}

#[tokio::test]
async fn test_shutdown_finishes_in_flight_invocation() {
    let bus = TestBus::new(&[(topics::POSTS, 1)], fast_retry(3));
    let recorder = Recorder::new("slow");
    let handler = Arc::new(SlowHandler {
        recorder: recorder.clone(),
    });
    let subscription = bus
        .runtime
        .subscribe(topics::POSTS, "slow", handler)
        .await
        .unwrap();

    bus.producer()
        .publish(topics::POSTS, "post-1", EventType::PostPublished, &json!({}))
        .await
        .unwrap();

    // Let the invocation start, then signal shutdown mid-flight
    tokio::time::sleep(Duration::from_millis(100)).await;
    bus.shutdown_tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(2), subscription.join())
        .await
        .expect("workers must stop promptly after finishing in-flight work");

    // The in-flight invocation completed and its commit decision landed
    assert_eq!(recorder.invocations.load(Ordering::SeqCst), 1);
    assert!(bus
        .ledger
        .is_processed("slow", "post-1", EventType::PostPublished)
        .await
        .unwrap());
}
