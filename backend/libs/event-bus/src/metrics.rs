use prometheus::{IntCounter, Opts};
use tracing::warn;

/// Per-consumer-group counters, registered on the default registry.
#[derive(Clone)]
pub struct ConsumerMetrics {
    pub consumed: IntCounter,
    pub duplicates_suppressed: IntCounter,
    pub retries: IntCounter,
    pub dead_lettered: IntCounter,
}

impl ConsumerMetrics {
    pub fn new(group: &str) -> Self {
        let registry = prometheus::default_registry();

        let consumed = IntCounter::with_opts(
            Opts::new(
                "consumer_events_consumed_total",
                "Total number of envelopes handled successfully",
            )
            .const_label("group", group.to_string()),
        )
        .expect("valid metric opts for consumer_events_consumed_total");

        let duplicates_suppressed = IntCounter::with_opts(
            Opts::new(
                "consumer_duplicates_suppressed_total",
                "Total number of envelopes short-circuited by the idempotency ledger",
            )
            .const_label("group", group.to_string()),
        )
        .expect("valid metric opts for consumer_duplicates_suppressed_total");

        let retries = IntCounter::with_opts(
            Opts::new(
                "consumer_retries_total",
                "Total number of transient-failure redeliveries",
            )
            .const_label("group", group.to_string()),
        )
        .expect("valid metric opts for consumer_retries_total");

        let dead_lettered = IntCounter::with_opts(
            Opts::new(
                "consumer_events_dead_lettered_total",
                "Total number of envelopes routed to the dead-letter sink",
            )
            .const_label("group", group.to_string()),
        )
        .expect("valid metric opts for consumer_events_dead_lettered_total");

        for metric in [
            Box::new(consumed.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(duplicates_suppressed.clone()),
            Box::new(retries.clone()),
            Box::new(dead_lettered.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("Failed to register consumer metric: {}", e);
            }
        }

        Self {
            consumed,
            duplicates_suppressed,
            retries,
            dead_lettered,
        }
    }
}
