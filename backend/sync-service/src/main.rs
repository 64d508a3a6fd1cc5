use anyhow::Context;
use event_bus::{
    Broker, ConsumerConfig, ConsumerGroup, EventProducer, KafkaBroker, KafkaBrokerConfig,
    PgDeadLetterSink, RetryPolicy,
};
use event_schema::topics;
use idempotency_ledger::{IdempotencyLedger, PgIdempotencyLedger};
use redis::aio::ConnectionManager;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use sync_service::clients::{
    ArchiveClient, EmailClient, HttpContentChecker, SearchIndexClient, SmsClient,
};
use sync_service::config::Config;
use sync_service::handlers::{
    ArchiveSyncHandler, CacheInvalidationHandler, EmailHandler, ModerationCheckHandler,
    RankingTriggerHandler, SearchIndexHandler, SmsHandler,
};
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config =
        Config::from_env().map_err(|e| anyhow::anyhow!("failed to load configuration: {}", e))?;

    info!(
        kafka_brokers = %config.kafka.brokers,
        topic_prefix = %config.kafka.topic_prefix,
        "Starting sync-service"
    );

    // Store handles
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .context("failed to connect to PostgreSQL")?;
    let redis_client =
        redis::Client::open(config.redis.url.clone()).context("invalid Redis URL")?;
    let redis_conn = ConnectionManager::new(redis_client)
        .await
        .context("failed to connect to Redis")?;
    let search = SearchIndexClient::new(&config.search.url, &config.search.post_index)
        .context("failed to build search client")?;
    let archive = ArchiveClient::new(&config.archive.url)
        .await
        .context("failed to connect to ClickHouse")?;
    let email = EmailClient::new(&config.smtp).context("failed to build email client")?;
    let sms = SmsClient::new(
        &config.sms.endpoint,
        &config.sms.api_key,
        &config.sms.sender,
    );
    let checker = Arc::new(HttpContentChecker::new(&config.moderation.endpoint));

    // Event bus
    let broker: Arc<dyn Broker> = Arc::new(
        KafkaBroker::new(KafkaBrokerConfig {
            brokers: config.kafka.brokers.clone(),
            ..Default::default()
        })
        .context("failed to create Kafka broker")?,
    );
    let ledger = Arc::new(PgIdempotencyLedger::new(
        pool.clone(),
        config.consumer.ledger_retention(),
    ));
    let dead_letters = Arc::new(PgDeadLetterSink::new(pool.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runtime = ConsumerGroup::new(
        broker.clone(),
        ledger.clone(),
        dead_letters,
        ConsumerConfig {
            retry: RetryPolicy {
                max_attempts: config.consumer.max_attempts,
                base_delay: Duration::from_millis(config.consumer.base_delay_ms),
                max_delay: Duration::from_millis(config.consumer.max_delay_ms),
            },
            handler_timeout: Duration::from_secs(config.consumer.handler_timeout_secs),
        },
        shutdown_rx,
    );

    let cache_handler = Arc::new(CacheInvalidationHandler::new(redis_conn.clone()));
    let search_handler = Arc::new(SearchIndexHandler::new(search));
    let archive_handler = Arc::new(ArchiveSyncHandler::new(archive));
    let moderation_handler = Arc::new(ModerationCheckHandler::new(
        checker,
        EventProducer::new(broker.clone()),
        config.topic(topics::CHECKS),
    ));
    let sms_handler = Arc::new(SmsHandler::new(sms));
    let email_handler = Arc::new(EmailHandler::new(email));
    let ranking_handler = Arc::new(RankingTriggerHandler::new(
        redis_conn,
        config.redis.ranking_queue_key.clone(),
    ));

    let mut subscriptions = Vec::new();
    for topic in [topics::POSTS, topics::USERS, topics::CACHE] {
        subscriptions.push(
            runtime
                .subscribe(
                    &config.topic(topic),
                    CacheInvalidationHandler::NAME,
                    cache_handler.clone(),
                )
                .await?,
        );
    }
    for topic in [topics::POSTS, topics::SEARCH] {
        subscriptions.push(
            runtime
                .subscribe(
                    &config.topic(topic),
                    SearchIndexHandler::NAME,
                    search_handler.clone(),
                )
                .await?,
        );
    }
    subscriptions.push(
        runtime
            .subscribe(
                &config.topic(topics::SYNC),
                ArchiveSyncHandler::NAME,
                archive_handler,
            )
            .await?,
    );
    subscriptions.push(
        runtime
            .subscribe(
                &config.topic(topics::POSTS),
                ModerationCheckHandler::NAME,
                moderation_handler,
            )
            .await?,
    );
    subscriptions.push(
        runtime
            .subscribe(
                &config.topic(topics::NOTIFICATIONS),
                SmsHandler::NAME,
                sms_handler,
            )
            .await?,
    );
    subscriptions.push(
        runtime
            .subscribe(
                &config.topic(topics::NOTIFICATIONS),
                EmailHandler::NAME,
                email_handler,
            )
            .await?,
    );
    subscriptions.push(
        runtime
            .subscribe(
                &config.topic(topics::INTERACTIONS),
                RankingTriggerHandler::NAME,
                ranking_handler,
            )
            .await?,
    );

    // Ledger entries only need to outlast the broker's redelivery window;
    // garbage-collect older ones periodically.
    let cleanup_ledger = ledger.clone();
    let cleanup_interval = Duration::from_secs(config.consumer.ledger_cleanup_interval_secs);
    let mut cleanup_shutdown = shutdown_tx.subscribe();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_interval);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => match cleanup_ledger.cleanup_expired().await {
                    Ok(0) => {}
                    Ok(deleted) => info!(deleted, "Ledger retention cleanup"),
                    Err(e) => warn!(error = %e, "Ledger cleanup failed"),
                },
                _ = cleanup_shutdown.changed() => break,
            }
        }
    });

    info!(consumers = subscriptions.len(), "sync-service started");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received, draining consumers");
    shutdown_tx.send(true)?;
    for subscription in subscriptions {
        subscription.join().await;
    }

    info!("sync-service stopped");
    Ok(())
}
