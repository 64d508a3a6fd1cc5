use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub kafka: KafkaConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub search: SearchConfig,
    pub archive: ArchiveConfig,
    pub smtp: SmtpConfig,
    pub sms: SmsConfig,
    pub moderation: ModerationConfig,
    pub consumer: ConsumerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    pub brokers: String,
    /// Deployment prefix for topic names, e.g. `parley` -> `parley.posts`
    pub topic_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    /// Redis set the ranking trigger pushes recompute signals into
    pub ranking_queue_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub url: String,
    pub post_index: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Empty host puts the email client in no-op mode (logs only)
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsConfig {
    pub endpoint: String,
    pub api_key: String,
    pub sender: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationConfig {
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerSettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub handler_timeout_secs: u64,
    /// Ledger retention; must outlast the broker's maximum redelivery window
    pub ledger_retention_days: u64,
    pub ledger_cleanup_interval_secs: u64,
}

impl ConsumerSettings {
    pub fn ledger_retention(&self) -> Duration {
        Duration::from_secs(self.ledger_retention_days * 86_400)
    }
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Config {
            kafka: KafkaConfig {
                brokers: std::env::var("KAFKA_BROKERS")
                    .unwrap_or_else(|_| "localhost:9092".to_string()),
                topic_prefix: std::env::var("KAFKA_TOPIC_PREFIX")
                    .unwrap_or_else(|_| "parley".to_string()),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")?,
                max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()?,
            },
            redis: RedisConfig {
                url: std::env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
                ranking_queue_key: std::env::var("RANKING_QUEUE_KEY")
                    .unwrap_or_else(|_| "ranking:recompute".to_string()),
            },
            search: SearchConfig {
                url: std::env::var("ELASTICSEARCH_URL")
                    .unwrap_or_else(|_| "http://localhost:9200".to_string()),
                post_index: std::env::var("ELASTICSEARCH_POST_INDEX")
                    .unwrap_or_else(|_| "posts".to_string()),
            },
            archive: ArchiveConfig {
                url: std::env::var("CLICKHOUSE_URL")
                    .unwrap_or_else(|_| "http://localhost:8123".to_string()),
            },
            smtp: SmtpConfig {
                host: std::env::var("SMTP_HOST").unwrap_or_default(),
                port: std::env::var("SMTP_PORT")
                    .unwrap_or_else(|_| "587".to_string())
                    .parse()?,
                username: std::env::var("SMTP_USERNAME").ok(),
                password: std::env::var("SMTP_PASSWORD").ok(),
                from: std::env::var("SMTP_FROM")
                    .unwrap_or_else(|_| "Parley <no-reply@parley.dev>".to_string()),
            },
            sms: SmsConfig {
                endpoint: std::env::var("SMS_ENDPOINT")
                    .unwrap_or_else(|_| "http://localhost:8080/v1/sms".to_string()),
                api_key: std::env::var("SMS_API_KEY").unwrap_or_default(),
                sender: std::env::var("SMS_SENDER").unwrap_or_else(|_| "Parley".to_string()),
            },
            moderation: ModerationConfig {
                endpoint: std::env::var("MODERATION_ENDPOINT")
                    .unwrap_or_else(|_| "http://localhost:8081/v1/check".to_string()),
            },
            consumer: ConsumerSettings {
                max_attempts: std::env::var("CONSUMER_MAX_ATTEMPTS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()?,
                base_delay_ms: std::env::var("CONSUMER_BASE_DELAY_MS")
                    .unwrap_or_else(|_| "100".to_string())
                    .parse()?,
                max_delay_ms: std::env::var("CONSUMER_MAX_DELAY_MS")
                    .unwrap_or_else(|_| "30000".to_string())
                    .parse()?,
                handler_timeout_secs: std::env::var("CONSUMER_HANDLER_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()?,
                ledger_retention_days: std::env::var("LEDGER_RETENTION_DAYS")
                    .unwrap_or_else(|_| "7".to_string())
                    .parse()?,
                ledger_cleanup_interval_secs: std::env::var("LEDGER_CLEANUP_INTERVAL_SECS")
                    .unwrap_or_else(|_| "3600".to_string())
                    .parse()?,
            },
        })
    }

    /// Topic name with the deployment prefix applied.
    pub fn topic(&self, topic: &str) -> String {
        event_schema::topics::qualified(&self.kafka.topic_prefix, topic)
    }
}
