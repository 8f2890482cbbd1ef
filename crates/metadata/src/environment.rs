use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::MetadataError;
use crate::feed::FeedConfig;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum TransportType {
    Nats,
    Memory,
}

/// Default NATS server address
pub const DEFAULT_NATS_URL: &str = "nats://localhost:4222";
/// Default topic (subject root) for trades
pub const DEFAULT_TOPIC: &str = "trade";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportConfig {
    #[serde(rename = "type")]
    pub transport_type: TransportType,
    pub url: Option<String>,
    /// Subject root trades are published under: "{topic}.{symbol}"
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Wait for a JetStream ack on every publish. Only this mode gives
    /// at-least-once delivery; core mode confirms a flush to the server.
    #[serde(default = "default_jetstream")]
    pub jetstream: bool,
}

fn default_topic() -> String {
    DEFAULT_TOPIC.to_string()
}

fn default_jetstream() -> bool {
    true
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            transport_type: TransportType::Nats,
            url: Some(DEFAULT_NATS_URL.to_string()),
            topic: default_topic(),
            jetstream: default_jetstream(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

/// Default number of publish workers
pub const DEFAULT_WORKERS: usize = 4;
/// Maximum number of publish workers
pub const MAX_WORKERS: usize = 64;
/// Default per-worker queue depth
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;
/// Minimum per-worker queue depth
pub const MIN_QUEUE_DEPTH: usize = 1;
/// Maximum per-worker queue depth
pub const MAX_QUEUE_DEPTH: usize = 65_536;
/// Default publish timeout in milliseconds
pub const DEFAULT_PUBLISH_TIMEOUT_MS: u64 = 5_000;
/// Default retry attempts for transient publish failures
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 5;
/// Default first retry delay in milliseconds (doubles per attempt)
pub const DEFAULT_RETRY_DELAY_MS: u64 = 200;

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_queue_depth() -> usize {
    DEFAULT_QUEUE_DEPTH
}

fn default_publish_timeout_ms() -> u64 {
    DEFAULT_PUBLISH_TIMEOUT_MS
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_depth: default_queue_depth(),
            publish_timeout_ms: default_publish_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl DeliveryConfig {
    /// Clamp workers and queue depth into their valid ranges.
    /// Returns a tuple of (validated_config, was_clamped).
    pub fn validated(mut self) -> (Self, bool) {
        let mut clamped = false;
        if self.workers == 0 {
            self.workers = 1;
            clamped = true;
        } else if self.workers > MAX_WORKERS {
            self.workers = MAX_WORKERS;
            clamped = true;
        }
        if self.queue_depth < MIN_QUEUE_DEPTH {
            self.queue_depth = MIN_QUEUE_DEPTH;
            clamped = true;
        } else if self.queue_depth > MAX_QUEUE_DEPTH {
            self.queue_depth = MAX_QUEUE_DEPTH;
            clamped = true;
        }
        (self, clamped)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// 0 = retry forever
    #[serde(default)]
    pub max_attempts: u32,
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            max_attempts: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Environment {
    pub name: String,
    #[serde(default)]
    pub feed: FeedConfig,
    pub transport: TransportConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            feed: FeedConfig::default(),
            transport: TransportConfig::default(),
            delivery: DeliveryConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Environment {
    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        let content = std::fs::read_to_string(path)?;
        let env: Environment = serde_yaml::from_str(&content)?;
        Ok(env)
    }

    /// Validate all sections, clamping numeric settings into range.
    /// Returns a tuple of (validated_environment, was_clamped).
    pub fn validated(mut self) -> Result<(Self, bool), MetadataError> {
        let topic = self.transport.topic.trim();
        if topic.is_empty() {
            return Err(MetadataError::Validation("transport.topic is empty".into()));
        }
        if topic.contains(['*', '>', ' ']) {
            return Err(MetadataError::Validation(format!(
                "transport.topic must not contain wildcards or spaces: {}",
                topic
            )));
        }
        self.transport.topic = topic.to_string();

        if self.transport.transport_type == TransportType::Nats
            && self.transport.url.as_deref().map_or(true, |u| u.trim().is_empty())
        {
            return Err(MetadataError::Validation("transport.url is required for nats".into()));
        }

        if self.reconnect.multiplier < 1.0 || !self.reconnect.multiplier.is_finite() {
            return Err(MetadataError::Validation(format!(
                "reconnect.multiplier must be >= 1.0, got {}",
                self.reconnect.multiplier
            )));
        }

        let (feed, feed_clamped) = self.feed.validated()?;
        let (delivery, delivery_clamped) = self.delivery.validated();
        self.feed = feed;
        self.delivery = delivery;

        Ok((self, feed_clamped || delivery_clamped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_environment() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
name: kraken-dev
feed:
  symbol: BTC/USD
transport:
  type: nats
  url: nats://redpanda-0:4222
  topic: trade
  jetstream: true
delivery:
  workers: 2
  retry_attempts: 3
"#
        )
        .unwrap();

        let env = Environment::load(file.path()).unwrap();
        assert_eq!(env.name, "kraken-dev");
        assert_eq!(env.feed.target_symbol(), Some("BTC/USD"));
        assert_eq!(env.feed.ack_frames, 2);
        assert_eq!(env.transport.transport_type, TransportType::Nats);
        assert_eq!(env.transport.url.as_deref(), Some("nats://redpanda-0:4222"));
        assert!(env.transport.jetstream);
        assert_eq!(env.delivery.workers, 2);
        assert_eq!(env.delivery.retry_attempts, 3);
        assert_eq!(env.delivery.queue_depth, DEFAULT_QUEUE_DEPTH);
        assert_eq!(env.reconnect, ReconnectConfig::default());
    }

    #[test]
    fn test_load_environment_discovery_mode() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
name: kraken-all
transport:
  type: memory
"#
        )
        .unwrap();

        let env = Environment::load(file.path()).unwrap();
        assert!(env.feed.target_symbol().is_none());
        assert_eq!(env.transport.topic, DEFAULT_TOPIC);
        assert!(env.transport.jetstream);
    }

    #[test]
    fn test_load_missing_file() {
        let result = Environment::load(Path::new("/nonexistent/trade-producer.yaml"));
        assert!(matches!(result, Err(MetadataError::Io(_))));
    }

    #[test]
    fn test_validated_rejects_empty_topic() {
        let mut env = Environment::default();
        env.transport.topic = "  ".to_string();
        assert!(matches!(env.validated(), Err(MetadataError::Validation(_))));
    }

    #[test]
    fn test_validated_rejects_wildcard_topic() {
        let mut env = Environment::default();
        env.transport.topic = "trade.>".to_string();
        assert!(env.validated().is_err());
    }

    #[test]
    fn test_validated_requires_nats_url() {
        let mut env = Environment::default();
        env.transport.url = None;
        assert!(env.validated().is_err());

        env = Environment::default();
        env.transport.transport_type = TransportType::Memory;
        env.transport.url = None;
        assert!(env.validated().is_ok());
    }

    #[test]
    fn test_delivery_config_validation_clamps() {
        let config = DeliveryConfig {
            workers: 0,
            queue_depth: 1_000_000,
            ..Default::default()
        };
        let (validated, clamped) = config.validated();
        assert_eq!(validated.workers, 1);
        assert_eq!(validated.queue_depth, MAX_QUEUE_DEPTH);
        assert!(clamped);
    }

    #[test]
    fn test_delivery_config_validation_keeps_valid() {
        let (validated, clamped) = DeliveryConfig::default().validated();
        assert_eq!(validated.workers, DEFAULT_WORKERS);
        assert!(!clamped);
    }

    #[test]
    fn test_default_environment_is_valid() {
        let (env, clamped) = Environment::default().validated().unwrap();
        assert_eq!(env.transport.topic, "trade");
        assert!(!clamped);
    }
}
