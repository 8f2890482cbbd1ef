//! Trade publishing to the broker
//!
//! Trades are JSON encoded and published on `{topic}.{sanitized symbol}` with
//! the raw symbol in a `Trade-Key` header, so per-symbol order is kept by
//! subject and consumers can still see the exchange's own key.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{trace, warn};
use trade_producer_metadata::DeliveryConfig;
use trade_producer_middleware::{SubjectBuilder, Transport, TransportError};

use crate::error::PublishError;
use crate::metrics::ConnectorMetrics;
use crate::trade::Trade;
use crate::traits::TradePublisher;

/// Header carrying the unsanitized partition key
pub const TRADE_KEY_HEADER: &str = "Trade-Key";

/// Ceiling for a single retry delay
const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Publishes trades through a middleware [`Transport`]
pub struct NatsTradePublisher {
    transport: Arc<dyn Transport>,
    subjects: SubjectBuilder,
}

impl NatsTradePublisher {
    pub fn new(transport: Arc<dyn Transport>, topic: impl Into<String>) -> Self {
        Self {
            transport,
            subjects: SubjectBuilder::new(topic),
        }
    }

    pub fn subjects(&self) -> &SubjectBuilder {
        &self.subjects
    }
}

fn classify_transport_error(e: TransportError) -> PublishError {
    if e.is_retryable() {
        PublishError::Transient(e.to_string())
    } else {
        PublishError::Fatal(e.to_string())
    }
}

#[async_trait]
impl TradePublisher for NatsTradePublisher {
    async fn publish(&self, key: &str, trade: &Trade) -> Result<(), PublishError> {
        let subject = self.subjects.for_symbol(key).ok_or_else(|| {
            PublishError::Rejected(format!("key {key:?} has no subject token"))
        })?;
        let payload =
            serde_json::to_vec(trade).map_err(|e| PublishError::Rejected(e.to_string()))?;

        let mut headers = HashMap::with_capacity(1);
        headers.insert(TRADE_KEY_HEADER.to_string(), key.to_string());

        self.transport
            .publish_with_headers(&subject, Bytes::from(payload), headers)
            .await
            .map_err(classify_transport_error)?;

        trace!(subject = %subject, "Published trade");
        Ok(())
    }
}

/// Bounded retry for one trade
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub attempts: u32,
    pub base_delay: Duration,
    /// Per-attempt publish timeout; expiry counts as transient
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(delivery: &DeliveryConfig) -> Self {
        Self {
            attempts: delivery.retry_attempts,
            base_delay: Duration::from_millis(delivery.retry_delay_ms),
            timeout: Duration::from_millis(delivery.publish_timeout_ms),
        }
    }

    /// `base_delay * 2^retry`, capped
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay
            .checked_mul(1u32 << retry.min(16))
            .unwrap_or(MAX_RETRY_DELAY)
            .min(MAX_RETRY_DELAY)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&DeliveryConfig::default())
    }
}

/// Publish one trade under `trade.key()`, retrying transient failures.
///
/// Exhausting the budget turns the last transient failure into `Fatal`.
/// `Rejected` and `Fatal` are returned immediately.
pub async fn publish_with_retry(
    publisher: &dyn TradePublisher,
    trade: &Trade,
    policy: &RetryPolicy,
    metrics: &ConnectorMetrics,
) -> Result<(), PublishError> {
    let mut retry = 0u32;
    loop {
        let result = match tokio::time::timeout(policy.timeout, publisher.publish(trade.key(), trade)).await {
            Ok(result) => result,
            Err(_) => Err(PublishError::Transient(format!(
                "publish timed out after {} ms",
                policy.timeout.as_millis()
            ))),
        };

        match result {
            Ok(()) => return Ok(()),
            Err(PublishError::Transient(reason)) if retry < policy.attempts => {
                let delay = policy.delay_for(retry);
                retry += 1;
                warn!(
                    symbol = %trade.symbol(),
                    retry,
                    delay_ms = delay.as_millis() as u64,
                    error = %reason,
                    "Transient publish failure, retrying"
                );
                metrics.inc_publish_retry();
                tokio::time::sleep(delay).await;
            }
            Err(PublishError::Transient(reason)) => {
                return Err(PublishError::Fatal(format!(
                    "retry budget exhausted after {} attempts: {}",
                    retry + 1,
                    reason
                )));
            }
            Err(e) => return Err(e),
        }
    }
}
