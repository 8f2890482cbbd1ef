use std::collections::HashMap;

use async_nats::jetstream::context::{PublishError, PublishErrorKind};
use async_nats::jetstream::stream::{Config, RetentionPolicy, StorageType};
use async_nats::jetstream::{self, Context};
use async_nats::Client;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tracing::{debug, info};

use crate::error::TransportError;
use crate::latency::now_tsc;
use crate::transport::{Subscription, Transport, TransportMessage};

/// NATS subscription wrapper, for consumers and the broker tests
struct NatsSubscription {
    subscriber: async_nats::Subscriber,
}

impl NatsSubscription {
    fn new(subscriber: async_nats::Subscriber) -> Self {
        Self { subscriber }
    }
}

#[async_trait]
impl Subscription for NatsSubscription {
    async fn next(&mut self) -> Result<TransportMessage, TransportError> {
        let msg = self.subscriber
            .next()
            .await
            .ok_or_else(|| TransportError::SubscribeFailed("subscription closed".to_string()))?;

        Ok(TransportMessage {
            subject: msg.subject.to_string(),
            payload: msg.payload,
            headers: HashMap::new(),
            timestamp: now_tsc(),
            sequence: None,
        })
    }

    async fn unsubscribe(mut self: Box<Self>) -> Result<(), TransportError> {
        self.subscriber
            .unsubscribe()
            .await
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))
    }
}

/// NATS transport implementation
///
/// In JetStream mode every publish waits for the stream's PubAck, which is
/// what makes delivery at-least-once. Core mode flushes after each publish,
/// so a disconnected server shows up as a stalled or failed publish instead
/// of a message parked in the client buffer.
pub struct NatsTransport {
    client: Client,
    jetstream: Context,
    acked: bool,
}

fn map_jetstream_error(e: PublishError) -> TransportError {
    match e.kind() {
        PublishErrorKind::TimedOut => TransportError::Timeout,
        PublishErrorKind::StreamNotFound => TransportError::ValidationFailed(e.to_string()),
        PublishErrorKind::BrokenPipe => TransportError::ConnectionFailed(e.to_string()),
        _ => TransportError::PublishFailed(e.to_string()),
    }
}

impl NatsTransport {
    /// Create a new NatsTransport from an existing client
    pub fn new(client: Client) -> Self {
        let jetstream = jetstream::new(client.clone());
        Self {
            client,
            jetstream,
            acked: false,
        }
    }

    /// Connect to NATS server and create transport
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        info!(url = %url, "Connecting to NATS");
        let client = async_nats::connect(url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        Ok(Self::new(client))
    }

    /// Publish through JetStream and wait for stream acks
    pub fn with_jetstream_acks(mut self) -> Self {
        self.acked = true;
        self
    }

    /// Get JetStream context for stream operations
    pub fn jetstream(&self) -> &Context {
        &self.jetstream
    }

    /// Create or get a JetStream stream covering `subjects`
    pub async fn ensure_stream(
        &self,
        stream_name: &str,
        subjects: Vec<String>,
    ) -> Result<(), TransportError> {
        let config = Config {
            name: stream_name.to_string(),
            subjects,
            retention: RetentionPolicy::Limits,
            storage: StorageType::File,
            max_age: std::time::Duration::from_secs(24 * 60 * 60), // 24 hours
            ..Default::default()
        };

        self.jetstream
            .get_or_create_stream(config)
            .await
            .map_err(|e| TransportError::PublishFailed(format!("stream creation failed: {}", e)))?;

        info!(stream = %stream_name, "JetStream stream ready");
        Ok(())
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TransportError> {
        if self.acked {
            let ack = self
                .jetstream
                .publish(subject.to_string(), payload)
                .await
                .map_err(map_jetstream_error)?
                .await
                .map_err(map_jetstream_error)?;
            debug!(subject = %subject, stream = %ack.stream, seq = ack.sequence, "PubAck");
            return Ok(());
        }

        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| TransportError::PublishFailed(e.to_string()))?;
        self.flush().await
    }

    async fn publish_with_headers(
        &self,
        subject: &str,
        payload: Bytes,
        headers: HashMap<String, String>,
    ) -> Result<(), TransportError> {
        let mut nats_headers = async_nats::HeaderMap::new();
        for (k, v) in headers {
            nats_headers.insert(k.as_str(), v.as_str());
        }

        if self.acked {
            let ack = self
                .jetstream
                .publish_with_headers(subject.to_string(), nats_headers, payload)
                .await
                .map_err(map_jetstream_error)?
                .await
                .map_err(map_jetstream_error)?;
            debug!(subject = %subject, stream = %ack.stream, seq = ack.sequence, "PubAck");
            return Ok(());
        }

        self.client
            .publish_with_headers(subject.to_string(), nats_headers, payload)
            .await
            .map_err(|e| TransportError::PublishFailed(e.to_string()))?;
        self.flush().await
    }

    async fn subscribe(&self, subject: &str) -> Result<Box<dyn Subscription>, TransportError> {
        let subscriber = self.client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))?;
        Ok(Box::new(NatsSubscription::new(subscriber)))
    }

    async fn flush(&self) -> Result<(), TransportError> {
        self.client
            .flush()
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Note: These tests require a running NATS server
    // Run: docker run -p 4222:4222 nats:latest -js

    #[tokio::test]
    async fn test_core_publish_not_confirmed_while_disconnected() {
        // Nothing listens on port 1; the client keeps retrying in the background
        let client = async_nats::ConnectOptions::new()
            .retry_on_initial_connect()
            .connect("nats://127.0.0.1:1")
            .await
            .unwrap();
        let transport = NatsTransport::new(client);

        let result = tokio::time::timeout(
            std::time::Duration::from_millis(300),
            transport.publish("trade.BTC-USD", Bytes::from("x")),
        )
        .await;
        assert!(!matches!(result, Ok(Ok(()))));
    }

    #[tokio::test]
    #[ignore] // Requires NATS server
    async fn test_publish_succeeds() {
        let transport = NatsTransport::connect("nats://localhost:4222").await.unwrap();
        let result = transport.publish("trade.TEST", Bytes::from("hello")).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    #[ignore] // Requires NATS server with JetStream
    async fn test_ensure_stream() {
        let transport = NatsTransport::connect("nats://localhost:4222").await.unwrap();
        let result = transport.ensure_stream(
            "TEST_TRADE",
            vec!["test-trade.>".to_string()],
        ).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    #[ignore] // Requires NATS server with JetStream
    async fn test_acked_publish_without_stream_fails() {
        let transport = NatsTransport::connect("nats://localhost:4222")
            .await
            .unwrap()
            .with_jetstream_acks();
        let result = transport.publish("no-stream-here.X", Bytes::from("x")).await;
        assert!(result.is_err());
    }
}
