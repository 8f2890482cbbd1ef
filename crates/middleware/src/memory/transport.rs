use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::error::TransportError;
use crate::latency::now_tsc;
use crate::transport::{Subscription, Transport, TransportMessage};

const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Broadcast-backed transport for tests and dry runs.
///
/// Messages published with no subscriber on the subject are counted and dropped.
pub struct InMemoryTransport {
    channels: DashMap<String, broadcast::Sender<TransportMessage>>,
    sequence: AtomicU64,
    /// Number of upcoming publishes to reject with `PublishFailed`
    fail_next: AtomicU32,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            sequence: AtomicU64::new(0),
            fail_next: AtomicU32::new(0),
        }
    }

    /// Reject the next `count` publishes with a retryable error.
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Number of publishes accepted so far
    pub fn published_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    #[inline]
    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn get_or_create_channel(&self, subject: &str) -> broadcast::Sender<TransportMessage> {
        self.channels
            .entry(subject.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_BUFFER_SIZE).0)
            .clone()
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

struct InMemorySubscription {
    rx: broadcast::Receiver<TransportMessage>,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next(&mut self) -> Result<TransportMessage, TransportError> {
        self.rx
            .recv()
            .await
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))
    }

    async fn unsubscribe(self: Box<Self>) -> Result<(), TransportError> {
        Ok(())
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TransportError> {
        self.publish_with_headers(subject, payload, HashMap::new())
            .await
    }

    async fn publish_with_headers(
        &self,
        subject: &str,
        payload: Bytes,
        headers: HashMap<String, String>,
    ) -> Result<(), TransportError> {
        if self.take_injected_failure() {
            return Err(TransportError::PublishFailed("injected failure".to_string()));
        }

        let tx = self.get_or_create_channel(subject);
        let seq = self.next_sequence();
        let msg = TransportMessage {
            subject: subject.to_string(),
            payload,
            headers,
            timestamp: now_tsc(),
            sequence: Some(seq),
        };
        let _ = tx.send(msg);
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<Box<dyn Subscription>, TransportError> {
        let tx = self.get_or_create_channel(subject);
        let rx = tx.subscribe();
        Ok(Box::new(InMemorySubscription { rx }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let transport = InMemoryTransport::new();
        let mut sub = transport.subscribe("trade.BTC-USD").await.unwrap();
        transport
            .publish("trade.BTC-USD", Bytes::from("hello"))
            .await
            .unwrap();
        let msg = sub.next().await.unwrap();
        assert_eq!(msg.subject, "trade.BTC-USD");
        assert_eq!(msg.payload, Bytes::from("hello"));
    }

    #[tokio::test]
    async fn test_sequence_numbers_increment() {
        let transport = InMemoryTransport::new();
        let mut sub = transport.subscribe("test.seq").await.unwrap();
        transport
            .publish("test.seq", Bytes::from("1"))
            .await
            .unwrap();
        transport
            .publish("test.seq", Bytes::from("2"))
            .await
            .unwrap();
        let msg1 = sub.next().await.unwrap();
        let msg2 = sub.next().await.unwrap();
        assert_eq!(msg1.sequence, Some(0));
        assert_eq!(msg2.sequence, Some(1));
        assert_eq!(transport.published_count(), 2);
    }

    #[tokio::test]
    async fn test_headers_are_delivered() {
        let transport = InMemoryTransport::new();
        let mut sub = transport.subscribe("trade.ETH-USD").await.unwrap();
        let mut headers = HashMap::new();
        headers.insert("Trade-Key".to_string(), "ETH/USD".to_string());
        transport
            .publish_with_headers("trade.ETH-USD", Bytes::from("x"), headers)
            .await
            .unwrap();
        let msg = sub.next().await.unwrap();
        assert_eq!(msg.headers.get("Trade-Key").map(String::as_str), Some("ETH/USD"));
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let transport = InMemoryTransport::new();
        transport.fail_next(2);

        let first = transport.publish("t", Bytes::from("a")).await;
        let second = transport.publish("t", Bytes::from("b")).await;
        let third = transport.publish("t", Bytes::from("c")).await;

        assert!(matches!(first, Err(TransportError::PublishFailed(_))));
        assert!(second.is_err());
        assert!(third.is_ok());
        assert_eq!(transport.published_count(), 1);
    }
}
