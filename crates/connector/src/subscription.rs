//! Subscription control
//!
//! Kraken does not correlate acks with requests in a way this producer relies
//! on. A subscribe is considered acknowledged once a fixed number of reply
//! frames arrive, whatever they contain. That contract lives here and nowhere
//! else.

use std::time::Duration;

use tracing::{debug, info, warn};
use trade_producer_metadata::FeedConfig;

use crate::error::{ConnectionError, DiscoveryError};
use crate::kraken::messages::{subscribe_request, InstrumentSnapshot, INSTRUMENT_CHANNEL, TRADE_CHANNEL};
use crate::traits::Connection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Pending,
    Acked,
    /// Reply window not filled in time. Excluded for this session only.
    Failed,
}

/// One symbol's trade subscription on one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    symbol: String,
    state: SubscriptionState,
}

impl Subscription {
    pub fn pending(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            state: SubscriptionState::Pending,
        }
    }

    pub fn acked(self) -> Self {
        Self {
            state: SubscriptionState::Acked,
            ..self
        }
    }

    pub fn failed(self) -> Self {
        Self {
            state: SubscriptionState::Failed,
            ..self
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn is_acked(&self) -> bool {
        self.state == SubscriptionState::Acked
    }
}

/// Where a session's symbols come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolSource {
    /// One configured symbol
    Single(String),
    /// Every tradeable pair from the instrument channel
    Discover,
}

impl SymbolSource {
    pub fn from_config(feed: &FeedConfig) -> Self {
        match feed.target_symbol() {
            Some(symbol) => SymbolSource::Single(symbol.to_string()),
            None => SymbolSource::Discover,
        }
    }
}

/// Sends subscribe requests and waits out their reply windows
#[derive(Debug, Clone)]
pub struct SubscriptionController {
    ack_frames: usize,
    ack_timeout: Duration,
}

impl SubscriptionController {
    pub fn new(ack_frames: usize, ack_timeout: Duration) -> Self {
        Self {
            ack_frames,
            ack_timeout,
        }
    }

    pub fn from_config(feed: &FeedConfig) -> Self {
        Self::new(feed.ack_frames, Duration::from_millis(feed.ack_timeout_ms))
    }

    /// Consume `count` frames. `Ok(false)` when the window timed out.
    async fn await_replies<C>(&self, conn: &mut C, count: usize) -> Result<bool, ConnectionError>
    where
        C: Connection + ?Sized,
    {
        let window = async {
            for n in 0..count {
                let reply = conn.recv().await?;
                debug!(n, reply = %reply, "Subscription reply");
            }
            Ok::<(), ConnectionError>(())
        };

        match tokio::time::timeout(self.ack_timeout, window).await {
            Ok(result) => result.map(|()| true),
            Err(_) => Ok(false),
        }
    }

    /// Subscribe to trades for one symbol.
    ///
    /// A timed-out reply window yields a `Failed` subscription; a connection
    /// error is returned as-is.
    pub async fn subscribe<C>(&self, conn: &mut C, symbol: &str) -> Result<Subscription, ConnectionError>
    where
        C: Connection + ?Sized,
    {
        let subscription = Subscription::pending(symbol);
        conn.send(subscribe_request(TRADE_CHANNEL, &[symbol])).await?;

        if self.await_replies(conn, self.ack_frames).await? {
            info!(symbol, "Subscribed to trades");
            Ok(subscription.acked())
        } else {
            warn!(
                symbol,
                timeout_ms = self.ack_timeout.as_millis() as u64,
                "Subscription not acknowledged in time"
            );
            Ok(subscription.failed())
        }
    }

    /// Subscribe each symbol in order, one request per symbol
    pub async fn subscribe_all<C>(
        &self,
        conn: &mut C,
        symbols: &[String],
    ) -> Result<Vec<Subscription>, ConnectionError>
    where
        C: Connection + ?Sized,
    {
        let mut subscriptions = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            subscriptions.push(self.subscribe(conn, symbol).await?);
        }
        Ok(subscriptions)
    }

    /// Ask the instrument channel for every pair and return the tradeable
    /// symbols in listing order.
    pub async fn discover_symbols<C>(&self, conn: &mut C) -> Result<Vec<String>, DiscoveryError>
    where
        C: Connection + ?Sized,
    {
        conn.send(subscribe_request(INSTRUMENT_CHANNEL, &[])).await?;

        let listing = async {
            for _ in 0..self.ack_frames {
                let reply = conn.recv().await?;
                debug!(reply = %reply, "Discarding instrument reply");
            }
            conn.recv().await
        };

        let raw = tokio::time::timeout(self.ack_timeout, listing)
            .await
            .map_err(|_| DiscoveryError::Timeout)??;

        let snapshot: InstrumentSnapshot = serde_json::from_str(&raw)
            .map_err(|e| DiscoveryError::InvalidList(e.to_string()))?;
        if snapshot.channel != INSTRUMENT_CHANNEL {
            return Err(DiscoveryError::InvalidList(format!(
                "expected {} channel, got {}",
                INSTRUMENT_CHANNEL, snapshot.channel
            )));
        }

        let symbols = snapshot.tradeable_symbols();
        info!(
            listed = snapshot.data.pairs.len(),
            tradeable = symbols.len(),
            "Discovered symbols"
        );
        Ok(symbols)
    }

    /// Resolve the active symbol set for a source
    pub async fn resolve_symbols<C>(
        &self,
        conn: &mut C,
        source: &SymbolSource,
    ) -> Result<Vec<String>, DiscoveryError>
    where
        C: Connection + ?Sized,
    {
        match source {
            SymbolSource::Single(symbol) => Ok(vec![symbol.clone()]),
            SymbolSource::Discover => self.discover_symbols(conn).await,
        }
    }
}
