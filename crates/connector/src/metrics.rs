//! Prometheus metrics for the trade producer
//!
//! Frame flow, publish outcomes and session state, labelled by feed name.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, Encoder,
    HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder,
};

/// Labels used for metrics
const LABEL_FEED: &str = "feed";
const LABEL_KIND: &str = "kind";
const LABEL_SYMBOL: &str = "symbol";
const LABEL_REASON: &str = "reason";
const LABEL_STATE: &str = "state";

/// Frames received by classification
static FRAMES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "trade_producer_frames_total",
        "Frames received from the exchange by kind",
        &[LABEL_FEED, LABEL_KIND]
    )
    .expect("Failed to register frames_total metric")
});

static TRADES_PUBLISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "trade_producer_trades_published_total",
        "Trades accepted by the broker",
        &[LABEL_FEED, LABEL_SYMBOL]
    )
    .expect("Failed to register trades_published_total metric")
});

static ENTRIES_SKIPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "trade_producer_entries_skipped_total",
        "Malformed trade entries skipped",
        &[LABEL_FEED, LABEL_REASON]
    )
    .expect("Failed to register entries_skipped_total metric")
});

static PUBLISH_RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "trade_producer_publish_retries_total",
        "Publish attempts retried after a transient failure",
        &[LABEL_FEED]
    )
    .expect("Failed to register publish_retries_total metric")
});

/// Publishes that gave up, by kind (rejected, fatal)
static PUBLISH_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "trade_producer_publish_failures_total",
        "Publishes that were not delivered",
        &[LABEL_FEED, LABEL_KIND]
    )
    .expect("Failed to register publish_failures_total metric")
});

static UNDELIVERED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "trade_producer_undelivered_total",
        "Queued trades abandoned after a fatal broker error",
        &[LABEL_FEED]
    )
    .expect("Failed to register undelivered_total metric")
});

static RECONNECTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "trade_producer_reconnects_total",
        "Sessions torn down and reopened",
        &[LABEL_FEED]
    )
    .expect("Failed to register reconnects_total metric")
});

/// Subscriptions in the current session by state (acked, failed)
static SUBSCRIPTIONS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "trade_producer_subscriptions",
        "Subscriptions in the current session by state",
        &[LABEL_FEED, LABEL_STATE]
    )
    .expect("Failed to register subscriptions metric")
});

/// WebSocket connection status (1 = connected, 0 = disconnected)
static WEBSOCKET_CONNECTED: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "trade_producer_websocket_connected",
        "WebSocket connection status (1=connected, 0=disconnected)",
        &[LABEL_FEED]
    )
    .expect("Failed to register websocket_connected metric")
});

static PUBLISH_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "trade_producer_publish_duration_seconds",
        "Time from first publish attempt to broker acceptance",
        &[LABEL_FEED],
        vec![0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]
    )
    .expect("Failed to register publish_duration metric")
});

/// Handle for recording metrics for one feed
#[derive(Clone, Debug)]
pub struct ConnectorMetrics {
    feed: String,
}

impl ConnectorMetrics {
    pub fn new(feed: impl Into<String>) -> Self {
        Self { feed: feed.into() }
    }

    pub fn feed(&self) -> &str {
        &self.feed
    }

    pub fn inc_frame(&self, kind: &str) {
        FRAMES_TOTAL.with_label_values(&[&self.feed, kind]).inc();
    }

    pub fn inc_trade_published(&self, symbol: &str) {
        TRADES_PUBLISHED.with_label_values(&[&self.feed, symbol]).inc();
    }

    pub fn inc_entry_skipped(&self, reason: &str) {
        ENTRIES_SKIPPED.with_label_values(&[&self.feed, reason]).inc();
    }

    pub fn inc_publish_retry(&self) {
        PUBLISH_RETRIES.with_label_values(&[&self.feed]).inc();
    }

    pub fn inc_publish_failure(&self, kind: &str) {
        PUBLISH_FAILURES.with_label_values(&[&self.feed, kind]).inc();
    }

    pub fn add_undelivered(&self, count: u64) {
        UNDELIVERED.with_label_values(&[&self.feed]).inc_by(count);
    }

    pub fn inc_reconnect(&self) {
        RECONNECTS.with_label_values(&[&self.feed]).inc();
    }

    pub fn set_subscriptions(&self, acked: usize, failed: usize) {
        SUBSCRIPTIONS
            .with_label_values(&[&self.feed, "acked"])
            .set(acked as i64);
        SUBSCRIPTIONS
            .with_label_values(&[&self.feed, "failed"])
            .set(failed as i64);
    }

    pub fn set_connected(&self) {
        WEBSOCKET_CONNECTED.with_label_values(&[&self.feed]).set(1);
    }

    pub fn set_disconnected(&self) {
        WEBSOCKET_CONNECTED.with_label_values(&[&self.feed]).set(0);
    }

    pub fn observe_publish_duration(&self, secs: f64) {
        PUBLISH_DURATION.with_label_values(&[&self.feed]).observe(secs);
    }

    /// Trades published so far for one symbol
    pub fn trades_published(&self, symbol: &str) -> u64 {
        TRADES_PUBLISHED.with_label_values(&[&self.feed, symbol]).get()
    }

    /// Reconnects recorded so far
    pub fn reconnects(&self) -> u64 {
        RECONNECTS.with_label_values(&[&self.feed]).get()
    }
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to encode metrics as UTF-8: {}", e))
    })
}
