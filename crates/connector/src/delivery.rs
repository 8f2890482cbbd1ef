//! Delivery loop and publish worker pool
//!
//! One reader pulls frames off the connection, classifies and normalizes
//! them, and hands each trade to the worker owning its symbol. Each worker has
//! a bounded FIFO queue and publishes one trade at a time, so per-symbol order
//! holds and a full queue pushes back on the reader.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};
use trade_producer_metadata::DeliveryConfig;
use trade_producer_middleware::{now_tsc, CLOCK};

use crate::classifier::{classify, normalize_entries, Frame};
use crate::error::PublishError;
use crate::metrics::ConnectorMetrics;
use crate::publisher::{publish_with_retry, RetryPolicy};
use crate::subscription::Subscription;
use crate::trade::Trade;
use crate::traits::{Connection, TradePublisher};

/// Application-level ping interval
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Longest silence tolerated before the feed is treated as stalled
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Why the delivery loop stopped
#[derive(Debug, Clone, PartialEq)]
pub enum LoopExit {
    /// Receive or keepalive failed; reopen and replay subscriptions
    ConnectionLost,
    /// Broker unusable; tear down and reconnect
    PublishFatal(PublishError),
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReport {
    pub exit: LoopExit,
    pub frames: u64,
    pub trades: u64,
    pub skipped: u64,
    /// Trades abandoned after a fatal broker error
    pub undelivered: u64,
}

struct Worker {
    id: usize,
    rx: mpsc::Receiver<Trade>,
    publisher: Arc<dyn TradePublisher>,
    retry: RetryPolicy,
    metrics: ConnectorMetrics,
    fatal_tx: mpsc::Sender<PublishError>,
    halted: Arc<AtomicBool>,
}

impl Worker {
    /// Returns the number of trades it gave up on
    async fn run(mut self) -> u64 {
        while let Some(trade) = self.rx.recv().await {
            if self.halted.load(Ordering::SeqCst) {
                return self.abandon(1).await;
            }

            let start = now_tsc();
            match publish_with_retry(self.publisher.as_ref(), &trade, &self.retry, &self.metrics).await {
                Ok(()) => {
                    self.metrics
                        .observe_publish_duration(CLOCK.delta(start, now_tsc()).as_secs_f64());
                    self.metrics.inc_trade_published(trade.symbol());
                }
                Err(PublishError::Rejected(reason)) => {
                    warn!(worker = self.id, symbol = %trade.symbol(), error = %reason, "Trade rejected by publisher");
                    self.metrics.inc_publish_failure("rejected");
                }
                Err(e) => {
                    error!(worker = self.id, symbol = %trade.symbol(), error = %e, "Fatal publish failure");
                    self.metrics.inc_publish_failure("fatal");
                    self.halted.store(true, Ordering::SeqCst);
                    let _ = self.fatal_tx.try_send(e);
                    return self.abandon(1).await;
                }
            }
        }
        0
    }

    async fn abandon(mut self, already: u64) -> u64 {
        self.rx.close();
        let mut undelivered = already;
        while self.rx.recv().await.is_some() {
            undelivered += 1;
        }
        error!(worker = self.id, undelivered, "Abandoned queued trades");
        self.metrics.add_undelivered(undelivered);
        undelivered
    }
}

/// Workers keyed by symbol hash
pub struct PublishPool {
    senders: Vec<mpsc::Sender<Trade>>,
    handles: Vec<JoinHandle<u64>>,
    fatal_rx: mpsc::Receiver<PublishError>,
    halted: Arc<AtomicBool>,
    metrics: ConnectorMetrics,
}

impl PublishPool {
    pub fn spawn(
        workers: usize,
        queue_depth: usize,
        publisher: Arc<dyn TradePublisher>,
        retry: RetryPolicy,
        metrics: ConnectorMetrics,
    ) -> Self {
        let workers = workers.max(1);
        let (fatal_tx, fatal_rx) = mpsc::channel(workers);
        let halted = Arc::new(AtomicBool::new(false));

        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let (tx, rx) = mpsc::channel(queue_depth.max(1));
            let worker = Worker {
                id,
                rx,
                publisher: Arc::clone(&publisher),
                retry: retry.clone(),
                metrics: metrics.clone(),
                fatal_tx: fatal_tx.clone(),
                halted: Arc::clone(&halted),
            };
            senders.push(tx);
            handles.push(tokio::spawn(worker.run()));
        }

        Self {
            senders,
            handles,
            fatal_rx,
            halted,
            metrics,
        }
    }

    pub fn route(&self, symbol: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        symbol.hash(&mut hasher);
        (hasher.finish() % self.senders.len() as u64) as usize
    }

    /// Queue a trade on its symbol's worker, waiting for capacity.
    ///
    /// Fails only when that worker has stopped after a fatal error.
    pub async fn submit(&self, trade: Trade) -> Result<(), Trade> {
        let worker = self.route(trade.symbol());
        self.senders[worker].send(trade).await.map_err(|e| e.0)
    }

    /// Next fatal error reported by any worker
    pub async fn next_fatal(&mut self) -> Option<PublishError> {
        self.fatal_rx.recv().await
    }

    /// Stop accepting trades and wait for the workers.
    ///
    /// With `abandon` set, queued trades are counted and dropped instead of
    /// published. Returns the total undelivered count.
    pub async fn drain(self, abandon: bool) -> u64 {
        if abandon {
            self.halted.store(true, Ordering::SeqCst);
        }
        drop(self.senders);

        let mut undelivered = 0;
        for handle in self.handles {
            match handle.await {
                Ok(n) => undelivered += n,
                Err(e) => {
                    error!(error = %e, "Publish worker panicked");
                    self.metrics.inc_publish_failure("panic");
                }
            }
        }
        undelivered
    }
}

/// Single-reader read, classify, normalize, publish loop
#[derive(Debug, Clone)]
pub struct DeliveryLoop {
    workers: usize,
    queue_depth: usize,
    retry: RetryPolicy,
    keepalive_interval: Duration,
    stall_timeout: Duration,
    metrics: ConnectorMetrics,
}

impl DeliveryLoop {
    pub fn new(delivery: &DeliveryConfig, metrics: ConnectorMetrics) -> Self {
        Self {
            workers: delivery.workers,
            queue_depth: delivery.queue_depth,
            retry: RetryPolicy::from_config(delivery),
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
            metrics,
        }
    }

    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// End the loop as `ConnectionLost` when no frame arrives for `timeout`.
    ///
    /// The deadline spans the whole silence, across keepalive ticks.
    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run until the connection is lost, the broker fails fatally or
    /// shutdown is signalled. The worker pool is drained before returning.
    pub async fn run<C>(
        &self,
        conn: &mut C,
        subscriptions: &[Subscription],
        publisher: Arc<dyn TradePublisher>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> DeliveryReport
    where
        C: Connection + ?Sized,
    {
        // Entries without their own symbol need an unambiguous context
        let acked: Vec<&str> = subscriptions
            .iter()
            .filter(|s| s.is_acked())
            .map(Subscription::symbol)
            .collect();
        let context = match acked.as_slice() {
            [only] => Some(*only),
            _ => None,
        };

        let mut pool = PublishPool::spawn(
            self.workers,
            self.queue_depth,
            publisher,
            self.retry.clone(),
            self.metrics.clone(),
        );
        let mut keepalive =
            tokio::time::interval_at(Instant::now() + self.keepalive_interval, self.keepalive_interval);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let stall = tokio::time::sleep(self.stall_timeout);
        tokio::pin!(stall);

        let mut frames = 0u64;
        let mut trades = 0u64;
        let mut skipped = 0u64;
        let mut lost = 0u64;

        info!(subscriptions = acked.len(), workers = self.workers, "Delivery loop started");

        let exit = loop {
            if *shutdown.borrow() {
                break LoopExit::Shutdown;
            }

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received");
                        break LoopExit::Shutdown;
                    }
                }
                Some(err) = pool.next_fatal() => {
                    break LoopExit::PublishFatal(err);
                }
                _ = &mut stall => {
                    warn!(
                        silent_ms = self.stall_timeout.as_millis() as u64,
                        "No frames received, feed stalled"
                    );
                    break LoopExit::ConnectionLost;
                }
                _ = keepalive.tick() => {
                    if let Err(e) = conn.keepalive().await {
                        warn!(error = %e, "Keepalive failed");
                        break LoopExit::ConnectionLost;
                    }
                }
                received = conn.recv() => {
                    let raw = match received {
                        Ok(raw) => raw,
                        Err(e) => {
                            warn!(error = %e, "Connection lost");
                            break LoopExit::ConnectionLost;
                        }
                    };
                    frames += 1;
                    stall.as_mut().reset(Instant::now() + self.stall_timeout);

                    let frame = classify(&raw);
                    self.metrics.inc_frame(frame.kind());
                    let entries = match frame {
                        Frame::Heartbeat => {
                            trace!("Heartbeat");
                            continue;
                        }
                        Frame::Control => {
                            debug!(frame = %raw, "Control frame");
                            continue;
                        }
                        Frame::Data(entries) => entries,
                    };

                    let normalized = normalize_entries(context, &entries);
                    for reason in &normalized.skipped {
                        self.metrics.inc_entry_skipped(reason.reason());
                    }
                    skipped += normalized.skipped.len() as u64;

                    for trade in normalized.trades {
                        trades += 1;
                        if let Err(trade) = pool.submit(trade).await {
                            warn!(symbol = %trade.symbol(), "Publish worker stopped, trade not queued");
                            lost += 1;
                        }
                    }
                }
            }
        };

        let abandon = matches!(exit, LoopExit::PublishFatal(_));
        let undelivered = pool.drain(abandon).await + lost;
        if lost > 0 {
            self.metrics.add_undelivered(lost);
        }
        if undelivered > 0 {
            error!(undelivered, "Trades were not delivered");
        }

        info!(exit = ?exit, frames, trades, skipped, "Delivery loop stopped");
        DeliveryReport {
            exit,
            frames,
            trades,
            skipped,
            undelivered,
        }
    }
}
