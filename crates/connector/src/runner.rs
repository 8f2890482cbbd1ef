use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio::sync::watch;
use tracing::{error, info, warn};
use trade_producer_metadata::Environment;

use crate::delivery::{DeliveryLoop, LoopExit};
use crate::error::RunnerError;
use crate::metrics::ConnectorMetrics;
use crate::reconnect::ReconnectPolicy;
use crate::subscription::{SubscriptionController, SymbolSource};
use crate::traits::{Connection, ConnectionManager, TradePublisher};

/// Resolves once shutdown is requested or the sender is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Session supervisor: open, subscribe, deliver, back off, repeat
pub struct Runner<M: ConnectionManager> {
    feed_name: String,
    manager: M,
    publisher: Arc<dyn TradePublisher>,
    controller: SubscriptionController,
    source: SymbolSource,
    delivery: DeliveryLoop,
    reconnect: ReconnectPolicy,
    metrics: ConnectorMetrics,
    connected: Arc<AtomicBool>,
}

impl<M: ConnectionManager> Runner<M> {
    pub fn new(env: &Environment, manager: M, publisher: Arc<dyn TradePublisher>) -> Self {
        let metrics = ConnectorMetrics::new(env.name.as_str());
        Self {
            feed_name: env.name.clone(),
            manager,
            publisher,
            controller: SubscriptionController::from_config(&env.feed),
            source: SymbolSource::from_config(&env.feed),
            delivery: DeliveryLoop::new(&env.delivery, metrics.clone())
                .with_stall_timeout(Duration::from_millis(env.feed.read_timeout_ms)),
            reconnect: ReconnectPolicy::from_config(&env.reconnect),
            metrics,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_delivery_loop(mut self, delivery: DeliveryLoop) -> Self {
        self.delivery = delivery;
        self
    }

    /// Returns whether a session is currently connected
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Returns a handle to the connected status
    pub fn connected_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.connected)
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        if connected {
            self.metrics.set_connected();
        } else {
            self.metrics.set_disconnected();
        }
    }

    /// Sleep out the next backoff delay. `Ok(false)` when shutdown arrived first.
    async fn backoff(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<bool, RunnerError> {
        let Some(delay) = self.reconnect.next_delay() else {
            let attempts = self.reconnect.attempt_count();
            error!(attempts, "Reconnect attempts exhausted");
            return Err(RunnerError::ReconnectExhausted(attempts));
        };

        info!(
            attempt = self.reconnect.attempt_count(),
            delay_ms = delay.as_millis() as u64,
            "Reconnecting after backoff"
        );
        select! {
            biased;
            _ = shutdown_requested(shutdown) => Ok(false),
            _ = tokio::time::sleep(delay) => Ok(true),
        }
    }

    /// Run sessions until shutdown.
    ///
    /// The symbol set is resolved on the first session and replayed on every
    /// reconnect. Fails on a discovery error or an exhausted reconnect budget.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), RunnerError> {
        let mut symbols: Option<Vec<String>> = None;

        loop {
            let opened = select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                opened = self.manager.open() => opened,
            };

            let mut conn = match opened {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(feed = %self.feed_name, error = %e, "Connect failed");
                    if self.backoff(&mut shutdown).await? {
                        continue;
                    }
                    break;
                }
            };
            self.set_connected(true);
            info!(feed = %self.feed_name, "Connected to exchange");

            if symbols.is_none() {
                match self.controller.resolve_symbols(&mut conn, &self.source).await {
                    Ok(resolved) => {
                        if resolved.is_empty() {
                            warn!("No symbols to subscribe; nothing will be published");
                        }
                        symbols = Some(resolved);
                    }
                    Err(e) => {
                        error!(error = %e, "Symbol discovery failed");
                        self.manager.close(&mut conn).await;
                        self.set_connected(false);
                        return Err(e.into());
                    }
                }
            }
            let active = symbols.as_deref().unwrap_or_default();

            let subscriptions = match self.controller.subscribe_all(&mut conn, active).await {
                Ok(subscriptions) => subscriptions,
                Err(e) => {
                    warn!(error = %e, "Connection lost while subscribing");
                    self.manager.close(&mut conn).await;
                    self.set_connected(false);
                    self.metrics.inc_reconnect();
                    if self.backoff(&mut shutdown).await? {
                        continue;
                    }
                    break;
                }
            };

            if !self.manager.is_healthy(&conn) {
                warn!(state = conn.state().as_str(), "Connection unhealthy after subscribing");
                self.manager.close(&mut conn).await;
                self.set_connected(false);
                self.metrics.inc_reconnect();
                if self.backoff(&mut shutdown).await? {
                    continue;
                }
                break;
            }

            let acked = subscriptions.iter().filter(|s| s.is_acked()).count();
            let failed = subscriptions.len() - acked;
            self.metrics.set_subscriptions(acked, failed);
            for sub in subscriptions.iter().filter(|s| !s.is_acked()) {
                warn!(symbol = %sub.symbol(), "Subscription failed; excluded for this session");
            }

            let report = self
                .delivery
                .run(&mut conn, &subscriptions, Arc::clone(&self.publisher), &mut shutdown)
                .await;

            self.manager.close(&mut conn).await;
            self.set_connected(false);

            match report.exit {
                LoopExit::Shutdown => break,
                LoopExit::ConnectionLost | LoopExit::PublishFatal(_) => {
                    if report.frames > 0 {
                        self.reconnect.reset();
                    }
                    self.metrics.inc_reconnect();
                    info!(exit = ?report.exit, frames = report.frames, "Session ended");
                    if !self.backoff(&mut shutdown).await? {
                        break;
                    }
                }
            }
        }

        info!(feed = %self.feed_name, "Runner stopped");
        Ok(())
    }
}
