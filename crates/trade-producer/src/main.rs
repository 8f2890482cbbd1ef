//! trade-producer: exchange trade feed to broker
//!
//! Streams Kraken trades and publishes them to NATS keyed by symbol.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trade_producer_lib::{KrakenConnectionManager, NatsTradePublisher, Runner, ServerState};
use trade_producer_metadata::Environment;
use trade_producer_middleware::{MiddlewareFactory, Transport as _};

#[derive(Parser, Debug)]
#[command(name = "trade-producer")]
#[command(about = "Publishes exchange trades to a message broker")]
struct Args {
    /// Path to environment configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Broker address, e.g. nats://localhost:4222
    #[arg(long, env = "BROKER_ADDRESS")]
    broker_address: Option<String>,

    /// Topic trades are published under
    #[arg(long, env = "TOPIC_NAME")]
    topic: Option<String>,

    /// Symbol to stream (e.g. BTC/USD). Empty means every listed symbol.
    #[arg(long, env = "PRODUCT_ID")]
    symbol: Option<String>,

    /// Health server bind address
    #[arg(long, default_value = "0.0.0.0:8080")]
    health_addr: String,
}

impl Args {
    /// Command-line values win over the file
    fn apply_overrides(&self, env: &mut Environment) {
        if let Some(ref address) = self.broker_address {
            env.transport.url = Some(address.clone());
        }
        if let Some(ref topic) = self.topic {
            env.transport.topic = topic.clone();
        }
        if let Some(ref symbol) = self.symbol {
            env.feed.symbol = Some(symbol.clone());
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut env_config = match args.config {
        Some(ref path) => {
            let env = Environment::load(path)?;
            info!(env = %env.name, path = %path.display(), "Loaded environment configuration");
            env
        }
        None => {
            info!("No config file given, using defaults");
            Environment::default()
        }
    };
    args.apply_overrides(&mut env_config);

    let (env_config, clamped) = env_config.validated().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        e
    })?;
    if clamped {
        warn!("Some configuration values were out of range and have been clamped");
    }
    info!(
        env = %env_config.name,
        url = %env_config.feed.url,
        symbol = env_config.feed.target_symbol().unwrap_or("<discover>"),
        topic = %env_config.transport.topic,
        "Starting trade producer"
    );

    // Setup shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        shutdown_tx.send(true).ok();
    });

    let health_addr: SocketAddr = args.health_addr.parse()?;

    let transport = MiddlewareFactory::create_transport(&env_config).await.map_err(|e| {
        error!(error = %e, "Failed to create broker transport");
        e
    })?;
    let publisher = Arc::new(NatsTradePublisher::new(
        Arc::clone(&transport),
        env_config.transport.topic.as_str(),
    ));
    let manager = KrakenConnectionManager::from_config(&env_config.feed);

    let mut runner = Runner::new(&env_config, manager, publisher);

    let server_state = ServerState::new(&env_config.name, runner.connected_handle());
    tokio::spawn(async move {
        if let Err(e) = trade_producer_lib::run_server(health_addr, server_state).await {
            error!(error = %e, "Health server error");
        }
    });
    info!(addr = %health_addr, "Health server started");

    let result = runner.run(shutdown_rx).await;

    if let Err(e) = transport.flush().await {
        warn!(error = %e, "Failed to flush broker transport");
    }

    match result {
        Ok(()) => {
            info!("Trade producer stopped gracefully");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Trade producer failed");
            std::process::exit(1);
        }
    }
}
