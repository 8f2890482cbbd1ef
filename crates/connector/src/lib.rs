//! trade-producer-lib: exchange trade feed to broker runtime
//!
//! Connects to the Kraken v2 WebSocket, subscribes to trades, normalizes
//! trade entries and publishes them keyed by symbol.

pub mod classifier;
pub mod delivery;
pub mod error;
pub mod kraken;
pub mod metrics;
pub mod publisher;
pub mod reconnect;
pub mod runner;
pub mod server;
pub mod subscription;
pub mod trade;
pub mod traits;

pub use classifier::{classify, normalize, normalize_entries, Frame, MalformedEntry, Normalized};
pub use delivery::{DeliveryLoop, DeliveryReport, LoopExit, PublishPool};
pub use error::{ConnectError, ConnectionError, DiscoveryError, PublishError, RunnerError};
pub use kraken::{KrakenConnectionManager, KrakenWebSocket};
pub use metrics::ConnectorMetrics;
pub use publisher::{publish_with_retry, NatsTradePublisher, RetryPolicy, TRADE_KEY_HEADER};
pub use reconnect::ReconnectPolicy;
pub use runner::Runner;
pub use server::{create_router, run_server, ServerState};
pub use subscription::{Subscription, SubscriptionController, SubscriptionState, SymbolSource};
pub use trade::Trade;
pub use traits::{Connection, ConnectionManager, ConnectionState, TradePublisher};
