//! Kraken exchange connector
//!
//! Provides WebSocket connectivity to Kraken spot markets via the v2 API.

pub mod messages;
pub mod websocket;

pub use messages::{InstrumentPair, InstrumentSnapshot};
pub use websocket::{KrakenConnectionManager, KrakenWebSocket};
pub use trade_producer_metadata::KRAKEN_WS_URL;
