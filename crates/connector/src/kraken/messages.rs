//! Kraken v2 WebSocket message types
//!
//! Outbound request builders and the instrument snapshot used for symbol
//! discovery. Trade frames are handled generically by the classifier.

use serde::Deserialize;
use serde_json::json;

/// Public trade channel
pub const TRADE_CHANNEL: &str = "trade";
/// Reference data channel listing every pair
pub const INSTRUMENT_CHANNEL: &str = "instrument";
/// Pair status meaning the pair is tradeable
pub const STATUS_ONLINE: &str = "online";

/// Subscribe request for one channel.
///
/// `{"method":"subscribe","params":{"channel":"trade","symbol":["BTC/USD"]}}`
pub fn subscribe_request(channel: &str, symbols: &[&str]) -> String {
    let msg = if symbols.is_empty() {
        json!({
            "method": "subscribe",
            "params": { "channel": channel }
        })
    } else {
        json!({
            "method": "subscribe",
            "params": { "channel": channel, "symbol": symbols }
        })
    };
    msg.to_string()
}

/// Application-level ping. Kraken answers with `{"method":"pong",...}`.
pub fn ping_request() -> String {
    json!({ "method": "ping" }).to_string()
}

/// Instrument channel snapshot
#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentSnapshot {
    pub channel: String,
    pub data: InstrumentData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentData {
    pub pairs: Vec<InstrumentPair>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentPair {
    pub symbol: String,
    #[serde(default)]
    pub status: Option<String>,
}

impl InstrumentPair {
    /// Pairs without a status are assumed tradeable
    pub fn is_tradeable(&self) -> bool {
        self.status.as_deref().map_or(true, |s| s == STATUS_ONLINE)
    }
}

impl InstrumentSnapshot {
    /// Tradeable symbols in snapshot order
    pub fn tradeable_symbols(&self) -> Vec<String> {
        self.data
            .pairs
            .iter()
            .filter(|p| p.is_tradeable())
            .map(|p| p.symbol.clone())
            .collect()
    }
}
