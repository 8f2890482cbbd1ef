//! Frame classification and trade normalization
//!
//! Every inbound frame is one of heartbeat, control or data. Data frames carry
//! a `data` array of trade entries which are mapped field by field into
//! [`Trade`]s. A bad entry is skipped on its own; its siblings still go through.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{trace, warn};

use crate::kraken::messages::TRADE_CHANNEL;
use crate::trade::Trade;

/// Substring that marks a keep-alive frame
pub const HEARTBEAT_MARKER: &str = "heartbeat";

/// Classified inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Heartbeat,
    /// Acks, pongs, status, errors and anything unparsable
    Control,
    /// Trade entries in wire order
    Data(Vec<Value>),
}

impl Frame {
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Heartbeat => "heartbeat",
            Frame::Control => "control",
            Frame::Data(_) => "data",
        }
    }
}

/// Why a single trade entry was skipped
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedEntry {
    #[error("entry is not an object")]
    NotAnObject,
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("field `{0}` has the wrong type")]
    WrongType(&'static str),
    #[error("field `{0}` is empty")]
    EmptyField(&'static str),
}

impl MalformedEntry {
    /// Metric label
    pub fn reason(&self) -> &'static str {
        match self {
            MalformedEntry::NotAnObject => "not_an_object",
            MalformedEntry::MissingField(_) => "missing_field",
            MalformedEntry::WrongType(_) => "wrong_type",
            MalformedEntry::EmptyField(_) => "empty_field",
        }
    }
}

#[derive(Deserialize)]
struct FrameEnvelope {
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

/// Classify a raw frame.
///
/// The heartbeat marker is checked before parsing since heartbeat frames
/// need not be valid JSON. A frame is data when it has a `data` array and
/// either no `channel` or the trade channel.
pub fn classify(raw: &str) -> Frame {
    if raw.contains(HEARTBEAT_MARKER) {
        return Frame::Heartbeat;
    }

    let envelope: FrameEnvelope = match serde_json::from_str(raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            trace!(error = %e, "Unparsable frame treated as control");
            return Frame::Control;
        }
    };

    match (envelope.channel.as_deref(), envelope.data) {
        (None, Some(Value::Array(entries))) => Frame::Data(entries),
        (Some(channel), Some(Value::Array(entries))) if channel == TRADE_CHANNEL => {
            Frame::Data(entries)
        }
        _ => Frame::Control,
    }
}

fn decimal_field(entry: &Map<String, Value>, field: &'static str) -> Result<Decimal, MalformedEntry> {
    let text = match entry.get(field) {
        None | Some(Value::Null) => return Err(MalformedEntry::MissingField(field)),
        Some(Value::String(s)) if s.trim().is_empty() => {
            return Err(MalformedEntry::EmptyField(field))
        }
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(_) => return Err(MalformedEntry::WrongType(field)),
    };

    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| MalformedEntry::WrongType(field))
}

fn timestamp_field(entry: &Map<String, Value>) -> Result<String, MalformedEntry> {
    match entry.get("timestamp") {
        None | Some(Value::Null) => Err(MalformedEntry::MissingField("timestamp")),
        Some(Value::String(s)) if s.trim().is_empty() => Err(MalformedEntry::EmptyField("timestamp")),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(_) => Err(MalformedEntry::WrongType("timestamp")),
    }
}

/// Map one wire entry to a [`Trade`].
///
/// `symbol` is the subscription context; an entry carrying its own
/// `symbol` overrides it. Fields: `price` -> price, `qty` -> volume,
/// `timestamp` -> timestamp.
pub fn normalize(symbol: Option<&str>, entry: &Value) -> Result<Trade, MalformedEntry> {
    let entry = entry.as_object().ok_or(MalformedEntry::NotAnObject)?;

    let symbol = match entry.get("symbol") {
        Some(Value::String(s)) => s.as_str(),
        Some(Value::Null) | None => symbol.ok_or(MalformedEntry::MissingField("symbol"))?,
        Some(_) => return Err(MalformedEntry::WrongType("symbol")),
    };
    let price = decimal_field(entry, "price")?;
    let volume = decimal_field(entry, "qty")?;
    let timestamp = timestamp_field(entry)?;

    Trade::new(symbol, price, volume, timestamp)
}

/// Result of normalizing every entry of one data frame
#[derive(Debug, Default)]
pub struct Normalized {
    pub trades: Vec<Trade>,
    pub skipped: Vec<MalformedEntry>,
}

/// Normalize all entries of a data frame, keeping wire order.
pub fn normalize_entries(symbol: Option<&str>, entries: &[Value]) -> Normalized {
    let mut out = Normalized {
        trades: Vec::with_capacity(entries.len()),
        skipped: Vec::new(),
    };

    for (index, entry) in entries.iter().enumerate() {
        match normalize(symbol, entry) {
            Ok(trade) => out.trades.push(trade),
            Err(reason) => {
                warn!(index, error = %reason, entry = %entry, "Skipping malformed trade entry");
                out.skipped.push(reason);
            }
        }
    }
    out
}
