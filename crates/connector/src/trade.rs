//! Canonical trade record

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::classifier::MalformedEntry;

/// One executed trade, normalized from exchange wire format.
///
/// Every field is present and non-empty; construct through [`Trade::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    volume: Decimal,
    /// Exchange-native timestamp (ISO-8601 or epoch), passed through untouched
    timestamp: String,
}

impl Trade {
    pub fn new(
        symbol: impl Into<String>,
        price: Decimal,
        volume: Decimal,
        timestamp: impl Into<String>,
    ) -> Result<Self, MalformedEntry> {
        let symbol = symbol.into();
        let timestamp = timestamp.into();
        if symbol.trim().is_empty() {
            return Err(MalformedEntry::EmptyField("symbol"));
        }
        if timestamp.trim().is_empty() {
            return Err(MalformedEntry::EmptyField("timestamp"));
        }
        Ok(Self {
            symbol,
            price,
            volume,
            timestamp,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn price(&self) -> Decimal {
        self.price
    }

    pub fn volume(&self) -> Decimal {
        self.volume
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Broker partition key
    pub fn key(&self) -> &str {
        &self.symbol
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_serializes_decimals_as_strings() {
        let trade = Trade::new(
            "BTC/USD",
            Decimal::from_str("50000.1").unwrap(),
            Decimal::from_str("0.002").unwrap(),
            "2024-01-01T00:00:00Z",
        )
        .unwrap();

        let json = serde_json::to_value(&trade).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "symbol": "BTC/USD",
                "price": "50000.1",
                "volume": "0.002",
                "timestamp": "2024-01-01T00:00:00Z"
            })
        );
    }

    #[test]
    fn test_preserves_trailing_zeros() {
        let trade = Trade::new(
            "ETH/USD",
            Decimal::from_str("3200.50").unwrap(),
            Decimal::from_str("1.000").unwrap(),
            "1704067200",
        )
        .unwrap();
        assert_eq!(trade.price().to_string(), "3200.50");
        assert_eq!(trade.volume().to_string(), "1.000");
    }

    #[test]
    fn test_rejects_empty_symbol_and_timestamp() {
        let one = Decimal::ONE;
        assert_eq!(
            Trade::new("", one, one, "2024-01-01T00:00:00Z"),
            Err(MalformedEntry::EmptyField("symbol"))
        );
        assert_eq!(
            Trade::new("BTC/USD", one, one, " "),
            Err(MalformedEntry::EmptyField("timestamp"))
        );
    }

    #[test]
    fn test_key_is_symbol() {
        let trade = Trade::new("XRP/EUR", Decimal::ONE, Decimal::ONE, "t").unwrap();
        assert_eq!(trade.key(), "XRP/EUR");
    }
}
