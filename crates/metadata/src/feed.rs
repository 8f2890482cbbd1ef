use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::MetadataError;

/// Kraken v2 public WebSocket URL
pub const KRAKEN_WS_URL: &str = "wss://ws.kraken.com/v2";

/// Reply frames Kraken sends after each subscribe request before any data
pub const DEFAULT_ACK_FRAMES: usize = 2;
/// Upper bound for the acknowledgment window
pub const MAX_ACK_FRAMES: usize = 16;
/// Default time allowed to fill the acknowledgment window
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 10_000;
/// Default WebSocket handshake timeout
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
/// Default read timeout; Kraken heartbeats every second so this only trips on a dead feed
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 120_000;

/// Exchange feed settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    #[serde(default = "default_url")]
    pub url: String,
    /// Symbol to subscribe to (e.g. "BTC/USD"). Absent or empty means discover all symbols.
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default = "default_ack_frames")]
    pub ack_frames: usize,
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_url() -> String {
    KRAKEN_WS_URL.to_string()
}

fn default_ack_frames() -> usize {
    DEFAULT_ACK_FRAMES
}

fn default_ack_timeout_ms() -> u64 {
    DEFAULT_ACK_TIMEOUT_MS
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_read_timeout_ms() -> u64 {
    DEFAULT_READ_TIMEOUT_MS
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            symbol: None,
            ack_frames: default_ack_frames(),
            ack_timeout_ms: default_ack_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl FeedConfig {
    /// Configured symbol, treating an empty or blank value as "discover all".
    pub fn target_symbol(&self) -> Option<&str> {
        self.symbol
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Validate the URL and clamp `ack_frames` into range.
    /// Returns a tuple of (validated_config, was_clamped).
    pub fn validated(mut self) -> Result<(Self, bool), MetadataError> {
        let url = Url::parse(&self.url)
            .map_err(|e| MetadataError::Validation(format!("feed.url {}: {}", self.url, e)))?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(MetadataError::Validation(format!(
                "feed.url must be ws:// or wss://, got {}",
                self.url
            )));
        }

        let mut clamped = false;
        if self.ack_frames > MAX_ACK_FRAMES {
            self.ack_frames = MAX_ACK_FRAMES;
            clamped = true;
        }
        Ok((self, clamped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let feed = FeedConfig::default();
        assert_eq!(feed.url, KRAKEN_WS_URL);
        assert_eq!(feed.ack_frames, 2);
        assert!(feed.target_symbol().is_none());
    }

    #[test]
    fn test_blank_symbol_means_discovery() {
        let feed = FeedConfig {
            symbol: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(feed.target_symbol().is_none());

        let feed = FeedConfig {
            symbol: Some(" ETH/USD ".to_string()),
            ..Default::default()
        };
        assert_eq!(feed.target_symbol(), Some("ETH/USD"));
    }

    #[test]
    fn test_rejects_http_url() {
        let feed = FeedConfig {
            url: "https://ws.kraken.com/v2".to_string(),
            ..Default::default()
        };
        assert!(matches!(feed.validated(), Err(MetadataError::Validation(_))));
    }

    #[test]
    fn test_clamps_ack_frames() {
        let feed = FeedConfig {
            ack_frames: 100,
            ..Default::default()
        };
        let (validated, clamped) = feed.validated().unwrap();
        assert_eq!(validated.ack_frames, MAX_ACK_FRAMES);
        assert!(clamped);
    }
}
