use thiserror::Error;

/// Opening a connection failed. Fatal to the current attempt only.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connect timed out after {0} ms")]
    Timeout(u64),
}

/// An open connection is gone. Distinct from "no frame yet", which is
/// simply a pending receive.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("connection closed")]
    Closed,
    #[error("no frame received for {0} ms")]
    ReadTimeout(u64),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connection is not open")]
    NotOpen,
}

/// The instrument list could not be obtained. Fatal to startup.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("connection lost during discovery: {0}")]
    Connection(#[from] ConnectionError),
    #[error("timed out waiting for instrument list")]
    Timeout,
    #[error("invalid instrument list: {0}")]
    InvalidList(String),
}

/// Publishing one trade failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PublishError {
    /// Broker hiccup; retry this trade.
    #[error("transient publish failure: {0}")]
    Transient(String),
    /// This trade can never be published (bad key, unserializable). Logged and dropped.
    #[error("trade rejected: {0}")]
    Rejected(String),
    /// Broker unusable or retry budget exhausted; tear the session down.
    #[error("fatal publish failure: {0}")]
    Fatal(String),
}

/// Why the supervisor gave up.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("symbol discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),
    #[error("giving up after {0} reconnect attempts")]
    ReconnectExhausted(u32),
}
