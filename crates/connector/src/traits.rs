use async_trait::async_trait;

use crate::error::{ConnectError, ConnectionError, PublishError};
use crate::trade::Trade;

/// Lifecycle of a streaming connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Open,
    Failing,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Closed => "closed",
            ConnectionState::Open => "open",
            ConnectionState::Failing => "failing",
        }
    }
}

/// Duplex text-message connection to the exchange.
///
/// Single reader: only the active session holds it.
#[async_trait]
pub trait Connection: Send {
    /// Send one whole text message
    async fn send(&mut self, text: String) -> Result<(), ConnectionError>;

    /// Wait for the next text frame. An error means the connection is gone.
    async fn recv(&mut self) -> Result<String, ConnectionError>;

    /// Application-level keepalive, if the exchange has one
    async fn keepalive(&mut self) -> Result<(), ConnectionError> {
        Ok(())
    }

    fn state(&self) -> ConnectionState;

    /// Close the connection. Never fails; errors are logged.
    async fn close(&mut self);
}

/// Opens connections. Never retries; retry policy belongs to the caller.
#[async_trait]
pub trait ConnectionManager: Send + Sync {
    type Conn: Connection + 'static;

    async fn open(&self) -> Result<Self::Conn, ConnectError>;

    fn is_healthy(&self, conn: &Self::Conn) -> bool {
        conn.state() == ConnectionState::Open
    }

    async fn close(&self, conn: &mut Self::Conn) {
        conn.close().await
    }
}

/// Broker capability: publish one trade under a partition key
#[async_trait]
pub trait TradePublisher: Send + Sync {
    async fn publish(&self, key: &str, trade: &Trade) -> Result<(), PublishError>;
}
