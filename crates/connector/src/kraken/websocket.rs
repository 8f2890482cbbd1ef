//! Kraken v2 WebSocket client
//!
//! Opens the public v2 WebSocket (no authentication for the trade and
//! instrument channels) and exposes it as a [`Connection`]. The manager never
//! retries; the runner owns reconnect policy.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, trace, warn};

use crate::error::{ConnectError, ConnectionError};
use crate::kraken::messages::ping_request;
use crate::traits::{Connection, ConnectionManager, ConnectionState};
use trade_producer_metadata::FeedConfig;

/// Opens Kraken v2 WebSocket connections
#[derive(Debug, Clone)]
pub struct KrakenConnectionManager {
    url: String,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl KrakenConnectionManager {
    pub fn new(url: impl Into<String>, connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
            read_timeout,
        }
    }

    pub fn from_config(feed: &FeedConfig) -> Self {
        Self::new(
            feed.url.clone(),
            Duration::from_millis(feed.connect_timeout_ms),
            Duration::from_millis(feed.read_timeout_ms),
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ConnectionManager for KrakenConnectionManager {
    type Conn = KrakenWebSocket;

    async fn open(&self) -> Result<KrakenWebSocket, ConnectError> {
        info!(url = %self.url, "Connecting to Kraken WebSocket v2");

        let request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ConnectError::InvalidUrl {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;

        let (ws, response) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| ConnectError::Timeout(self.connect_timeout.as_millis() as u64))??;

        info!(status = ?response.status(), "Kraken WebSocket connected");

        Ok(KrakenWebSocket {
            ws,
            state: ConnectionState::Open,
            read_timeout: self.read_timeout,
        })
    }
}

/// An open Kraken v2 WebSocket
pub struct KrakenWebSocket {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    state: ConnectionState,
    read_timeout: Duration,
}

impl KrakenWebSocket {
    fn fail(&mut self, err: ConnectionError) -> ConnectionError {
        self.state = ConnectionState::Failing;
        err
    }

    fn ensure_open(&self) -> Result<(), ConnectionError> {
        if self.state == ConnectionState::Open {
            Ok(())
        } else {
            Err(ConnectionError::NotOpen)
        }
    }
}

#[async_trait]
impl Connection for KrakenWebSocket {
    async fn send(&mut self, text: String) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        debug!(cmd = %text, "Sending Kraken command");
        if let Err(e) = self.ws.send(Message::Text(text)).await {
            return Err(self.fail(e.into()));
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<String, ConnectionError> {
        self.ensure_open()?;
        loop {
            let recv_result = tokio::time::timeout(self.read_timeout, self.ws.next()).await;

            match recv_result {
                Err(_) => {
                    let timeout_ms = self.read_timeout.as_millis() as u64;
                    warn!(timeout_ms, "Kraken WebSocket read timeout");
                    return Err(self.fail(ConnectionError::ReadTimeout(timeout_ms)));
                }
                Ok(Some(Ok(Message::Text(text)))) => {
                    trace!(msg = %text, "Received Kraken message");
                    return Ok(text);
                }
                Ok(Some(Ok(Message::Ping(data)))) => {
                    trace!("Received WS ping, sending pong");
                    if let Err(e) = self.ws.send(Message::Pong(data)).await {
                        return Err(self.fail(e.into()));
                    }
                }
                Ok(Some(Ok(Message::Close(frame)))) => {
                    info!(frame = ?frame, "Kraken WebSocket closed by server");
                    return Err(self.fail(ConnectionError::Closed));
                }
                Ok(Some(Ok(_))) => continue,
                Ok(Some(Err(e))) => return Err(self.fail(e.into())),
                Ok(None) => return Err(self.fail(ConnectionError::Closed)),
            }
        }
    }

    /// Kraken v2 uses `{"method":"ping"}` for application-level keepalive
    async fn keepalive(&mut self) -> Result<(), ConnectionError> {
        trace!("Sending Kraken app-level ping");
        self.send(ping_request()).await
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    async fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        if self.state == ConnectionState::Open {
            if let Err(e) = self.ws.close(None).await {
                debug!(error = %e, "Error closing Kraken WebSocket");
            }
        }
        self.state = ConnectionState::Closed;
        info!("Kraken WebSocket closed");
    }
}
