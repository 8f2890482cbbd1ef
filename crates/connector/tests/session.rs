//! Session supervisor tests against scripted connections

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use trade_producer_lib::{
    Connection, ConnectionError, ConnectionManager, ConnectionState, ConnectError, NatsTradePublisher,
    PublishError, Runner, RunnerError, Trade, TradePublisher, TRADE_KEY_HEADER,
};
use trade_producer_metadata::Environment;
use trade_producer_middleware::{InMemoryTransport, Subscription as _, Transport};

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Sent { session: usize, text: String },
    Published { key: String, trade: Trade },
}

type Log = Arc<Mutex<Vec<Event>>>;
type Script = Vec<Result<String, ConnectionError>>;

struct ScriptedConnection {
    session: usize,
    script: VecDeque<Result<String, ConnectionError>>,
    log: Log,
    state: ConnectionState,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn send(&mut self, text: String) -> Result<(), ConnectionError> {
        self.log.lock().unwrap().push(Event::Sent {
            session: self.session,
            text,
        });
        Ok(())
    }

    async fn recv(&mut self) -> Result<String, ConnectionError> {
        match self.script.pop_front() {
            Some(Err(e)) => {
                self.state = ConnectionState::Failing;
                Err(e)
            }
            Some(frame) => frame,
            None => std::future::pending().await,
        }
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    async fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }
}

/// Hands out one script per opened connection; idle connections after that
struct ScriptedManager {
    scripts: Mutex<VecDeque<Script>>,
    opened: Mutex<usize>,
    log: Log,
}

impl ScriptedManager {
    fn new(scripts: Vec<Script>, log: Log) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            opened: Mutex::new(0),
            log,
        }
    }
}

#[async_trait]
impl ConnectionManager for ScriptedManager {
    type Conn = ScriptedConnection;

    async fn open(&self) -> Result<ScriptedConnection, ConnectError> {
        let session = {
            let mut opened = self.opened.lock().unwrap();
            *opened += 1;
            *opened
        };
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
        Ok(ScriptedConnection {
            session,
            script: script.into(),
            log: Arc::clone(&self.log),
            state: ConnectionState::Open,
        })
    }
}

struct RecordingPublisher {
    log: Log,
}

#[async_trait]
impl TradePublisher for RecordingPublisher {
    async fn publish(&self, key: &str, trade: &Trade) -> Result<(), PublishError> {
        self.log.lock().unwrap().push(Event::Published {
            key: key.to_string(),
            trade: trade.clone(),
        });
        Ok(())
    }
}

fn frame(s: &str) -> Result<String, ConnectionError> {
    Ok(s.to_string())
}

fn acks(n: usize) -> Vec<Result<String, ConnectionError>> {
    (0..n)
        .map(|_| frame(r#"{"method":"subscribe","success":true}"#))
        .collect()
}

fn test_env(name: &str, symbol: Option<&str>) -> Environment {
    let mut env = Environment::default();
    env.name = name.to_string();
    env.feed.symbol = symbol.map(str::to_string);
    env.feed.ack_frames = 2;
    env.feed.ack_timeout_ms = 500;
    env.reconnect.initial_delay_ms = 1;
    env.reconnect.max_delay_ms = 5;
    env
}

fn published(log: &Log) -> Vec<(String, Trade)> {
    log.lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            Event::Published { key, trade } => Some((key.clone(), trade.clone())),
            _ => None,
        })
        .collect()
}

fn sent(log: &Log, session: usize) -> Vec<String> {
    log.lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            Event::Sent { session: s, text } if *s == session => Some(text.clone()),
            _ => None,
        })
        .collect()
}

async fn wait_for(log: &Log, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while published(log).len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for publishes");
}

const INSTRUMENTS: &str = r#"{"channel":"instrument","type":"snapshot","data":{"pairs":[{"symbol":"BTC/USD","status":"online"},{"symbol":"ETH/USD","status":"online"}]}}"#;

#[tokio::test]
async fn test_reconnect_resubscribes_before_new_trades() {
    let log: Log = Arc::default();

    let mut first = vec![frame(r#"{"channel":"status","type":"update"}"#), frame(r#"{"method":"subscribe"}"#), frame(INSTRUMENTS)];
    first.extend(acks(4));
    first.push(frame(r#"{"channel":"trade","data":[{"symbol":"BTC/USD","price":"1","qty":"1","timestamp":"t1"},{"symbol":"ETH/USD","price":"10","qty":"1","timestamp":"t1"}]}"#));
    first.push(Err(ConnectionError::Closed));

    let mut second = acks(4);
    second.push(frame(r#"{"channel":"trade","data":[{"symbol":"BTC/USD","price":"2","qty":"1","timestamp":"t2"},{"symbol":"ETH/USD","price":"20","qty":"1","timestamp":"t2"}]}"#));

    let manager = ScriptedManager::new(vec![first, second], Arc::clone(&log));
    let publisher = Arc::new(RecordingPublisher { log: Arc::clone(&log) });
    let mut runner = Runner::new(&test_env("session-reconnect", None), manager, publisher);
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move { runner.run(rx).await });

    wait_for(&log, 4).await;
    tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    let first_sent = sent(&log, 1);
    assert_eq!(first_sent.len(), 3);
    assert!(first_sent[0].contains(r#""channel":"instrument""#));

    // Symbol set is replayed, not rediscovered
    let second_sent = sent(&log, 2);
    assert_eq!(second_sent.len(), 2);
    assert_eq!(second_sent.iter().filter(|s| s.contains(r#"["BTC/USD"]"#)).count(), 1);
    assert_eq!(second_sent.iter().filter(|s| s.contains(r#"["ETH/USD"]"#)).count(), 1);
    assert!(second_sent.iter().all(|s| s.contains(r#""channel":"trade""#)));

    let events = log.lock().unwrap().clone();
    let last_resubscribe = events
        .iter()
        .rposition(|e| matches!(e, Event::Sent { session: 2, .. }))
        .unwrap();
    let first_new_trade = events
        .iter()
        .position(|e| matches!(e, Event::Published { trade, .. } if trade.timestamp() == "t2"))
        .unwrap();
    assert!(last_resubscribe < first_new_trade);
}

#[tokio::test]
async fn test_discovery_with_no_symbols_publishes_nothing() {
    let log: Log = Arc::default();
    let script = vec![
        frame(r#"{"channel":"status"}"#),
        frame(r#"{"method":"subscribe"}"#),
        frame(r#"{"channel":"instrument","type":"snapshot","data":{"pairs":[]}}"#),
        frame(r#"{"channel":"heartbeat"}"#),
    ];
    let manager = ScriptedManager::new(vec![script], Arc::clone(&log));
    let publisher = Arc::new(RecordingPublisher { log: Arc::clone(&log) });
    let mut runner = Runner::new(&test_env("session-empty", None), manager, publisher);
    let connected = runner.connected_handle();
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move { runner.run(rx).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(connected.load(std::sync::atomic::Ordering::SeqCst));
    tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    assert!(published(&log).is_empty());
    assert_eq!(sent(&log, 1).len(), 1);
    assert!(!connected.load(std::sync::atomic::Ordering::SeqCst));
}

#[tokio::test]
async fn test_single_symbol_trade_published_with_symbol_key() {
    let log: Log = Arc::default();
    let mut script = acks(2);
    script.push(frame(
        r#"{"data":[{"price":"50000.1","qty":"0.002","timestamp":"2024-01-01T00:00:00Z"}]}"#,
    ));
    let manager = ScriptedManager::new(vec![script], Arc::clone(&log));
    let publisher = Arc::new(RecordingPublisher { log: Arc::clone(&log) });
    let mut runner = Runner::new(&test_env("session-single", Some("BTC/USD")), manager, publisher);
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move { runner.run(rx).await });

    wait_for(&log, 1).await;
    tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    let sent = sent(&log, 1);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains(r#""symbol":["BTC/USD"]"#));

    let published = published(&log);
    assert_eq!(published.len(), 1);
    let (key, trade) = &published[0];
    assert_eq!(key, "BTC/USD");
    assert_eq!(trade.symbol(), "BTC/USD");
    assert_eq!(trade.price().to_string(), "50000.1");
    assert_eq!(trade.volume().to_string(), "0.002");
    assert_eq!(trade.timestamp(), "2024-01-01T00:00:00Z");
}

#[tokio::test]
async fn test_invalid_instrument_list_is_fatal() {
    let log: Log = Arc::default();
    let script = vec![
        frame(r#"{"channel":"status"}"#),
        frame(r#"{"method":"subscribe"}"#),
        frame(r#"{"error":"Currency pair not supported"}"#),
    ];
    let manager = ScriptedManager::new(vec![script], Arc::clone(&log));
    let publisher = Arc::new(RecordingPublisher { log: Arc::clone(&log) });
    let mut runner = Runner::new(&test_env("session-bad-list", None), manager, publisher);
    let (_tx, rx) = watch::channel(false);

    let result = runner.run(rx).await;
    assert!(matches!(result, Err(RunnerError::Discovery(_))));
    assert!(!runner.is_connected());
}

#[tokio::test]
async fn test_trades_reach_transport_by_subject() {
    let log: Log = Arc::default();
    let mut script = acks(2);
    script.push(frame(r#"{"channel":"heartbeat"}"#));
    script.push(frame(
        r#"{"channel":"trade","type":"update","data":[{"symbol":"BTC/USD","side":"buy","price":50000.1,"qty":0.5,"ord_type":"market","trade_id":1,"timestamp":"2024-01-01T00:00:00.000001Z"}]}"#,
    ));

    let transport = Arc::new(InMemoryTransport::new());
    let mut subscription = transport.subscribe("trade.BTC-USD").await.unwrap();
    let publisher = Arc::new(NatsTradePublisher::new(transport.clone(), "trade"));

    let manager = ScriptedManager::new(vec![script], Arc::clone(&log));
    let mut runner = Runner::new(&test_env("session-transport", Some("BTC/USD")), manager, publisher);
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move { runner.run(rx).await });

    let msg = tokio::time::timeout(Duration::from_secs(5), subscription.next())
        .await
        .unwrap()
        .unwrap();
    tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    assert_eq!(msg.subject, "trade.BTC-USD");
    assert_eq!(msg.headers.get(TRADE_KEY_HEADER).map(String::as_str), Some("BTC/USD"));
    let body: serde_json::Value = serde_json::from_slice(&msg.payload).unwrap();
    assert_eq!(body["symbol"], "BTC/USD");
    assert_eq!(body["price"], "50000.1");
    assert_eq!(body["volume"], "0.5");
    assert_eq!(transport.published_count(), 1);
}
