//! Broker WebSocket stream with auto-reconnect.
//!
//! Connects to the telemetry broker and streams parsed events through a
//! [`tokio::sync::broadcast`] channel. The broker speaks Socket.IO over a
//! raw WebSocket; brokers that send plain `{"event": .., "data": ..}`
//! JSON frames are understood too. Reconnection uses exponential backoff
//! with jitter, and the connection state is observable through a
//! [`tokio::sync::watch`] channel.
//!
//! # Example
//!
//! ```rust,ignore
//! use chairlink_api::websocket::{StreamHandle, ReconnectConfig};
//! use tokio_util::sync::CancellationToken;
//! use url::Url;
//!
//! let cancel = CancellationToken::new();
//! let url = Url::parse("ws://broker.example.com:8080/socket.io/?EIO=4&transport=websocket")?;
//!
//! let handle = StreamHandle::connect(url, ReconnectConfig::default(), cancel.clone(), None);
//! let mut rx = handle.subscribe();
//!
//! while let Ok(event) = rx.recv().await {
//!     println!("{}: {}", event.name, event.payload);
//! }
//!
//! handle.close().await;
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;

// ── Broadcast channel capacity ───────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ── BrokerEvent ──────────────────────────────────────────────────────

/// One named event pushed by the broker.
///
/// The payload is kept as raw JSON; field names are not canonical at
/// this layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerEvent {
    /// Event name, e.g. `"status_update"` or `"new_alarm"`.
    pub name: String,

    /// Event payload exactly as the broker sent it.
    pub payload: Value,

    /// Local receive time.
    pub received_at: DateTime<Utc>,
}

impl BrokerEvent {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
            received_at: Utc::now(),
        }
    }
}

// ── StreamState ──────────────────────────────────────────────────────

/// Connection state of the broker stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for WebSocket reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

// ── StreamHandle ─────────────────────────────────────────────────────

/// Handle to a running broker stream.
///
/// Owns the background task. [`close`](Self::close) cancels it and waits
/// for it to finish, so no event is broadcast after `close` returns.
pub struct StreamHandle {
    event_rx: broadcast::Receiver<Arc<BrokerEvent>>,
    state_rx: watch::Receiver<StreamState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl StreamHandle {
    /// Spawn the connection loop and return immediately.
    ///
    /// The first connection attempt happens asynchronously. Must be called
    /// from within a Tokio runtime.
    pub fn connect(
        url: Url,
        reconnect: ReconnectConfig,
        cancel: CancellationToken,
        token: Option<SecretString>,
    ) -> Self {
        let (event_tx, event_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(StreamState::Disconnected);

        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            ws_loop(url, event_tx, state_tx, reconnect, task_cancel, token).await;
        });

        Self {
            event_rx,
            state_rx,
            cancel,
            task,
        }
    }

    /// Get a new broadcast receiver for the event stream.
    ///
    /// If a consumer falls behind, it receives
    /// [`broadcast::error::RecvError::Lagged`].
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<BrokerEvent>> {
        self.event_rx.resubscribe()
    }

    /// Observe connection state transitions.
    pub fn state(&self) -> watch::Receiver<StreamState> {
        self.state_rx.clone()
    }

    /// Signal the background task to stop without waiting for it.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Stop the background task and wait for it to exit.
    pub async fn close(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "broker stream task ended abnormally");
        }
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect → read → backoff → reconnect.
async fn ws_loop(
    url: Url,
    event_tx: broadcast::Sender<Arc<BrokerEvent>>,
    state_tx: watch::Sender<StreamState>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
    token: Option<SecretString>,
) {
    let mut attempt: u32 = 0;

    loop {
        let _ = state_tx.send(StreamState::Connecting);

        let mut link = LinkStats::default();
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = connect_and_read(&url, &event_tx, &state_tx, &cancel, token.as_ref(), &mut link) => result,
        };

        if cancel.is_cancelled() {
            break;
        }

        // Only a connection that did real work clears the backoff.
        if link.was_healthy() {
            attempt = 0;
        }

        match result {
            Ok(()) => tracing::info!(attempt, "broker stream disconnected cleanly"),
            Err(e) => tracing::warn!(error = %e, attempt, "broker stream error"),
        }

        if let Some(max) = reconnect.max_retries {
            if attempt >= max {
                tracing::error!(
                    max_retries = max,
                    "broker reconnection limit reached, giving up"
                );
                break;
            }
        }

        let _ = state_tx.send(StreamState::Reconnecting { attempt });
        let delay = calculate_backoff(attempt, &reconnect);
        tracing::info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt,
            "waiting before reconnect"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }

        attempt = attempt.saturating_add(1);
    }

    let _ = state_tx.send(StreamState::Disconnected);
    tracing::debug!("broker stream loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

/// A connection that stays up this long counts as healthy even if the
/// broker had nothing to say.
const STABLE_CONNECTION: Duration = Duration::from_secs(30);

/// What one connection achieved before it ended.
#[derive(Debug, Default)]
struct LinkStats {
    connected_at: Option<Instant>,
    events: u64,
}

impl LinkStats {
    fn was_healthy(&self) -> bool {
        self.events > 0
            || self
                .connected_at
                .is_some_and(|at| at.elapsed() >= STABLE_CONNECTION)
    }
}

/// Establish a single WebSocket connection, read frames until it drops.
async fn connect_and_read(
    url: &Url,
    event_tx: &broadcast::Sender<Arc<BrokerEvent>>,
    state_tx: &watch::Sender<StreamState>,
    cancel: &CancellationToken,
    token: Option<&SecretString>,
    link: &mut LinkStats,
) -> Result<(), Error> {
    tracing::info!(url = %url, "connecting to broker");

    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

    let mut request = ClientRequestBuilder::new(uri);
    if let Some(token) = token {
        request = request.with_header("Authorization", format!("Bearer {}", token.expose_secret()));
    }

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    tracing::info!("broker connected");
    link.connected_at = Some(Instant::now());
    let _ = state_tx.send(StreamState::Connected);

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = write.send(tungstenite::Message::Close(None)).await;
                return Ok(());
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        match parse_frame(&text) {
                            Frame::Event(event) => {
                                tracing::trace!(name = %event.name, "broker event");
                                link.events += 1;
                                // No subscribers right now is fine.
                                let _ = event_tx.send(Arc::new(event));
                            }
                            Frame::Open => {
                                send_text(&mut write, SOCKET_IO_CONNECT).await?;
                            }
                            Frame::Ping => {
                                send_text(&mut write, ENGINE_IO_PONG).await?;
                            }
                            Frame::Disconnect => {
                                tracing::info!("broker namespace disconnect");
                                return Ok(());
                            }
                            Frame::ConnectError(reason) => {
                                return Err(Error::WebSocketConnect(reason));
                            }
                            Frame::Ignored => {}
                        }
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tungstenite queues the pong reply automatically
                        tracing::trace!("broker ping");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            tracing::info!(
                                code = %cf.code,
                                reason = %cf.reason,
                                "broker close frame received"
                            );
                        } else {
                            tracing::info!("broker close frame received (no payload)");
                        }
                        return Ok(());
                    }
                    Some(Err(e)) => {
                        return Err(Error::WebSocketConnect(e.to_string()));
                    }
                    None => {
                        tracing::info!("broker stream ended");
                        return Ok(());
                    }
                    _ => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    }
}

async fn send_text<S>(write: &mut S, text: &'static str) -> Result<(), Error>
where
    S: futures_util::Sink<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    write
        .send(tungstenite::Message::text(text.to_owned()))
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))
}

// ── Frame parsing ────────────────────────────────────────────────────

/// Socket.IO namespace connect, sent after the Engine.IO open packet.
const SOCKET_IO_CONNECT: &str = "40";

/// Engine.IO pong, the reply to a server heartbeat.
const ENGINE_IO_PONG: &str = "3";

/// What a single text frame asks of the connection.
#[derive(Debug)]
enum Frame {
    /// Engine.IO handshake; reply with a namespace connect.
    Open,
    /// Engine.IO heartbeat; reply with a pong.
    Ping,
    /// Server closed the namespace.
    Disconnect,
    /// Server refused the namespace connect.
    ConnectError(String),
    /// An application event.
    Event(BrokerEvent),
    /// Acks, pongs, connect confirmations, and anything unparseable.
    Ignored,
}

fn parse_frame(text: &str) -> Frame {
    let text = text.trim();
    match text.as_bytes().first() {
        Some(b'{') => parse_json_envelope(text),
        Some(b'[') => parse_event_array(text),
        Some(b'0') => Frame::Open,
        Some(b'2') => Frame::Ping,
        Some(b'4') => parse_socket_io_packet(&text[1..]),
        _ => Frame::Ignored,
    }
}

/// Parse the Socket.IO packet inside an Engine.IO message (`4...`).
fn parse_socket_io_packet(packet: &str) -> Frame {
    match packet.as_bytes().first() {
        Some(b'1') => Frame::Disconnect,
        Some(b'2') => parse_event_array(strip_namespace_and_ack(&packet[1..])),
        Some(b'4') => {
            let reason = serde_json::from_str::<Value>(&packet[1..])
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(String::from))
                .unwrap_or_else(|| "namespace connect refused".into());
            Frame::ConnectError(reason)
        }
        _ => Frame::Ignored,
    }
}

/// Drop an optional `/namespace,` prefix and ack id before the JSON array.
fn strip_namespace_and_ack(body: &str) -> &str {
    let body = if body.starts_with('/') {
        body.split_once(',').map_or("", |(_, rest)| rest)
    } else {
        body
    };
    body.trim_start_matches(|c: char| c.is_ascii_digit())
}

/// `["name", payload, ...]`
fn parse_event_array(text: &str) -> Frame {
    let items: Vec<Value> = match serde_json::from_str(text) {
        Ok(items) => items,
        Err(e) => {
            tracing::debug!(error = %e, "failed to parse broker event array");
            return Frame::Ignored;
        }
    };

    let mut items = items.into_iter();
    let Some(Value::String(name)) = items.next() else {
        tracing::debug!("broker event array without a name");
        return Frame::Ignored;
    };

    let rest: Vec<Value> = items.collect();
    let payload = match rest.len() {
        0 => Value::Null,
        1 => rest.into_iter().next().unwrap_or(Value::Null),
        _ => Value::Array(rest),
    };

    Frame::Event(BrokerEvent::new(name, payload))
}

/// `{"event": "name", "data": payload}`, also accepting `type` / `payload`.
fn parse_json_envelope(text: &str) -> Frame {
    let mut obj = match serde_json::from_str::<serde_json::Map<String, Value>>(text) {
        Ok(obj) => obj,
        Err(e) => {
            tracing::debug!(error = %e, "failed to parse broker envelope");
            return Frame::Ignored;
        }
    };

    let name = ["event", "type"]
        .iter()
        .find_map(|key| match obj.remove(*key) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        });
    let Some(name) = name else {
        tracing::debug!("broker envelope without an event name");
        return Frame::Ignored;
    };

    let payload = ["data", "payload"]
        .iter()
        .find_map(|key| obj.remove(*key))
        .unwrap_or(Value::Object(obj));

    Frame::Event(BrokerEvent::new(name, payload))
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(min(initial * 2^attempt, max) * jitter, max)`
///
/// Jitter is +-25% to spread out reconnection storms from many clients.
#[allow(clippy::cast_precision_loss, clippy::as_conversions)]
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt.min(16)).unwrap_or(16);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let max = config.max_delay.as_secs_f64();
    let capped = base.min(max);

    // Deterministic "jitter" seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).clamp(0.0, max);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn expect_event(frame: Frame) -> BrokerEvent {
        match frame {
            Frame::Event(event) => event,
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn default_reconnect_config() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!(config.max_retries.is_none());
    }

    #[test]
    fn backoff_increases_exponentially() {
        let config = ReconnectConfig::default();

        let d0 = calculate_backoff(0, &config);
        let d1 = calculate_backoff(1, &config);
        let d2 = calculate_backoff(2, &config);

        assert!(d1 > d0, "d1 ({d1:?}) should be greater than d0 ({d0:?})");
        assert!(d2 > d1, "d2 ({d2:?}) should be greater than d1 ({d1:?})");
    }

    #[test]
    fn backoff_never_exceeds_max_delay() {
        let config = ReconnectConfig::default();
        for attempt in 0..64 {
            let d = calculate_backoff(attempt, &config);
            assert!(d <= config.max_delay, "attempt {attempt}: {d:?}");
        }
    }

    #[test]
    fn socket_io_event_frame() {
        let event = expect_event(parse_frame(
            r#"42["status_update",{"deviceId":"a","battery":50}]"#,
        ));
        assert_eq!(event.name, "status_update");
        assert_eq!(event.payload["deviceId"], "a");
        assert_eq!(event.payload["battery"], 50);
    }

    #[test]
    fn socket_io_event_with_namespace_and_ack() {
        let event = expect_event(parse_frame(r#"42/fleet,17["new_alarm",{"id":9}]"#));
        assert_eq!(event.name, "new_alarm");
        assert_eq!(event.payload["id"], 9);
    }

    #[test]
    fn socket_io_event_with_several_args() {
        let event = expect_event(parse_frame(r#"42["status_update","dev-1",{"speed":1.5}]"#));
        assert_eq!(event.payload, json!(["dev-1", {"speed": 1.5}]));
    }

    #[test]
    fn plain_json_envelope() {
        let event = expect_event(parse_frame(
            r#"{"event":"alarm_created","data":{"id":"x","type":"FALL"}}"#,
        ));
        assert_eq!(event.name, "alarm_created");
        assert_eq!(event.payload["type"], "FALL");
    }

    #[test]
    fn plain_json_envelope_without_data_keeps_remaining_fields() {
        let event = expect_event(parse_frame(r#"{"type":"status_update","deviceId":"a"}"#));
        assert_eq!(event.name, "status_update");
        assert_eq!(event.payload, json!({"deviceId": "a"}));
    }

    #[test]
    fn engine_io_control_frames() {
        assert!(matches!(parse_frame(r#"0{"sid":"abc","pingInterval":25000}"#), Frame::Open));
        assert!(matches!(parse_frame("2"), Frame::Ping));
        assert!(matches!(parse_frame("3"), Frame::Ignored));
        assert!(matches!(parse_frame(r#"40{"sid":"xyz"}"#), Frame::Ignored));
        assert!(matches!(parse_frame("41"), Frame::Disconnect));
    }

    #[test]
    fn connect_error_carries_message() {
        match parse_frame(r#"44{"message":"unauthorized"}"#) {
            Frame::ConnectError(reason) => assert_eq!(reason, "unauthorized"),
            other => panic!("expected connect error, got {other:?}"),
        }
    }

    #[test]
    fn malformed_frames_are_ignored() {
        assert!(matches!(parse_frame("not json at all"), Frame::Ignored));
        assert!(matches!(parse_frame("42[not json"), Frame::Ignored));
        assert!(matches!(parse_frame("[42]"), Frame::Ignored));
        assert!(matches!(parse_frame(r#"{"data":{}}"#), Frame::Ignored));
        assert!(matches!(parse_frame(""), Frame::Ignored));
    }

    #[test]
    fn short_silent_connection_is_not_healthy() {
        let fresh = LinkStats {
            connected_at: Some(Instant::now()),
            events: 0,
        };
        assert!(!fresh.was_healthy());
        assert!(!LinkStats::default().was_healthy());

        let chatty = LinkStats {
            connected_at: Some(Instant::now()),
            events: 1,
        };
        assert!(chatty.was_healthy());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn broker_that_drops_after_handshake_is_backed_off() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));

        let server_count = Arc::clone(&accepted);
        let server = tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                server_count.fetch_add(1, Ordering::SeqCst);
                if let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await {
                    let _ = ws.send(tungstenite::Message::text("41")).await;
                    let _ = ws.close(None).await;
                }
            }
        });

        let cancel = CancellationToken::new();
        let url = Url::parse(&format!("ws://{addr}/socket.io/")).unwrap();
        let config = ReconnectConfig {
            initial_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(5),
            max_retries: None,
        };
        let handle = StreamHandle::connect(url, config, cancel, None);

        // First connect is immediate, the second waits ~300ms, the third
        // ~740ms more. A tight loop would rack up hundreds here.
        tokio::time::sleep(Duration::from_millis(600)).await;
        handle.close().await;
        server.abort();

        let n = accepted.load(Ordering::SeqCst);
        assert!((1..=2).contains(&n), "accepted {n} connections");
    }

    #[tokio::test]
    async fn close_stops_loop_and_reports_disconnected() {
        let cancel = CancellationToken::new();
        // Port 9 (discard) on localhost: connection is refused quickly.
        let url = Url::parse("ws://127.0.0.1:9/socket.io/").unwrap();
        let config = ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
            max_retries: None,
        };

        let handle = StreamHandle::connect(url, config, cancel.clone(), None);
        let state = handle.state();
        handle.close().await;

        assert!(cancel.is_cancelled());
        assert_eq!(*state.borrow(), StreamState::Disconnected);
    }
}
