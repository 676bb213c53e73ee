//! MEXC streaming client.
//!
//! Connection lifecycle is an explicit state machine published on a watch
//! channel:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Reconnecting -> Connecting -> ...
//!                                    \______________ shutdown ______________/-> Disconnected
//! ```
//!
//! After a successful `connect()` a background worker owns the socket. Any
//! read failure tears the socket down, waits `reconnect_backoff` and dials
//! again, forever. Every wait observes the shutdown token, so `disconnect()`
//! never sits out a backoff.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use corelib::{PriceUpdate, TradeEvent};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, instrument, trace, warn};

use super::errors::ConnectionError;
use super::parser::{DEALS_CHANNEL, Frame, TICKER_CHANNEL, parse_frame};
use super::types::WsRequest;
use crate::dispatch::EventDispatcher;
use crate::metrics::SourceCounters;

pub const DEFAULT_WS_URL: &str = "wss://wbs.mexc.com/ws";

/// MEXC accepts at most this many channels per subscription request.
const MAX_PARAMS_PER_REQUEST: usize = 30;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub ws_url: String,
    pub symbols: Vec<String>,
    pub reconnect_backoff: Duration,
    pub connect_timeout: Duration,
    pub ping_interval: Duration,
}

impl StreamConfig {
    pub fn new(ws_url: impl Into<String>, symbols: Vec<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            symbols,
            reconnect_backoff: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(20),
        }
    }

    /// Channel names to subscribe for every tracked symbol.
    pub fn subscription_params(&self) -> Vec<String> {
        self.symbols
            .iter()
            .flat_map(|s| {
                [
                    format!("{DEALS_CHANNEL}@{s}"),
                    format!("{TICKER_CHANNEL}@{s}"),
                ]
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Proof of a successful initial connection.
#[derive(Debug, Clone)]
pub struct Connected {
    pub url: String,
    pub connected_at: DateTime<Utc>,
}

enum ReadExit {
    Cancelled,
    Failed(String),
}

struct Inner {
    config: StreamConfig,
    dispatcher: Arc<EventDispatcher>,
    state: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
}

pub struct MexcStreamClient {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MexcStreamClient {
    /// `shutdown` is the process-wide token; the client works on a child of it
    /// so `disconnect()` stops only this client.
    pub fn new(
        config: StreamConfig,
        dispatcher: Arc<EventDispatcher>,
        shutdown: &CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                config,
                dispatcher,
                state,
                shutdown: shutdown.child_token(),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn on_trade<F>(&self, handler: F)
    where
        F: Fn(&TradeEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.dispatcher.on_trade(handler);
    }

    pub fn on_price_update<F>(&self, handler: F)
    where
        F: Fn(&PriceUpdate) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.dispatcher.on_price_update(handler);
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn counters(&self) -> &SourceCounters {
        self.inner.dispatcher.counters()
    }

    /// Dial once, subscribe, and hand the socket to the background worker.
    ///
    /// A failure here is returned to the caller; failures after this point
    /// are handled by the worker.
    #[instrument(skip(self), fields(url = %self.inner.config.ws_url))]
    pub async fn connect(&self) -> Result<Connected, ConnectionError> {
        if self.worker.lock().is_some() {
            return Err(ConnectionError::AlreadyConnected);
        }

        self.inner.set_state(ConnectionState::Connecting);
        let ws = match self.inner.open().await {
            Ok(ws) => ws,
            Err(e) => {
                self.inner.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };
        self.inner.set_state(ConnectionState::Connected);
        info!(symbols = self.inner.config.symbols.len(), "stream connected");

        let inner = Arc::clone(&self.inner);
        let span = info_span!("mexc_stream_worker", url = %self.inner.config.ws_url);
        let handle = tokio::spawn(inner.run(ws).instrument(span));
        *self.worker.lock() = Some(handle);

        Ok(Connected {
            url: self.inner.config.ws_url.clone(),
            connected_at: Utc::now(),
        })
    }

    /// Like `connect`, but keeps retrying the initial dial with the same
    /// backoff. Only fails when shutdown is requested.
    pub async fn connect_with_retry(&self) -> Result<Connected, ConnectionError> {
        loop {
            match self.connect().await {
                Ok(c) => return Ok(c),
                Err(e @ (ConnectionError::Cancelled | ConnectionError::AlreadyConnected)) => {
                    return Err(e);
                }
                Err(e) => {
                    warn!(error = %e, backoff = ?self.inner.config.reconnect_backoff, "initial connect failed");
                    if !self.inner.wait_backoff().await {
                        return Err(ConnectionError::Cancelled);
                    }
                }
            }
        }
    }

    /// Stop the worker and release the socket.
    pub async fn disconnect(&self) {
        self.inner.shutdown.cancel();

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = ?e, "stream worker ended abnormally");
            }
        }

        self.inner.set_state(ConnectionState::Disconnected);
        info!("stream disconnected");
    }
}

impl Inner {
    fn set_state(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!(from = ?prev, to = ?next, "connection state changed");
        }
    }

    /// Sleep for the backoff unless shutdown comes first. `false` means stop.
    async fn wait_backoff(&self) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(self.config.reconnect_backoff) => true,
        }
    }

    async fn open(&self) -> Result<WsStream, ConnectionError> {
        let timeout = self.config.connect_timeout;
        let dial = tokio::time::timeout(timeout, connect_async(self.config.ws_url.as_str()));

        let (mut ws, _) = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(ConnectionError::Cancelled),
            res = dial => match res {
                Err(_) => return Err(ConnectionError::Timeout(timeout)),
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok(pair)) => pair,
            },
        };

        self.subscribe(&mut ws).await?;
        Ok(ws)
    }

    async fn subscribe(&self, ws: &mut WsStream) -> Result<(), ConnectionError> {
        let params = self.config.subscription_params();

        for (i, chunk) in params.chunks(MAX_PARAMS_PER_REQUEST).enumerate() {
            let req = WsRequest {
                method: "SUBSCRIPTION",
                params: chunk.to_vec(),
                id: Some(i as u64 + 1),
            };
            let text = serde_json::to_string(&req)
                .map_err(|e| ConnectionError::Subscribe(e.to_string()))?;
            debug!(payload = %text, "sending subscription");
            ws.send(Message::Text(text.into())).await?;
        }

        Ok(())
    }

    async fn run(self: Arc<Self>, ws: WsStream) {
        let mut next = Some(ws);

        while let Some(ws) = next.take() {
            match self.read_until_failure(ws).await {
                ReadExit::Cancelled => break,
                ReadExit::Failed(reason) => {
                    warn!(reason = %reason, "stream connection lost");
                }
            }

            self.set_state(ConnectionState::Reconnecting);
            SourceCounters::incr(&self.dispatcher.counters().reconnects);
            next = self.reconnect().await;
        }

        self.set_state(ConnectionState::Disconnected);
        info!("stream worker stopped");
    }

    async fn reconnect(&self) -> Option<WsStream> {
        loop {
            if !self.wait_backoff().await {
                return None;
            }

            self.set_state(ConnectionState::Connecting);
            match self.open().await {
                Ok(ws) => {
                    self.set_state(ConnectionState::Connected);
                    info!("stream reconnected");
                    return Some(ws);
                }
                Err(ConnectionError::Cancelled) => return None,
                Err(e) => {
                    warn!(error = %e, backoff = ?self.config.reconnect_backoff, "reconnect attempt failed");
                    self.set_state(ConnectionState::Reconnecting);
                }
            }
        }
    }

    async fn read_until_failure(&self, ws: WsStream) -> ReadExit {
        let (mut write, mut read) = ws.split();

        let period = self.config.ping_interval;
        let mut ping = interval_at(Instant::now() + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    // best effort; the socket is dropped either way
                    let _ = tokio::time::timeout(
                        Duration::from_millis(500),
                        write.send(Message::Close(None)),
                    )
                    .await;
                    return ReadExit::Cancelled;
                }

                _ = ping.tick() => {
                    let ping_req = WsRequest { method: "PING", params: Vec::new(), id: None };
                    let text = match serde_json::to_string(&ping_req) {
                        Ok(t) => t,
                        Err(e) => return ReadExit::Failed(e.to_string()),
                    };
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        return ReadExit::Failed(format!("ping failed: {e}"));
                    }
                    trace!("ping sent");
                }

                msg = read.next() => match msg {
                    None => return ReadExit::Failed("stream ended".into()),
                    Some(Err(e)) => return ReadExit::Failed(e.to_string()),
                    Some(Ok(Message::Text(text))) => self.handle_text(text.as_str()),
                    Some(Ok(Message::Close(frame))) => {
                        return ReadExit::Failed(format!("server closed connection: {frame:?}"));
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        debug!(len = bytes.len(), "ignoring binary frame");
                    }
                    Some(Ok(_)) => trace!("keep-alive frame"),
                },
            }
        }
    }

    fn handle_text(&self, raw: &str) {
        let counters = self.dispatcher.counters();
        SourceCounters::incr(&counters.frames);
        trace!(raw_event = %raw, "received raw frame");

        match parse_frame(raw, Utc::now()) {
            Ok(Some(Frame::Market(frame))) => {
                if frame.dropped > 0 {
                    SourceCounters::add(&counters.dropped_events, frame.dropped as u64);
                    warn!(channel = %frame.channel, dropped = frame.dropped, "dropped undecodable items");
                }
                self.dispatcher.dispatch_all(&frame.events);
            }
            Ok(Some(Frame::Control(reply))) => {
                debug!(id = ?reply.id, code = ?reply.code, msg = ?reply.msg, "control reply");
            }
            Ok(Some(Frame::Ignored { channel })) => {
                trace!(channel = %channel, "ignoring unknown channel");
            }
            Ok(None) => debug!("ignoring unrecognised frame"),
            Err(e) => {
                SourceCounters::incr(&counters.decode_errors);
                warn!(error = %e, "failed to decode stream frame");
            }
        }
    }
}
