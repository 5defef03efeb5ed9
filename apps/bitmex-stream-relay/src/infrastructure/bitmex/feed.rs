//! BitMEX Feed Client
//!
//! Owns the single WebSocket connection to the BitMEX realtime API.
//!
//! # Lifecycle
//!
//! 1. Connect; the first success opens the startup readiness gate
//! 2. Replay `trade:<symbol>` subscriptions for every known symbol
//! 3. Read frames, forward decoded trades, answer heartbeats, and apply
//!    subscribe commands from [`FeedHandle`]
//! 4. On connection loss, back off and reconnect (back to 1)
//! 5. On cancellation, unsubscribe every known symbol, wait the grace
//!    period, and close
//!
//! Failure to establish the very first connection is fatal.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{FeedControl, FeedControlError};
use crate::domain::streaming::TradeEvent;
use crate::domain::symbols::{Symbol, SymbolSet};
use crate::infrastructure::bitmex::codec::{CodecError, FeedMessage, JsonCodec};
use crate::infrastructure::bitmex::heartbeat::{
    Heartbeat, HeartbeatAction, HeartbeatConfig, HeartbeatError,
};
use crate::infrastructure::bitmex::messages::{ControlFrame, ControlOp};
use crate::infrastructure::bitmex::reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
use crate::infrastructure::bitmex::state::{FeedConnectionState, FeedState};
use crate::infrastructure::config::RelayConfig;
use crate::infrastructure::metrics;

type FeedStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Errors
// =============================================================================

/// Feed client errors.
#[derive(Debug, thiserror::Error)]
pub enum FeedClientError {
    /// WebSocket transport failed.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// A control frame could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The connection went silent.
    #[error("heartbeat failed: {0}")]
    Heartbeat(#[from] HeartbeatError),

    /// The server closed the connection.
    #[error("connection closed by server")]
    ConnectionClosed,

    /// Reconnection gave up.
    #[error(transparent)]
    Reconnect(#[from] ReconnectError),
}

// =============================================================================
// Configuration
// =============================================================================

/// Feed client configuration.
#[derive(Debug, Clone)]
pub struct FeedClientConfig {
    /// Realtime WebSocket URL.
    pub url: String,
    /// Topics per control frame.
    pub control_batch_size: usize,
    /// Wait between the final unsubscribe and close.
    pub shutdown_grace: Duration,
    /// Reconnection backoff.
    pub reconnect: ReconnectConfig,
    /// Idle heartbeat.
    pub heartbeat: HeartbeatConfig,
}

impl FeedClientConfig {
    /// Defaults for a URL: 15 topics per frame and a one second grace.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            control_batch_size: 15,
            shutdown_grace: Duration::from_secs(1),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }

    /// Build from relay configuration.
    #[must_use]
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            url: config.ws_url().to_string(),
            control_batch_size: config.relay.control_batch_size,
            shutdown_grace: config.relay.shutdown_grace,
            reconnect: ReconnectConfig::from_settings(&config.websocket),
            heartbeat: HeartbeatConfig::from_settings(&config.websocket),
        }
    }
}

// =============================================================================
// Control Handle
// =============================================================================

/// Command sent to a running feed client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Subscribe to trade topics for these symbols.
    Subscribe(Vec<Symbol>),
}

/// Cloneable [`FeedControl`] handle for a [`FeedClient`].
///
/// Commands are queued without bound so callers never wait on the feed.
#[derive(Debug, Clone)]
pub struct FeedHandle {
    commands: mpsc::UnboundedSender<ControlCommand>,
}

impl FeedHandle {
    /// Create a handle and the receiver to pass to [`FeedClient::run`].
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ControlCommand>) {
        let (commands, rx) = mpsc::unbounded_channel();
        (Self { commands }, rx)
    }
}

#[async_trait]
impl FeedControl for FeedHandle {
    async fn subscribe(&self, symbols: &[Symbol]) -> Result<(), FeedControlError> {
        if symbols.is_empty() {
            return Ok(());
        }
        self.commands
            .send(ControlCommand::Subscribe(symbols.to_vec()))
            .map_err(|_| FeedControlError::Closed)
    }
}

// =============================================================================
// Client
// =============================================================================

/// BitMEX realtime feed client.
pub struct FeedClient {
    config: FeedClientConfig,
    codec: JsonCodec,
    symbols: Arc<SymbolSet>,
    trades: mpsc::Sender<Vec<TradeEvent>>,
    state: Arc<FeedState>,
    cancel: CancellationToken,
}

impl FeedClient {
    /// Create a client that forwards decoded trades to `trades`.
    #[must_use]
    pub fn new(
        config: FeedClientConfig,
        symbols: Arc<SymbolSet>,
        trades: mpsc::Sender<Vec<TradeEvent>>,
        state: Arc<FeedState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            codec: JsonCodec::new(),
            symbols,
            trades,
            state,
            cancel,
        }
    }

    /// Run until cancelled.
    ///
    /// `ready` fires once the first connection is live. If that first
    /// connection fails, `ready` is dropped and the error returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the first connection fails or reconnection
    /// attempts are exhausted.
    pub async fn run(
        self,
        mut commands: mpsc::UnboundedReceiver<ControlCommand>,
        ready: oneshot::Sender<()>,
    ) -> Result<(), FeedClientError> {
        let mut ready = Some(ready);
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                self.closed();
                return Ok(());
            }

            self.state.set_state(FeedConnectionState::Connecting);
            tracing::info!(url = %self.config.url, "Connecting to BitMEX feed");

            let connected = tokio::select! {
                () = self.cancel.cancelled() => {
                    self.closed();
                    return Ok(());
                }
                result = tokio_tungstenite::connect_async(self.config.url.as_str()) => result,
            };

            let error = match connected {
                Ok((stream, _response)) => {
                    policy.reset();
                    self.state.set_state(FeedConnectionState::Live);
                    tracing::info!("BitMEX feed live");
                    if let Some(ready) = ready.take() {
                        let _ = ready.send(());
                    }

                    match self.session(stream, &mut commands).await {
                        Ok(()) => {
                            self.closed();
                            return Ok(());
                        }
                        Err(e) => e,
                    }
                }
                Err(e) if ready.is_some() => {
                    tracing::error!(error = %e, "Initial BitMEX feed connection failed");
                    self.state.note_error(e.to_string());
                    self.state.set_state(FeedConnectionState::Closed);
                    return Err(e.into());
                }
                Err(e) => e.into(),
            };

            tracing::warn!(error = %error, "BitMEX feed connection lost");
            self.state.set_error(error.to_string());

            let delay = match policy.next_delay() {
                Ok(delay) => delay,
                Err(e) => {
                    tracing::error!(error = %e, "Giving up on BitMEX feed");
                    self.state.set_state(FeedConnectionState::Closed);
                    return Err(e.into());
                }
            };
            self.state.record_reconnect_attempt();
            metrics::record_reconnect();
            tracing::info!(
                attempt = policy.attempts(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting to BitMEX feed"
            );

            tokio::select! {
                () = self.cancel.cancelled() => {
                    self.closed();
                    return Ok(());
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn closed(&self) {
        self.state.set_state(FeedConnectionState::Closed);
        tracing::info!("BitMEX feed client stopped");
    }

    /// Drive one live connection until it fails or the client is cancelled.
    async fn session(
        &self,
        stream: FeedStream,
        commands: &mut mpsc::UnboundedReceiver<ControlCommand>,
    ) -> Result<(), FeedClientError> {
        let (mut write, mut read) = stream.split();

        let known = self.symbols.snapshot();
        if !known.is_empty() {
            tracing::info!(symbols = known.len(), "Replaying trade subscriptions");
        }
        self.send_control(&mut write, ControlOp::Subscribe, &known)
            .await?;
        // Commands queued while disconnected name symbols already merged
        // into the set, so the replay above covered them.
        let replayed: HashSet<Symbol> = known.into_iter().collect();

        let mut heartbeat = Heartbeat::new(self.config.heartbeat, Instant::now());
        let mut commands_open = true;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    self.shutdown(&mut write).await;
                    return Ok(());
                }
                command = commands.recv(), if commands_open => match command {
                    Some(ControlCommand::Subscribe(symbols)) => {
                        let fresh: Vec<Symbol> = symbols
                            .into_iter()
                            .filter(|symbol| !replayed.contains(symbol))
                            .collect();
                        if fresh.is_empty() {
                            tracing::debug!("Subscribe command covered by replay, skipping");
                            continue;
                        }
                        self.send_control(&mut write, ControlOp::Subscribe, &fresh).await?;
                    }
                    None => commands_open = false,
                },
                () = tokio::time::sleep_until(heartbeat.deadline()) => {
                    match heartbeat.on_deadline(Instant::now()) {
                        HeartbeatAction::SendPing => {
                            tracing::trace!("Feed idle, sending ping");
                            write.send(Message::Text("ping".into())).await?;
                        }
                        HeartbeatAction::TimedOut => {
                            tracing::warn!("BitMEX feed heartbeat timed out");
                            return Err(heartbeat.timeout_error().into());
                        }
                        HeartbeatAction::Wait => {}
                    }
                }
                message = read.next() => {
                    heartbeat.record_inbound(Instant::now());
                    match message {
                        Some(Ok(Message::Text(text))) => self.handle_text(&text).await,
                        Some(Ok(Message::Ping(data))) => write.send(Message::Pong(data)).await?,
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(frame = ?frame, "BitMEX feed sent close frame");
                            return Err(FeedClientError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("BitMEX feed stream ended");
                            return Err(FeedClientError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    /// Decode one text frame and forward any trades.
    async fn handle_text(&self, text: &str) {
        self.state.record_frame();
        metrics::record_frame_received();

        match self.codec.decode(text) {
            Ok(FeedMessage::Trades(trades)) => {
                if trades.is_empty() {
                    return;
                }
                self.state.record_trades(trades.len());
                if self.trades.send(trades).await.is_err() {
                    tracing::debug!("Trade channel closed, dropping batch");
                }
            }
            Ok(FeedMessage::Table { table, action }) => {
                tracing::trace!(table = %table, action = %action, "Ignoring table frame");
            }
            Ok(FeedMessage::Info(info)) => {
                tracing::info!(version = ?info.version, message = %info.info, "BitMEX feed banner");
            }
            Ok(FeedMessage::Success(ack)) => {
                tracing::debug!(
                    success = ack.success,
                    subscribe = ?ack.subscribe,
                    unsubscribe = ?ack.unsubscribe,
                    "Control frame acknowledged"
                );
            }
            Ok(FeedMessage::Error(error)) => {
                tracing::warn!(status = ?error.status, error = %error.error, "BitMEX feed reported an error");
                self.state.note_error(error.error);
            }
            Ok(FeedMessage::Pong) => tracing::trace!("Received pong"),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping undecodable feed frame");
                self.state.record_decode_error();
                metrics::record_decode_error();
            }
        }
    }

    /// Unsubscribe every known symbol, wait the grace period, then close.
    async fn shutdown<W>(&self, write: &mut W)
    where
        W: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        let known = self.symbols.snapshot();
        tracing::info!(symbols = known.len(), "Unsubscribing from BitMEX feed");

        if let Err(e) = self.send_control(write, ControlOp::Unsubscribe, &known).await {
            tracing::warn!(error = %e, "Failed to send final unsubscribe");
        }
        tokio::time::sleep(self.config.shutdown_grace).await;
        if let Err(e) = write.close().await {
            tracing::debug!(error = %e, "Error closing BitMEX feed connection");
        }
    }

    async fn send_control<W>(
        &self,
        write: &mut W,
        op: ControlOp,
        symbols: &[Symbol],
    ) -> Result<(), FeedClientError>
    where
        W: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        for frame in ControlFrame::batches(op, symbols, self.config.control_batch_size) {
            let text = self.codec.encode(&frame)?;
            write.send(Message::Text(text.into())).await?;
            tracing::debug!(op = op.as_str(), topics = frame.args.len(), "Sent control frame");
        }
        Ok(())
    }
}

impl std::fmt::Debug for FeedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedClient")
            .field("url", &self.config.url)
            .finish_non_exhaustive()
    }
}
