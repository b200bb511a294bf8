//! Market Feed WebSocket Client
//!
//! Connects to the Dhan live market feed, subscribes one instrument and
//! forwards its binary quote packets, in arrival order, to the stream engine.
//!
//! # Stream URL
//!
//! `wss://api-feed.dhan.co?version=2&token=<token>&clientId=<id>&authType=2`
//!
//! # Protocol
//!
//! Subscriptions are JSON text frames; market data arrives as little-endian
//! binary packets. Packet code `50` is a server disconnect carrying a reason
//! code, after which the client reconnects.
//!
//! The socket task never waits on the engine: a full frame channel drops the
//! frame and counts it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, LivenessState};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::domain::tick::{self, DISCONNECT_PACKET_CODE, QUOTE_PACKET_CODE};
use crate::infrastructure::config::{Credentials, InstrumentSettings, StreamConfig};
use crate::infrastructure::metrics::{self, DropReason};

/// Feed request code for a quote subscription.
pub const SUBSCRIBE_QUOTE_REQUEST_CODE: u8 = 17;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can occur in the feed client.
#[derive(Debug, thiserror::Error)]
pub enum FeedClientError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Subscription request could not be encoded.
    #[error("failed to encode subscription: {0}")]
    Encode(#[from] serde_json::Error),

    /// The server sent a disconnect packet.
    #[error("server disconnect, reason code {reason}")]
    ServerDisconnect {
        /// Feed-specific reason code.
        reason: i16,
    },

    /// No pong or data within the heartbeat timeout.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    /// The engine stopped consuming frames.
    #[error("frame channel closed")]
    ChannelClosed,

    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,
}

impl FeedClientError {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::WebSocket(_) => "websocket",
            Self::Encode(_) => "encode",
            Self::ServerDisconnect { .. } => "server_disconnect",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::ChannelClosed => "channel_closed",
            Self::MaxReconnectAttemptsExceeded => "max_reconnects",
            Self::ConnectionClosed => "connection_closed",
        }
    }
}

// =============================================================================
// Feed Events and State
// =============================================================================

/// Connection lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// Connected and subscription sent.
    Connected,
    /// Connection lost.
    Disconnected {
        /// Why the connection ended.
        reason: String,
    },
    /// Waiting before a reconnect.
    Reconnecting {
        /// Reconnection attempt number.
        attempt: u32,
    },
}

/// Feed connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected.
    Disconnected,
    /// Connecting.
    Connecting,
    /// Connected and subscribed.
    Connected,
    /// Waiting to reconnect.
    Reconnecting,
    /// Gave up.
    Error,
}

impl ConnectionState {
    /// Returns the string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        }
    }
}

/// Feed status shared with the health endpoint.
#[derive(Debug)]
pub struct FeedState {
    state: parking_lot::RwLock<ConnectionState>,
    last_connected_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
    last_error: parking_lot::RwLock<Option<String>>,
    reconnect_attempts: AtomicU32,
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
}

impl Default for FeedState {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedState {
    /// Disconnected state with zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: parking_lot::RwLock::new(ConnectionState::Disconnected),
            last_connected_at: parking_lot::RwLock::new(None),
            last_error: parking_lot::RwLock::new(None),
            reconnect_attempts: AtomicU32::new(0),
            frames_received: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }

    /// Set the connection state.
    pub fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        if state == ConnectionState::Connected {
            *self.last_connected_at.write() = Some(Utc::now());
            self.reconnect_attempts.store(0, Ordering::Relaxed);
            *self.last_error.write() = None;
        }
    }

    /// Record the error that ended a connection.
    pub fn set_error(&self, message: String) {
        *self.last_error.write() = Some(message);
    }

    fn set_reconnect_attempts(&self, attempts: u32) {
        self.reconnect_attempts.store(attempts, Ordering::Relaxed);
    }

    fn increment_frames(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    fn increment_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Current connection state.
    #[must_use]
    pub fn get_state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether the feed is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.get_state() == ConnectionState::Connected
    }

    /// Time of the last successful connection.
    #[must_use]
    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        *self.last_connected_at.read()
    }

    /// Last connection error.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Consecutive reconnect attempts.
    #[must_use]
    pub fn get_reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Binary frames received.
    #[must_use]
    pub fn get_frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Frames dropped because the engine was behind.
    #[must_use]
    pub fn get_frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Subscription Request
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SubscribeRequest<'a> {
    request_code: u8,
    instrument_count: usize,
    instrument_list: Vec<InstrumentRef<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct InstrumentRef<'a> {
    exchange_segment: &'a str,
    security_id: &'a str,
}

/// Encode the quote subscription for one instrument.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn subscribe_message(instrument: &InstrumentSettings) -> Result<String, serde_json::Error> {
    serde_json::to_string(&SubscribeRequest {
        request_code: SUBSCRIBE_QUOTE_REQUEST_CODE,
        instrument_count: 1,
        instrument_list: vec![InstrumentRef {
            exchange_segment: &instrument.exchange_segment,
            security_id: &instrument.security_id,
        }],
    })
}

// =============================================================================
// Feed Client Configuration
// =============================================================================

/// Configuration for the feed client.
#[derive(Debug, Clone)]
pub struct FeedClientConfig {
    /// Feed base URL, without query parameters.
    pub base_url: String,
    /// API credentials.
    pub credentials: Credentials,
    /// Subscribed instrument.
    pub instrument: InstrumentSettings,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Heartbeat configuration.
    pub heartbeat: HeartbeatConfig,
}

impl FeedClientConfig {
    /// Build from the stream configuration.
    #[must_use]
    pub fn from_stream_config(config: &StreamConfig) -> Self {
        Self {
            base_url: config.websocket.feed_url.clone(),
            credentials: config.credentials.clone(),
            instrument: config.instrument.clone(),
            reconnect: ReconnectConfig::from(&config.websocket),
            heartbeat: HeartbeatConfig::from(&config.websocket),
        }
    }

    /// Full connection URL including credentials.
    #[must_use]
    pub fn connect_url(&self) -> String {
        format!(
            "{}?version=2&token={}&clientId={}&authType=2",
            self.base_url,
            self.credentials.access_token(),
            self.credentials.client_id()
        )
    }
}

// =============================================================================
// Feed Client
// =============================================================================

/// Live market feed client.
///
/// Manages the connection lifecycle including:
/// - Subscription on every (re)connect
/// - Heartbeat monitoring
/// - Automatic reconnection with exponential backoff
pub struct FeedClient {
    config: FeedClientConfig,
    frame_tx: mpsc::Sender<Vec<u8>>,
    event_tx: mpsc::Sender<FeedEvent>,
    state: Arc<FeedState>,
    cancel: CancellationToken,
}

impl FeedClient {
    /// Create a new feed client.
    #[must_use]
    pub fn new(
        config: FeedClientConfig,
        frame_tx: mpsc::Sender<Vec<u8>>,
        event_tx: mpsc::Sender<FeedEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            frame_tx,
            event_tx,
            state: Arc::new(FeedState::new()),
            cancel,
        }
    }

    /// Shared connection state.
    #[must_use]
    pub fn state(&self) -> Arc<FeedState> {
        Arc::clone(&self.state)
    }

    /// Run the connection loop until cancelled or out of retries.
    ///
    /// # Errors
    ///
    /// Returns an error when reconnect attempts are exhausted or the engine
    /// has stopped consuming frames.
    pub async fn run(self: Arc<Self>) -> Result<(), FeedClientError> {
        let mut reconnect_policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Feed client cancelled");
                return Ok(());
            }

            self.state.set_state(ConnectionState::Connecting);
            let result = self.connect_and_run(&mut reconnect_policy).await;
            self.state.set_state(ConnectionState::Disconnected);

            let err = match result {
                Ok(()) => {
                    tracing::info!("Feed connection closed");
                    return Ok(());
                }
                Err(FeedClientError::ChannelClosed) => {
                    tracing::error!("Stream engine stopped; feed client exiting");
                    return Err(FeedClientError::ChannelClosed);
                }
                Err(e) => e,
            };

            tracing::warn!(error = %err, "Feed connection error");
            metrics::record_websocket_error(err.kind());
            self.state.set_error(err.to_string());
            self.emit(FeedEvent::Disconnected {
                reason: err.to_string(),
            });

            let Some(delay) = reconnect_policy.next_delay() else {
                self.state.set_state(ConnectionState::Error);
                tracing::error!(
                    attempts = reconnect_policy.attempt_count(),
                    "Giving up on feed"
                );
                return Err(FeedClientError::MaxReconnectAttemptsExceeded);
            };

            let attempt = reconnect_policy.attempt_count();
            self.state.set_state(ConnectionState::Reconnecting);
            self.state.set_reconnect_attempts(attempt);
            metrics::record_reconnect();
            self.emit(FeedEvent::Reconnecting { attempt });
            tracing::info!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting to feed"
            );

            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("Feed client cancelled during reconnect delay");
                    return Ok(());
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Connect, subscribe and pump frames until error or cancellation.
    async fn connect_and_run(
        &self,
        reconnect_policy: &mut ReconnectPolicy,
    ) -> Result<(), FeedClientError> {
        tracing::info!(
            url = %self.config.base_url,
            security_id = %self.config.instrument.security_id,
            segment = %self.config.instrument.exchange_segment,
            "Connecting to market feed"
        );

        let (ws_stream, _response) =
            tokio_tungstenite::connect_async(self.config.connect_url()).await?;
        let (mut write, mut read) = ws_stream.split();

        let subscribe = subscribe_message(&self.config.instrument)?;
        write.send(Message::Text(subscribe.into())).await?;

        reconnect_policy.reset();
        self.state.set_state(ConnectionState::Connected);
        self.emit(FeedEvent::Connected);
        tracing::info!("Market feed connected and subscribed");

        let liveness = Arc::new(LivenessState::new());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(4);
        let heartbeat_cancel = self.cancel.child_token();
        tokio::spawn(
            HeartbeatManager::new(
                self.config.heartbeat,
                Arc::clone(&liveness),
                heartbeat_tx,
                heartbeat_cancel.clone(),
            )
            .run(),
        );
        let _heartbeat_guard = heartbeat_cancel.drop_guard();

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                Some(event) = heartbeat_rx.recv() => match event {
                    HeartbeatEvent::SendPing => {
                        liveness.mark_ping_sent();
                        write.send(Message::Ping(Vec::new().into())).await?;
                    }
                    HeartbeatEvent::Timeout => return Err(FeedClientError::HeartbeatTimeout),
                },
                msg = read.next() => match msg {
                    Some(Ok(Message::Binary(data))) => {
                        liveness.record_activity();
                        self.handle_binary(&data)?;
                    }
                    Some(Ok(Message::Pong(_))) => liveness.record_activity(),
                    Some(Ok(Message::Ping(data))) => {
                        liveness.record_activity();
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Text(text))) => {
                        liveness.record_activity();
                        tracing::debug!(message = %text.as_str(), "Feed text message");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(?frame, "Server sent close frame");
                        return Err(FeedClientError::ConnectionClosed);
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(FeedClientError::ConnectionClosed),
                },
            }
        }
    }

    /// Route one binary packet.
    fn handle_binary(&self, data: &[u8]) -> Result<(), FeedClientError> {
        self.state.increment_frames();
        metrics::record_frame_received();

        match tick::peek_response_code(data) {
            Some(QUOTE_PACKET_CODE) => self.forward(data),
            Some(DISCONNECT_PACKET_CODE) => {
                let reason = tick::decode_disconnect_reason(data).unwrap_or_default();
                Err(FeedClientError::ServerDisconnect { reason })
            }
            code => {
                tracing::trace!(?code, len = data.len(), "Ignoring feed packet");
                Ok(())
            }
        }
    }

    fn forward(&self, data: &[u8]) -> Result<(), FeedClientError> {
        match self.frame_tx.try_send(data.to_vec()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.state.increment_dropped();
                metrics::record_frame_dropped(DropReason::ChannelFull);
                tracing::warn!("Engine behind; dropping frame");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(FeedClientError::ChannelClosed),
        }
    }

    fn emit(&self, event: FeedEvent) {
        if let Err(TrySendError::Full(event)) = self.event_tx.try_send(event) {
            tracing::debug!(?event, "Feed event channel full");
        }
    }
}
