//! Feed Heartbeat
//!
//! Keeps the feed socket alive with periodic pings and declares it dead when
//! neither a pong nor any data has arrived within the timeout of a ping.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::WebSocketSettings;

/// Heartbeat timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between pings.
    pub ping_interval: Duration,
    /// Silence after a ping before the connection is considered dead.
    pub silence_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            silence_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&WebSocketSettings> for HeartbeatConfig {
    fn from(settings: &WebSocketSettings) -> Self {
        Self {
            ping_interval: settings.heartbeat_interval,
            silence_timeout: settings.heartbeat_timeout,
        }
    }
}

/// What the socket task should do on a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send a ping frame.
    SendPing,
    /// The connection is dead; reconnect.
    Timeout,
}

/// Liveness shared between the socket task and the heartbeat task.
#[derive(Debug)]
pub struct LivenessState {
    last_activity: RwLock<Instant>,
    ping_outstanding: AtomicBool,
}

impl Default for LivenessState {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessState {
    /// Fresh state, as if data just arrived.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_activity: RwLock::new(Instant::now()),
            ping_outstanding: AtomicBool::new(false),
        }
    }

    /// Any inbound frame, data or pong, proves liveness.
    pub fn record_activity(&self) {
        *self.last_activity.write() = Instant::now();
        self.ping_outstanding.store(false, Ordering::Release);
    }

    /// A ping was written.
    pub fn mark_ping_sent(&self) {
        self.ping_outstanding.store(true, Ordering::Release);
    }

    /// Whether a ping is still unanswered.
    #[must_use]
    pub fn ping_outstanding(&self) -> bool {
        self.ping_outstanding.load(Ordering::Acquire)
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn silence(&self) -> Duration {
        self.last_activity.read().elapsed()
    }

    /// Decide the next heartbeat action.
    #[must_use]
    pub fn evaluate(&self, silence_timeout: Duration) -> HeartbeatEvent {
        if self.ping_outstanding() && self.silence() > silence_timeout {
            HeartbeatEvent::Timeout
        } else {
            HeartbeatEvent::SendPing
        }
    }
}

/// Emits [`HeartbeatEvent`]s for one connection.
#[derive(Debug)]
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<LivenessState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a manager for one connection.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<LivenessState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled, the receiver is gone, or a timeout is reported.
    pub async fn run(self) {
        // First ping one interval after connect.
        let start = tokio::time::Instant::now() + self.config.ping_interval;
        let mut interval = tokio::time::interval_at(start, self.config.ping_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = interval.tick() => {
                    let event = self.state.evaluate(self.config.silence_timeout);
                    if event == HeartbeatEvent::Timeout {
                        tracing::warn!(
                            silence_ms = u64::try_from(self.state.silence().as_millis()).unwrap_or(u64::MAX),
                            "Feed heartbeat timed out"
                        );
                    }
                    if self.event_tx.send(event).await.is_err() || event == HeartbeatEvent::Timeout {
                        break;
                    }
                }
            }
        }

        tracing::debug!("Heartbeat manager stopped");
    }
}
