//! Stream Configuration Settings
//!
//! Configuration types for the VWAP signal stream, loaded from environment
//! variables. Only the broker credentials are required; everything else
//! falls back to a default when missing or unparseable.

use std::time::Duration;

use chrono::NaiveTime;

use crate::application::ports::Underlying;
use crate::domain::clock::FixedOffsetClock;
use crate::domain::signal::DEFAULT_TOUCH_THRESHOLD;
use crate::domain::vwap::{DEFAULT_SESSION_START_HOUR, DEFAULT_SESSION_START_MINUTE};

/// Broker API credentials.
#[derive(Clone)]
pub struct Credentials {
    access_token: String,
    client_id: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(access_token: String, client_id: String) -> Self {
        Self {
            access_token,
            client_id,
        }
    }

    /// Get the access token.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Get the client id.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"[REDACTED]")
            .field("client_id", &"[REDACTED]")
            .finish()
    }
}

/// Streamed instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentSettings {
    /// Feed security id.
    pub security_id: String,
    /// Feed exchange segment name.
    pub exchange_segment: String,
}

impl Default for InstrumentSettings {
    fn default() -> Self {
        Self {
            security_id: "1165486".to_string(),
            exchange_segment: "BSE_FNO".to_string(),
        }
    }
}

/// Session and trigger settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// Session start hour, exchange local time.
    pub start_hour: u32,
    /// Session start minute, exchange local time.
    pub start_minute: u32,
    /// Exchange offset from UTC in minutes.
    pub utc_offset_minutes: i32,
    /// Distance from VWAP that counts as a touch.
    pub touch_threshold: f64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            start_hour: DEFAULT_SESSION_START_HOUR,
            start_minute: DEFAULT_SESSION_START_MINUTE,
            utc_offset_minutes: FixedOffsetClock::IST_OFFSET_MINUTES,
            touch_threshold: DEFAULT_TOUCH_THRESHOLD,
        }
    }
}

impl SessionSettings {
    /// Session start time. Out-of-range values fall back to 09:15.
    #[must_use]
    pub fn session_start(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.start_hour, self.start_minute, 0).unwrap_or_else(|| {
            tracing::warn!(
                hour = self.start_hour,
                minute = self.start_minute,
                "Invalid session start, using default"
            );
            crate::domain::vwap::SessionVwap::default_session_start()
        })
    }

    /// Exchange clock. Out-of-range offsets fall back to IST.
    #[must_use]
    pub fn clock(&self) -> FixedOffsetClock {
        FixedOffsetClock::from_offset_minutes(self.utc_offset_minutes).unwrap_or_else(|| {
            tracing::warn!(
                offset_minutes = self.utc_offset_minutes,
                "Invalid UTC offset, using IST"
            );
            FixedOffsetClock::default()
        })
    }
}

/// Signal lookup settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalSettings {
    /// Option-chain underlying.
    pub underlying: Underlying,
    /// REST API base URL.
    pub rest_base_url: String,
    /// Deadline for one complete lookup.
    pub dispatch_timeout: Duration,
    /// Minimum spacing between REST requests.
    pub rest_min_interval: Duration,
}

impl Default for SignalSettings {
    fn default() -> Self {
        Self {
            underlying: Underlying::default(),
            rest_base_url: "https://api.dhan.co/v2".to_string(),
            dispatch_timeout: Duration::from_secs(30),
            rest_min_interval: Duration::from_secs(3),
        }
    }
}

/// Feed WebSocket connection settings.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// Feed WebSocket base URL.
    pub feed_url: String,
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Heartbeat timeout before considering connection dead.
    pub heartbeat_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            feed_url: "wss://api-feed.dhan.co".to_string(),
            heartbeat_interval: Duration::from_secs(20),
            heartbeat_timeout: Duration::from_secs(10),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0, // Unlimited
        }
    }
}

/// Internal channel capacities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSettings {
    /// Feed-to-engine frame channel.
    pub frame_capacity: usize,
    /// Event broadcast channel.
    pub event_capacity: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            frame_capacity: 4_096,
            event_capacity: 1_024,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete stream configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// API credentials.
    pub credentials: Credentials,
    /// Streamed instrument.
    pub instrument: InstrumentSettings,
    /// Session and trigger settings.
    pub session: SessionSettings,
    /// Signal lookup settings.
    pub signal: SignalSettings,
    /// WebSocket connection settings.
    pub websocket: WebSocketSettings,
    /// Channel capacities.
    pub channels: ChannelSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl StreamConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the credentials are missing or empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let access_token = env.required("DHAN_ACCESS_TOKEN")?;
        let client_id = env.required("DHAN_CLIENT_ID")?;

        let instrument_defaults = InstrumentSettings::default();
        let instrument = InstrumentSettings {
            security_id: env.string("VWAP_STREAM_SECURITY_ID", instrument_defaults.security_id),
            exchange_segment: env.string(
                "VWAP_STREAM_EXCHANGE_SEGMENT",
                instrument_defaults.exchange_segment,
            ),
        };

        let session_defaults = SessionSettings::default();
        let session = SessionSettings {
            start_hour: env.parse("VWAP_STREAM_SESSION_START_HOUR", session_defaults.start_hour),
            start_minute: env.parse(
                "VWAP_STREAM_SESSION_START_MINUTE",
                session_defaults.start_minute,
            ),
            utc_offset_minutes: env.parse(
                "VWAP_STREAM_UTC_OFFSET_MINUTES",
                session_defaults.utc_offset_minutes,
            ),
            touch_threshold: env.parse(
                "VWAP_STREAM_TOUCH_THRESHOLD",
                session_defaults.touch_threshold,
            ),
        };

        let signal_defaults = SignalSettings::default();
        let signal = SignalSettings {
            underlying: Underlying::new(
                env.parse(
                    "VWAP_STREAM_UNDERLYING_SCRIP",
                    signal_defaults.underlying.scrip,
                ),
                env.string(
                    "VWAP_STREAM_UNDERLYING_SEGMENT",
                    signal_defaults.underlying.segment,
                ),
            ),
            rest_base_url: env.string("VWAP_STREAM_REST_BASE_URL", signal_defaults.rest_base_url),
            dispatch_timeout: env.duration_secs(
                "VWAP_STREAM_DISPATCH_TIMEOUT_SECS",
                signal_defaults.dispatch_timeout,
            ),
            rest_min_interval: env.duration_secs(
                "VWAP_STREAM_REST_MIN_INTERVAL_SECS",
                signal_defaults.rest_min_interval,
            ),
        };

        let ws_defaults = WebSocketSettings::default();
        let websocket = WebSocketSettings {
            feed_url: env.string("VWAP_STREAM_FEED_URL", ws_defaults.feed_url),
            heartbeat_interval: env.duration_secs(
                "VWAP_STREAM_HEARTBEAT_INTERVAL_SECS",
                ws_defaults.heartbeat_interval,
            ),
            heartbeat_timeout: env.duration_secs(
                "VWAP_STREAM_HEARTBEAT_TIMEOUT_SECS",
                ws_defaults.heartbeat_timeout,
            ),
            reconnect_delay_initial: env.duration_millis(
                "VWAP_STREAM_RECONNECT_DELAY_INITIAL_MS",
                ws_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.duration_secs(
                "VWAP_STREAM_RECONNECT_DELAY_MAX_SECS",
                ws_defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: env.parse(
                "VWAP_STREAM_RECONNECT_DELAY_MULTIPLIER",
                ws_defaults.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: env.parse(
                "VWAP_STREAM_MAX_RECONNECT_ATTEMPTS",
                ws_defaults.max_reconnect_attempts,
            ),
        };

        let channel_defaults = ChannelSettings::default();
        let channels = ChannelSettings {
            frame_capacity: env
                .parse::<usize>(
                    "VWAP_STREAM_FRAME_CHANNEL_CAPACITY",
                    channel_defaults.frame_capacity,
                )
                .max(1),
            event_capacity: env
                .parse::<usize>(
                    "VWAP_STREAM_EVENT_CHANNEL_CAPACITY",
                    channel_defaults.event_capacity,
                )
                .max(1),
        };

        let server = ServerSettings {
            health_port: env.parse(
                "VWAP_STREAM_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        Ok(Self {
            credentials: Credentials::new(access_token, client_id),
            instrument,
            session,
            signal,
            websocket,
            channels,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn required(&self, key: &str) -> Result<String, ConfigError> {
        let value = (self.0)(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
        if value.trim().is_empty() {
            return Err(ConfigError::EmptyValue(key.to_string()));
        }
        Ok(value)
    }

    fn string(&self, key: &str, default: String) -> String {
        (self.0)(key)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(default)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        (self.0)(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        (self.0)(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        (self.0)(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}
