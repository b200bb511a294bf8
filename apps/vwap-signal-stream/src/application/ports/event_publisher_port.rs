//! Event Publisher Port (Driven Port)
//!
//! Interface for publishing stream events to subscribers.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::candle::Candle;
use crate::domain::signal::SignalReport;

/// Events produced by the tick pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// VWAP after a processed tick.
    VwapUpdated {
        /// Current VWAP.
        vwap: f64,
        /// Tick price.
        price: f64,
        /// Tick timestamp, epoch seconds.
        timestamp: i64,
    },
    /// A candle completed.
    CandleClosed(Candle),
    /// A signal lookup succeeded.
    SignalGenerated(SignalReport),
    /// A new VWAP session started.
    SessionReset {
        /// Date of the new session.
        session_date: NaiveDate,
    },
}

impl StreamEvent {
    /// Event name for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::VwapUpdated { .. } => "vwap_updated",
            Self::CandleClosed(_) => "candle_closed",
            Self::SignalGenerated(_) => "signal_generated",
            Self::SessionReset { .. } => "session_reset",
        }
    }
}

/// Port for publishing stream events.
pub trait EventPublisherPort: Send + Sync {
    /// Publish an event. Never blocks; returns the number of subscribers
    /// that received it.
    fn publish(&self, event: StreamEvent) -> usize;
}

/// No-op event publisher for testing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventPublisher;

impl EventPublisherPort for NoOpEventPublisher {
    fn publish(&self, _event: StreamEvent) -> usize {
        0
    }
}
