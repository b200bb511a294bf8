//! Signal Dispatch Port (Driven Port)
//!
//! Hands a VWAP touch to an independent execution context. Dispatch returns
//! immediately; the result comes back later as a [`DispatchOutcome`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::OptionChainError;
use crate::domain::signal::{DispatchId, SignalReport};

/// Market context captured when the touch fired.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalRequest {
    /// Dispatch identifier.
    pub id: DispatchId,
    /// Price at the touch.
    pub price: f64,
    /// VWAP at the touch.
    pub vwap: f64,
    /// Tick timestamp, epoch seconds.
    pub timestamp: i64,
}

/// Signal lookup failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchFailure {
    /// Option chain could not be fetched.
    #[error(transparent)]
    OptionChain(#[from] OptionChainError),

    /// The whole lookup exceeded its deadline.
    #[error("signal lookup timed out after {0:?}")]
    Timeout(Duration),
}

impl DispatchFailure {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::OptionChain(err) => err.kind(),
            Self::Timeout(_) => "deadline",
        }
    }
}

/// Completion of a dispatched signal lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    /// Dispatch this outcome belongs to.
    pub id: DispatchId,
    /// Report or failure.
    pub result: Result<SignalReport, DispatchFailure>,
    /// Time spent in the lookup.
    pub elapsed: Duration,
}

/// Port for dispatching signal lookups.
pub trait SignalDispatchPort: Send + Sync {
    /// Start a lookup. Must not block the caller.
    fn dispatch(&self, request: SignalRequest);
}
