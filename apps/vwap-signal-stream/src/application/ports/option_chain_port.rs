//! Option Chain Port (Driven Port)
//!
//! Source of option-chain snapshots for the signal lookup.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::signal::OptionChainSnapshot;

/// Option-chain retrieval error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptionChainError {
    /// Request could not be sent or the connection failed.
    #[error("option chain network error: {message}")]
    Network {
        /// Underlying error.
        message: String,
    },

    /// Non-success HTTP status.
    #[error("option chain HTTP {status}: {body}")]
    HttpStatus {
        /// Status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The API answered but reported failure.
    #[error("option chain API failure: {message}")]
    ApiFailure {
        /// Response payload or message.
        message: String,
    },

    /// Response body could not be parsed.
    #[error("option chain parse error: {message}")]
    Parse {
        /// Parser message.
        message: String,
    },

    /// The expiry list was empty.
    #[error("no expiries found for {underlying}")]
    NoExpiries {
        /// Underlying that was queried.
        underlying: Underlying,
    },

    /// Request exceeded its timeout.
    #[error("option chain request timed out: {operation}")]
    Timeout {
        /// Operation that timed out.
        operation: &'static str,
    },
}

impl OptionChainError {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::HttpStatus { .. } => "http_status",
            Self::ApiFailure { .. } => "api_failure",
            Self::Parse { .. } => "parse",
            Self::NoExpiries { .. } => "no_expiries",
            Self::Timeout { .. } => "timeout",
        }
    }
}

/// Underlying instrument of an option chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Underlying {
    /// Underlying security id.
    pub scrip: u32,
    /// Exchange segment of the underlying.
    pub segment: String,
}

impl Underlying {
    /// Create an underlying reference.
    #[must_use]
    pub fn new(scrip: u32, segment: impl Into<String>) -> Self {
        Self {
            scrip,
            segment: segment.into(),
        }
    }
}

impl Default for Underlying {
    /// SENSEX index.
    fn default() -> Self {
        Self::new(51, "IDX_I")
    }
}

impl fmt::Display for Underlying {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.segment, self.scrip)
    }
}

/// Port for fetching option chains.
#[async_trait]
pub trait OptionChainPort: Send + Sync {
    /// Fetch the option chain of the nearest expiry.
    ///
    /// # Errors
    ///
    /// Returns error if the chain cannot be retrieved or parsed.
    async fn fetch_option_chain(
        &self,
        underlying: &Underlying,
    ) -> Result<OptionChainSnapshot, OptionChainError>;
}
