#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! VWAP Signal Stream
//!
//! Consumes a live binary quote feed for one instrument, maintains a
//! session VWAP and 5-minute candles, and when price comes within a
//! threshold of VWAP fetches the option chain and emits a PCR-based
//! BUY CALL / BUY PUT signal.
//!
//! # Layers (inside to outside)
//!
//! - **Domain**: pure aggregation logic
//!   - `tick`: binary quote decoder
//!   - `volume`: cumulative-to-incremental volume
//!   - `vwap`: session VWAP
//!   - `candle`: OHLCV candles
//!   - `signal`: PCR analysis and the trigger latch
//!
//! - **Application**: ports and the ingestion path
//!   - `ports`: option chain, signal dispatch, event publishing
//!   - `services`: `TickPipeline`, `StreamEngine`
//!
//! - **Infrastructure**: adapters
//!   - `dhan`: feed WebSocket and option-chain REST clients
//!   - `dispatch`, `events`, `health`, `config`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! Feed WS ──frames──▶ StreamEngine ──touch──▶ Dispatcher ──▶ REST option chain
//!                      (pipeline)  ◀─outcome──┘
//!                          │
//!                          └──events──▶ EventHub ──▶ subscribers
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Decoding and aggregation with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::candle::{Candle, CandleBuilder};
pub use domain::clock::{FixedOffsetClock, SessionClock};
pub use domain::signal::{OptionChainSnapshot, Signal, SignalCoordinator, SignalReport};
pub use domain::tick::{DecodeError, Tick};
pub use domain::vwap::SessionVwap;

// Application
pub use application::ports::{
    EventPublisherPort, OptionChainError, OptionChainPort, SignalDispatchPort, StreamEvent,
    Underlying,
};
pub use application::services::{EngineExit, PipelineConfig, StreamEngine, TickPipeline};

// Infrastructure config
pub use infrastructure::config::{ConfigError, Credentials, StreamConfig};

// Adapters
pub use infrastructure::dhan::{DhanRestClient, FeedClient, FeedClientConfig, FeedState};
pub use infrastructure::dispatch::TokioSignalDispatcher;
pub use infrastructure::events::EventHub;

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
