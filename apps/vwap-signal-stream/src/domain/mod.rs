//! Domain Layer - Tick decoding and streaming aggregation.
//!
//! Pure, synchronous logic with no I/O. Every aggregator is an explicit
//! instance owned by the ingestion path; wall-clock interpretation goes
//! through an injected [`clock::SessionClock`].

/// Session clock abstraction.
pub mod clock;

/// Fixed-interval OHLCV candles.
pub mod candle;

/// Option-chain analysis and the signal trigger latch.
pub mod signal;

/// Binary quote frame decoder.
pub mod tick;

/// Cumulative-to-incremental volume conversion.
pub mod volume;

/// Session-scoped VWAP.
pub mod vwap;
