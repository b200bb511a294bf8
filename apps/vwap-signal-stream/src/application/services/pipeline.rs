//! Tick Pipeline
//!
//! The synchronous ingestion path for one instrument stream:
//!
//! ```text
//! frame ─▶ decode ─▶ resolve delta ─▶ VWAP ─▶ candle ─▶ touch check
//!                          │                         │            │
//!                     suppressed               re-arm latch    dispatch
//! ```
//!
//! All aggregator state is owned here and mutated only by the caller's
//! task. Signal lookups leave through [`SignalDispatchPort`] with a
//! by-value snapshot and come back through
//! [`TickPipeline::on_dispatch_outcome`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::NaiveTime;
use serde::Serialize;

use crate::application::ports::{
    DispatchOutcome, EventPublisherPort, SignalDispatchPort, SignalRequest, StreamEvent,
};
use crate::domain::candle::{Candle, CandleBuilder};
use crate::domain::clock::SessionClock;
use crate::domain::signal::{DEFAULT_TOUCH_THRESHOLD, DispatchId, SignalCoordinator, TriggerState};
use crate::domain::tick::{self, DecodeError, Tick};
use crate::domain::volume::VolumeDeltaResolver;
use crate::domain::vwap::{SessionVwap, VwapStatistics};
use crate::infrastructure::metrics::{self, DropReason};

// =============================================================================
// Configuration
// =============================================================================

/// Construction parameters for the pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    /// Local time at which a trading session starts.
    pub session_start: NaiveTime,
    /// Distance from VWAP that counts as a touch.
    pub touch_threshold: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            session_start: SessionVwap::default_session_start(),
            touch_threshold: DEFAULT_TOUCH_THRESHOLD,
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Pipeline counters, shared with the health endpoint.
#[derive(Debug, Default)]
pub struct PipelineStats {
    frames: AtomicU64,
    decode_errors: AtomicU64,
    ticks_processed: AtomicU64,
    ticks_suppressed: AtomicU64,
    resolver_fallbacks: AtomicU64,
    candles_closed: AtomicU64,
    signals_dispatched: AtomicU64,
    signals_generated: AtomicU64,
    dispatch_failures: AtomicU64,
    last_vwap: parking_lot::RwLock<Option<f64>>,
}

impl PipelineStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            ticks_processed: self.ticks_processed.load(Ordering::Relaxed),
            ticks_suppressed: self.ticks_suppressed.load(Ordering::Relaxed),
            resolver_fallbacks: self.resolver_fallbacks.load(Ordering::Relaxed),
            candles_closed: self.candles_closed.load(Ordering::Relaxed),
            signals_dispatched: self.signals_dispatched.load(Ordering::Relaxed),
            signals_generated: self.signals_generated.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            vwap: *self.last_vwap.read(),
        }
    }
}

/// Copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PipelineStatsSnapshot {
    /// Frames handed to the pipeline.
    pub frames: u64,
    /// Frames rejected by the decoder.
    pub decode_errors: u64,
    /// Ticks that reached the aggregators.
    pub ticks_processed: u64,
    /// Ticks without new volume.
    pub ticks_suppressed: u64,
    /// Cumulative-volume rollbacks.
    pub resolver_fallbacks: u64,
    /// Candles completed.
    pub candles_closed: u64,
    /// Signal lookups dispatched.
    pub signals_dispatched: u64,
    /// Signal lookups that produced a signal.
    pub signals_generated: u64,
    /// Signal lookups that failed.
    pub dispatch_failures: u64,
    /// Last published VWAP.
    pub vwap: Option<f64>,
}

// =============================================================================
// Outcome
// =============================================================================

/// What the pipeline did with one tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No new volume; aggregators untouched.
    Suppressed,
    /// Tick reached the aggregators.
    Processed(ProcessedTick),
}

/// Effects of a processed tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedTick {
    /// Tick price.
    pub price: f64,
    /// Resolved volume delta.
    pub volume_delta: i64,
    /// VWAP after the tick.
    pub vwap: Option<f64>,
    /// Signal lookup fired by this tick.
    pub dispatched: Option<DispatchId>,
    /// Candle completed by this tick.
    pub closed_candle: Option<Candle>,
    /// Whether this tick started a new session.
    pub session_reset: bool,
}

// =============================================================================
// Pipeline
// =============================================================================

/// Per-stream ingestion state.
pub struct TickPipeline {
    resolver: VolumeDeltaResolver,
    vwap: SessionVwap,
    candles: CandleBuilder,
    coordinator: SignalCoordinator,
    dispatcher: Arc<dyn SignalDispatchPort>,
    events: Arc<dyn EventPublisherPort>,
    stats: Arc<PipelineStats>,
}

impl std::fmt::Debug for TickPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickPipeline")
            .field("resolver", &self.resolver)
            .field("vwap", &self.vwap)
            .field("candles", &self.candles)
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

impl TickPipeline {
    /// Create a pipeline with fresh aggregators.
    #[must_use]
    pub fn new(
        config: PipelineConfig,
        clock: Arc<dyn SessionClock>,
        dispatcher: Arc<dyn SignalDispatchPort>,
        events: Arc<dyn EventPublisherPort>,
    ) -> Self {
        Self {
            resolver: VolumeDeltaResolver::new(),
            vwap: SessionVwap::new(config.session_start, Arc::clone(&clock)),
            candles: CandleBuilder::new(clock),
            coordinator: SignalCoordinator::new(config.touch_threshold),
            dispatcher,
            events,
            stats: Arc::new(PipelineStats::default()),
        }
    }

    /// Decode and process one raw frame.
    ///
    /// # Errors
    ///
    /// Returns the decode error for malformed or non-quote frames. No state
    /// is changed in that case.
    pub fn process_frame(&mut self, frame: &[u8]) -> Result<TickOutcome, DecodeError> {
        let started = Instant::now();
        PipelineStats::bump(&self.stats.frames);

        let tick = match tick::decode(frame) {
            Ok(tick) => tick,
            Err(err) => {
                PipelineStats::bump(&self.stats.decode_errors);
                metrics::record_frame_dropped(match err {
                    DecodeError::TooShort { .. } => DropReason::TooShort,
                    DecodeError::UnexpectedType(_) => DropReason::UnexpectedType,
                });
                tracing::trace!(error = %err, len = frame.len(), "Dropping frame");
                return Err(err);
            }
        };

        let outcome = self.process_tick(&tick);
        metrics::record_tick_duration(started.elapsed());
        Ok(outcome)
    }

    /// Process one decoded tick.
    pub fn process_tick(&mut self, tick: &Tick) -> TickOutcome {
        let resolved = self.resolver.resolve(
            i64::from(tick.cumulative_volume),
            i64::from(tick.last_quantity),
        );

        if resolved.fallback {
            PipelineStats::bump(&self.stats.resolver_fallbacks);
            metrics::record_resolver_fallback();
            tracing::trace!(
                cumulative_volume = tick.cumulative_volume,
                last_quantity = tick.last_quantity,
                "Cumulative volume went backwards"
            );
        }

        if !resolved.should_process {
            PipelineStats::bump(&self.stats.ticks_suppressed);
            metrics::record_tick_suppressed();
            return TickOutcome::Suppressed;
        }

        PipelineStats::bump(&self.stats.ticks_processed);
        metrics::record_tick_processed();

        let price = f64::from(tick.price);
        let timestamp = i64::from(tick.timestamp);
        let delta = resolved.delta;

        let update = self.vwap.update(price, delta, timestamp);

        if let Some(session_date) = update.session_reset {
            tracing::info!(%session_date, "VWAP session started");
            metrics::record_session_reset();
            self.events.publish(StreamEvent::SessionReset { session_date });
        }

        if let Some(vwap) = update.vwap {
            *self.stats.last_vwap.write() = Some(vwap);
            metrics::set_vwap(vwap);
            self.events.publish(StreamEvent::VwapUpdated {
                vwap,
                price,
                timestamp,
            });
        }

        tracing::debug!(price, delta, vwap = ?update.vwap, "Tick processed");

        let closed_candle = self.candles.update(price, delta, timestamp);
        if let Some(candle) = &closed_candle {
            self.coordinator.on_candle_closed();
            PipelineStats::bump(&self.stats.candles_closed);
            metrics::record_candle_closed();
            tracing::info!(
                start = %candle.start_time,
                open = candle.open,
                high = candle.high,
                low = candle.low,
                close = candle.close,
                volume = candle.volume,
                "Candle closed"
            );
            self.events.publish(StreamEvent::CandleClosed(*candle));
        }

        // A tick that opens a new interval is checked against that interval's latch.
        let dispatched = self.check_touch(price, update.vwap, timestamp);

        TickOutcome::Processed(ProcessedTick {
            price,
            volume_delta: delta,
            vwap: update.vwap,
            dispatched,
            closed_candle,
            session_reset: update.session_reset.is_some(),
        })
    }

    fn check_touch(&mut self, price: f64, vwap: Option<f64>, timestamp: i64) -> Option<DispatchId> {
        let vwap_value = vwap?;
        let id = self.coordinator.observe(price, vwap)?;

        tracing::info!(price, vwap = vwap_value, dispatch = %id, "VWAP touch detected");
        PipelineStats::bump(&self.stats.signals_dispatched);
        metrics::record_signal_dispatched();

        self.dispatcher.dispatch(SignalRequest {
            id,
            price,
            vwap: vwap_value,
            timestamp,
        });
        Some(id)
    }

    /// Apply the result of a dispatched signal lookup.
    pub fn on_dispatch_outcome(&mut self, outcome: DispatchOutcome) {
        metrics::record_dispatch_duration(outcome.elapsed);

        match outcome.result {
            Ok(report) => {
                PipelineStats::bump(&self.stats.signals_generated);
                metrics::record_signal_generated(report.signal.as_str());
                tracing::info!(
                    dispatch = %outcome.id,
                    signal = %report.signal,
                    pcr = report.pcr,
                    total_put_oi = report.total_put_oi,
                    total_call_oi = report.total_call_oi,
                    price = report.price,
                    vwap = report.vwap,
                    "Trade signal generated"
                );
                self.events.publish(StreamEvent::SignalGenerated(report));
            }
            Err(failure) => {
                PipelineStats::bump(&self.stats.dispatch_failures);
                metrics::record_dispatch_failure(failure.kind());
                let rearmed = self.coordinator.on_dispatch_failed(outcome.id);
                tracing::warn!(
                    dispatch = %outcome.id,
                    error = %failure,
                    rearmed,
                    "Signal lookup failed"
                );
            }
        }
    }

    /// VWAP accumulator snapshot.
    #[must_use]
    pub fn vwap_statistics(&self) -> VwapStatistics {
        self.vwap.statistics()
    }

    /// Current trigger latch state.
    #[must_use]
    pub const fn trigger_state(&self) -> TriggerState {
        self.coordinator.state()
    }

    /// Candle still being built.
    #[must_use]
    pub const fn open_candle(&self) -> Option<&Candle> {
        self.candles.current()
    }

    /// Shared counters.
    #[must_use]
    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }
}
