//! Signal Domain
//!
//! Put/call open-interest analysis and the trigger latch that decides when a
//! signal lookup may fire.
//!
//! # Trigger Latch
//!
//! ```text
//!            price within threshold of VWAP
//!   Armed ────────────────────────────────▶ Cooldown(id)
//!     ▲                                         │
//!     └──── candle closed / dispatch id failed ─┘
//! ```
//!
//! The latch is set synchronously when the lookup is requested, so a second
//! qualifying tick in the same interval never fires again.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default distance from VWAP, in price units, that counts as a touch.
pub const DEFAULT_TOUCH_THRESHOLD: f64 = 10.0;

/// PCR above which the signal is bullish.
pub const BULLISH_PCR: f64 = 1.0;

// =============================================================================
// Option Chain
// =============================================================================

/// Open interest and last price for both legs of one strike.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StrikeData {
    /// Call open interest.
    pub call_oi: u64,
    /// Put open interest.
    pub put_oi: u64,
    /// Call last traded price.
    pub call_ltp: f64,
    /// Put last traded price.
    pub put_ltp: f64,
}

/// One row of an option chain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrikeQuote {
    /// Strike price.
    pub strike: f64,
    /// Leg data at this strike.
    #[serde(flatten)]
    pub data: StrikeData,
}

/// Point-in-time option chain for one expiry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionChainSnapshot {
    /// Expiry the chain belongs to, as reported by the source.
    pub expiry: Option<String>,
    /// Strikes in ascending order.
    pub strikes: Vec<StrikeQuote>,
}

impl OptionChainSnapshot {
    /// Build a snapshot, sorting strikes ascending.
    #[must_use]
    pub fn new(expiry: Option<String>, mut strikes: Vec<StrikeQuote>) -> Self {
        strikes.sort_by(|a, b| a.strike.total_cmp(&b.strike));
        Self { expiry, strikes }
    }

    /// Sum of call open interest across all strikes.
    #[must_use]
    pub fn total_call_oi(&self) -> u64 {
        self.strikes.iter().map(|s| s.data.call_oi).sum()
    }

    /// Sum of put open interest across all strikes.
    #[must_use]
    pub fn total_put_oi(&self) -> u64 {
        self.strikes.iter().map(|s| s.data.put_oi).sum()
    }

    /// Put/call ratio of total open interest; `0.0` when there is no call OI.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn pcr(&self) -> f64 {
        let call = self.total_call_oi();
        if call == 0 {
            return 0.0;
        }
        self.total_put_oi() as f64 / call as f64
    }

    /// Full PCR analysis of the chain.
    #[must_use]
    pub fn analyze(&self) -> PcrAnalysis {
        let pcr = self.pcr();
        PcrAnalysis {
            pcr,
            total_put_oi: self.total_put_oi(),
            total_call_oi: self.total_call_oi(),
            strikes: self.strikes.len(),
            signal: Signal::classify(pcr),
        }
    }
}

// =============================================================================
// Signal
// =============================================================================

/// Directional trade signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Signal {
    /// Put-heavy chain; go long calls.
    BuyCall,
    /// Call-heavy or empty chain; go long puts.
    BuyPut,
}

impl Signal {
    /// Classify a put/call ratio.
    #[must_use]
    pub fn classify(pcr: f64) -> Self {
        if pcr > BULLISH_PCR {
            Self::BuyCall
        } else {
            Self::BuyPut
        }
    }

    /// Returns the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BuyCall => "BUY CALL",
            Self::BuyPut => "BUY PUT",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of analysing an option chain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PcrAnalysis {
    /// Put/call ratio.
    pub pcr: f64,
    /// Total put open interest.
    pub total_put_oi: u64,
    /// Total call open interest.
    pub total_call_oi: u64,
    /// Number of strikes in the chain.
    pub strikes: usize,
    /// Derived signal.
    pub signal: Signal,
}

/// A generated signal with the market context that triggered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalReport {
    /// Derived signal.
    pub signal: Signal,
    /// Put/call ratio.
    pub pcr: f64,
    /// Total put open interest.
    pub total_put_oi: u64,
    /// Total call open interest.
    pub total_call_oi: u64,
    /// Number of strikes analysed.
    pub strikes: usize,
    /// Price at the touch.
    pub price: f64,
    /// VWAP at the touch.
    pub vwap: f64,
    /// Expiry of the analysed chain.
    pub expiry: Option<String>,
}

impl SignalReport {
    /// Combine a chain analysis with the triggering price and VWAP.
    #[must_use]
    pub fn new(snapshot: &OptionChainSnapshot, price: f64, vwap: f64) -> Self {
        let analysis = snapshot.analyze();
        Self {
            signal: analysis.signal,
            pcr: analysis.pcr,
            total_put_oi: analysis.total_put_oi,
            total_call_oi: analysis.total_call_oi,
            strikes: analysis.strikes,
            price,
            vwap,
            expiry: snapshot.expiry.clone(),
        }
    }
}

// =============================================================================
// Trigger Latch
// =============================================================================

/// Identifies one signal dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DispatchId(pub u64);

impl fmt::Display for DispatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Latch state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    /// May fire.
    Armed,
    /// Fired this interval.
    Cooldown {
        /// Dispatch in flight or completed for this interval.
        dispatch: DispatchId,
    },
}

/// Decides when a VWAP touch fires a signal lookup.
#[derive(Debug, Clone)]
pub struct SignalCoordinator {
    touch_threshold: f64,
    state: TriggerState,
    next_id: u64,
}

impl Default for SignalCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_TOUCH_THRESHOLD)
    }
}

impl SignalCoordinator {
    /// Create an armed coordinator.
    #[must_use]
    pub const fn new(touch_threshold: f64) -> Self {
        Self {
            touch_threshold,
            state: TriggerState::Armed,
            next_id: 1,
        }
    }

    /// Observe a processed tick.
    ///
    /// Returns the id of a new dispatch when the price is within the touch
    /// threshold of VWAP and the latch is armed. The latch moves to cooldown
    /// before returning.
    pub fn observe(&mut self, price: f64, vwap: Option<f64>) -> Option<DispatchId> {
        let vwap = vwap?;
        if !self.is_armed() || (price - vwap).abs() > self.touch_threshold {
            return None;
        }

        let id = DispatchId(self.next_id);
        self.next_id += 1;
        self.state = TriggerState::Cooldown { dispatch: id };
        Some(id)
    }

    /// A candle closed; re-arm.
    pub const fn on_candle_closed(&mut self) {
        self.state = TriggerState::Armed;
    }

    /// A dispatch failed. Re-arms only if `id` is the current interval's
    /// dispatch; returns whether it did.
    pub fn on_dispatch_failed(&mut self, id: DispatchId) -> bool {
        match self.state {
            TriggerState::Cooldown { dispatch } if dispatch == id => {
                self.state = TriggerState::Armed;
                true
            }
            _ => false,
        }
    }

    /// Current latch state.
    #[must_use]
    pub const fn state(&self) -> TriggerState {
        self.state
    }

    /// Whether the next touch may fire.
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        matches!(self.state, TriggerState::Armed)
    }

    /// Configured touch threshold.
    #[must_use]
    pub const fn touch_threshold(&self) -> f64 {
        self.touch_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn strike(strike: f64, call_oi: u64, put_oi: u64) -> StrikeQuote {
        StrikeQuote {
            strike,
            data: StrikeData {
                call_oi,
                put_oi,
                ..StrikeData::default()
            },
        }
    }

    #[test]
    fn put_heavy_chain_is_buy_call() {
        let chain = OptionChainSnapshot::new(
            None,
            vec![strike(81_000.0, 60, 100), strike(81_100.0, 40, 50)],
        );
        let analysis = chain.analyze();
        assert_eq!(analysis.total_put_oi, 150);
        assert_eq!(analysis.total_call_oi, 100);
        assert!((analysis.pcr - 1.5).abs() < f64::EPSILON);
        assert_eq!(analysis.signal, Signal::BuyCall);
        assert_eq!(analysis.strikes, 2);
    }

    #[test]
    fn zero_call_oi_is_buy_put() {
        let chain = OptionChainSnapshot::new(None, vec![strike(81_000.0, 0, 500)]);
        assert_eq!(chain.pcr(), 0.0);
        assert_eq!(chain.analyze().signal, Signal::BuyPut);
    }

    #[test]
    fn empty_chain_is_buy_put() {
        let chain = OptionChainSnapshot::default();
        assert_eq!(chain.pcr(), 0.0);
        assert_eq!(chain.analyze().strikes, 0);
    }

    #[test_case(0.0, Signal::BuyPut)]
    #[test_case(0.7, Signal::BuyPut)]
    #[test_case(1.0, Signal::BuyPut ; "exactly one is not bullish")]
    #[test_case(1.0001, Signal::BuyCall)]
    #[test_case(2.5, Signal::BuyCall)]
    fn classifies_pcr(pcr: f64, expected: Signal) {
        assert_eq!(Signal::classify(pcr), expected);
    }

    #[test]
    fn sorts_strikes() {
        let chain = OptionChainSnapshot::new(
            Some("2024-06-07".into()),
            vec![strike(300.0, 1, 1), strike(100.0, 1, 1), strike(200.0, 1, 1)],
        );
        let strikes: Vec<f64> = chain.strikes.iter().map(|s| s.strike).collect();
        assert_eq!(strikes, vec![100.0, 200.0, 300.0]);
    }

    #[test]
    fn report_carries_context() {
        let chain = OptionChainSnapshot::new(Some("2024-06-07".into()), vec![strike(1.0, 2, 1)]);
        let report = SignalReport::new(&chain, 81_005.0, 81_000.0);
        assert_eq!(report.signal, Signal::BuyPut);
        assert_eq!(report.price, 81_005.0);
        assert_eq!(report.vwap, 81_000.0);
        assert_eq!(report.expiry.as_deref(), Some("2024-06-07"));
    }

    #[test]
    fn signal_display() {
        assert_eq!(Signal::BuyCall.to_string(), "BUY CALL");
        assert_eq!(Signal::BuyPut.to_string(), "BUY PUT");
    }

    #[test]
    fn does_not_fire_without_vwap() {
        let mut coordinator = SignalCoordinator::default();
        assert_eq!(coordinator.observe(100.0, None), None);
        assert!(coordinator.is_armed());
    }

    #[test_case(100.0, 110.0, true ; "at threshold")]
    #[test_case(100.0, 90.0, true ; "at threshold below")]
    #[test_case(100.0, 110.5, false ; "beyond threshold")]
    #[test_case(100.0, 100.0, true ; "exact touch")]
    fn fires_within_threshold(vwap: f64, price: f64, fires: bool) {
        let mut coordinator = SignalCoordinator::new(10.0);
        assert_eq!(coordinator.observe(price, Some(vwap)).is_some(), fires);
    }

    #[test]
    fn fires_once_per_interval() {
        let mut coordinator = SignalCoordinator::default();
        let first = coordinator.observe(100.0, Some(101.0)).unwrap();
        assert_eq!(coordinator.state(), TriggerState::Cooldown { dispatch: first });
        assert_eq!(coordinator.observe(100.0, Some(101.0)), None);
        assert_eq!(coordinator.observe(100.5, Some(100.0)), None);

        coordinator.on_candle_closed();
        let second = coordinator.observe(100.0, Some(101.0)).unwrap();
        assert!(second > first);
    }

    #[test]
    fn failure_re_arms_current_dispatch() {
        let mut coordinator = SignalCoordinator::default();
        let id = coordinator.observe(100.0, Some(100.0)).unwrap();
        assert!(coordinator.on_dispatch_failed(id));
        assert!(coordinator.is_armed());
        assert!(coordinator.observe(100.0, Some(100.0)).is_some());
    }

    #[test]
    fn stale_failure_is_ignored() {
        let mut coordinator = SignalCoordinator::default();
        let stale = coordinator.observe(100.0, Some(100.0)).unwrap();
        coordinator.on_candle_closed();
        let current = coordinator.observe(100.0, Some(100.0)).unwrap();

        assert!(!coordinator.on_dispatch_failed(stale));
        assert_eq!(coordinator.state(), TriggerState::Cooldown { dispatch: current });
    }

    #[test]
    fn failure_while_armed_is_ignored() {
        let mut coordinator = SignalCoordinator::default();
        let id = coordinator.observe(100.0, Some(100.0)).unwrap();
        coordinator.on_candle_closed();
        assert!(!coordinator.on_dispatch_failed(id));
        assert!(coordinator.is_armed());
    }
}
