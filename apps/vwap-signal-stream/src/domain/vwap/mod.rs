//! Session VWAP Accumulator
//!
//! Running volume-weighted average price scoped to one trading session.
//! A session begins at a configured local time; the first tick at or after
//! that time on a new calendar date resets the sums.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

use super::clock::SessionClock;

/// Default session start hour (exchange local time).
pub const DEFAULT_SESSION_START_HOUR: u32 = 9;

/// Default session start minute (exchange local time).
pub const DEFAULT_SESSION_START_MINUTE: u32 = 15;

/// Result of feeding one tick to the accumulator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VwapUpdate {
    /// VWAP after this tick.
    pub vwap: Option<f64>,
    /// Date of the session this tick started, if it reset the accumulator.
    pub session_reset: Option<NaiveDate>,
}

/// Point-in-time view of the accumulator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VwapStatistics {
    /// Current VWAP.
    pub vwap: Option<f64>,
    /// Σ(price × volume) for the session.
    pub cumulative_pv: f64,
    /// Σ(volume) for the session.
    pub cumulative_volume: i64,
    /// Ticks accumulated this session.
    pub tick_count: u64,
    /// Whether a session has started.
    pub session_initialized: bool,
    /// Date of the current session.
    pub session_date: Option<NaiveDate>,
    /// Local time of the last accumulated tick.
    pub last_update_time: Option<NaiveDateTime>,
}

/// Session-scoped VWAP accumulator.
#[derive(Debug)]
pub struct SessionVwap {
    clock: Arc<dyn SessionClock>,
    session_start: NaiveTime,
    cumulative_pv: f64,
    cumulative_volume: i64,
    current_vwap: Option<f64>,
    session_date: Option<NaiveDate>,
    tick_count: u64,
    last_update_time: Option<i64>,
}

impl SessionVwap {
    /// Create an accumulator whose sessions start at `session_start`.
    #[must_use]
    pub fn new(session_start: NaiveTime, clock: Arc<dyn SessionClock>) -> Self {
        Self {
            clock,
            session_start,
            cumulative_pv: 0.0,
            cumulative_volume: 0,
            current_vwap: None,
            session_date: None,
            tick_count: 0,
            last_update_time: None,
        }
    }

    /// Default session start (09:15).
    #[must_use]
    pub fn default_session_start() -> NaiveTime {
        NaiveTime::from_hms_opt(DEFAULT_SESSION_START_HOUR, DEFAULT_SESSION_START_MINUTE, 0)
            .unwrap_or(NaiveTime::MIN)
    }

    /// Feed one tick.
    ///
    /// Ticks with non-positive volume only participate in session-boundary
    /// detection.
    pub fn update(&mut self, price: f64, volume_delta: i64, timestamp: i64) -> VwapUpdate {
        let local = self.clock.local_datetime(timestamp);
        let session_reset = self.is_new_session(local).then(|| {
            self.reset();
            self.session_date = Some(local.date());
            local.date()
        });

        if volume_delta <= 0 {
            return VwapUpdate {
                vwap: self.current_vwap,
                session_reset,
            };
        }

        #[allow(clippy::cast_precision_loss)]
        let volume = volume_delta as f64;
        self.cumulative_pv += price * volume;
        self.cumulative_volume += volume_delta;

        if self.cumulative_volume > 0 {
            #[allow(clippy::cast_precision_loss)]
            let total = self.cumulative_volume as f64;
            self.current_vwap = Some(self.cumulative_pv / total);
        }

        self.tick_count += 1;
        self.last_update_time = Some(timestamp);

        VwapUpdate {
            vwap: self.current_vwap,
            session_reset,
        }
    }

    fn is_new_session(&self, local: NaiveDateTime) -> bool {
        let after_start = local.time() >= self.session_start;
        match self.session_date {
            None => after_start,
            Some(date) => local.date() > date && after_start,
        }
    }

    /// Clear the running sums. The session date is kept.
    pub const fn reset(&mut self) {
        self.cumulative_pv = 0.0;
        self.cumulative_volume = 0;
        self.current_vwap = None;
        self.tick_count = 0;
    }

    /// Current VWAP.
    #[must_use]
    pub const fn vwap(&self) -> Option<f64> {
        self.current_vwap
    }

    /// Date of the current session, if one has started.
    #[must_use]
    pub const fn session_date(&self) -> Option<NaiveDate> {
        self.session_date
    }

    /// Snapshot of the accumulator state.
    #[must_use]
    pub fn statistics(&self) -> VwapStatistics {
        VwapStatistics {
            vwap: self.current_vwap,
            cumulative_pv: self.cumulative_pv,
            cumulative_volume: self.cumulative_volume,
            tick_count: self.tick_count,
            session_initialized: self.session_date.is_some(),
            session_date: self.session_date,
            last_update_time: self
                .last_update_time
                .map(|ts| self.clock.local_datetime(ts)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::FixedOffsetClock;
    use proptest::prelude::*;

    // 2024-06-03 00:00:00 UTC; the tests run on a UTC clock.
    const DAY: i64 = 1_717_372_800;
    const ONE_DAY: i64 = 86_400;

    fn at(day_offset: i64, hour: i64, minute: i64) -> i64 {
        DAY + day_offset * ONE_DAY + hour * 3_600 + minute * 60
    }

    fn engine() -> SessionVwap {
        SessionVwap::new(
            SessionVwap::default_session_start(),
            Arc::new(FixedOffsetClock::utc()),
        )
    }

    #[test]
    fn first_tick_after_session_start_initializes() {
        let mut vwap = engine();
        let update = vwap.update(100.0, 10, at(0, 9, 15));
        assert_eq!(
            update.session_reset,
            Some(NaiveDate::from_ymd_opt(2024, 6, 3).unwrap())
        );
        assert_eq!(update.vwap, Some(100.0));
        assert!(vwap.statistics().session_initialized);
    }

    #[test]
    fn weights_price_by_volume() {
        let mut vwap = engine();
        vwap.update(100.0, 10, at(0, 9, 20));
        let update = vwap.update(110.0, 30, at(0, 9, 21));
        assert_eq!(update.session_reset, None);
        assert_eq!(update.vwap, Some(107.5));

        let stats = vwap.statistics();
        assert_eq!(stats.cumulative_volume, 40);
        assert_eq!(stats.cumulative_pv, 4_300.0);
        assert_eq!(stats.tick_count, 2);
    }

    #[test]
    fn non_positive_volume_leaves_vwap_unchanged() {
        let mut vwap = engine();
        vwap.update(100.0, 10, at(0, 9, 20));
        assert_eq!(vwap.update(500.0, 0, at(0, 9, 21)).vwap, Some(100.0));
        assert_eq!(vwap.update(500.0, -5, at(0, 9, 22)).vwap, Some(100.0));
        assert_eq!(vwap.statistics().tick_count, 1);
    }

    #[test]
    fn tick_before_first_session_start_does_not_initialize() {
        let mut vwap = engine();
        let update = vwap.update(100.0, 10, at(0, 9, 0));
        assert_eq!(update.session_reset, None);
        assert!(!vwap.statistics().session_initialized);

        // Pre-session volume is discarded when the session starts.
        let update = vwap.update(120.0, 10, at(0, 9, 15));
        assert!(update.session_reset.is_some());
        assert_eq!(update.vwap, Some(120.0));
    }

    #[test]
    fn new_date_resets_only_at_session_start() {
        let mut vwap = engine();
        vwap.update(100.0, 10, at(0, 10, 0));

        // Next day before the open still belongs to the previous session.
        let early = vwap.update(200.0, 10, at(1, 9, 0));
        assert_eq!(early.session_reset, None);
        assert_eq!(early.vwap, Some(150.0));

        let open = vwap.update(300.0, 10, at(1, 9, 15));
        assert_eq!(
            open.session_reset,
            Some(NaiveDate::from_ymd_opt(2024, 6, 4).unwrap())
        );
        assert_eq!(open.vwap, Some(300.0));

        // Same date, later time: no further reset.
        assert_eq!(vwap.update(300.0, 10, at(1, 15, 0)).session_reset, None);
    }

    #[test]
    fn reset_with_zero_volume_clears_vwap() {
        let mut vwap = engine();
        vwap.update(100.0, 10, at(0, 10, 0));
        let update = vwap.update(100.0, 0, at(1, 9, 30));
        assert!(update.session_reset.is_some());
        assert_eq!(update.vwap, None);
    }

    #[test]
    fn session_start_respects_clock_offset() {
        let ist = FixedOffsetClock::default();
        let mut vwap = SessionVwap::new(SessionVwap::default_session_start(), Arc::new(ist));

        // 03:44 UTC is 09:14 IST.
        assert!(vwap.update(100.0, 1, at(0, 3, 44)).session_reset.is_none());
        // 03:45 UTC is 09:15 IST.
        assert!(vwap.update(100.0, 1, at(0, 3, 45)).session_reset.is_some());
    }

    #[test]
    fn records_last_update_time() {
        let mut vwap = engine();
        vwap.update(100.0, 10, at(0, 9, 30));
        let stats = vwap.statistics();
        assert_eq!(
            stats.last_update_time,
            Some(
                NaiveDate::from_ymd_opt(2024, 6, 3)
                    .unwrap()
                    .and_hms_opt(9, 30, 0)
                    .unwrap()
            )
        );
    }

    proptest! {
        #[test]
        fn matches_volume_weighted_mean(
            ticks in prop::collection::vec((1.0_f64..100_000.0, 1_i64..10_000), 1..100),
        ) {
            let mut vwap = engine();
            let mut pv = 0.0;
            let mut volume = 0.0;
            let mut last = None;
            for (i, (price, delta)) in ticks.iter().enumerate() {
                let ts = at(0, 9, 15) + i64::try_from(i).unwrap();
                last = vwap.update(*price, *delta, ts).vwap;
                pv += price * (*delta as f64);
                volume += *delta as f64;
            }
            let expected = pv / volume;
            let actual = last.unwrap();
            prop_assert!((actual - expected).abs() <= expected.abs() * 1e-9);
        }
    }
}
