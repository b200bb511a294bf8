//! Fixed-Interval Candle Builder
//!
//! Buckets ticks into 5-minute OHLCV candles aligned to local wall-clock
//! time. A candle is finalized, and handed to the caller by value, when the
//! first tick of a different bucket arrives.
//!
//! Volume deltas are accumulated as given: zero or negative deltas still
//! move high/low/close and add to volume, so volume can shrink. Callers that
//! want trade-only candles filter before calling [`CandleBuilder::update`].

use std::sync::Arc;

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use super::clock::SessionClock;

/// Candle width in minutes.
pub const CANDLE_INTERVAL_MINUTES: u32 = 5;

/// An OHLCV candle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// First price in the interval.
    pub open: f64,
    /// Highest price in the interval.
    pub high: f64,
    /// Lowest price in the interval.
    pub low: f64,
    /// Last price in the interval.
    pub close: f64,
    /// Summed volume deltas.
    pub volume: i64,
    /// Local start of the interval.
    pub start_time: NaiveDateTime,
}

impl Candle {
    fn open_at(price: f64, volume: i64, start_time: NaiveDateTime) -> Self {
        Self {
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
            start_time,
        }
    }

    fn apply(&mut self, price: f64, volume: i64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += volume;
    }

    /// Local end of the interval (exclusive).
    #[must_use]
    pub fn end_time(&self) -> NaiveDateTime {
        self.start_time + chrono::Duration::minutes(i64::from(CANDLE_INTERVAL_MINUTES))
    }
}

/// Builds consecutive fixed-interval candles from a tick stream.
#[derive(Debug)]
pub struct CandleBuilder {
    clock: Arc<dyn SessionClock>,
    current: Option<Candle>,
}

impl CandleBuilder {
    /// Create a builder with no open candle.
    #[must_use]
    pub fn new(clock: Arc<dyn SessionClock>) -> Self {
        Self {
            clock,
            current: None,
        }
    }

    /// Start of the bucket containing `timestamp`.
    #[must_use]
    pub fn bucket_start(&self, timestamp: i64) -> NaiveDateTime {
        let local = self.clock.local_datetime(timestamp);
        let minute = (local.minute() / CANDLE_INTERVAL_MINUTES) * CANDLE_INTERVAL_MINUTES;
        local
            .with_minute(minute)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(local)
    }

    /// Feed one tick.
    ///
    /// Returns the candle that this tick completed, if it opened a new
    /// bucket. The very first tick completes nothing.
    pub fn update(&mut self, price: f64, volume_delta: i64, timestamp: i64) -> Option<Candle> {
        let bucket = self.bucket_start(timestamp);

        match self.current.as_mut() {
            Some(candle) if candle.start_time == bucket => {
                candle.apply(price, volume_delta);
                None
            }
            _ => self
                .current
                .replace(Candle::open_at(price, volume_delta, bucket)),
        }
    }

    /// The candle still being built.
    #[must_use]
    pub const fn current(&self) -> Option<&Candle> {
        self.current.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::FixedOffsetClock;
    use chrono::NaiveDate;

    // 2024-06-03 09:00:00 UTC
    const NINE: i64 = 1_717_405_200;

    fn at(minute: i64, second: i64) -> i64 {
        NINE + minute * 60 + second
    }

    fn builder() -> CandleBuilder {
        CandleBuilder::new(Arc::new(FixedOffsetClock::utc()))
    }

    fn local(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 3)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn bucket_truncates_to_five_minutes() {
        let builder = builder();
        assert_eq!(builder.bucket_start(at(15, 0)), local(9, 15));
        assert_eq!(builder.bucket_start(at(17, 42)), local(9, 15));
        assert_eq!(builder.bucket_start(at(19, 59)), local(9, 15));
        assert_eq!(builder.bucket_start(at(20, 0)), local(9, 20));
    }

    #[test]
    fn first_tick_opens_without_emitting() {
        let mut builder = builder();
        assert!(builder.update(100.0, 5, at(15, 0)).is_none());

        let open = builder.current().unwrap();
        assert_eq!(open.open, 100.0);
        assert_eq!(open.volume, 5);
        assert_eq!(open.start_time, local(9, 15));
    }

    #[test]
    fn emits_exactly_once_at_interval_boundary() {
        let mut builder = builder();

        assert!(builder.update(100.0, 10, at(15, 5)).is_none());
        assert!(builder.update(104.0, 20, at(16, 30)).is_none());
        assert!(builder.update(98.0, 5, at(19, 10)).is_none());

        let closed = builder.update(101.0, 7, at(20, 1)).unwrap();
        assert_eq!(closed.open, 100.0);
        assert_eq!(closed.high, 104.0);
        assert_eq!(closed.low, 98.0);
        assert_eq!(closed.close, 98.0);
        assert_eq!(closed.volume, 35);
        assert_eq!(closed.start_time, local(9, 15));
        assert_eq!(closed.end_time(), local(9, 20));

        let open = builder.current().unwrap();
        assert_eq!(open.open, 101.0);
        assert_eq!(open.volume, 7);
        assert_eq!(open.start_time, local(9, 20));

        assert!(builder.update(102.0, 1, at(24, 59)).is_none());
    }

    #[test]
    fn skipped_intervals_emit_only_the_last_open_candle() {
        let mut builder = builder();
        builder.update(100.0, 1, at(15, 0));

        let closed = builder.update(110.0, 1, at(45, 0)).unwrap();
        assert_eq!(closed.start_time, local(9, 15));
        assert_eq!(builder.current().unwrap().start_time, local(9, 45));
    }

    #[test]
    fn non_positive_volume_is_accumulated_as_given() {
        let mut builder = builder();
        builder.update(100.0, 10, at(15, 0));
        builder.update(105.0, 0, at(15, 30));
        builder.update(95.0, -4, at(16, 0));

        let candle = builder.current().unwrap();
        assert_eq!(candle.high, 105.0);
        assert_eq!(candle.low, 95.0);
        assert_eq!(candle.close, 95.0);
        assert_eq!(candle.volume, 6);
    }

    #[test]
    fn buckets_follow_local_time() {
        let mut builder = CandleBuilder::new(Arc::new(FixedOffsetClock::default()));
        // 03:47 UTC is 09:17 IST.
        builder.update(100.0, 1, NINE - 6 * 3_600 + 47 * 60);
        assert_eq!(builder.current().unwrap().start_time, local(9, 15));
    }
}
