//! Session Clock
//!
//! Maps feed timestamps (epoch seconds) onto exchange-local wall-clock time.
//! Session boundaries and candle buckets are defined in local time, so the
//! aggregators take the clock as an injected dependency instead of reading
//! the host timezone.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset as _, Utc};

/// Converts epoch seconds to local wall-clock time.
pub trait SessionClock: Send + Sync + std::fmt::Debug {
    /// Local date and time for an epoch timestamp.
    ///
    /// Out-of-range timestamps map to the Unix epoch.
    fn local_datetime(&self, epoch_secs: i64) -> NaiveDateTime;
}

fn utc_datetime(epoch_secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(epoch_secs, 0).unwrap_or_default()
}

/// Clock with a fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedOffsetClock {
    offset: FixedOffset,
}

impl FixedOffsetClock {
    /// Indian Standard Time offset in minutes.
    pub const IST_OFFSET_MINUTES: i32 = 330;

    /// Create a clock `minutes` east of UTC.
    ///
    /// Returns `None` if the offset is a day or more.
    #[must_use]
    pub fn from_offset_minutes(minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(minutes.checked_mul(60)?).map(|offset| Self { offset })
    }

    /// UTC clock.
    #[must_use]
    pub fn utc() -> Self {
        Self {
            offset: Utc.fix(),
        }
    }

    /// Offset from UTC in minutes.
    #[must_use]
    pub fn offset_minutes(&self) -> i32 {
        self.offset.local_minus_utc() / 60
    }
}

impl Default for FixedOffsetClock {
    fn default() -> Self {
        Self::from_offset_minutes(Self::IST_OFFSET_MINUTES).unwrap_or_else(Self::utc)
    }
}

impl SessionClock for FixedOffsetClock {
    fn local_datetime(&self, epoch_secs: i64) -> NaiveDateTime {
        utc_datetime(epoch_secs)
            .with_timezone(&self.offset)
            .naive_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Timelike};

    #[test]
    fn ist_clock_shifts_by_five_and_a_half_hours() {
        let clock = FixedOffsetClock::default();
        assert_eq!(clock.offset_minutes(), 330);

        // 2024-06-03 03:45:00 UTC
        let local = clock.local_datetime(1_717_386_300);
        assert_eq!(local.date(), NaiveDate::from_ymd_opt(2024, 6, 3).unwrap());
        assert_eq!((local.hour(), local.minute()), (9, 15));
    }

    #[test]
    fn utc_clock_is_identity() {
        let clock = FixedOffsetClock::utc();
        let local = clock.local_datetime(0);
        assert_eq!(local, DateTime::UNIX_EPOCH.naive_utc());
    }

    #[test]
    fn rejects_offsets_of_a_day_or_more() {
        assert!(FixedOffsetClock::from_offset_minutes(24 * 60).is_none());
        assert!(FixedOffsetClock::from_offset_minutes(-300).is_some());
    }

    #[test]
    fn out_of_range_timestamp_maps_to_epoch() {
        let clock = FixedOffsetClock::utc();
        assert_eq!(
            clock.local_datetime(i64::MAX),
            DateTime::UNIX_EPOCH.naive_utc()
        );
    }
}
