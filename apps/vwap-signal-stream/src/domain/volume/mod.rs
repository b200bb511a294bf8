//! Volume Delta Resolver
//!
//! Turns the feed's cumulative traded volume into per-tick trade quantity.
//! The feed reports day-cumulative volume; the aggregators need the volume
//! traded since the previous tick.

/// Outcome of resolving one cumulative-volume reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeDelta {
    /// Traded quantity since the previous tick. Never negative.
    pub delta: i64,
    /// Whether downstream aggregators should see this tick.
    pub should_process: bool,
    /// Cumulative volume went backwards and `last_quantity` was used instead.
    pub fallback: bool,
}

/// Stateful cumulative-to-incremental volume converter.
///
/// Holds the last cumulative reading. One instance per stream session.
#[derive(Debug, Default, Clone)]
pub struct VolumeDeltaResolver {
    previous: Option<i64>,
}

impl VolumeDeltaResolver {
    /// Create a resolver that has not seen any tick.
    #[must_use]
    pub const fn new() -> Self {
        Self { previous: None }
    }

    /// Resolve a reading into a volume delta.
    ///
    /// The first reading is always processed; its delta is the cumulative
    /// volume when positive, else the last traded quantity. Later readings
    /// yield the difference to the previous reading, falling back to the
    /// last traded quantity when the feed resets. Ticks without new volume
    /// are flagged as not to be processed.
    pub fn resolve(&mut self, cumulative_volume: i64, last_quantity: i64) -> VolumeDelta {
        let resolved = match self.previous {
            None => VolumeDelta {
                delta: if cumulative_volume > 0 {
                    cumulative_volume
                } else {
                    last_quantity.max(0)
                },
                should_process: true,
                fallback: false,
            },
            Some(previous) => {
                let raw = cumulative_volume - previous;
                let (delta, fallback) = if raw < 0 {
                    (last_quantity.max(0), true)
                } else {
                    (raw, false)
                };
                VolumeDelta {
                    delta,
                    should_process: delta > 0,
                    fallback,
                }
            }
        };

        self.previous = Some(cumulative_volume);
        resolved
    }

    /// Last cumulative reading, if any.
    #[must_use]
    pub const fn previous(&self) -> Option<i64> {
        self.previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn first_tick_uses_cumulative_volume() {
        let mut resolver = VolumeDeltaResolver::new();
        let resolved = resolver.resolve(1_500, 25);
        assert_eq!(resolved.delta, 1_500);
        assert!(resolved.should_process);
        assert!(!resolved.fallback);
        assert_eq!(resolver.previous(), Some(1_500));
    }

    #[test]
    fn first_tick_without_volume_uses_last_quantity() {
        let mut resolver = VolumeDeltaResolver::new();
        let resolved = resolver.resolve(0, 25);
        assert_eq!(resolved.delta, 25);
        assert!(resolved.should_process);
    }

    #[test]
    fn first_tick_is_processed_even_without_any_volume() {
        let mut resolver = VolumeDeltaResolver::new();
        let resolved = resolver.resolve(0, 0);
        assert_eq!(resolved.delta, 0);
        assert!(resolved.should_process);
    }

    #[test]
    fn later_ticks_use_difference() {
        let mut resolver = VolumeDeltaResolver::new();
        resolver.resolve(1_000, 10);
        let resolved = resolver.resolve(1_040, 10);
        assert_eq!(resolved.delta, 40);
        assert!(resolved.should_process);
    }

    #[test]
    fn repeated_frame_is_suppressed_without_phantom_volume() {
        let mut resolver = VolumeDeltaResolver::new();
        resolver.resolve(1_000, 10);

        for _ in 0..3 {
            let resolved = resolver.resolve(1_000, 10);
            assert_eq!(resolved.delta, 0);
            assert!(!resolved.should_process);
        }

        assert_eq!(resolver.resolve(1_010, 10).delta, 10);
    }

    #[test]
    fn rollback_falls_back_to_last_quantity() {
        let mut resolver = VolumeDeltaResolver::new();
        resolver.resolve(5_000, 10);
        let resolved = resolver.resolve(200, 15);
        assert_eq!(resolved.delta, 15);
        assert!(resolved.should_process);
        assert!(resolved.fallback);

        // The lower reading becomes the new baseline.
        assert_eq!(resolver.resolve(230, 5).delta, 30);
    }

    #[test]
    fn rollback_with_non_positive_quantity_is_suppressed() {
        let mut resolver = VolumeDeltaResolver::new();
        resolver.resolve(5_000, 10);
        let resolved = resolver.resolve(100, -4);
        assert_eq!(resolved.delta, 0);
        assert!(!resolved.should_process);
        assert_eq!(resolver.previous(), Some(100));
    }

    #[test]
    fn zero_reading_after_bootstrap_is_not_a_bootstrap() {
        let mut resolver = VolumeDeltaResolver::new();
        assert_eq!(resolver.resolve(0, 25).delta, 25);

        let resolved = resolver.resolve(0, 30);
        assert_eq!(resolved.delta, 0);
        assert!(!resolved.should_process);
        assert_eq!(resolver.previous(), Some(0));
    }

    proptest! {
        #[test]
        fn monotonic_readings_sum_to_total_change(
            start in 0_i64..1_000_000,
            steps in prop::collection::vec(0_i64..10_000, 1..200),
        ) {
            let mut resolver = VolumeDeltaResolver::new();
            resolver.resolve(start, 1);

            let mut current = start;
            let mut sum = 0;
            for step in steps {
                current += step;
                let resolved = resolver.resolve(current, 1);
                prop_assert!(resolved.delta >= 0);
                prop_assert!(!resolved.fallback);
                prop_assert_eq!(resolved.should_process, step > 0);
                sum += resolved.delta;
            }

            prop_assert_eq!(sum, current - start);
        }

        #[test]
        fn deltas_are_never_negative(
            readings in prop::collection::vec((0_i64..100_000, -50_i64..50), 1..200),
        ) {
            let mut resolver = VolumeDeltaResolver::new();
            for (cumulative, last_quantity) in readings {
                let resolved = resolver.resolve(cumulative, last_quantity);
                prop_assert!(resolved.delta >= 0);
                if resolved.fallback {
                    prop_assert_eq!(resolved.delta, last_quantity.max(0));
                }
            }
        }
    }
}
