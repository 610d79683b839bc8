//! Timestamp normalization for sensor and frame events.
//!
//! Device timestamps arrive as raw monotonic nanoseconds on several threads.
//! The clock anchors itself at the first timestamp it sees and maps everything
//! onto a small positive seconds timeline. The fixed margin absorbs mildly
//! out-of-order hardware timestamps near the start of a session, so no
//! consumer ever observes a non-positive time value.

use once_cell::sync::OnceCell;

/// Margin added to every converted timestamp, in seconds.
pub const TIME_MARGIN: f64 = 0.01;

/// Maps raw monotonic nanosecond timestamps to session-relative seconds.
///
/// The origin is set by the first `convert` call and is immutable for the
/// lifetime of the clock; reconfiguring the session replaces the clock
/// wholesale instead of re-anchoring it.
#[derive(Debug, Default)]
pub struct Clock {
    origin_ns: OnceCell<i64>,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert a raw timestamp to seconds since the session origin.
    ///
    /// `convert(t) = (t - origin) * 1e-9 + TIME_MARGIN`. The first call
    /// anchors the origin, so it returns exactly `TIME_MARGIN`. Monotonically
    /// non-decreasing input yields monotonically non-decreasing output, and
    /// inputs up to `TIME_MARGIN` older than the origin still map to a
    /// positive value.
    pub fn convert(&self, timestamp_ns: i64) -> f64 {
        let origin = *self.origin_ns.get_or_init(|| timestamp_ns);
        (timestamp_ns - origin) as f64 * 1e-9 + TIME_MARGIN
    }

    /// Whether the origin has been anchored yet.
    pub fn anchored(&self) -> bool {
        self.origin_ns.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_conversion_returns_margin() {
        let clock = Clock::new();
        assert_eq!(clock.convert(1_000_000_000), TIME_MARGIN);
        assert!(clock.anchored());
    }

    #[test]
    fn origin_is_anchored_once() {
        let clock = Clock::new();
        let t0 = clock.convert(5_000_000_000);
        // A later call must not re-anchor: one second later maps one second up.
        let t1 = clock.convert(6_000_000_000);
        assert_eq!(t0, TIME_MARGIN);
        assert!((t1 - t0 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn monotone_input_gives_monotone_output() {
        let clock = Clock::new();
        let stamps = [10_i64, 10, 12, 500, 1_000_000, 2_000_000_000];
        let mut last = f64::MIN;
        for &ns in &stamps {
            let t = clock.convert(ns);
            assert!(t >= last, "convert({ns}) went backwards");
            assert!(t >= TIME_MARGIN);
            last = t;
        }
    }

    #[test]
    fn margin_absorbs_slightly_early_samples() {
        let clock = Clock::new();
        clock.convert(1_000_000_000);
        // 5 ms before the origin: still positive thanks to the 10 ms margin.
        let early = clock.convert(995_000_000);
        assert!(early > 0.0);
        assert!((early - 0.005).abs() < 1e-9);
    }

    #[test]
    fn fresh_clock_is_unanchored() {
        assert!(!Clock::new().anchored());
    }
}
