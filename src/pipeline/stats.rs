//! Windowed sample-rate monitors backing the stats string.

use std::time::Instant;

use parking_lot::Mutex;
use ringbuf::{
    traits::{Consumer, RingBuffer},
    HeapRb,
};

/// Sliding window over which rates are estimated, in seconds.
const RATE_WINDOW: f64 = 2.0;

/// Capacity of the per-stream timestamp ring. 512 entries cover the window
/// at the fastest expected stream (gyro at ~200 Hz).
const RING_CAPACITY: usize = 512;

/// Estimates the arrival rate of one event stream from its recent timestamps.
pub struct FrequencyMonitor {
    ticks: HeapRb<f64>,
}

impl FrequencyMonitor {
    pub fn new() -> Self {
        Self {
            ticks: HeapRb::new(RING_CAPACITY),
        }
    }

    /// Record one event at `now` (seconds on any monotonic timeline).
    pub fn tick(&mut self, now: f64) {
        self.ticks.push_overwrite(now);
    }

    /// Events per second over the recent window, 0.0 until two events landed
    /// inside it.
    pub fn rate(&self, now: f64) -> f64 {
        let mut count = 0usize;
        let mut oldest = f64::MAX;
        let mut newest = f64::MIN;
        for &t in self.ticks.iter() {
            if now - t <= RATE_WINDOW {
                count += 1;
                oldest = oldest.min(t);
                newest = newest.max(t);
            }
        }
        if count < 2 || newest <= oldest {
            return 0.0;
        }
        (count - 1) as f64 / (newest - oldest)
    }
}

impl Default for FrequencyMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// The three stream monitors the session reports on.
pub struct RateMonitors {
    start: Instant,
    gyro: Mutex<FrequencyMonitor>,
    acc: Mutex<FrequencyMonitor>,
    frames: Mutex<FrequencyMonitor>,
}

impl RateMonitors {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            gyro: Mutex::new(FrequencyMonitor::new()),
            acc: Mutex::new(FrequencyMonitor::new()),
            frames: Mutex::new(FrequencyMonitor::new()),
        }
    }

    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    pub fn tick_gyro(&self) {
        let now = self.now();
        self.gyro.lock().tick(now);
    }

    pub fn tick_acc(&self) {
        let now = self.now();
        self.acc.lock().tick(now);
    }

    pub fn tick_frame(&self) {
        let now = self.now();
        self.frames.lock().tick(now);
    }

    /// Rate lines appended to the module status text.
    pub fn summary(&self) -> String {
        let now = self.now();
        format!(
            "gyro: {:.1} Hz\nacc: {:.1} Hz\nframes: {:.1} fps",
            self.gyro.lock().rate(now),
            self.acc.lock().rate(now),
            self.frames.lock().rate(now),
        )
    }
}

impl Default for RateMonitors {
    fn default() -> Self {
        Self::new()
    }
}
