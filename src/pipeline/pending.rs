//! Single-slot mailbox between the graphics-surface thread and the sensor
//! thread.
//!
//! At most one unconsumed frame is retained: a newer frame silently replaces
//! an older pending one. Dropping under backpressure is intentional and only
//! counted, bounding both memory and latency when the consumer stalls.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;
use parking_lot::Mutex;

use crate::frame::CapturedFrame;

/// `Empty -> Pending` on a producer store, `Pending -> Empty` on a consumer
/// take. Single mutex, microsecond hold times (one Option swap).
#[derive(Default)]
pub struct PendingFrameSlot {
    slot: Mutex<Option<CapturedFrame>>,

    stats: CachePadded<SlotStats>,
}

#[derive(Default)]
struct SlotStats {
    frames_stored: AtomicU64,
    frames_taken: AtomicU64,
    frames_dropped: AtomicU64,
}

impl PendingFrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Producer side: store a frame, replacing any unconsumed one.
    ///
    /// Returns `true` when an unconsumed frame was displaced.
    pub fn store(&self, frame: CapturedFrame) -> bool {
        let displaced = self.slot.lock().replace(frame).is_some();
        self.stats.frames_stored.fetch_add(1, Ordering::Relaxed);
        if displaced {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }
        displaced
    }

    /// Consumer side: drain the slot if a frame is pending.
    pub fn take(&self) -> Option<CapturedFrame> {
        let frame = self.slot.lock().take();
        if frame.is_some() {
            self.stats.frames_taken.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }

    pub fn is_pending(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Discard any pending frame without counting it as consumed.
    pub fn clear(&self) {
        *self.slot.lock() = None;
    }

    /// (stored, taken, dropped) counters.
    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.stats.frames_stored.load(Ordering::Relaxed),
            self.stats.frames_taken.load(Ordering::Relaxed),
            self.stats.frames_dropped.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{CameraIntrinsics, FramePixels};
    use bytes::Bytes;

    fn frame(time: f64) -> CapturedFrame {
        CapturedFrame {
            time,
            intrinsics: CameraIntrinsics {
                camera_index: 0,
                focal_length_x: 500.0,
                focal_length_y: 500.0,
                principal_point_x: 320.0,
                principal_point_y: 240.0,
            },
            pixels: FramePixels {
                width: 2,
                height: 1,
                gray: Bytes::from_static(&[0, 0]),
                color: None,
            },
        }
    }

    #[test]
    fn take_on_empty_returns_none() {
        let slot = PendingFrameSlot::new();
        assert!(slot.take().is_none());
        assert!(!slot.is_pending());
    }

    #[test]
    fn store_then_take_round_trips() {
        let slot = PendingFrameSlot::new();
        assert!(!slot.store(frame(1.0)));
        assert!(slot.is_pending());
        let got = slot.take().unwrap();
        assert_eq!(got.time, 1.0);
        assert!(slot.take().is_none());
    }

    #[test]
    fn newer_frame_overwrites_unconsumed_older_one() {
        let slot = PendingFrameSlot::new();
        for i in 0..5 {
            slot.store(frame(i as f64));
        }
        // Only the last write is visible; the rest were dropped.
        assert_eq!(slot.take().unwrap().time, 4.0);
        let (stored, taken, dropped) = slot.stats();
        assert_eq!(stored, 5);
        assert_eq!(taken, 1);
        assert_eq!(dropped, 4);
    }

    #[test]
    fn clear_discards_without_counting_a_take() {
        let slot = PendingFrameSlot::new();
        slot.store(frame(1.0));
        slot.clear();
        assert!(slot.take().is_none());
        let (_, taken, _) = slot.stats();
        assert_eq!(taken, 0);
    }
}
