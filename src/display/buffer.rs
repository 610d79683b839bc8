//! Double-buffered visualization output.
//!
//! The render thread draws into the inactive buffer and flips the active
//! index only when the draw actually changed pixels; readers take the active
//! index and always observe a complete frame. The flip is a single atomic
//! store, so readers need no coordination beyond the per-buffer mutex they
//! already hold while copying out.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

/// Mutable view of the buffer a module draws into. RGBA, row-major,
/// `pixels.len() == width * height * 4`.
pub struct VisualizationCanvas<'a> {
    pub width: u32,
    pub height: u32,
    pub pixels: &'a mut [u8],
}

/// Owned snapshot of the most recently completed visualization frame.
#[derive(Debug, Clone)]
pub struct VisualizationFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Bytes,
}

/// Two alternating CPU pixel buffers indexed by an atomic active index.
#[derive(Default)]
pub struct DoubleBuffer {
    buffers: [Mutex<Vec<u8>>; 2],
    dims: Mutex<(u32, u32)>,
    active: AtomicUsize,
    /// Set by the first flip after a configure; readers see nothing until a
    /// frame actually completed.
    completed: AtomicBool,
    flips: AtomicU64,
}

impl DoubleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size (or resize) both buffers. Contents reset to transparent black
    /// and the active index returns to 0.
    pub fn configure(&self, width: u32, height: u32) {
        let mut dims = self.dims.lock();
        let len = (width as usize) * (height as usize) * 4;
        for buffer in &self.buffers {
            let mut buf = buffer.lock();
            buf.clear();
            buf.resize(len, 0);
        }
        *dims = (width, height);
        self.active.store(0, Ordering::Release);
        self.completed.store(false, Ordering::Release);
    }

    pub fn is_configured(&self) -> bool {
        let (w, h) = *self.dims.lock();
        w > 0 && h > 0
    }

    pub fn dimensions(&self) -> (u32, u32) {
        *self.dims.lock()
    }

    /// Run `draw` against the inactive buffer; flip only when it reports a
    /// change. Returns whether a flip happened.
    pub fn render_with(&self, draw: impl FnOnce(&mut VisualizationCanvas<'_>) -> bool) -> bool {
        let (width, height) = *self.dims.lock();
        if width == 0 || height == 0 {
            return false;
        }
        let expected = (width as usize) * (height as usize) * 4;

        let inactive = 1 - self.active.load(Ordering::Acquire);
        let changed = {
            let mut buf = self.buffers[inactive].lock();
            // A concurrent reconfigure may have resized under us; skip the
            // frame rather than hand out a mismatched canvas.
            if buf.len() != expected {
                return false;
            }
            let mut canvas = VisualizationCanvas {
                width,
                height,
                pixels: &mut buf,
            };
            draw(&mut canvas)
        };

        if changed {
            self.active.store(inactive, Ordering::Release);
            self.completed.store(true, Ordering::Release);
            self.flips.fetch_add(1, Ordering::Relaxed);
        }
        changed
    }

    /// Read the active buffer in place, without copying. `None` until a
    /// render completed at the current dimensions.
    pub fn with_active<R>(&self, read: impl FnOnce(u32, u32, &[u8]) -> R) -> Option<R> {
        let (width, height) = *self.dims.lock();
        if width == 0 || height == 0 || !self.completed.load(Ordering::Acquire) {
            return None;
        }
        let idx = self.active.load(Ordering::Acquire);
        let buf = self.buffers[idx].lock();
        if buf.len() != (width as usize) * (height as usize) * 4 {
            return None;
        }
        Some(read(width, height, &buf))
    }

    /// Copy the active buffer out as an owned frame.
    pub fn snapshot(&self) -> Option<VisualizationFrame> {
        self.with_active(|width, height, pixels| VisualizationFrame {
            width,
            height,
            pixels: Bytes::copy_from_slice(pixels),
        })
    }

    pub fn flips(&self) -> u64 {
        self.flips.load(Ordering::Relaxed)
    }
}
