//! Frame event payloads handed from the graphics-surface thread to the
//! algorithm thread.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Per-frame camera intrinsics, passed by value with every frame event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    /// Which physical camera produced the frame (0 = primary).
    pub camera_index: u32,
    pub focal_length_x: f64,
    pub focal_length_y: f64,
    pub principal_point_x: f64,
    pub principal_point_y: f64,
}

/// CPU-side pixel buffers produced by one transcoding pass.
///
/// `gray` is always present (one byte per pixel, row-major, no padding);
/// `color` is RGBA and only produced while visualization is enabled.
/// Both are zero-copy shareable across threads.
#[derive(Debug, Clone)]
pub struct FramePixels {
    pub width: u32,
    pub height: u32,
    pub gray: Bytes,
    pub color: Option<Bytes>,
}

impl FramePixels {
    /// Gray byte at `(x, y)`. Intended for tests and detectors, not hot loops.
    pub fn gray_at(&self, x: u32, y: u32) -> u8 {
        self.gray[(y * self.width + x) as usize]
    }
}

/// One camera frame after transcoding, waiting in the pending slot.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Session-relative time in seconds (already clock-converted).
    pub time: f64,
    pub intrinsics: CameraIntrinsics,
    pub pixels: FramePixels,
}

impl CapturedFrame {
    pub fn camera_index(&self) -> u32 {
        self.intrinsics.camera_index
    }
}

/// A GPS fix forwarded to modules that record or fuse position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    /// Horizontal accuracy estimate in meters.
    pub accuracy: f64,
}

/// Where frame pixels come from. The production source reads back from the
/// camera texture on the GPU; tests substitute scripted sources.
pub trait FrameSource: Send {
    /// Camera dimensions, fixed for the lifetime of the source.
    fn dimensions(&self) -> (u32, u32);

    /// Produce the pixel planes for the frame being captured right now.
    /// `want_color` asks for the RGBA plane in addition to gray.
    fn capture(&mut self, want_color: bool) -> crate::error::Result<FramePixels>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixels_2x2() -> FramePixels {
        FramePixels {
            width: 2,
            height: 2,
            gray: Bytes::from_static(&[1, 2, 3, 4]),
            color: None,
        }
    }

    #[test]
    fn gray_at_is_row_major() {
        let p = pixels_2x2();
        assert_eq!(p.gray_at(0, 0), 1);
        assert_eq!(p.gray_at(1, 0), 2);
        assert_eq!(p.gray_at(0, 1), 3);
        assert_eq!(p.gray_at(1, 1), 4);
    }

    #[test]
    fn clone_shares_pixel_storage() {
        let p = pixels_2x2();
        let q = p.clone();
        // Bytes clones are reference-counted views of the same allocation.
        assert_eq!(p.gray.as_ptr(), q.gray.as_ptr());
    }
}
