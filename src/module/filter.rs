//! Edge filter module: a small CPU image-processing stage mostly useful for
//! exercising the frame path end to end without tracker dependencies.

use nalgebra::Vector3;

use crate::display::VisualizationCanvas;
use crate::frame::CapturedFrame;
use crate::module::ProcessingModule;

struct EdgeImage {
    width: u32,
    height: u32,
    magnitude: Vec<u8>,
}

/// Sobel edge detector over the gray plane of each accepted frame.
pub struct EdgeFilterModule {
    latest: Option<EdgeImage>,
    frames: u64,
    dirty: bool,
}

impl EdgeFilterModule {
    pub fn new() -> Self {
        Self {
            latest: None,
            frames: 0,
            dirty: false,
        }
    }
}

impl Default for EdgeFilterModule {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingModule for EdgeFilterModule {
    fn add_frame(&mut self, frame: &CapturedFrame) {
        self.latest = Some(sobel(
            frame.pixels.width,
            frame.pixels.height,
            &frame.pixels.gray,
        ));
        self.frames += 1;
        self.dirty = true;
    }

    fn add_gyro(&mut self, _time: f64, _sample: Vector3<f64>) {}

    fn add_acc(&mut self, _time: f64, _sample: Vector3<f64>) {}

    fn render(&mut self, _time: f64, canvas: &mut VisualizationCanvas<'_>) -> bool {
        if !self.dirty {
            return false;
        }
        let Some(edges) = &self.latest else {
            return false;
        };
        let src_w = edges.width as usize;
        let src_h = edges.height as usize;
        let dst_w = canvas.width as usize;
        let dst_h = canvas.height as usize;
        if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
            return false;
        }
        for dy in 0..dst_h {
            let sy = dy * src_h / dst_h;
            for dx in 0..dst_w {
                let sx = dx * src_w / dst_w;
                let m = edges.magnitude[sy * src_w + sx];
                let dst = (dy * dst_w + dx) * 4;
                canvas.pixels[dst] = m;
                canvas.pixels[dst + 1] = m;
                canvas.pixels[dst + 2] = m;
                canvas.pixels[dst + 3] = 0xFF;
            }
        }
        self.dirty = false;
        true
    }

    fn status(&self) -> String {
        if self.frames == 0 {
            "edge filter: waiting for frames".to_string()
        } else {
            format!("edge filter: {} frames", self.frames)
        }
    }
}

/// 3x3 Sobel gradient magnitude, |gx| + |gy| scaled into u8. Border pixels
/// are left at zero.
fn sobel(width: u32, height: u32, gray: &[u8]) -> EdgeImage {
    let w = width as usize;
    let h = height as usize;
    let mut magnitude = vec![0u8; w * h];
    if w >= 3 && h >= 3 {
        let at = |x: usize, y: usize| gray[y * w + x] as i32;
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let gx = at(x + 1, y - 1) + 2 * at(x + 1, y) + at(x + 1, y + 1)
                    - at(x - 1, y - 1)
                    - 2 * at(x - 1, y)
                    - at(x - 1, y + 1);
                let gy = at(x - 1, y + 1) + 2 * at(x, y + 1) + at(x + 1, y + 1)
                    - at(x - 1, y - 1)
                    - 2 * at(x, y - 1)
                    - at(x + 1, y - 1);
                magnitude[y * w + x] = ((gx.abs() + gy.abs()) / 8).min(255) as u8;
            }
        }
    }
    EdgeImage {
        width,
        height,
        magnitude,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{CameraIntrinsics, FramePixels};
    use bytes::Bytes;

    fn frame_with_gray(width: u32, height: u32, gray: Vec<u8>) -> CapturedFrame {
        CapturedFrame {
            time: 1.0,
            intrinsics: CameraIntrinsics {
                camera_index: 0,
                focal_length_x: 1.0,
                focal_length_y: 1.0,
                principal_point_x: 0.0,
                principal_point_y: 0.0,
            },
            pixels: FramePixels {
                width,
                height,
                gray: Bytes::from(gray),
                color: None,
            },
        }
    }

    #[test]
    fn flat_image_has_no_edges() {
        let edges = sobel(5, 5, &[100u8; 25]);
        assert!(edges.magnitude.iter().all(|&m| m == 0));
    }

    #[test]
    fn vertical_step_responds_along_the_boundary() {
        // Columns 0..2 dark, 3..5 bright.
        let mut gray = vec![0u8; 6 * 5];
        for y in 0..5 {
            for x in 3..6 {
                gray[y * 6 + x] = 200;
            }
        }
        let edges = sobel(6, 5, &gray);
        // Interior rows see the step at columns 2 and 3.
        assert!(edges.magnitude[2 * 6 + 2] > 50);
        assert!(edges.magnitude[2 * 6 + 3] > 50);
        // Far from the step the gradient is flat.
        assert_eq!(edges.magnitude[2 * 6 + 1], 0);
        assert_eq!(edges.magnitude[2 * 6 + 4], 0);
        // Borders stay zero.
        assert_eq!(edges.magnitude[0], 0);
    }

    #[test]
    fn status_reports_progress() {
        let mut module = EdgeFilterModule::new();
        assert_eq!(module.status(), "edge filter: waiting for frames");
        module.add_frame(&frame_with_gray(4, 4, vec![0; 16]));
        assert_eq!(module.status(), "edge filter: 1 frames");
    }

    #[test]
    fn render_reports_change_only_after_a_new_frame() {
        let mut module = EdgeFilterModule::new();
        let mut pixels = vec![0u8; 4 * 4 * 4];
        let mut canvas = VisualizationCanvas {
            width: 4,
            height: 4,
            pixels: &mut pixels,
        };
        assert!(!module.render(0.0, &mut canvas));

        module.add_frame(&frame_with_gray(4, 4, vec![50; 16]));
        assert!(module.render(0.1, &mut canvas));
        assert!(!module.render(0.2, &mut canvas));
        // Output is opaque grayscale.
        assert_eq!(canvas.pixels[3], 0xFF);
    }
}
