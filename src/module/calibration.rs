//! Camera calibration module: collects views of a printed circle-grid
//! target and hands them to a solver.
//!
//! Detection is a plain threshold-and-centroid blob pass over the gray
//! plane. A frame becomes a view only when the blob count matches the
//! configured pattern exactly; views are captured at most twice a second and
//! kept in a bounded FIFO so a long session converges on recent geometry.

use std::collections::VecDeque;

use nalgebra::Vector3;
use tracing::{debug, info};

use crate::display::VisualizationCanvas;
use crate::frame::CapturedFrame;
use crate::module::ProcessingModule;
use crate::settings::PipelineSettings;

/// Solving starts once this many views are captured.
const MIN_VIEWS: usize = 3;
/// Oldest views are discarded beyond this count.
const MAX_VIEWS: usize = 30;
/// Minimum spacing between captured views, seconds.
const CAPTURE_INTERVAL: f64 = 0.5;

/// Blobs smaller than this are sensor noise.
const MIN_BLOB_AREA: usize = 4;

/// One accepted sighting of the full calibration pattern.
#[derive(Debug, Clone)]
pub struct CalibrationView {
    pub time: f64,
    /// Blob centroids in pixel coordinates.
    pub points: Vec<(f64, f64)>,
}

#[derive(Debug, Clone, Copy)]
pub struct CalibrationResult {
    pub focal_length_x: f64,
    pub focal_length_y: f64,
    pub principal_point_x: f64,
    pub principal_point_y: f64,
    pub reprojection_error: f64,
}

/// Seam for the actual intrinsics estimation. Solvers run on the frame
/// thread after each accepted view, so implementations decide their own
/// pacing internally.
pub trait CalibrationSolver: Send {
    fn solve(
        &mut self,
        views: &[CalibrationView],
        width: u32,
        height: u32,
    ) -> Option<CalibrationResult>;
}

/// Placeholder solver used until a host wires in a real one.
struct NullSolver;

impl CalibrationSolver for NullSolver {
    fn solve(&mut self, _: &[CalibrationView], _: u32, _: u32) -> Option<CalibrationResult> {
        None
    }
}

pub struct CalibrationModule {
    pattern_cols: u32,
    pattern_rows: u32,
    threshold: u8,
    solver: Box<dyn CalibrationSolver>,
    views: VecDeque<CalibrationView>,
    result: Option<CalibrationResult>,
    last_capture: Option<f64>,
    frame_dims: (u32, u32),
    last_points: Vec<(f64, f64)>,
    dirty: bool,
}

impl CalibrationModule {
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self::with_solver(settings, Box::new(NullSolver))
    }

    pub fn with_solver(settings: &PipelineSettings, solver: Box<dyn CalibrationSolver>) -> Self {
        Self {
            pattern_cols: settings.calibration_pattern_cols,
            pattern_rows: settings.calibration_pattern_rows,
            threshold: settings.calibration_threshold,
            solver,
            views: VecDeque::new(),
            result: None,
            last_capture: None,
            frame_dims: (0, 0),
            last_points: Vec::new(),
            dirty: false,
        }
    }

    fn pattern_size(&self) -> usize {
        (self.pattern_cols * self.pattern_rows) as usize
    }

    fn capture_due(&self, time: f64) -> bool {
        match self.last_capture {
            Some(last) => time - last >= CAPTURE_INTERVAL,
            None => true,
        }
    }
}

impl ProcessingModule for CalibrationModule {
    fn add_frame(&mut self, frame: &CapturedFrame) {
        self.frame_dims = (frame.pixels.width, frame.pixels.height);
        if !self.capture_due(frame.time) {
            return;
        }

        let blobs = detect_blobs(
            frame.pixels.width,
            frame.pixels.height,
            &frame.pixels.gray,
            self.threshold,
        );
        if blobs.len() != self.pattern_size() {
            debug!(
                found = blobs.len(),
                expected = self.pattern_size(),
                "pattern not visible"
            );
            return;
        }

        self.last_capture = Some(frame.time);
        self.last_points = blobs.clone();
        self.dirty = true;
        if self.views.len() == MAX_VIEWS {
            self.views.pop_front();
        }
        self.views.push_back(CalibrationView {
            time: frame.time,
            points: blobs,
        });
        info!(views = self.views.len(), "captured calibration view");

        if self.views.len() >= MIN_VIEWS {
            let views: Vec<CalibrationView> = self.views.iter().cloned().collect();
            if let Some(result) =
                self.solver
                    .solve(&views, frame.pixels.width, frame.pixels.height)
            {
                self.result = Some(result);
            }
        }
    }

    fn add_gyro(&mut self, _time: f64, _sample: Vector3<f64>) {}

    fn add_acc(&mut self, _time: f64, _sample: Vector3<f64>) {}

    fn render(&mut self, _time: f64, canvas: &mut VisualizationCanvas<'_>) -> bool {
        if !self.dirty {
            return false;
        }
        let (src_w, src_h) = self.frame_dims;
        if src_w == 0 || src_h == 0 || canvas.width == 0 || canvas.height == 0 {
            return false;
        }
        canvas.pixels.fill(0);
        for &(x, y) in &self.last_points {
            let cx = (x * canvas.width as f64 / src_w as f64) as i64;
            let cy = (y * canvas.height as f64 / src_h as f64) as i64;
            draw_marker(canvas, cx, cy);
        }
        self.dirty = false;
        true
    }

    fn status(&self) -> String {
        let mut status = if self.views.len() < MIN_VIEWS {
            format!("calibration: {}/{} views", self.views.len(), MIN_VIEWS)
        } else {
            format!("calibration: {} views", self.views.len())
        };
        if let Some(r) = &self.result {
            status.push_str(&format!(
                "\nfocal: {:.1} x {:.1}, principal: {:.1}, {:.1}, error: {:.2}",
                r.focal_length_x, r.focal_length_y, r.principal_point_x, r.principal_point_y,
                r.reprojection_error,
            ));
        }
        status
    }
}

/// Centroids of dark connected regions, in raster order of first contact.
/// Regions touching fewer than `MIN_BLOB_AREA` pixels are ignored.
fn detect_blobs(width: u32, height: u32, gray: &[u8], threshold: u8) -> Vec<(f64, f64)> {
    let w = width as usize;
    let h = height as usize;
    let mut visited = vec![false; w * h];
    let mut blobs = Vec::new();
    let mut stack = Vec::new();

    for start in 0..w * h {
        if visited[start] || gray[start] >= threshold {
            continue;
        }
        // Flood fill one dark component.
        let mut area = 0usize;
        let mut sum_x = 0.0f64;
        let mut sum_y = 0.0f64;
        visited[start] = true;
        stack.push(start);
        while let Some(idx) = stack.pop() {
            let x = idx % w;
            let y = idx / w;
            area += 1;
            sum_x += x as f64;
            sum_y += y as f64;
            let mut visit = |nx: usize, ny: usize| {
                let nidx = ny * w + nx;
                if !visited[nidx] && gray[nidx] < threshold {
                    visited[nidx] = true;
                    stack.push(nidx);
                }
            };
            if x > 0 {
                visit(x - 1, y);
            }
            if x + 1 < w {
                visit(x + 1, y);
            }
            if y > 0 {
                visit(x, y - 1);
            }
            if y + 1 < h {
                visit(x, y + 1);
            }
        }
        if area >= MIN_BLOB_AREA {
            blobs.push((sum_x / area as f64, sum_y / area as f64));
        }
    }
    blobs
}

fn draw_marker(canvas: &mut VisualizationCanvas<'_>, cx: i64, cy: i64) {
    for dy in -1..=1i64 {
        for dx in -1..=1i64 {
            let x = cx + dx;
            let y = cy + dy;
            if x < 0 || y < 0 || x >= canvas.width as i64 || y >= canvas.height as i64 {
                continue;
            }
            let idx = (y as usize * canvas.width as usize + x as usize) * 4;
            canvas.pixels[idx] = 0xFF;
            canvas.pixels[idx + 1] = 0xFF;
            canvas.pixels[idx + 2] = 0xFF;
            canvas.pixels[idx + 3] = 0xFF;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{CameraIntrinsics, FramePixels};
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// 2x3 grid of 4x4 dark squares on a light background.
    fn grid_image(width: u32, height: u32, blobs: &[(usize, usize)]) -> Vec<u8> {
        let mut gray = vec![220u8; (width * height) as usize];
        for &(bx, by) in blobs {
            for y in by..by + 4 {
                for x in bx..bx + 4 {
                    gray[y * width as usize + x] = 20;
                }
            }
        }
        gray
    }

    fn test_blob_origins() -> Vec<(usize, usize)> {
        let mut origins = Vec::new();
        for row in 0..3 {
            for col in 0..2 {
                origins.push((8 + col * 16, 8 + row * 16));
            }
        }
        origins
    }

    fn frame_at(time: f64, gray: Vec<u8>, width: u32, height: u32) -> CapturedFrame {
        CapturedFrame {
            time,
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

    fn small_pattern_settings() -> PipelineSettings {
        PipelineSettings {
            calibration_pattern_cols: 2,
            calibration_pattern_rows: 3,
            ..PipelineSettings::default()
        }
    }

    #[test]
    fn detects_square_centroids() {
        let gray = grid_image(48, 64, &test_blob_origins());
        let blobs = detect_blobs(48, 64, &gray, 160);
        assert_eq!(blobs.len(), 6);
        // 4x4 square starting at (8, 8) has centroid (9.5, 9.5).
        assert!(blobs.iter().any(|&(x, y)| {
            (x - 9.5).abs() < 1e-9 && (y - 9.5).abs() < 1e-9
        }));
    }

    #[test]
    fn noise_specks_are_ignored() {
        let mut gray = vec![220u8; 32 * 32];
        gray[5 * 32 + 5] = 10;
        gray[20 * 32 + 7] = 10;
        assert!(detect_blobs(32, 32, &gray, 160).is_empty());
    }

    #[test]
    fn incomplete_pattern_is_not_a_view() {
        let mut module = CalibrationModule::from_settings(&small_pattern_settings());
        // Only 5 of the 6 expected blobs.
        let origins = &test_blob_origins()[..5];
        module.add_frame(&frame_at(1.0, grid_image(48, 64, origins), 48, 64));
        assert_eq!(module.status(), "calibration: 0/3 views");
    }

    #[test]
    fn views_are_rate_limited() {
        let mut module = CalibrationModule::from_settings(&small_pattern_settings());
        let gray = grid_image(48, 64, &test_blob_origins());
        module.add_frame(&frame_at(1.0, gray.clone(), 48, 64));
        module.add_frame(&frame_at(1.1, gray.clone(), 48, 64));
        assert_eq!(module.status(), "calibration: 1/3 views");
        module.add_frame(&frame_at(1.6, gray, 48, 64));
        assert_eq!(module.status(), "calibration: 2/3 views");
    }

    #[test]
    fn view_fifo_is_bounded() {
        let mut module = CalibrationModule::from_settings(&small_pattern_settings());
        let gray = grid_image(48, 64, &test_blob_origins());
        for i in 0..(MAX_VIEWS + 2) {
            module.add_frame(&frame_at(i as f64, gray.clone(), 48, 64));
        }
        assert_eq!(module.views.len(), MAX_VIEWS);
        // The two oldest views were discarded.
        assert_eq!(module.views.front().map(|v| v.time), Some(2.0));
    }

    struct ScriptedSolver {
        calls: Arc<AtomicUsize>,
    }

    impl CalibrationSolver for ScriptedSolver {
        fn solve(
            &mut self,
            views: &[CalibrationView],
            width: u32,
            height: u32,
        ) -> Option<CalibrationResult> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            assert!(views.len() >= MIN_VIEWS);
            Some(CalibrationResult {
                focal_length_x: 500.0,
                focal_length_y: 500.5,
                principal_point_x: width as f64 / 2.0,
                principal_point_y: height as f64 / 2.0,
                reprojection_error: 0.25,
            })
        }
    }

    #[test]
    fn solver_runs_once_enough_views_exist() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut module = CalibrationModule::with_solver(
            &small_pattern_settings(),
            Box::new(ScriptedSolver {
                calls: calls.clone(),
            }),
        );
        let gray = grid_image(48, 64, &test_blob_origins());
        for i in 0..4 {
            module.add_frame(&frame_at(i as f64, gray.clone(), 48, 64));
        }
        // Views 3 and 4 each trigger a solve.
        assert_eq!(calls.load(Ordering::Relaxed), 2);
        let status = module.status();
        assert!(status.starts_with("calibration: 4 views"));
        assert!(status.contains("focal: 500.0 x 500.5"));
    }

    #[test]
    fn render_marks_detected_points() {
        let mut module = CalibrationModule::from_settings(&small_pattern_settings());
        let gray = grid_image(48, 64, &test_blob_origins());
        module.add_frame(&frame_at(1.0, gray, 48, 64));

        let mut pixels = vec![0u8; 48 * 64 * 4];
        let mut canvas = VisualizationCanvas {
            width: 48,
            height: 64,
            pixels: &mut pixels,
        };
        assert!(module.render(1.1, &mut canvas));
        // Marker at the first centroid (9, 9) is white.
        let idx = (9 * 48 + 9) * 4;
        assert_eq!(&canvas.pixels[idx..idx + 4], &[0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(!module.render(1.2, &mut canvas));
    }
}
