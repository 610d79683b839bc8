//! Recording module: persists sensor samples and frames for offline use.
//!
//! Samples become JSON-lines records, frames become numbered JPEG files.
//! Serialization happens on the calling thread (cheap), file I/O and image
//! encoding happen on a dedicated writer thread fed through a bounded
//! channel, so ingestion never waits on the disk. If the channel fills up,
//! records are dropped and counted rather than blocking the sensor thread.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use nalgebra::Vector3;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::display::VisualizationCanvas;
use crate::error::Result;
use crate::frame::{CapturedFrame, GpsFix};
use crate::module::ProcessingModule;
use crate::settings::PipelineSettings;

/// Capacity of the writer-thread channel. Roughly ten seconds of sensor
/// records at phone rates; frames are far below that.
const WRITER_QUEUE: usize = 2048;

#[derive(Debug, Clone)]
pub struct RecordingOptions {
    pub record_sensors: bool,
    pub record_camera: bool,
    /// Record host-fed JSON side-channel data (external tracker poses).
    pub record_external_poses: bool,
    pub recording_file_name: Option<PathBuf>,
    pub video_recording_file_name: Option<PathBuf>,
    pub video_recording_fps: u32,
}

impl RecordingOptions {
    pub fn from_settings(settings: &PipelineSettings, external: bool) -> Self {
        Self {
            record_sensors: settings.record_sensors,
            record_camera: settings.record_camera,
            record_external_poses: external,
            recording_file_name: settings.recording_file_name.clone().map(PathBuf::from),
            video_recording_file_name: settings
                .video_recording_file_name
                .clone()
                .map(PathBuf::from),
            video_recording_fps: settings.video_recording_fps.max(1),
        }
    }
}

#[derive(Default)]
struct RecordCounters {
    lines: AtomicU64,
    images: AtomicU64,
    dropped: AtomicU64,
    errors: AtomicU64,
}

enum WriterCommand {
    Line(String),
    FrameImage {
        path: PathBuf,
        width: u32,
        height: u32,
        /// RGBA when present, otherwise the gray plane is encoded.
        color: Option<Bytes>,
        gray: Bytes,
    },
}

pub struct RecordingModule {
    options: RecordingOptions,
    tx: Option<flume::Sender<WriterCommand>>,
    writer: Option<JoinHandle<()>>,
    counters: Arc<RecordCounters>,
    frames_seen: u64,
    last_image_time: Option<f64>,
    preview: Option<CapturedFrame>,
    preview_dirty: bool,
}

impl RecordingModule {
    /// Opens the output file (failing fast on an unwritable path) and starts
    /// the writer thread. With no output paths configured the module is a
    /// counting no-op.
    pub fn new(options: RecordingOptions) -> Result<Self> {
        let sink = match &options.recording_file_name {
            Some(path) => Some(BufWriter::new(File::create(path)?)),
            None => None,
        };
        let wants_writer = sink.is_some() || options.video_recording_file_name.is_some();

        let counters = Arc::new(RecordCounters::default());
        let (tx, writer) = if wants_writer {
            let (tx, rx) = flume::bounded::<WriterCommand>(WRITER_QUEUE);
            let thread_counters = counters.clone();
            let handle = std::thread::Builder::new()
                .name("artemis-recorder".into())
                .spawn(move || writer_loop(rx, sink, thread_counters))?;
            (Some(tx), Some(handle))
        } else {
            (None, None)
        };

        if let Some(path) = &options.recording_file_name {
            info!(path = %path.display(), "recording sensor data");
        }

        Ok(Self {
            options,
            tx,
            writer,
            counters,
            frames_seen: 0,
            last_image_time: None,
            preview: None,
            preview_dirty: false,
        })
    }

    fn send(&self, command: WriterCommand) {
        let Some(tx) = &self.tx else { return };
        if tx.try_send(command).is_err() {
            // Writer is behind; dropping beats blocking the sensor thread.
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("recorder queue full; dropping a record");
        }
    }

    fn send_line(&self, value: serde_json::Value) {
        if self.tx.is_some() {
            self.send(WriterCommand::Line(value.to_string()));
        }
    }

    fn frame_image_due(&mut self, time: f64) -> bool {
        let min_interval = 1.0 / self.options.video_recording_fps as f64;
        match self.last_image_time {
            Some(last) if time - last < min_interval => false,
            _ => {
                self.last_image_time = Some(time);
                true
            }
        }
    }

    /// Numbered sibling of the configured base path, keeping its extension
    /// (jpg when it has none).
    fn frame_image_path(&self, number: u64) -> Option<PathBuf> {
        let base = self.options.video_recording_file_name.as_ref()?;
        let stem = base.file_stem()?.to_string_lossy();
        let ext = base
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "jpg".into());
        Some(base.with_file_name(format!("{stem}_{number:06}.{ext}")))
    }
}

impl ProcessingModule for RecordingModule {
    fn add_frame(&mut self, frame: &CapturedFrame) {
        self.frames_seen += 1;
        let number = self.frames_seen;

        if self.options.record_sensors {
            let i = &frame.intrinsics;
            self.send_line(json!({
                "time": frame.time,
                "number": number,
                "frames": [{
                    "cameraInd": i.camera_index,
                    "time": frame.time,
                    "focalLengthX": i.focal_length_x,
                    "focalLengthY": i.focal_length_y,
                    "principalPointX": i.principal_point_x,
                    "principalPointY": i.principal_point_y,
                }],
            }));
        }

        if self.options.record_camera && self.frame_image_due(frame.time) {
            if let Some(path) = self.frame_image_path(number) {
                self.send(WriterCommand::FrameImage {
                    path,
                    width: frame.pixels.width,
                    height: frame.pixels.height,
                    color: frame.pixels.color.clone(),
                    gray: frame.pixels.gray.clone(),
                });
            }
        }

        self.preview = Some(frame.clone());
        self.preview_dirty = true;
    }

    fn add_gyro(&mut self, time: f64, sample: Vector3<f64>) {
        if self.options.record_sensors {
            self.send_line(json!({
                "time": time,
                "sensor": {"type": "gyroscope", "values": [sample.x, sample.y, sample.z]},
            }));
        }
    }

    fn add_acc(&mut self, time: f64, sample: Vector3<f64>) {
        if self.options.record_sensors {
            self.send_line(json!({
                "time": time,
                "sensor": {"type": "accelerometer", "values": [sample.x, sample.y, sample.z]},
            }));
        }
    }

    fn add_gps(&mut self, time: f64, fix: GpsFix) {
        if self.options.record_sensors {
            self.send_line(json!({"time": time, "gps": fix}));
        }
    }

    fn add_json_data(&mut self, time: f64, data: &serde_json::Value) {
        if self.options.record_external_poses {
            self.send_line(json!({"time": time, "data": data}));
        }
    }

    fn render(&mut self, _time: f64, canvas: &mut VisualizationCanvas<'_>) -> bool {
        if !self.preview_dirty {
            return false;
        }
        let Some(frame) = &self.preview else {
            return false;
        };
        blit_preview(frame, canvas);
        self.preview_dirty = false;
        true
    }

    fn status(&self) -> String {
        format!(
            "recording...\n{} records, {} frames written",
            self.counters.lines.load(Ordering::Relaxed),
            self.counters.images.load(Ordering::Relaxed),
        )
    }

    fn stop(&mut self) -> Result<()> {
        // Closing the channel ends the writer loop; joining guarantees the
        // flush happened before we return.
        drop(self.tx.take());
        if let Some(handle) = self.writer.take() {
            if handle.join().is_err() {
                warn!("recorder writer thread panicked");
            }
        }
        let dropped = self.counters.dropped.load(Ordering::Relaxed);
        if dropped > 0 {
            warn!(dropped, "recorder dropped records under backpressure");
        }
        Ok(())
    }
}

impl Drop for RecordingModule {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn writer_loop(
    rx: flume::Receiver<WriterCommand>,
    mut sink: Option<BufWriter<File>>,
    counters: Arc<RecordCounters>,
) {
    for command in rx.iter() {
        match command {
            WriterCommand::Line(line) => {
                let Some(out) = sink.as_mut() else { continue };
                match writeln!(out, "{line}") {
                    Ok(()) => {
                        counters.lines.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err) => {
                        counters.errors.fetch_add(1, Ordering::Relaxed);
                        warn!(%err, "failed to write record");
                    }
                }
            }
            WriterCommand::FrameImage {
                path,
                width,
                height,
                color,
                gray,
            } => match save_frame_image(&path, width, height, color.as_ref(), &gray) {
                Ok(()) => {
                    counters.images.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    counters.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(%err, path = %path.display(), "failed to write frame image");
                }
            },
        }
    }
    if let Some(mut out) = sink {
        if let Err(err) = out.flush() {
            warn!(%err, "failed to flush recording");
        }
    }
}

fn save_frame_image(
    path: &Path,
    width: u32,
    height: u32,
    color: Option<&Bytes>,
    gray: &Bytes,
) -> Result<()> {
    match color {
        Some(rgba) => {
            // The alpha plane carries nothing; encode RGB.
            let mut rgb = Vec::with_capacity((width * height * 3) as usize);
            for px in rgba.chunks_exact(4) {
                rgb.extend_from_slice(&px[..3]);
            }
            image::save_buffer(path, &rgb, width, height, image::ExtendedColorType::Rgb8)?;
        }
        None => {
            image::save_buffer(path, gray, width, height, image::ExtendedColorType::L8)?;
        }
    }
    Ok(())
}

/// Nearest-neighbor copy of the latest frame into the canvas. Color when the
/// pipeline produced it, gray expansion otherwise.
fn blit_preview(frame: &CapturedFrame, canvas: &mut VisualizationCanvas<'_>) {
    let src_w = frame.pixels.width as usize;
    let src_h = frame.pixels.height as usize;
    let dst_w = canvas.width as usize;
    let dst_h = canvas.height as usize;
    if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
        return;
    }
    for dy in 0..dst_h {
        let sy = dy * src_h / dst_h;
        for dx in 0..dst_w {
            let sx = dx * src_w / dst_w;
            let dst = (dy * dst_w + dx) * 4;
            match &frame.pixels.color {
                Some(rgba) => {
                    let src = (sy * src_w + sx) * 4;
                    canvas.pixels[dst..dst + 4].copy_from_slice(&rgba[src..src + 4]);
                }
                None => {
                    let g = frame.pixels.gray[sy * src_w + sx];
                    canvas.pixels[dst] = g;
                    canvas.pixels[dst + 1] = g;
                    canvas.pixels[dst + 2] = g;
                    canvas.pixels[dst + 3] = 0xFF;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{CameraIntrinsics, FramePixels};
    use std::sync::atomic::AtomicU32;

    static TEST_SEQ: AtomicU32 = AtomicU32::new(0);

    fn temp_path(tag: &str, ext: &str) -> PathBuf {
        let seq = TEST_SEQ.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!(
            "artemis_test_{}_{tag}_{seq}.{ext}",
            std::process::id()
        ))
    }

    fn frame_at(time: f64) -> CapturedFrame {
        CapturedFrame {
            time,
            intrinsics: CameraIntrinsics {
                camera_index: 0,
                focal_length_x: 500.0,
                focal_length_y: 501.0,
                principal_point_x: 320.0,
                principal_point_y: 240.0,
            },
            pixels: FramePixels {
                width: 4,
                height: 2,
                gray: Bytes::from(vec![10u8; 8]),
                color: None,
            },
        }
    }

    fn options(jsonl: Option<PathBuf>, video: Option<PathBuf>, external: bool) -> RecordingOptions {
        RecordingOptions {
            record_sensors: true,
            record_camera: video.is_some(),
            record_external_poses: external,
            recording_file_name: jsonl,
            video_recording_file_name: video,
            video_recording_fps: 1,
        }
    }

    fn read_records(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn sensor_samples_and_frames_become_jsonl_records() {
        let path = temp_path("jsonl", "jsonl");
        let mut module = RecordingModule::new(options(Some(path.clone()), None, false)).unwrap();

        module.add_gyro(0.10, Vector3::new(0.1, 0.2, 0.3));
        module.add_acc(0.11, Vector3::new(0.0, 9.8, 0.0));
        module.add_gps(
            0.12,
            GpsFix {
                latitude: 60.2,
                longitude: 24.9,
                altitude: 12.0,
                accuracy: 3.0,
            },
        );
        module.add_frame(&frame_at(0.13));
        module.stop().unwrap();

        let records = read_records(&path);
        assert_eq!(records.len(), 4);
        assert_eq!(records[0]["sensor"]["type"], "gyroscope");
        assert_eq!(records[0]["sensor"]["values"][2], 0.3);
        assert_eq!(records[1]["sensor"]["type"], "accelerometer");
        assert_eq!(records[2]["gps"]["latitude"], 60.2);
        assert_eq!(records[3]["frames"][0]["cameraInd"], 0);
        assert_eq!(records[3]["frames"][0]["focalLengthX"], 500.0);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn external_mode_records_json_side_channel() {
        let path = temp_path("external", "jsonl");
        let mut module = RecordingModule::new(options(Some(path.clone()), None, true)).unwrap();
        module.add_json_data(1.5, &json!({"pose": {"x": 1.0}}));
        module.stop().unwrap();

        let records = read_records(&path);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["data"]["pose"]["x"], 1.0);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn plain_recording_ignores_json_side_channel() {
        let path = temp_path("nojson", "jsonl");
        let mut module = RecordingModule::new(options(Some(path.clone()), None, false)).unwrap();
        module.add_json_data(1.5, &json!({"pose": {"x": 1.0}}));
        module.stop().unwrap();
        assert!(read_records(&path).is_empty());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn frame_images_are_throttled_to_the_configured_fps() {
        let video = temp_path("video", "jpg");
        let mut module = RecordingModule::new(options(None, Some(video.clone()), false)).unwrap();

        // 1 fps: the second frame arrives too early, the third qualifies.
        module.add_frame(&frame_at(10.0));
        module.add_frame(&frame_at(10.2));
        module.add_frame(&frame_at(11.5));
        module.stop().unwrap();

        let stem = video.file_stem().unwrap().to_string_lossy().into_owned();
        let dir = video.parent().unwrap();
        let images: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_string_lossy()
                    .starts_with(&format!("{stem}_"))
            })
            .collect();
        assert_eq!(images.len(), 2, "expected 2 throttled frame images");
        for entry in images {
            std::fs::remove_file(entry.path()).ok();
        }
    }

    #[test]
    fn no_output_paths_is_a_counting_noop() {
        let mut module = RecordingModule::new(RecordingOptions {
            record_sensors: true,
            record_camera: false,
            record_external_poses: false,
            recording_file_name: None,
            video_recording_file_name: None,
            video_recording_fps: 30,
        })
        .unwrap();
        module.add_gyro(0.1, Vector3::new(0.0, 0.0, 0.0));
        module.add_frame(&frame_at(0.2));
        assert!(module.status().starts_with("recording..."));
        module.stop().unwrap();
        module.stop().unwrap(); // idempotent
    }

    #[test]
    fn unwritable_recording_path_fails_fast() {
        let bogus = PathBuf::from("/nonexistent_dir_artemis/run.jsonl");
        assert!(RecordingModule::new(options(Some(bogus), None, false)).is_err());
    }

    #[test]
    fn render_previews_the_latest_frame_once() {
        let mut module = RecordingModule::new(options(None, None, false)).unwrap();
        let mut pixels = vec![0u8; 4 * 2 * 4];
        module.add_frame(&frame_at(0.5));
        let mut canvas = VisualizationCanvas {
            width: 4,
            height: 2,
            pixels: &mut pixels,
        };
        assert!(module.render(0.6, &mut canvas));
        // Gray 10 expands to opaque gray RGBA.
        assert_eq!(&canvas.pixels[..4], &[10, 10, 10, 0xFF]);
        // Nothing new arrived: no change reported.
        assert!(!module.render(0.7, &mut canvas));
    }
}
