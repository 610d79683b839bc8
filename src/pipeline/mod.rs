//! The session: one object wiring the clock, the frame source, the pending
//! slot, the processing module, and the visualization buffer behind the
//! host-facing interface.
//!
//! Threading model: the host calls `process_frame` from its graphics-surface
//! thread, the sensor calls from its sensor thread, and the visualization
//! calls from its render thread. Frames park in a single-slot mailbox and
//! enter the module only when the next gyro sample drains them, so the
//! module observes one ordered event stream.

pub mod pending;
pub mod stats;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwapOption;
use nalgebra::Vector3;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::clock::Clock;
use crate::display::{DoubleBuffer, VisualizationFrame};
use crate::error::{PipelineError, Result};
use crate::frame::{CameraIntrinsics, CapturedFrame, FrameSource, GpsFix};
use crate::gpu::{FrameTranscoder, GpuContext};
use crate::module::{build_module, ModuleParams, ProcessingModule, ThreadSafeModule};
use crate::settings::PipelineSettings;
use pending::PendingFrameSlot;
use stats::RateMonitors;

/// Everything the host binds at configure time.
#[derive(Debug, Clone)]
pub struct ConfigureRequest {
    /// Host clock timestamp of the configure call, nanoseconds.
    pub timestamp_ns: i64,
    pub width: u32,
    pub height: u32,
    /// Host-side handle of the camera texture, carried as metadata.
    pub texture_id: u64,
    /// Capture every Nth frame, starting with the first.
    pub frame_stride: u32,
    /// Session settings as a JSON object; empty string for defaults.
    pub settings_json: String,
}

/// State bound to one configure call, replaced wholesale on reconfigure.
struct ActiveSession {
    clock: Clock,
    module: ThreadSafeModule,
    frame_stride: u64,
    frame_counter: AtomicU64,
    source: Mutex<Box<dyn FrameSource>>,
}

pub struct Pipeline {
    gpu: OnceCell<Arc<GpuContext>>,
    session: ArcSwapOption<ActiveSession>,
    pending: PendingFrameSlot,
    viz: DoubleBuffer,
    monitors: RateMonitors,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            gpu: OnceCell::new(),
            session: ArcSwapOption::empty(),
            pending: PendingFrameSlot::new(),
            viz: DoubleBuffer::new(),
            monitors: RateMonitors::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.session.load().is_some()
    }

    /// Bind a session reading frames from the camera texture on the GPU.
    /// The device is opened on the first call and kept for the process
    /// lifetime.
    #[instrument(skip(self))]
    pub fn configure(&self, request: &ConfigureRequest) -> Result<()> {
        let settings = self.validate(request)?;
        let gpu = self
            .gpu
            .get_or_try_init(|| GpuContext::new().map(Arc::new))?
            .clone();
        let transcoder = FrameTranscoder::new(
            gpu,
            request.width,
            request.height,
            request.texture_id,
            settings.source_channel_order,
        )?;
        self.configure_with_source(request, Box::new(transcoder))
    }

    /// Bind a session with a caller-supplied frame source. The module still
    /// comes from the name in the settings.
    pub fn configure_with_source(
        &self,
        request: &ConfigureRequest,
        source: Box<dyn FrameSource>,
    ) -> Result<()> {
        let settings = self.validate(request)?;
        let module = build_module(
            &settings.module_name,
            &ModuleParams {
                width: request.width,
                height: request.height,
                settings: &settings,
            },
        )?;
        self.install(request, settings, source, module)
    }

    /// Bind a session around a host-provided module, bypassing the factory.
    /// This is how platform tracker backends plug in.
    pub fn configure_with_module(
        &self,
        request: &ConfigureRequest,
        source: Box<dyn FrameSource>,
        module: Box<dyn ProcessingModule>,
    ) -> Result<()> {
        let settings = self.validate(request)?;
        self.install(request, settings, source, module)
    }

    fn validate(&self, request: &ConfigureRequest) -> Result<PipelineSettings> {
        if request.width < request.height {
            return Err(PipelineError::config(format!(
                "camera must be landscape, got {}x{}",
                request.width, request.height
            )));
        }
        if request.frame_stride == 0 {
            return Err(PipelineError::config("frame stride must be at least 1"));
        }
        PipelineSettings::from_json(&request.settings_json)
    }

    fn install(
        &self,
        request: &ConfigureRequest,
        settings: PipelineSettings,
        source: Box<dyn FrameSource>,
        module: Box<dyn ProcessingModule>,
    ) -> Result<()> {
        write_session_files(&settings, request)?;

        // The old module is stopped only after the new session validated, so
        // a bad reconfigure leaves the running session untouched.
        if let Some(old) = self.session.swap(None) {
            info!("replacing active session");
            if let Err(err) = old.module.stop() {
                warn!(%err, "stopping previous module failed");
            }
            self.pending.clear();
        }

        let clock = Clock::new();
        let start = clock.convert(request.timestamp_ns);
        let module = ThreadSafeModule::new(module);
        if self.viz.is_configured() {
            let (w, h) = self.viz.dimensions();
            module.setup_rendering(w, h);
        }

        info!(
            module = %settings.module_name,
            width = request.width,
            height = request.height,
            stride = request.frame_stride,
            start,
            "session configured"
        );

        self.session.store(Some(Arc::new(ActiveSession {
            clock,
            module,
            frame_stride: request.frame_stride as u64,
            frame_counter: AtomicU64::new(0),
            source: Mutex::new(source),
        })));
        Ok(())
    }

    /// Handle a frame event from the graphics-surface thread. Returns true
    /// when this frame was selected by the stride and consumed.
    ///
    /// The captured frame does not reach the module here; it waits in the
    /// pending slot until the next gyro sample. A frame still waiting when
    /// the next one arrives is dropped, newest wins.
    pub fn process_frame(&self, timestamp_ns: i64, intrinsics: CameraIntrinsics) -> bool {
        let guard = self.session.load();
        let Some(session) = guard.as_ref() else {
            debug!("frame before configure, ignoring");
            return false;
        };

        let counter = session.frame_counter.fetch_add(1, Ordering::Relaxed);
        if counter % session.frame_stride != 0 {
            return false;
        }

        let time = session.clock.convert(timestamp_ns);
        // The color plane only exists for the visualization path; gray-only
        // consumers never pay for the second readback.
        let want_color = self.viz.is_configured();
        let capture_start = Instant::now();
        let pixels = match session.source.lock().capture(want_color) {
            Ok(pixels) => pixels,
            Err(err) => {
                // Teardown race on the graphics surface; the stream continues
                // with the next frame.
                warn!(%err, "frame capture failed");
                return true;
            }
        };
        metrics::histogram!("frame_capture_us").record(capture_start.elapsed().as_micros() as f64);

        let displaced = self.pending.store(CapturedFrame {
            time,
            intrinsics,
            pixels,
        });
        if displaced {
            metrics::counter!("frames_dropped").increment(1);
            debug!(time, "pending frame displaced before any gyro sample");
        }
        metrics::counter!("frames_captured").increment(1);
        self.monitors.tick_frame();
        true
    }

    /// Handle a gyroscope sample. Drains the pending frame first so the
    /// module sees the frame ahead of the sample that released it.
    pub fn process_gyro_sample(&self, timestamp_ns: i64, x: f64, y: f64, z: f64) {
        let guard = self.session.load();
        let Some(session) = guard.as_ref() else {
            return;
        };
        let time = session.clock.convert(timestamp_ns);
        if let Some(frame) = self.pending.take() {
            session.module.add_frame(&frame);
        }
        session.module.add_gyro(time, Vector3::new(x, y, z));
        self.monitors.tick_gyro();
    }

    /// Handle an accelerometer sample. Never drains the pending slot.
    pub fn process_acc_sample(&self, timestamp_ns: i64, x: f64, y: f64, z: f64) {
        let guard = self.session.load();
        let Some(session) = guard.as_ref() else {
            return;
        };
        let time = session.clock.convert(timestamp_ns);
        session.module.add_acc(time, Vector3::new(x, y, z));
        self.monitors.tick_acc();
    }

    pub fn process_gps_location(
        &self,
        timestamp_ns: i64,
        latitude: f64,
        longitude: f64,
        altitude: f64,
        accuracy: f64,
    ) {
        let guard = self.session.load();
        let Some(session) = guard.as_ref() else {
            return;
        };
        let time = session.clock.convert(timestamp_ns);
        session.module.add_gps(
            time,
            GpsFix {
                latitude,
                longitude,
                altitude,
                accuracy,
            },
        );
    }

    /// Side-channel JSON from the host, forwarded to modules that consume it.
    pub fn process_json_data(&self, timestamp_ns: i64, data: &serde_json::Value) {
        let guard = self.session.load();
        let Some(session) = guard.as_ref() else {
            return;
        };
        let time = session.clock.convert(timestamp_ns);
        session.module.add_json_data(time, data);
    }

    /// Module status plus ingestion rates. Never blocks on the module mutex.
    pub fn stats_string(&self) -> String {
        let guard = self.session.load();
        match guard.as_ref() {
            Some(session) => format!("{}\n{}", session.module.status(), self.monitors.summary()),
            None => "no active session".to_string(),
        }
    }

    /// Tracking state as a small integer for the host; -1 while unconfigured.
    pub fn tracking_status(&self) -> i32 {
        let guard = self.session.load();
        match guard.as_ref() {
            Some(session) => session.module.tracking_status().as_i32(),
            None => -1,
        }
    }

    /// Latest pose as `[t, px, py, pz, qx, qy, qz, qw]`; `None` while
    /// unconfigured or before the module produced an estimate.
    pub fn pose(&self) -> Option<[f64; 8]> {
        let guard = self.session.load();
        guard
            .as_ref()
            .and_then(|session| session.module.pose())
            .map(|pose| pose.to_array())
    }

    /// Size the visualization buffers. Callable before or after configure.
    pub fn configure_visualization(&self, width: u32, height: u32) {
        self.viz.configure(width, height);
        let guard = self.session.load();
        if let Some(session) = guard.as_ref() {
            session.module.setup_rendering(width, height);
        }
    }

    /// Let the module draw into the inactive plane; flips only when the
    /// module reports a change. Returns whether a flip happened.
    pub fn draw_visualization(&self, timestamp_ns: i64) -> bool {
        let guard = self.session.load();
        let Some(session) = guard.as_ref() else {
            return false;
        };
        let time = session.clock.convert(timestamp_ns);
        self.viz
            .render_with(|canvas| session.module.render(time, canvas))
    }

    /// Copy-on-read view of the last completed visualization.
    pub fn visualization_frame(&self) -> Option<VisualizationFrame> {
        self.viz.snapshot()
    }

    /// Tear the session down. The module is stopped synchronously; when this
    /// returns, module-owned threads have exited and files are flushed.
    /// Calling without a session is a no-op.
    pub fn stop(&self) -> Result<()> {
        let Some(session) = self.session.swap(None) else {
            return Ok(());
        };
        info!("stopping session");
        self.pending.clear();
        session.module.stop()
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Static IMU-to-camera axis permutation of the supported device class,
/// row-major.
const IMU_TO_CAMERA_MATRIX: &str = "-0,-1,0,-1,0,0,0,0,-1";

/// Session metadata files, written fresh on every configure that names them.
/// The info file is a one-line JSON dump describing the session; the
/// parameters file uses `key value;` lines in the calibration file format.
fn write_session_files(settings: &PipelineSettings, request: &ConfigureRequest) -> Result<()> {
    if let Some(path) = &settings.info_file_name {
        let info = serde_json::json!({
            "module": settings.module_name,
            "camera": { "width": request.width, "height": request.height },
            "frameStride": request.frame_stride,
            "version": env!("CARGO_PKG_VERSION"),
        });
        std::fs::write(path, format!("{info}\n"))?;
        info!(%path, "wrote session info");
    }
    if let Some(path) = &settings.parameters_file_name {
        let order = match settings.source_channel_order {
            crate::settings::ChannelOrder::Rgba => "rgba",
            crate::settings::ChannelOrder::Bgra => "bgra",
        };
        let params = format!(
            "imuToCameraMatrix {IMU_TO_CAMERA_MATRIX};\nimageWidth {};\nimageHeight {};\nframeStride {};\ntargetFps {};\nchannelOrder {};\n",
            request.width,
            request.height,
            request.frame_stride,
            settings.target_fps,
            order,
        );
        std::fs::write(path, params)?;
        info!(%path, "wrote session parameters");
    }
    Ok(())
}
