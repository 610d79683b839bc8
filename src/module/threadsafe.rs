//! Thread-safety decorator for processing modules.
//!
//! Serializes every call into the wrapped module behind one mutex so a module
//! written for single-context use can be driven from the sensor, graphics and
//! render threads concurrently. Status reads are the exception: they are
//! served from a separately locked snapshot refreshed right after each
//! `add_frame`, so a UI thread polling status never waits behind a slow
//! frame-processing call.
//!
//! Lock order is inner-then-status; status readers take only the status lock.

use parking_lot::{Mutex, RwLock};

use crate::display::VisualizationCanvas;
use crate::error::Result;
use crate::frame::{CapturedFrame, GpsFix};
use crate::module::{Pose, ProcessingModule, TrackingStatus};

#[derive(Clone)]
struct StatusSnapshot {
    text: String,
    tracking: TrackingStatus,
}

/// Mutex-serialized view of a [`ProcessingModule`] with cached status.
pub struct ThreadSafeModule {
    inner: Mutex<Box<dyn ProcessingModule>>,
    status: RwLock<StatusSnapshot>,
}

impl ThreadSafeModule {
    pub fn new(module: Box<dyn ProcessingModule>) -> Self {
        let snapshot = StatusSnapshot {
            text: module.status(),
            tracking: module.tracking_status(),
        };
        Self {
            inner: Mutex::new(module),
            status: RwLock::new(snapshot),
        }
    }

    /// Forward a frame, then refresh the status snapshot while the module is
    /// still locked so the cache can never run ahead of the module state.
    pub fn add_frame(&self, frame: &CapturedFrame) {
        let mut inner = self.inner.lock();
        inner.add_frame(frame);
        let snapshot = StatusSnapshot {
            text: inner.status(),
            tracking: inner.tracking_status(),
        };
        *self.status.write() = snapshot;
    }

    pub fn add_gyro(&self, time: f64, sample: nalgebra::Vector3<f64>) {
        self.inner.lock().add_gyro(time, sample);
    }

    pub fn add_acc(&self, time: f64, sample: nalgebra::Vector3<f64>) {
        self.inner.lock().add_acc(time, sample);
    }

    pub fn add_gps(&self, time: f64, fix: GpsFix) {
        self.inner.lock().add_gps(time, fix);
    }

    pub fn add_json_data(&self, time: f64, data: &serde_json::Value) {
        self.inner.lock().add_json_data(time, data);
    }

    pub fn setup_rendering(&self, width: u32, height: u32) {
        self.inner.lock().setup_rendering(width, height);
    }

    pub fn render(&self, time: f64, canvas: &mut VisualizationCanvas<'_>) -> bool {
        self.inner.lock().render(time, canvas)
    }

    /// Cached status text; never blocks on an in-flight module call.
    pub fn status(&self) -> String {
        self.status.read().text.clone()
    }

    /// Cached tracking state; never blocks on an in-flight module call.
    pub fn tracking_status(&self) -> TrackingStatus {
        self.status.read().tracking
    }

    /// Pose is read from the module itself (it is cheap and must be fresh),
    /// so this serializes with the other calls.
    pub fn pose(&self) -> Option<Pose> {
        self.inner.lock().pose()
    }

    pub fn stop(&self) -> Result<()> {
        self.inner.lock().stop()
    }
}
