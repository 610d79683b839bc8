//! Processing-module abstraction and the variant factory.
//!
//! A module is a capability set, not a class hierarchy: frame and inertial
//! ingestion plus a status line are required, everything else (GPS, JSON
//! side-channel, rendering, pose output, teardown) defaults to a safe no-op
//! declared once here. Thread affinity is a caller contract: sensor-side
//! calls arrive on the algorithm context, rendering calls on the
//! graphics-surface context; [`ThreadSafeModule`] lifts that restriction.

pub mod calibration;
pub mod filter;
pub mod recording;
pub mod threadsafe;

pub use threadsafe::ThreadSafeModule;

use nalgebra::{Quaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::display::VisualizationCanvas;
use crate::error::{PipelineError, Result};
use crate::frame::{CapturedFrame, GpsFix};
use crate::settings::PipelineSettings;

/// Coarse tracking state, reported to hosts as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingStatus {
    Initializing,
    Tracking,
    Lost,
}

impl TrackingStatus {
    pub fn as_i32(self) -> i32 {
        match self {
            TrackingStatus::Initializing => 0,
            TrackingStatus::Tracking => 1,
            TrackingStatus::Lost => 2,
        }
    }
}

/// One pose estimate on the session timeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub time: f64,
    pub position: Vector3<f64>,
    /// Orientation as a quaternion (x, y, z, w).
    pub orientation: Quaternion<f64>,
}

impl Pose {
    /// The flat boundary form: `[t, px, py, pz, qx, qy, qz, qw]`.
    pub fn to_array(&self) -> [f64; 8] {
        [
            self.time,
            self.position.x,
            self.position.y,
            self.position.z,
            self.orientation.i,
            self.orientation.j,
            self.orientation.k,
            self.orientation.w,
        ]
    }
}

/// The pluggable unit of work behind the pipeline.
///
/// Required methods run on the algorithm context; `setup_rendering` and
/// `render` run on the graphics-surface context. Implementations never see
/// concurrent calls once wrapped in [`ThreadSafeModule`].
pub trait ProcessingModule: Send {
    /// Ingest one transcoded camera frame (gray always, color when
    /// visualization is on).
    fn add_frame(&mut self, frame: &CapturedFrame);

    fn add_gyro(&mut self, time: f64, sample: Vector3<f64>);

    fn add_acc(&mut self, time: f64, sample: Vector3<f64>);

    /// One-line (or multi-line) status text for the host UI.
    fn status(&self) -> String;

    fn add_gps(&mut self, _time: f64, _fix: GpsFix) {}

    /// Arbitrary structured side-channel data from the host.
    fn add_json_data(&mut self, _time: f64, _data: &serde_json::Value) {}

    /// Announces the visualization canvas size before the first `render`.
    fn setup_rendering(&mut self, _width: u32, _height: u32) {}

    /// Draw into the canvas; return `true` only when pixels changed.
    fn render(&mut self, _time: f64, _canvas: &mut VisualizationCanvas<'_>) -> bool {
        false
    }

    fn tracking_status(&self) -> TrackingStatus {
        TrackingStatus::Initializing
    }

    fn pose(&self) -> Option<Pose> {
        None
    }

    /// Synchronous teardown: flush output, join background threads. Must be
    /// safe to call more than once.
    fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn ProcessingModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn ProcessingModule")
    }
}

/// Inputs the factory hands to a variant constructor.
pub struct ModuleParams<'a> {
    pub width: u32,
    pub height: u32,
    pub settings: &'a PipelineSettings,
}

/// Build a module variant by name. Unknown names are a fatal configuration
/// error, as is "tracking" in a build without a bundled tracker (hosts
/// supply their own through `Pipeline::configure_with_module`).
pub fn build_module(name: &str, params: &ModuleParams<'_>) -> Result<Box<dyn ProcessingModule>> {
    match name {
        "recording" => Ok(Box::new(recording::RecordingModule::new(
            recording::RecordingOptions::from_settings(params.settings, false),
        )?)),
        "external" => Ok(Box::new(recording::RecordingModule::new(
            recording::RecordingOptions::from_settings(params.settings, true),
        )?)),
        "calibration" => Ok(Box::new(calibration::CalibrationModule::from_settings(
            params.settings,
        ))),
        "edge_filter" => Ok(Box::new(filter::EdgeFilterModule::new())),
        "tracking" => Err(PipelineError::config(
            "no tracking backend in this build; install one via configure_with_module",
        )),
        other => Err(PipelineError::config(format!("no such module: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MinimalModule;

    impl ProcessingModule for MinimalModule {
        fn add_frame(&mut self, _frame: &CapturedFrame) {}
        fn add_gyro(&mut self, _time: f64, _sample: Vector3<f64>) {}
        fn add_acc(&mut self, _time: f64, _sample: Vector3<f64>) {}
        fn status(&self) -> String {
            "minimal".into()
        }
    }

    #[test]
    fn optional_capabilities_default_to_noops() {
        let mut m = MinimalModule;
        m.add_gps(
            1.0,
            GpsFix {
                latitude: 0.0,
                longitude: 0.0,
                altitude: 0.0,
                accuracy: 1.0,
            },
        );
        m.add_json_data(1.0, &serde_json::json!({"k": 1}));
        m.setup_rendering(64, 64);
        let mut pixels = vec![0u8; 64 * 64 * 4];
        let mut canvas = VisualizationCanvas {
            width: 64,
            height: 64,
            pixels: &mut pixels,
        };
        assert!(!m.render(1.0, &mut canvas));
        assert_eq!(m.tracking_status(), TrackingStatus::Initializing);
        assert!(m.pose().is_none());
        assert!(m.stop().is_ok());
    }

    #[test]
    fn pose_array_order_is_time_position_quaternion() {
        let pose = Pose {
            time: 9.5,
            position: Vector3::new(1.0, 2.0, 3.0),
            orientation: Quaternion::new(0.5, 0.1, 0.2, 0.3), // w, i, j, k
        };
        assert_eq!(pose.to_array(), [9.5, 1.0, 2.0, 3.0, 0.1, 0.2, 0.3, 0.5]);
    }

    #[test]
    fn tracking_status_integers_are_stable() {
        assert_eq!(TrackingStatus::Initializing.as_i32(), 0);
        assert_eq!(TrackingStatus::Tracking.as_i32(), 1);
        assert_eq!(TrackingStatus::Lost.as_i32(), 2);
    }

    #[test]
    fn unknown_module_name_is_a_config_error() {
        let settings = PipelineSettings::default();
        let params = ModuleParams {
            width: 640,
            height: 480,
            settings: &settings,
        };
        let err = build_module("warp_drive", &params).unwrap_err();
        assert!(err.to_string().contains("no such module"));
    }

    #[test]
    fn tracking_requires_a_host_backend() {
        let settings = PipelineSettings::default();
        let params = ModuleParams {
            width: 640,
            height: 480,
            settings: &settings,
        };
        assert!(build_module("tracking", &params).is_err());
    }

    #[test]
    fn edge_filter_builds_by_name() {
        let settings = PipelineSettings::default();
        let params = ModuleParams {
            width: 640,
            height: 480,
            settings: &settings,
        };
        let module = build_module("edge_filter", &params).unwrap();
        assert_eq!(module.status(), "edge filter: waiting for frames");
    }
}
