pub mod clock;
pub mod display;
pub mod error;
pub mod frame;
pub mod gpu;
pub mod module;
pub mod pipeline;
pub mod settings;

pub use error::{PipelineError, Result};
pub use pipeline::{ConfigureRequest, Pipeline};

use serde::{Deserialize, Serialize};

/// Launcher configuration for the demo runner. Session state never lives
/// here; everything the session needs goes through [`ConfigureRequest`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub camera: CameraFeedConfig,
    pub sensors: SensorFeedConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraFeedConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorFeedConfig {
    pub gyro_hz: u32,
    pub acc_hz: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub module_name: String,
    pub frame_stride: u32,
    pub run_seconds: u64,
    pub visualization_width: u32,
    pub visualization_height: u32,
}

impl Default for CameraFeedConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

impl Default for SensorFeedConfig {
    fn default() -> Self {
        Self {
            gyro_hz: 200,
            acc_hz: 100,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            module_name: "edge_filter".into(),
            frame_stride: 1,
            run_seconds: 5,
            visualization_width: 640,
            visualization_height: 480,
        }
    }
}
