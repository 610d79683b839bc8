//! Session settings parsed from the host-supplied JSON string.
//!
//! Keys are camelCase to match the host conventions. Every field has a
//! default; unknown keys are ignored so hosts can carry their own options in
//! the same object.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Channel order of the external camera texture.
///
/// Sources that hand over BGRA get a swizzle fix-up in the color conversion
/// pass; the rest of the pipeline always sees RGBA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    Rgba,
    Bgra,
}

/// Options consumed by the session and by specific module variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineSettings {
    /// Module variant to build ("recording", "external", "calibration",
    /// "edge_filter", "tracking").
    pub module_name: String,
    /// Nominal camera rate, recorded as metadata.
    pub target_fps: u32,
    pub record_sensors: bool,
    pub record_camera: bool,
    pub recording_file_name: Option<String>,
    pub video_recording_file_name: Option<String>,
    pub video_recording_fps: u32,
    pub info_file_name: Option<String>,
    pub parameters_file_name: Option<String>,
    pub source_channel_order: ChannelOrder,
    pub calibration_pattern_cols: u32,
    pub calibration_pattern_rows: u32,
    /// Binarization threshold for the calibration blob detector.
    pub calibration_threshold: u8,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            module_name: "edge_filter".into(),
            target_fps: 30,
            record_sensors: true,
            record_camera: false,
            recording_file_name: None,
            video_recording_file_name: None,
            video_recording_fps: 30,
            info_file_name: None,
            parameters_file_name: None,
            source_channel_order: ChannelOrder::Rgba,
            calibration_pattern_cols: 4,
            calibration_pattern_rows: 11,
            calibration_threshold: 160,
        }
    }
}

impl PipelineSettings {
    /// Parse the boundary settings string. Empty or whitespace-only input
    /// yields the defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_gives_defaults() {
        let s = PipelineSettings::from_json("  ").unwrap();
        assert_eq!(s.module_name, "edge_filter");
        assert!(s.record_sensors);
        assert!(!s.record_camera);
        assert_eq!(s.video_recording_fps, 30);
        assert_eq!(s.source_channel_order, ChannelOrder::Rgba);
    }

    #[test]
    fn camel_case_keys_parse() {
        let s = PipelineSettings::from_json(
            r#"{
                "moduleName": "recording",
                "recordCamera": true,
                "recordingFileName": "/tmp/run.jsonl",
                "videoRecordingFps": 15,
                "sourceChannelOrder": "bgra"
            }"#,
        )
        .unwrap();
        assert_eq!(s.module_name, "recording");
        assert!(s.record_camera);
        assert_eq!(s.recording_file_name.as_deref(), Some("/tmp/run.jsonl"));
        assert_eq!(s.video_recording_fps, 15);
        assert_eq!(s.source_channel_order, ChannelOrder::Bgra);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let s = PipelineSettings::from_json(
            r#"{"moduleName": "calibration", "hostOnlyOption": [1, 2, 3]}"#,
        )
        .unwrap();
        assert_eq!(s.module_name, "calibration");
        assert_eq!(s.calibration_pattern_cols, 4);
        assert_eq!(s.calibration_pattern_rows, 11);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(PipelineSettings::from_json("{not json").is_err());
    }
}
