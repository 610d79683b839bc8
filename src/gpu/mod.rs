//! Headless GPU plumbing for frame transcoding.

pub mod adapter;
pub mod transcoder;

pub use adapter::{AdapterKind, TextureAdapter};
pub use transcoder::FrameTranscoder;

use tracing::{info, instrument};
use wgpu::*;

use crate::error::{PipelineError, Result};

/// Shared device handle. One per process; every transcoder and renderer in
/// the session allocates from it.
pub struct GpuContext {
    pub device: Device,
    pub queue: Queue,
    pub adapter_name: String,
}

impl GpuContext {
    /// Pick an adapter and open a device, blocking the caller. Runs once per
    /// session at configure time.
    #[instrument]
    pub fn new() -> Result<Self> {
        pollster::block_on(Self::request())
    }

    async fn request() -> Result<Self> {
        let instance = Instance::new(InstanceDescriptor {
            backends: Backends::all(),
            ..Default::default()
        });

        // Headless: no surface to be compatible with.
        let adapter = instance
            .request_adapter(&RequestAdapterOptions {
                power_preference: PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| PipelineError::gpu("no suitable GPU adapter found"))?;

        let adapter_name = adapter.get_info().name;
        info!("GPU: {adapter_name}");

        let (device, queue) = adapter
            .request_device(
                &DeviceDescriptor {
                    label: Some("Artemis GPU Device"),
                    required_features: Features::empty(),
                    required_limits: Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|err| PipelineError::gpu(format!("device request failed: {err}")))?;

        Ok(Self {
            device,
            queue,
            adapter_name,
        })
    }
}
