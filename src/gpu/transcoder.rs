//! Frame transcoder: owns the camera texture, the quad geometry every
//! adapter renders with, and the adapters themselves.
//!
//! Gray output uses the packed adapter whenever the camera width allows it,
//! which cuts readback bandwidth to a quarter. Color is only rendered when a
//! consumer asked for it.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info};
use wgpu::util::DeviceExt;
use wgpu::*;

use crate::error::{PipelineError, Result};
use crate::frame::{FramePixels, FrameSource};
use crate::gpu::adapter::{AdapterKind, TextureAdapter};
use crate::gpu::GpuContext;
use crate::settings::ChannelOrder;

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 3],
    pub tex_coord: [f32; 2],
}

impl QuadVertex {
    pub fn layout() -> VertexBufferLayout<'static> {
        const ATTRIBUTES: [VertexAttribute; 2] =
            vertex_attr_array![0 => Float32x3, 1 => Float32x2];
        VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadVertex>() as BufferAddress,
            step_mode: VertexStepMode::Vertex,
            attributes: &ATTRIBUTES,
        }
    }
}

/// Texture row 0 maps to the top of the quad.
const QUAD_VERTICES: [QuadVertex; 4] = [
    QuadVertex {
        position: [-1.0, -1.0, 0.0],
        tex_coord: [0.0, 1.0],
    },
    QuadVertex {
        position: [1.0, -1.0, 0.0],
        tex_coord: [1.0, 1.0],
    },
    QuadVertex {
        position: [1.0, 1.0, 0.0],
        tex_coord: [1.0, 0.0],
    },
    QuadVertex {
        position: [-1.0, 1.0, 0.0],
        tex_coord: [0.0, 0.0],
    },
];

const QUAD_INDICES: [u16; 6] = [2, 1, 0, 0, 3, 2];

/// The one quad all adapters share.
pub struct QuadGeometry {
    vertices: Buffer,
    indices: Buffer,
}

impl QuadGeometry {
    pub fn new(device: &Device) -> Self {
        let vertices = device.create_buffer_init(&util::BufferInitDescriptor {
            label: Some("Quad Vertex Buffer"),
            contents: bytemuck::cast_slice(&QUAD_VERTICES),
            usage: BufferUsages::VERTEX,
        });
        let indices = device.create_buffer_init(&util::BufferInitDescriptor {
            label: Some("Quad Index Buffer"),
            contents: bytemuck::cast_slice(&QUAD_INDICES),
            usage: BufferUsages::INDEX,
        });
        Self { vertices, indices }
    }

    pub fn draw(&self, pass: &mut RenderPass<'_>) {
        pass.set_vertex_buffer(0, self.vertices.slice(..));
        pass.set_index_buffer(self.indices.slice(..), IndexFormat::Uint16);
        pass.draw_indexed(0..QUAD_INDICES.len() as u32, 0, 0..1);
    }
}

/// Gray extraction strategy for a given camera width.
fn gray_kind_for(width: u32) -> AdapterKind {
    if width % 4 == 0 {
        AdapterKind::GrayPacked
    } else {
        AdapterKind::Gray
    }
}

pub struct FrameTranscoder {
    gpu: Arc<GpuContext>,
    width: u32,
    height: u32,
    order: ChannelOrder,
    /// Host-side handle of the source texture, carried as metadata.
    texture_id: u64,
    camera: Texture,
    camera_view: TextureView,
    sampler: Sampler,
    geometry: QuadGeometry,
    gray: TextureAdapter,
    color: Option<TextureAdapter>,
}

impl FrameTranscoder {
    pub fn new(
        gpu: Arc<GpuContext>,
        width: u32,
        height: u32,
        texture_id: u64,
        order: ChannelOrder,
    ) -> Result<Self> {
        let device = &gpu.device;

        let camera = device.create_texture(&TextureDescriptor {
            label: Some("Camera Texture"),
            size: Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let camera_view = camera.create_view(&TextureViewDescriptor::default());

        let sampler = device.create_sampler(&SamplerDescriptor {
            label: Some("Camera Sampler"),
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
            address_mode_w: AddressMode::ClampToEdge,
            mag_filter: FilterMode::Nearest,
            min_filter: FilterMode::Nearest,
            mipmap_filter: FilterMode::Nearest,
            ..Default::default()
        });

        let geometry = QuadGeometry::new(device);
        let gray = TextureAdapter::new(
            &gpu,
            gray_kind_for(width),
            &camera_view,
            &sampler,
            width,
            height,
            order,
        )?;

        info!(
            width,
            height,
            texture_id,
            gray = gray.kind().label(),
            "created frame transcoder"
        );

        Ok(Self {
            gpu,
            width,
            height,
            order,
            texture_id,
            camera,
            camera_view,
            sampler,
            geometry,
            gray,
            color: None,
        })
    }

    /// Build an adapter rendering from the camera texture. Used internally
    /// for the gray and color paths; public so hosts can add output taps.
    pub fn create_adapter(&self, kind: AdapterKind) -> Result<TextureAdapter> {
        TextureAdapter::new(
            &self.gpu,
            kind,
            &self.camera_view,
            &self.sampler,
            self.width,
            self.height,
            self.order,
        )
    }

    pub fn texture_id(&self) -> u64 {
        self.texture_id
    }

    /// Replace the camera texture contents with tightly packed RGBA bytes.
    pub fn upload_frame(&self, rgba: &[u8]) -> Result<()> {
        let expected = (self.width * self.height * 4) as usize;
        if rgba.len() != expected {
            return Err(PipelineError::config(format!(
                "frame upload must be {}x{} RGBA ({expected} bytes), got {}",
                self.width,
                self.height,
                rgba.len()
            )));
        }
        self.gpu.queue.write_texture(
            ImageCopyTexture {
                texture: &self.camera,
                mip_level: 0,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            rgba,
            ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * self.width),
                rows_per_image: Some(self.height),
            },
            Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }
}

impl FrameSource for FrameTranscoder {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn capture(&mut self, want_color: bool) -> Result<FramePixels> {
        let mut buf = vec![0u8; self.gray.byte_len()];
        self.gray.read_pixels(&self.gpu, &self.geometry, &mut buf)?;
        let gray = match self.gray.kind() {
            // Packed rows already hold one gray byte per source pixel.
            AdapterKind::GrayPacked => buf,
            _ => buf.chunks_exact(4).map(|px| px[0]).collect(),
        };

        let color = if want_color {
            let adapter = match self.color.take() {
                Some(adapter) => adapter,
                None => {
                    debug!("building color adapter on first color capture");
                    self.create_adapter(AdapterKind::Color)?
                }
            };
            let mut rgba = vec![0u8; adapter.byte_len()];
            adapter.read_pixels(&self.gpu, &self.geometry, &mut rgba)?;
            self.color = Some(adapter);
            Some(Bytes::from(rgba))
        } else {
            None
        };

        metrics::counter!("frames_transcoded").increment(1);
        Ok(FramePixels {
            width: self.width,
            height: self.height,
            gray: Bytes::from(gray),
            color,
        })
    }
}
