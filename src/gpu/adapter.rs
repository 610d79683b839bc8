//! Texture adapters: render the camera texture into a CPU-readable target.
//!
//! Each adapter owns one render target and the pipeline that fills it. A
//! readback always renders first, so the caller sees the texture contents
//! as of the moment of the call, then copies through a staging buffer
//! sized to wgpu's row alignment.

use std::time::Instant;

use tracing::trace;
use wgpu::*;

use crate::error::{PipelineError, Result};
use crate::gpu::transcoder::{QuadGeometry, QuadVertex};
use crate::gpu::GpuContext;
use crate::settings::ChannelOrder;

/// Output layout produced by an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    /// Full color, RGBA bytes.
    Color,
    /// Luminance replicated to every channel, still RGBA bytes.
    Gray,
    /// Four luminance values per texel: the target is a quarter as wide and
    /// a readback row is exactly one gray byte per source pixel.
    GrayPacked,
}

impl AdapterKind {
    pub fn label(self) -> &'static str {
        match self {
            AdapterKind::Color => "Color",
            AdapterKind::Gray => "Gray",
            AdapterKind::GrayPacked => "Packed Gray",
        }
    }

    /// Render target dimensions for a camera of `width` x `height`.
    pub fn target_size(self, width: u32, height: u32) -> (u32, u32) {
        match self {
            AdapterKind::Color | AdapterKind::Gray => (width, height),
            AdapterKind::GrayPacked => (width / 4, height),
        }
    }

    /// Packing constraints on the source dimensions.
    pub fn validate_source(self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(PipelineError::config(format!(
                "camera dimensions must be nonzero, got {width}x{height}"
            )));
        }
        if self == AdapterKind::GrayPacked && width % 4 != 0 {
            return Err(PipelineError::config(format!(
                "packed gray requires a width divisible by 4, got {width}"
            )));
        }
        Ok(())
    }
}

const SHADER_COMMON: &str = r#"
@group(0) @binding(0) var camera_tex: texture_2d<f32>;
@group(0) @binding(1) var camera_samp: sampler;

struct VertexOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@location(0) pos: vec3<f32>, @location(1) uv: vec2<f32>) -> VertexOut {
    var out: VertexOut;
    out.position = vec4<f32>(pos, 1.0);
    out.uv = uv;
    return out;
}

fn luminance(c: vec3<f32>) -> f32 {
    return dot(c, vec3<f32>(0.299, 0.587, 0.114));
}
"#;

/// Fragment stage per kind. `{swizzle}` undoes a BGRA source ordering.
fn fragment_source(kind: AdapterKind, order: ChannelOrder) -> String {
    let swizzle = match order {
        ChannelOrder::Rgba => "",
        ChannelOrder::Bgra => ".bgra",
    };
    let body = match kind {
        AdapterKind::Color => format!(
            r#"
@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {{
    return textureSample(camera_tex, camera_samp, in.uv){swizzle};
}}
"#
        ),
        AdapterKind::Gray => format!(
            r#"
@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {{
    let c = textureSample(camera_tex, camera_samp, in.uv){swizzle};
    let l = luminance(c.rgb);
    return vec4<f32>(l, l, l, 1.0);
}}
"#
        ),
        // One target texel covers four source pixels along x. Integer loads:
        // sampling would blur across the packing boundary.
        AdapterKind::GrayPacked => format!(
            r#"
@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {{
    let base = vec2<i32>(i32(in.position.x) * 4, i32(in.position.y));
    var packed: vec4<f32>;
    for (var i: i32 = 0; i < 4; i = i + 1) {{
        let c = textureLoad(camera_tex, base + vec2<i32>(i, 0), 0){swizzle};
        packed[i] = luminance(c.rgb);
    }}
    return packed;
}}
"#
        ),
    };
    format!("{SHADER_COMMON}{body}")
}

pub struct TextureAdapter {
    kind: AdapterKind,
    target_width: u32,
    target_height: u32,
    texture: Texture,
    view: TextureView,
    pipeline: RenderPipeline,
    bind_group: BindGroup,
    staging: Buffer,
    padded_bytes_per_row: u32,
}

impl TextureAdapter {
    pub(crate) fn new(
        gpu: &GpuContext,
        kind: AdapterKind,
        source_view: &TextureView,
        sampler: &Sampler,
        source_width: u32,
        source_height: u32,
        order: ChannelOrder,
    ) -> Result<Self> {
        kind.validate_source(source_width, source_height)?;
        let (target_width, target_height) = kind.target_size(source_width, source_height);
        let device = &gpu.device;

        let texture = device.create_texture(&TextureDescriptor {
            label: Some(&format!("{} Adapter Target", kind.label())),
            size: Extent3d {
                width: target_width,
                height: target_height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&TextureViewDescriptor::default());

        let shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some(&format!("{} Adapter Shader", kind.label())),
            source: ShaderSource::Wgsl(fragment_source(kind, order).into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("Adapter Bind Group Layout"),
            entries: &[
                BindGroupLayoutEntry {
                    binding: 0,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Texture {
                        sample_type: TextureSampleType::Float { filterable: true },
                        view_dimension: TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 1,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Sampler(SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some(&format!("{} Adapter Bind Group", kind.label())),
            layout: &bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(source_view),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::Sampler(sampler),
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("Adapter Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some(&format!("{} Adapter Pipeline", kind.label())),
            layout: Some(&pipeline_layout),
            cache: None,
            vertex: VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[QuadVertex::layout()],
            },
            fragment: Some(FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(ColorTargetState {
                    format: TextureFormat::Rgba8Unorm,
                    blend: Some(BlendState::REPLACE),
                    write_mask: ColorWrites::ALL,
                })],
            }),
            primitive: PrimitiveState {
                topology: PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: MultisampleState::default(),
            multiview: None,
        });

        let padded_bytes_per_row = align_to(target_width * 4, COPY_BYTES_PER_ROW_ALIGNMENT);
        let staging = device.create_buffer(&BufferDescriptor {
            label: Some(&format!("{} Adapter Staging", kind.label())),
            size: padded_bytes_per_row as u64 * target_height as u64,
            usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            kind,
            target_width,
            target_height,
            texture,
            view,
            pipeline,
            bind_group,
            staging,
            padded_bytes_per_row,
        })
    }

    pub fn kind(&self) -> AdapterKind {
        self.kind
    }

    pub fn target_size(&self) -> (u32, u32) {
        (self.target_width, self.target_height)
    }

    /// Bytes a readback destination must hold: always 4 per target texel.
    pub fn byte_len(&self) -> usize {
        (self.target_width * self.target_height * 4) as usize
    }

    /// Render the current camera texture contents and copy the target back
    /// into `dest`.
    ///
    /// # Panics
    ///
    /// Panics when `dest.len()` differs from [`byte_len`](Self::byte_len).
    /// A mismatched destination is a programming error at the call site, not
    /// a runtime condition.
    pub fn read_pixels(
        &self,
        gpu: &GpuContext,
        geometry: &QuadGeometry,
        dest: &mut [u8],
    ) -> Result<()> {
        assert_eq!(
            dest.len(),
            self.byte_len(),
            "readback destination must be exactly {}x{} RGBA bytes",
            self.target_width,
            self.target_height,
        );
        let start = Instant::now();
        let device = &gpu.device;

        let mut encoder = device.create_command_encoder(&CommandEncoderDescriptor {
            label: Some("Transcode Encoder"),
        });

        {
            let mut render_pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("Transcode Pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &self.view,
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Clear(Color::BLACK),
                        store: StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            render_pass.set_pipeline(&self.pipeline);
            render_pass.set_bind_group(0, &self.bind_group, &[]);
            geometry.draw(&mut render_pass);
        }

        encoder.copy_texture_to_buffer(
            ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            ImageCopyBuffer {
                buffer: &self.staging,
                layout: ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_bytes_per_row),
                    rows_per_image: Some(self.target_height),
                },
            },
            Extent3d {
                width: self.target_width,
                height: self.target_height,
                depth_or_array_layers: 1,
            },
        );

        gpu.queue.submit(std::iter::once(encoder.finish()));

        let slice = self.staging.slice(..);
        let (tx, rx) = flume::bounded(1);
        slice.map_async(MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device.poll(Maintain::Wait);
        rx.recv()
            .map_err(|_| PipelineError::gpu("readback map callback never ran"))?
            .map_err(|err| PipelineError::gpu(format!("readback map failed: {err}")))?;

        {
            let mapped = slice.get_mapped_range();
            let row_bytes = (self.target_width * 4) as usize;
            let padded = self.padded_bytes_per_row as usize;
            for row in 0..self.target_height as usize {
                let src = row * padded;
                let dst = row * row_bytes;
                dest[dst..dst + row_bytes].copy_from_slice(&mapped[src..src + row_bytes]);
            }
        }
        self.staging.unmap();

        metrics::histogram!("transcode_time_us").record(start.elapsed().as_micros() as f64);
        trace!(kind = self.kind.label(), "read back adapter target");
        Ok(())
    }
}

impl Drop for TextureAdapter {
    fn drop(&mut self) {
        // Release device memory now; a dropped handle alone waits for the
        // device to collect it.
        self.texture.destroy();
        self.staging.destroy();
    }
}

/// Round `value` up to a multiple of `alignment`.
pub(crate) fn align_to(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) / alignment * alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_size_per_kind() {
        assert_eq!(AdapterKind::Color.target_size(640, 480), (640, 480));
        assert_eq!(AdapterKind::Gray.target_size(640, 480), (640, 480));
        assert_eq!(AdapterKind::GrayPacked.target_size(640, 480), (160, 480));
    }

    #[test]
    fn packed_gray_requires_width_multiple_of_four() {
        assert!(AdapterKind::GrayPacked.validate_source(642, 480).is_err());
        assert!(AdapterKind::GrayPacked.validate_source(640, 480).is_ok());
        assert!(AdapterKind::Gray.validate_source(642, 480).is_ok());
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        assert!(AdapterKind::Color.validate_source(0, 480).is_err());
        assert!(AdapterKind::Color.validate_source(640, 0).is_err());
    }

    #[test]
    fn align_to_rounds_up_to_the_alignment() {
        assert_eq!(align_to(256, 256), 256);
        assert_eq!(align_to(257, 256), 512);
        assert_eq!(align_to(640 * 4, 256), 2560);
        assert_eq!(align_to(30 * 4, 256), 256);
    }

    #[test]
    fn shader_swizzle_follows_channel_order() {
        let rgba = fragment_source(AdapterKind::Color, ChannelOrder::Rgba);
        let bgra = fragment_source(AdapterKind::Color, ChannelOrder::Bgra);
        assert!(!rgba.contains(".bgra"));
        assert!(bgra.contains(".bgra"));
    }

    #[test]
    fn packed_shader_loads_texels_instead_of_sampling() {
        let packed = fragment_source(AdapterKind::GrayPacked, ChannelOrder::Rgba);
        assert!(packed.contains("textureLoad"));
        assert!(!packed.contains("textureSample"));
    }

    #[test]
    fn gray_shaders_use_the_bt601_weights() {
        for kind in [AdapterKind::Gray, AdapterKind::GrayPacked] {
            let src = fragment_source(kind, ChannelOrder::Rgba);
            assert!(src.contains("0.299, 0.587, 0.114"));
            assert!(src.contains("luminance"));
        }
    }
}
