//! Blits the visualization buffer into a host-supplied render target.
//!
//! The frame keeps its aspect ratio; unused target area stays black. The
//! upload texture is reallocated only when the visualization dimensions
//! change.

use std::sync::Arc;

use tracing::debug;
use wgpu::*;

use crate::display::buffer::VisualizationFrame;
use crate::error::{PipelineError, Result};
use crate::gpu::GpuContext;

struct UploadTexture {
    texture: Texture,
    bind_group: BindGroup,
    width: u32,
    height: u32,
}

pub struct VisualizationRenderer {
    gpu: Arc<GpuContext>,
    pipeline: RenderPipeline,
    bind_group_layout: BindGroupLayout,
    sampler: Sampler,
    upload: Option<UploadTexture>,
}

impl VisualizationRenderer {
    /// `target_format` is the format of the views later passed to
    /// [`draw`](Self::draw), typically the host's surface format.
    pub fn new(gpu: Arc<GpuContext>, target_format: TextureFormat) -> Self {
        let device = &gpu.device;

        let shader_source = r#"
            @group(0) @binding(0) var viz_tex: texture_2d<f32>;
            @group(0) @binding(1) var viz_samp: sampler;

            struct VertexOut {
                @builtin(position) position: vec4<f32>,
                @location(0) uv: vec2<f32>,
            };

            @vertex
            fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOut {
                // Fullscreen triangle trick
                let uv = vec2<f32>(f32((vertex_index << 1u) & 2u), f32(vertex_index & 2u));
                var out: VertexOut;
                out.position = vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
                out.uv = vec2<f32>(uv.x, 1.0 - uv.y);
                return out;
            }

            @fragment
            fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
                return textureSample(viz_tex, viz_samp, in.uv);
            }
        "#;

        let shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("Visualization Shader"),
            source: ShaderSource::Wgsl(shader_source.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("Visualization Bind Group Layout"),
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

        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("Visualization Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("Visualization Pipeline"),
            layout: Some(&pipeline_layout),
            cache: None,
            vertex: VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[],
            },
            fragment: Some(FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(ColorTargetState {
                    format: target_format,
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

        let sampler = device.create_sampler(&SamplerDescriptor {
            label: Some("Visualization Sampler"),
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
            address_mode_w: AddressMode::ClampToEdge,
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            mipmap_filter: FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            gpu,
            pipeline,
            bind_group_layout,
            sampler,
            upload: None,
        }
    }

    fn ensure_upload(&mut self, width: u32, height: u32) {
        let current = match &self.upload {
            Some(u) => u.width == width && u.height == height,
            None => false,
        };
        if current {
            return;
        }
        if let Some(old) = self.upload.take() {
            old.texture.destroy();
        }
        debug!(width, height, "allocating visualization upload texture");
        let device = &self.gpu.device;
        let texture = device.create_texture(&TextureDescriptor {
            label: Some("Visualization Texture"),
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
        let view = texture.create_view(&TextureViewDescriptor::default());
        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("Visualization Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(&view),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::Sampler(&self.sampler),
                },
            ],
        });
        self.upload = Some(UploadTexture {
            texture,
            bind_group,
            width,
            height,
        });
    }

    /// Draw `frame` centered in the `target_width` x `target_height` view.
    pub fn draw(
        &mut self,
        frame: &VisualizationFrame,
        target: &TextureView,
        target_width: u32,
        target_height: u32,
    ) -> Result<()> {
        self.ensure_upload(frame.width, frame.height);
        let Some(upload) = self.upload.as_ref() else {
            return Err(PipelineError::gpu("visualization texture unavailable"));
        };

        self.gpu.queue.write_texture(
            ImageCopyTexture {
                texture: &upload.texture,
                mip_level: 0,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            &frame.pixels,
            ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * frame.width),
                rows_per_image: Some(frame.height),
            },
            Extent3d {
                width: frame.width,
                height: frame.height,
                depth_or_array_layers: 1,
            },
        );

        let (x, y, w, h) = letterbox(frame.width, frame.height, target_width, target_height);

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("Visualization Encoder"),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("Visualization Pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: target,
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
            render_pass.set_bind_group(0, &upload.bind_group, &[]);
            render_pass.set_viewport(x, y, w, h, 0.0, 1.0);
            render_pass.draw(0..3, 0..1);
        }
        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}

/// Largest centered rectangle with the frame's aspect ratio that fits the
/// target. Returned as (x, y, width, height) in target pixels.
fn letterbox(frame_w: u32, frame_h: u32, target_w: u32, target_h: u32) -> (f32, f32, f32, f32) {
    let fw = frame_w as f32;
    let fh = frame_h as f32;
    let tw = target_w as f32;
    let th = target_h as f32;
    let scale = (tw / fw).min(th / fh);
    let w = fw * scale;
    let h = fh * scale;
    ((tw - w) / 2.0, (th - h) / 2.0, w, h)
}
