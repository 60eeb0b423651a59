//! wgpu implementation of [`GpuContext`].
//!
//! Quads are drawn one by one through a shared index buffer; per-draw
//! model-view-projection matrices go into a single uniform buffer bound
//! with dynamic offsets. Untextured nodes sample a 1x1 white texture so a
//! single shader covers both colored layers and sprites.

use std::collections::HashMap;

use wgpu::util::DeviceExt;
use wgpu::{
    BindGroup, BindGroupLayout, Buffer, Device, Extent3d, Queue, RenderPipeline, Sampler,
    TextureFormat,
};

use crate::gpu::{BufferId, GpuContext, QuadVertex};
use crate::sprite::TextureId;
use crate::types::{BlendFactor, BlendFunc, Size};

const SHADER_SOURCE: &str = r#"
struct Globals {
    mvp: mat4x4<f32>,
}

@group(0) @binding(0)
var<uniform> globals: Globals;

@group(1) @binding(0)
var quad_texture: texture_2d<f32>;
@group(1) @binding(1)
var quad_sampler: sampler;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) color: vec4<f32>,
    @location(2) tex_coord: vec2<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) color: vec4<f32>,
    @location(1) tex_coord: vec2<f32>,
}

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = globals.mvp * vec4<f32>(in.position, 1.0);
    out.color = in.color;
    out.tex_coord = in.tex_coord;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return in.color * textureSample(quad_texture, quad_sampler, in.tex_coord);
}
"#;

/// Uniform slots are spaced by the required dynamic-offset alignment.
const UNIFORM_STRIDE: u64 = 256;
const MAT4_SIZE: u64 = 64;

struct PendingDraw {
    buffer: BufferId,
    texture: Option<TextureId>,
    additive: bool,
    uniform_offset: u32,
}

struct TextureEntry {
    bind_group: BindGroup,
    size: Size,
}

pub struct WgpuBackend {
    device: Device,
    queue: Queue,

    pipeline_alpha: RenderPipeline,
    pipeline_additive: RenderPipeline,
    texture_layout: BindGroupLayout,
    uniform_layout: BindGroupLayout,
    sampler: Sampler,

    index_buffer: Buffer,
    uniform_buffer: Buffer,
    uniform_bind_group: BindGroup,
    uniform_capacity: u64,
    uniform_staging: Vec<u8>,

    buffers: HashMap<BufferId, Buffer>,
    next_buffer: u32,
    textures: HashMap<TextureId, TextureEntry>,
    white_bind_group: BindGroup,

    surface_size: Size,
    draws: Vec<PendingDraw>,

    current_matrix: [[f32; 4]; 4],
    current_additive: bool,
    current_texture: Option<TextureId>,
}

fn blend_state(additive: bool) -> wgpu::BlendState {
    if additive {
        wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::SrcAlpha,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            },
        }
    } else {
        wgpu::BlendState::ALPHA_BLENDING
    }
}

fn create_pipeline(
    device: &Device,
    format: TextureFormat,
    uniform_layout: &BindGroupLayout,
    texture_layout: &BindGroupLayout,
    additive: bool,
) -> RenderPipeline {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("Quad Shader"),
        source: wgpu::ShaderSource::Wgsl(SHADER_SOURCE.into()),
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("Quad Pipeline Layout"),
        bind_group_layouts: &[uniform_layout, texture_layout],
        immediate_size: 0,
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(if additive {
            "Quad Pipeline (additive)"
        } else {
            "Quad Pipeline (alpha)"
        }),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: Some("vs_main"),
            buffers: &[QuadVertex::desc()],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(blend_state(additive)),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview_mask: None,
        cache: None,
    })
}

/// Row-major multiply, matching [`crate::affine::AffineTransform::to_mat4`].
fn mul_mat4(a: &[[f32; 4]; 4], b: &[[f32; 4]; 4]) -> [[f32; 4]; 4] {
    let mut out = [[0.0; 4]; 4];
    for (row, out_row) in out.iter_mut().enumerate() {
        for (col, cell) in out_row.iter_mut().enumerate() {
            *cell = (0..4).map(|k| a[row][k] * b[k][col]).sum();
        }
    }
    out
}

/// Matrices are kept row-major on the CPU side; WGSL reads uniform
/// matrices column-major, so uploads go through this.
fn transpose(m: &[[f32; 4]; 4]) -> [[f32; 4]; 4] {
    let mut out = [[0.0; 4]; 4];
    for (row, out_row) in out.iter_mut().enumerate() {
        for (col, cell) in out_row.iter_mut().enumerate() {
            *cell = m[col][row];
        }
    }
    out
}

/// Orthographic projection from pixel space (origin top-left, Y down) to
/// normalized device coordinates.
fn projection(size: Size) -> [[f32; 4]; 4] {
    let sx = 2.0 / size.width.max(1.0);
    let sy = -2.0 / size.height.max(1.0);
    [
        [sx, 0.0, 0.0, -1.0],
        [0.0, sy, 0.0, 1.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

impl WgpuBackend {
    pub fn new(device: Device, queue: Queue, format: TextureFormat, surface_size: Size) -> Self {
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Quad Uniform Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(MAT4_SIZE),
                },
                count: None,
            }],
        });

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Quad Texture Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Quad Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let pipeline_alpha =
            create_pipeline(&device, format, &uniform_layout, &texture_layout, false);
        let pipeline_additive =
            create_pipeline(&device, format, &uniform_layout, &texture_layout, true);

        let indices: [u16; 6] = [0, 1, 2, 1, 3, 2];
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Quad Index Buffer"),
            contents: bytemuck::cast_slice(&indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        let uniform_capacity = UNIFORM_STRIDE * 256;
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Quad Uniform Buffer"),
            size: uniform_capacity,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let uniform_bind_group = Self::uniform_bind_group(&device, &uniform_layout, &uniform_buffer);

        let white_bind_group = Self::texture_bind_group_from_rgba(
            &device,
            &queue,
            &texture_layout,
            &sampler,
            1,
            1,
            &[255, 255, 255, 255],
        );

        Self {
            device,
            queue,
            pipeline_alpha,
            pipeline_additive,
            texture_layout,
            uniform_layout,
            sampler,
            index_buffer,
            uniform_buffer,
            uniform_bind_group,
            uniform_capacity,
            uniform_staging: Vec::new(),
            buffers: HashMap::new(),
            next_buffer: 0,
            textures: HashMap::new(),
            white_bind_group,
            surface_size,
            draws: Vec::new(),
            current_matrix: [[0.0; 4]; 4],
            current_additive: false,
            current_texture: None,
        }
    }

    fn uniform_bind_group(
        device: &Device,
        layout: &BindGroupLayout,
        buffer: &Buffer,
    ) -> BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Quad Uniform Bind Group"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(MAT4_SIZE),
                }),
            }],
        })
    }

    fn texture_bind_group_from_rgba(
        device: &Device,
        queue: &Queue,
        layout: &BindGroupLayout,
        sampler: &Sampler,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> BindGroup {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Quad Texture"),
            size: Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Quad Texture Bind Group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        })
    }

    /// Register an RGBA texture under the id sprites refer to it by.
    pub fn upload_texture(&mut self, id: TextureId, width: u32, height: u32, rgba: &[u8]) {
        let bind_group = Self::texture_bind_group_from_rgba(
            &self.device,
            &self.queue,
            &self.texture_layout,
            &self.sampler,
            width,
            height,
            rgba,
        );
        self.textures.insert(
            id,
            TextureEntry {
                bind_group,
                size: Size::new(width as f32, height as f32),
            },
        );
    }

    pub fn resize(&mut self, size: Size) {
        self.surface_size = size;
    }

    /// Encode the pending draws into a render pass on `view` and submit.
    pub fn present(&mut self, view: &wgpu::TextureView, clear_color: wgpu::Color) {
        if self.uniform_staging.len() as u64 > self.uniform_capacity {
            self.uniform_capacity = (self.uniform_staging.len() as u64).next_power_of_two();
            self.uniform_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Quad Uniform Buffer"),
                size: self.uniform_capacity,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            self.uniform_bind_group =
                Self::uniform_bind_group(&self.device, &self.uniform_layout, &self.uniform_buffer);
        }
        if !self.uniform_staging.is_empty() {
            self.queue
                .write_buffer(&self.uniform_buffer, 0, &self.uniform_staging);
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Quad Encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Quad Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(clear_color),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
            for draw in &self.draws {
                let Some(buffer) = self.buffers.get(&draw.buffer) else {
                    continue;
                };
                pass.set_pipeline(if draw.additive {
                    &self.pipeline_additive
                } else {
                    &self.pipeline_alpha
                });
                pass.set_bind_group(0, &self.uniform_bind_group, &[draw.uniform_offset]);
                let texture_group = draw
                    .texture
                    .and_then(|id| self.textures.get(&id))
                    .map(|e| &e.bind_group)
                    .unwrap_or(&self.white_bind_group);
                pass.set_bind_group(1, texture_group, &[]);
                pass.set_vertex_buffer(0, buffer.slice(..));
                pass.draw_indexed(0..6, 0, 0..1);
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        self.draws.clear();
        self.uniform_staging.clear();
    }
}

impl GpuContext for WgpuBackend {
    fn create_buffer(&mut self, vertices: &[QuadVertex]) -> BufferId {
        let id = BufferId(self.next_buffer);
        self.next_buffer += 1;
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Quad Vertex Buffer"),
                contents: bytemuck::cast_slice(vertices),
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            });
        self.buffers.insert(id, buffer);
        id
    }

    fn upload_vertices(&mut self, buffer: BufferId, vertices: &[QuadVertex]) {
        if let Some(buffer) = self.buffers.get(&buffer) {
            self.queue
                .write_buffer(buffer, 0, bytemuck::cast_slice(vertices));
        }
    }

    fn set_matrix(&mut self, matrix: [[f32; 4]; 4]) {
        self.current_matrix = matrix;
    }

    fn set_blend_func(&mut self, blend: BlendFunc) {
        self.current_additive = matches!(
            (blend.src, blend.dst),
            (BlendFactor::SrcAlpha, BlendFactor::One) | (BlendFactor::One, BlendFactor::One)
        );
    }

    fn bind_texture(&mut self, texture: Option<TextureId>) {
        self.current_texture = texture;
    }

    fn texture_size(&self, texture: TextureId) -> Option<Size> {
        self.textures.get(&texture).map(|e| e.size)
    }

    fn draw_quad(&mut self, buffer: BufferId) {
        let mvp = transpose(&mul_mat4(&projection(self.surface_size), &self.current_matrix));
        let uniform_offset = self.uniform_staging.len() as u32;
        self.uniform_staging
            .extend_from_slice(bytemuck::cast_slice(&mvp));
        self.uniform_staging
            .resize(uniform_offset as usize + UNIFORM_STRIDE as usize, 0);
        self.draws.push(PendingDraw {
            buffer,
            texture: self.current_texture,
            additive: self.current_additive,
            uniform_offset,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_maps_corners_to_ndc() {
        let p = projection(Size::new(200.0, 100.0));
        let corner = mul_vec4(&p, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(corner[0], -1.0);
        assert_eq!(corner[1], 1.0);
        let corner = mul_vec4(&p, [200.0, 100.0, 0.0, 1.0]);
        assert_eq!(corner[0], 1.0);
        assert_eq!(corner[1], -1.0);
    }

    #[test]
    fn mvp_applies_model_translation_before_projection() {
        let model = crate::affine::AffineTransform::translate(100.0, 50.0).to_mat4();
        let mvp = mul_mat4(&projection(Size::new(200.0, 100.0)), &model);
        let origin = mul_vec4(&mvp, [0.0, 0.0, 0.0, 1.0]);
        // (100, 50) in a 200x100 viewport is dead center.
        assert_eq!(origin[0], 0.0);
        assert_eq!(origin[1], 0.0);
    }

    fn mul_vec4(m: &[[f32; 4]; 4], v: [f32; 4]) -> [f32; 4] {
        let mut out = [0.0; 4];
        for (row, cell) in out.iter_mut().enumerate() {
            *cell = (0..4).map(|k| m[row][k] * v[k]).sum();
        }
        out
    }
}
