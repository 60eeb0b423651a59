//! GPU backend: per-node quad state and the draw-pass flush.
//!
//! Each drawable node owns a four-vertex quad rebuilt whenever its size or
//! displayed color changes. The flush walks the renderer's sorted command
//! list and replays it against a [`GpuContext`], which abstracts buffer
//! management and draw submission; [`wgpu_backend::WgpuBackend`] is the
//! real implementation and tests use a recording mock.

pub mod wgpu_backend;

use bytemuck::{Pod, Zeroable};

use crate::renderer::{DrawEntry, Renderer};
use crate::scene::{NodeKind, Scene};
use crate::sprite::TextureId;
use crate::types::{BlendFunc, Size};

/// One vertex of a node quad, as uploaded to the GPU.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
    pub tex_coord: [f32; 2],
}

impl QuadVertex {
    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 7]>() as wgpu::BufferAddress,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32x2,
                },
            ],
        }
    }
}

/// Handle to a vertex buffer owned by the backend.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct BufferId(pub u32);

/// GPU-side per-node command state.
///
/// Vertex order is top-left, top-right, bottom-left, bottom-right, drawn
/// as a triangle strip.
#[derive(Clone, Debug)]
pub struct GpuCmd {
    pub(crate) quad: [QuadVertex; 4],
    pub(crate) buffer: Option<BufferId>,
    pub(crate) quad_dirty: bool,
}

impl GpuCmd {
    pub(crate) fn new() -> Self {
        Self {
            quad: [QuadVertex::default(); 4],
            buffer: None,
            quad_dirty: true,
        }
    }

    /// Rebuild quad positions and colors from the node's content size and
    /// displayed corner colors. Texture coordinates are filled in at flush
    /// time, once the bound texture's dimensions are known.
    pub(crate) fn refresh_quad(&mut self, size: Size, corners: [[f32; 4]; 4]) {
        let (w, h) = (size.width, size.height);
        let positions = [
            [0.0, 0.0, 0.0],
            [w, 0.0, 0.0],
            [0.0, h, 0.0],
            [w, h, 0.0],
        ];
        for (vertex, (position, color)) in self
            .quad
            .iter_mut()
            .zip(positions.into_iter().zip(corners))
        {
            vertex.position = position;
            vertex.color = color;
        }
        self.quad_dirty = true;
    }

    pub fn quad(&self) -> &[QuadVertex; 4] {
        &self.quad
    }
}

/// What the draw pass needs from a GPU backend.
pub trait GpuContext {
    fn create_buffer(&mut self, vertices: &[QuadVertex]) -> BufferId;
    fn upload_vertices(&mut self, buffer: BufferId, vertices: &[QuadVertex]);
    /// Model-view-projection matrix applied to the next draw.
    fn set_matrix(&mut self, matrix: [[f32; 4]; 4]);
    fn set_blend_func(&mut self, blend: BlendFunc);
    fn bind_texture(&mut self, texture: Option<TextureId>);
    fn texture_size(&self, texture: TextureId) -> Option<Size>;
    fn draw_quad(&mut self, buffer: BufferId);
}

/// Replay the frame's sorted command list against the backend.
pub fn flush(scene: &mut Scene, renderer: &mut Renderer, ctx: &mut dyn GpuContext) {
    let entries: Vec<DrawEntry> = renderer.sorted_commands().to_vec();
    for entry in &entries {
        let Some(node) = scene.node_mut(entry.node) else {
            continue;
        };
        if !node.cmd.need_draw {
            continue;
        }

        let texture = match &node.kind {
            NodeKind::Sprite(sprite) => {
                let Some(tex_size) = ctx.texture_size(sprite.texture) else {
                    log::warn!("sprite references a missing texture {:?}", sprite.texture);
                    continue;
                };
                let coords = sprite.tex_coords(tex_size.width, tex_size.height);
                let texture = sprite.texture;
                let Some(gpu) = node.cmd.gpu_mut() else { continue };
                if gpu.quad.iter().map(|v| v.tex_coord).ne(coords.iter().copied()) {
                    for (vertex, coord) in gpu.quad.iter_mut().zip(coords) {
                        vertex.tex_coord = coord;
                    }
                    gpu.quad_dirty = true;
                }
                Some(texture)
            }
            _ => None,
        };

        let world = node.cmd.world_transform;
        let blend = node.blend.unwrap_or(BlendFunc::ALPHA_NON_PREMULTIPLIED);
        let Some(gpu) = node.cmd.gpu_mut() else { continue };

        let buffer = match gpu.buffer {
            Some(buffer) => {
                if gpu.quad_dirty {
                    ctx.upload_vertices(buffer, &gpu.quad);
                }
                buffer
            }
            None => {
                let buffer = ctx.create_buffer(&gpu.quad);
                gpu.buffer = Some(buffer);
                buffer
            }
        };
        gpu.quad_dirty = false;

        ctx.set_matrix(world.to_mat4());
        ctx.set_blend_func(blend);
        ctx.bind_texture(texture);
        ctx.draw_quad(buffer);
    }
}
