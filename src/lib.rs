//! Scene-graph and render-command core for a 2D engine.
//!
//! Nodes live in an arena [`scene::Scene`] and carry a per-node
//! [`command::RenderState`]. Mutators set dirty bits; the first bit set on a
//! clean node enqueues it into the [`renderer::Renderer`] pool. A frame then
//! runs `begin_frame`, `update_dirty_nodes`, `visit`, and hands the sorted
//! command list to either the software canvas or the GPU backend.

pub mod affine;
pub mod canvas;
pub mod dirty;
pub mod layer;
pub mod region;
pub mod renderer;
pub mod scene;
pub mod sprite;
pub mod types;

// These modules are public for advanced use cases
pub mod command;
pub mod gpu;

pub mod prelude {
    pub use crate::affine::AffineTransform;
    pub use crate::canvas::{CanvasContext, TextureStore};
    pub use crate::dirty::DirtyFlags;
    pub use crate::gpu::GpuContext;
    pub use crate::layer::{ColorStop, GradientLayer};
    pub use crate::renderer::Renderer;
    pub use crate::scene::{Backend, NodeId, NodeKind, Scene};
    pub use crate::sprite::{Sprite, TextureId};
    pub use crate::types::{BlendFunc, Color, Point, Rect, Size};
}
