//! Offscreen memoization of a baked layer's subtree.
//!
//! The cache snapshots the subtree in the baked layer's local space, so
//! moving an ancestor repositions the cached surface without re-rendering
//! it. Mutations inside the subtree re-arm the cache through the counter:
//! a stale cache is scheduled for two consecutive re-render passes, which
//! absorbs state that settles over two frames before the cache goes back
//! to being reused as-is.

use tiny_skia::Pixmap;

use crate::affine::AffineTransform;
use crate::canvas::{draw_node, CanvasContext, TextureStore};
use crate::scene::{NodeId, Scene};
use crate::types::{Point, Rect};

#[derive(Clone)]
pub struct BakeCache {
    surface: Option<Pixmap>,
    /// Local-space position of the surface's top-left pixel.
    origin: Point,
    /// Remaining re-render passes before the surface is trusted.
    counter: u8,
    renders: u32,
}

impl std::fmt::Debug for BakeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BakeCache")
            .field("surface", &self.surface.as_ref().map(|s| (s.width(), s.height())))
            .field("origin", &self.origin)
            .field("counter", &self.counter)
            .field("renders", &self.renders)
            .finish()
    }
}

impl BakeCache {
    pub(crate) fn new() -> Self {
        Self {
            surface: None,
            origin: Point::ZERO,
            counter: 2,
            renders: 0,
        }
    }

    /// Re-arm a settled cache. A cache already scheduled for re-rendering
    /// keeps its remaining budget.
    pub(crate) fn invalidate(&mut self) {
        if self.counter == 0 {
            self.counter = 2;
        }
    }

    pub fn surface(&self) -> Option<&Pixmap> {
        self.surface.as_ref()
    }

    pub fn origin(&self) -> Point {
        self.origin
    }

    pub fn counter(&self) -> u8 {
        self.counter
    }

    /// How many times the subtree has been re-rendered into the surface.
    pub fn renders(&self) -> u32 {
        self.renders
    }

    #[cfg(test)]
    pub(crate) fn force_counter(&mut self, counter: u8) {
        self.counter = counter;
    }
}

/// Painter's-order list of the drawable nodes under `root`, including the
/// root itself. Invisible subtrees are skipped; nested bake caches are not
/// consulted, their content renders directly.
fn subtree_draw_order(scene: &Scene, root: NodeId) -> Vec<NodeId> {
    enum Op {
        Enter(NodeId),
        Emit(NodeId),
    }
    let mut order = Vec::new();
    let mut stack = vec![Op::Enter(root)];
    while let Some(op) = stack.pop() {
        match op {
            Op::Enter(id) => {
                let Some(node) = scene.node(id) else { continue };
                if !node.visible {
                    continue;
                }
                let children = node.children();
                let split = children
                    .iter()
                    .position(|&c| scene.node(c).map(|n| n.local_z >= 0).unwrap_or(true))
                    .unwrap_or(children.len());
                for &child in children[split..].iter().rev() {
                    stack.push(Op::Enter(child));
                }
                for &child in node.protected_children().iter().rev() {
                    stack.push(Op::Enter(child));
                }
                stack.push(Op::Emit(id));
                for &child in children[..split].iter().rev() {
                    stack.push(Op::Enter(child));
                }
            }
            Op::Emit(id) => {
                if scene.node(id).map(|n| n.cmd().need_draw()).unwrap_or(false) {
                    order.push(id);
                }
            }
        }
    }
    order
}

/// Re-render the baked layer's surface if its budget says so, consuming
/// one pass. A settled cache returns immediately and the surface is reused.
pub(crate) fn ensure_fresh(scene: &mut Scene, id: NodeId, textures: &TextureStore) {
    let stale = scene
        .node(id)
        .and_then(|n| n.cmd().canvas())
        .and_then(|c| c.bake.as_ref())
        .map(|b| b.counter > 0)
        .unwrap_or(false);
    if !stale {
        return;
    }

    let Some(layer_world) = scene.node(id).map(|n| n.cmd().world_transform) else {
        return;
    };
    let Some(layer_inverse) = layer_world.invert() else {
        log::warn!("baked layer has a degenerate world transform, skipping cache update");
        return;
    };

    let order = subtree_draw_order(scene, id);

    // Subtree bounds in the layer's local space.
    let mut bounds = Rect::ZERO;
    for &node_id in &order {
        let Some(node) = scene.node(node_id) else { continue };
        let local = node.cmd().world_transform.concat(&layer_inverse);
        let size = node.content_size();
        let footprint = local.apply_rect(Rect::new(0.0, 0.0, size.width, size.height));
        bounds = bounds.union(&footprint);
    }
    if bounds.is_empty() {
        // Nothing drawable yet; keep a minimal surface so the cache shape
        // stays valid until content arrives.
        bounds = Rect::new(0.0, 0.0, 1.0, 1.0);
    }

    let width = bounds.width.ceil().max(1.0) as u32;
    let height = bounds.height.ceil().max(1.0) as u32;
    let origin = Point::new(bounds.x, bounds.y);

    let Some(mut surface_ctx) = CanvasContext::new(width, height) else {
        log::warn!("bake surface allocation failed ({width}x{height})");
        return;
    };

    let to_surface = layer_inverse.concat(&AffineTransform::translate(-origin.x, -origin.y));
    for &node_id in &order {
        let Some(node) = scene.node(node_id) else { continue };
        let world = node.cmd().world_transform;
        // Mirror the node command state, but place it in surface space.
        let saved = world;
        if let Some(node) = scene.node_mut(node_id) {
            node.cmd_mut().world_transform = saved.concat(&to_surface);
        }
        draw_node(scene, node_id, &mut surface_ctx, textures);
        if let Some(node) = scene.node_mut(node_id) {
            node.cmd_mut().world_transform = saved;
        }
    }

    if let Some(bake) = scene
        .node_mut(id)
        .and_then(|n| n.cmd_mut().canvas_mut())
        .and_then(|c| c.bake.as_mut())
    {
        bake.surface = Some(surface_ctx.take_pixmap());
        bake.origin = origin;
        bake.counter -= 1;
        bake.renders += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalidate_only_rearms_settled_caches() {
        let mut cache = BakeCache::new();
        assert_eq!(cache.counter(), 2);

        cache.counter = 1;
        cache.invalidate();
        assert_eq!(cache.counter(), 1, "in-flight budget must not grow");

        cache.counter = 0;
        cache.invalidate();
        assert_eq!(cache.counter(), 2);
    }
}
