//! Per-node render command state and the traversal algorithms over it.
//!
//! Every node owns exactly one [`RenderState`], created when the node is
//! built for the scene's active backend and destroyed with the node. The
//! functions here implement the three traversal contracts:
//!
//! - `update_status`: full recompute for nodes drained from the renderer's
//!   dirty pool (re-transforms the whole subtree, cascades color/opacity).
//! - `sync_status`: the lighter per-visit step that pulls inherited dirty
//!   bits from the parent and recomputes only this node's state.
//! - `propagate_flags_down`: the inheritance rule both share.
//!
//! Only `update_status` clears the flags it consumes. `sync_status` leaves
//! the mask in place so children entered later in the same visit can still
//! inherit from it; the visit clears the mask on subtree exit. Both steps
//! are idempotent within a frame.

use crate::affine::AffineTransform;
use crate::canvas::CanvasCmd;
use crate::dirty::DirtyFlags;
use crate::gpu::GpuCmd;
use crate::region::RegionStatus;
use crate::scene::{Node, NodeId, NodeKind, Scene};
use crate::types::{Color, Rect};

/// Backend-specific command state, selected when the node is created.
#[derive(Clone, Debug)]
pub enum BackendState {
    Canvas(CanvasCmd),
    Gpu(GpuCmd),
}

/// Mutable render state for one node.
#[derive(Clone, Debug)]
pub struct RenderState {
    /// Local transform, relative to the parent. Valid only while the
    /// TRANSFORM dirty bit is clear.
    pub transform: AffineTransform,
    /// Local transform composed with the parent's world transform.
    pub world_transform: AffineTransform,
    /// Cached inverse of `transform`; `None` when the transform is
    /// degenerate and not invertible.
    inverse: Option<AffineTransform>,
    inverse_dirty: bool,
    /// Effective cascaded color actually used for drawing.
    pub displayed_color: Color,
    /// Effective cascaded opacity in `[0, 255]`, kept fractional until
    /// backend upload.
    pub displayed_opacity: f32,
    pub(crate) dirty: DirtyFlags,
    /// Set when the cascade-enabled flag itself changed; drives the
    /// detach-on-disable reset in the update cascade.
    pub(crate) cascade_color_dirty: bool,
    pub(crate) cascade_opacity_dirty: bool,
    /// Whether this command contributes a draw call.
    pub(crate) need_draw: bool,
    /// Depth assigned during the current traversal (parent's level + 1).
    pub(crate) cur_level: i32,
    /// Non-owning back-reference to the nearest baking layer, used only to
    /// signal cache invalidation upward. Never used for lifetime.
    pub(crate) cache_owner: Option<NodeId>,
    pub(crate) backend: BackendState,
}

impl RenderState {
    pub(crate) fn new(backend: BackendState, need_draw: bool) -> Self {
        Self {
            transform: AffineTransform::IDENTITY,
            world_transform: AffineTransform::IDENTITY,
            inverse: Some(AffineTransform::IDENTITY),
            inverse_dirty: false,
            displayed_color: Color::WHITE,
            displayed_opacity: 255.0,
            // Born clean: the first mutation is a real clean→dirty edge and
            // enqueues the node. Derived state is settled at registration.
            dirty: DirtyFlags::empty(),
            cascade_color_dirty: false,
            cascade_opacity_dirty: false,
            need_draw,
            cur_level: 0,
            cache_owner: None,
            backend,
        }
    }

    pub fn dirty_flags(&self) -> DirtyFlags {
        self.dirty
    }

    pub fn need_draw(&self) -> bool {
        self.need_draw
    }

    pub fn cur_level(&self) -> i32 {
        self.cur_level
    }

    /// Lazily recomputed inverse of the local transform. `None` when the
    /// determinant is zero; callers must guard.
    pub fn parent_to_node_transform(&mut self) -> Option<AffineTransform> {
        if self.inverse_dirty {
            self.inverse = self.transform.invert();
            self.inverse_dirty = false;
        }
        self.inverse
    }

    pub(crate) fn canvas(&self) -> Option<&CanvasCmd> {
        match &self.backend {
            BackendState::Canvas(c) => Some(c),
            BackendState::Gpu(_) => None,
        }
    }

    pub(crate) fn canvas_mut(&mut self) -> Option<&mut CanvasCmd> {
        match &mut self.backend {
            BackendState::Canvas(c) => Some(c),
            BackendState::Gpu(_) => None,
        }
    }

    pub(crate) fn gpu_mut(&mut self) -> Option<&mut GpuCmd> {
        match &mut self.backend {
            BackendState::Gpu(g) => Some(g),
            BackendState::Canvas(_) => None,
        }
    }

    fn notify_region(&mut self, status: RegionStatus) {
        if let BackendState::Canvas(c) = &mut self.backend {
            c.region.notify(status);
        }
    }
}

/// Recompute a node's local transform from its geometry fields.
///
/// Fast path: with no rotation and no skew the scale+translate matrix is
/// built directly. General path: rotate (independent X/Y angles) → scale →
/// skew (tangent shear), in that fixed order, then the anchor offset is
/// subtracted pre-multiplied by the linear part. Mutates in place; no
/// allocation.
fn compute_local_transform(node: &mut Node) {
    let mut x = node.position.x;
    let mut y = node.position.y;
    let apx = node.anchor_point.x * node.content_size.width;
    let apy = node.anchor_point.y * node.content_size.height;
    let napx = -apx;
    let napy = -apy;
    let scx = node.scale_x;
    let scy = node.scale_y;

    if node.ignore_anchor_for_position {
        x += apx;
        y += apy;
    }

    let needs_skew = node.skew_x != 0.0 || node.skew_y != 0.0;
    let has_rotation = node.rotation_x != 0.0 || node.rotation_y != 0.0;

    let t = &mut node.cmd.transform;
    if !has_rotation && !needs_skew {
        t.a = scx;
        t.b = 0.0;
        t.c = 0.0;
        t.d = scy;
        t.tx = x + napx * scx;
        t.ty = y + napy * scy;
    } else {
        // X and Y axes may rotate independently (non-uniform rotation).
        let (mut cx, mut sx, mut cy, mut sy) = (1.0f32, 0.0f32, 1.0f32, 0.0f32);
        if has_rotation {
            let radians_x = -node.rotation_x.to_radians();
            let radians_y = -node.rotation_y.to_radians();
            cx = radians_x.cos();
            sx = radians_x.sin();
            cy = radians_y.cos();
            sy = radians_y.sin();
        }

        if !needs_skew && (apx != 0.0 || apy != 0.0) {
            x += cy * napx * scx + -sx * napy * scy;
            y += sy * napx * scx + cx * napy * scy;
        }

        t.a = cy * scx;
        t.b = sy * scx;
        t.c = -sx * scy;
        t.d = cx * scy;
        t.tx = x;
        t.ty = y;

        if needs_skew {
            let skew = AffineTransform::new(
                1.0,
                node.skew_y.to_radians().tan(),
                node.skew_x.to_radians().tan(),
                1.0,
                0.0,
                0.0,
            );
            node.cmd.transform = skew.concat(&node.cmd.transform);
            if apx != 0.0 || apy != 0.0 {
                let t = &mut node.cmd.transform;
                t.tx += t.a * napx + t.c * napy;
                t.ty += t.b * napx + t.d * napy;
            }
        }
    }

    if node.additional_transform_dirty {
        if let Some(additional) = node.additional_transform {
            node.cmd.transform = node.cmd.transform.concat(&additional);
        }
    }

    node.cmd.inverse_dirty = true;
}

/// Settle a freshly built node's derived state so it is consistent with its
/// construction arguments before any dirty bit is ever set: local transform
/// computed, world equal to local (no parent yet), displayed color/opacity
/// equal to the real values, backend color state refreshed.
pub(crate) fn init_command(node: &mut Node) {
    compute_local_transform(node);
    node.cmd.world_transform = node.cmd.transform;
    node.cmd.displayed_color = node.real_color;
    node.cmd.displayed_opacity = node.real_opacity as f32;
    refresh_backend_color(node);
}

/// Compose a freshly computed local transform with the parent's world
/// transform.
///
/// The two branches are mathematically equivalent but sum `wt.ty` in
/// different operand orders; both are preserved exactly as-is because
/// unifying them changes floating-point rounding.
fn compose_world(t: &AffineTransform, pt: &AffineTransform, wt: &mut AffineTransform) {
    if t.b == 0.0 && t.c == 0.0 {
        wt.a = t.a * pt.a;
        wt.b = t.a * pt.b;
        wt.c = t.d * pt.c;
        wt.d = t.d * pt.d;
        wt.tx = t.tx * pt.a + t.ty * pt.c + pt.tx;
        wt.ty = t.ty * pt.d + pt.ty + t.tx * pt.b;
    } else {
        wt.a = t.a * pt.a + t.b * pt.c;
        wt.b = t.a * pt.b + t.b * pt.d;
        wt.c = t.c * pt.a + t.d * pt.c;
        wt.d = t.c * pt.b + t.d * pt.d;
        wt.tx = t.tx * pt.a + t.ty * pt.c + pt.tx;
        wt.ty = t.tx * pt.b + t.ty * pt.d + pt.ty;
    }
}

/// Recompute one node's local and world transform.
///
/// Leaves the TRANSFORM dirty bit untouched: during a visit the children
/// still read it from the parent's mask. On the canvas backend the node's
/// dirty region is updated with the new world-space footprint.
pub(crate) fn transform_one(scene: &mut Scene, id: NodeId) {
    let parent_world = scene
        .node(id)
        .and_then(|n| n.parent)
        .and_then(|p| scene.node(p))
        .map(|p| p.cmd.world_transform);

    let Some(node) = scene.node_mut(id) else {
        return;
    };
    compute_local_transform(node);

    match parent_world {
        Some(pt) => {
            let t = node.cmd.transform;
            let mut wt = node.cmd.world_transform;
            compose_world(&t, &pt, &mut wt);
            node.cmd.world_transform = wt;
        }
        None => node.cmd.world_transform = node.cmd.transform,
    }

    let size = node.content_size;
    let wt = node.cmd.world_transform;
    if let Some(canvas) = node.cmd.canvas_mut() {
        let bounds = wt.apply_rect(Rect::new(0.0, 0.0, size.width, size.height));
        canvas.region.update(bounds);
    }
}

/// Recompute a node's transform, optionally re-transforming the whole
/// subtree.
///
/// The recursive variant walks an explicit stack (never the call stack) so
/// stack depth is bounded independent of tree depth. Parents are processed
/// before children; a node's normal children come before its protected
/// children.
pub(crate) fn transform(scene: &mut Scene, id: NodeId, recursive: bool) {
    if !recursive {
        transform_one(scene, id);
        return;
    }
    let mut stack = vec![id];
    while let Some(current) = stack.pop() {
        transform_one(scene, current);
        let Some(node) = scene.node(current) else {
            continue;
        };
        for &child in node.protected_children.iter().rev() {
            stack.push(child);
        }
        for &child in node.children.iter().rev() {
            stack.push(child);
        }
    }
}

/// Non-recursive displayed-color computation from the parent's settled
/// displayed value.
pub(crate) fn sync_display_color(scene: &mut Scene, id: NodeId) {
    let parent_color = parent_displayed_color(scene, id);
    let Some(node) = scene.node_mut(id) else {
        return;
    };
    node.cmd.displayed_color = node.real_color.modulate(parent_color);
}

/// Non-recursive displayed-opacity computation from the parent's settled
/// displayed value.
pub(crate) fn sync_display_opacity(scene: &mut Scene, id: NodeId) {
    let parent_opacity = parent_displayed_opacity(scene, id);
    let Some(node) = scene.node_mut(id) else {
        return;
    };
    node.cmd.displayed_opacity = node.real_opacity as f32 * parent_opacity / 255.0;
}

fn parent_displayed_color(scene: &Scene, id: NodeId) -> Color {
    scene
        .node(id)
        .and_then(|n| n.parent)
        .and_then(|p| scene.node(p))
        .filter(|p| p.cascade_color)
        .map(|p| p.cmd.displayed_color)
        .unwrap_or(Color::WHITE)
}

fn parent_displayed_opacity(scene: &Scene, id: NodeId) -> f32 {
    scene
        .node(id)
        .and_then(|n| n.parent)
        .and_then(|p| scene.node(p))
        .filter(|p| p.cascade_opacity)
        .map(|p| p.cmd.displayed_opacity)
        .unwrap_or(255.0)
}

/// Full displayed-color recompute, recursing into children while cascading
/// is enabled.
///
/// When cascading was just disabled, this instead resets the node's
/// displayed color to its own real color and detaches the children by
/// recomputing them against pure white, without any further cascade.
pub(crate) fn update_display_color(scene: &mut Scene, id: NodeId, parent_color: Option<Color>) {
    let Some(node) = scene.node_mut(id) else {
        return;
    };
    node.cmd.notify_region(RegionStatus::Dirty);

    if node.cmd.cascade_color_dirty && !node.cascade_color {
        node.cmd.displayed_color = node.real_color;
        node.cmd.cascade_color_dirty = false;
        node.cmd.dirty.remove(DirtyFlags::COLOR);
        let children = node.children.clone();
        for child in children {
            update_display_color(scene, child, Some(Color::WHITE));
            update_color(scene, child);
        }
        return;
    }
    node.cmd.cascade_color_dirty = false;

    let parent_color = parent_color.unwrap_or_else(|| parent_displayed_color(scene, id));
    let Some(node) = scene.node_mut(id) else {
        return;
    };
    node.cmd.displayed_color = node.real_color.modulate(parent_color);
    node.cmd.dirty.remove(DirtyFlags::COLOR);

    if node.cascade_color {
        let displayed = node.cmd.displayed_color;
        let children = node.children.clone();
        for child in children {
            update_display_color(scene, child, Some(displayed));
            update_color(scene, child);
        }
    }
}

/// Full displayed-opacity recompute; mirrors [`update_display_color`].
pub(crate) fn update_display_opacity(scene: &mut Scene, id: NodeId, parent_opacity: Option<f32>) {
    let Some(node) = scene.node_mut(id) else {
        return;
    };
    node.cmd.notify_region(RegionStatus::Dirty);

    if node.cmd.cascade_opacity_dirty && !node.cascade_opacity {
        node.cmd.displayed_opacity = node.real_opacity as f32;
        node.cmd.cascade_opacity_dirty = false;
        node.cmd.dirty.remove(DirtyFlags::OPACITY);
        let children = node.children.clone();
        for child in children {
            update_display_opacity(scene, child, Some(255.0));
            update_color(scene, child);
        }
        return;
    }
    node.cmd.cascade_opacity_dirty = false;

    let parent_opacity = parent_opacity.unwrap_or_else(|| parent_displayed_opacity(scene, id));
    let Some(node) = scene.node_mut(id) else {
        return;
    };
    node.cmd.displayed_opacity = node.real_opacity as f32 * parent_opacity / 255.0;
    node.cmd.dirty.remove(DirtyFlags::OPACITY);

    if node.cascade_opacity {
        let displayed = node.cmd.displayed_opacity;
        let children = node.children.clone();
        for child in children {
            update_display_opacity(scene, child, Some(displayed));
            update_color(scene, child);
        }
    }
}

/// Backend hook invoked after any color or opacity change so vertex/paint
/// state can be refreshed. Also consumes gradient/texture dirtiness.
pub(crate) fn update_color(scene: &mut Scene, id: NodeId) {
    let Some(node) = scene.node_mut(id) else {
        return;
    };
    refresh_backend_color(node);
    node.cmd.notify_region(RegionStatus::Dirty);
    node.cmd
        .dirty
        .remove(DirtyFlags::GRADIENT | DirtyFlags::TEXTURE);
}

fn refresh_backend_color(node: &mut Node) {
    let displayed = node.cmd.displayed_color;
    let opacity = node.cmd.displayed_opacity;
    let size = node.content_size;

    match &node.kind {
        NodeKind::LayerGradient(gradient) => {
            let corners = gradient.corner_colors(displayed, opacity);
            if let Some(gpu) = node.cmd.gpu_mut() {
                gpu.refresh_quad(size, corners);
            }
        }
        _ => {
            let rgba = displayed.to_rgba_f32(opacity);
            if let Some(gpu) = node.cmd.gpu_mut() {
                gpu.refresh_quad(size, [rgba, rgba, rgba, rgba]);
            }
        }
    }
}

/// Inherit dirtiness from the parent before processing a node: color and
/// opacity bits are pulled only when the corresponding cascade is enabled
/// on this node; the transform bit is pulled unconditionally.
pub(crate) fn propagate_flags_down(scene: &mut Scene, id: NodeId, parent: Option<NodeId>) {
    let Some(parent) = parent else {
        return;
    };
    let Some(parent_dirty) = scene.node(parent).map(|p| p.cmd.dirty) else {
        return;
    };
    let Some(node) = scene.node_mut(id) else {
        return;
    };
    let mut flags = node.cmd.dirty;
    if node.cascade_color && parent_dirty.contains(DirtyFlags::COLOR) {
        flags |= DirtyFlags::COLOR;
    }
    if node.cascade_opacity && parent_dirty.contains(DirtyFlags::OPACITY) {
        flags |= DirtyFlags::OPACITY;
    }
    if parent_dirty.contains(DirtyFlags::TRANSFORM) {
        flags |= DirtyFlags::TRANSFORM;
    }
    node.cmd.dirty = flags;
}

/// Full recompute step for one node drained from the dirty pool.
///
/// Clears content dirtiness (notifying the region tracker first), cascades
/// color/opacity, re-transforms the subtree, and leaves the mask fully
/// cleared. Idempotent: a second call with no intervening mutation changes
/// nothing.
pub(crate) fn update_status(scene: &mut Scene, id: NodeId) {
    let Some(node) = scene.node_mut(id) else {
        return;
    };
    let flags = node.cmd.dirty;

    if flags.contains(DirtyFlags::CONTENT) {
        node.cmd.notify_region(RegionStatus::Dirty);
        node.cmd.dirty.remove(DirtyFlags::CONTENT);
    }

    if flags.contains(DirtyFlags::ORDER) {
        scene.sort_children(id);
    }

    let color_dirty = flags.contains(DirtyFlags::COLOR);
    let opacity_dirty = flags.contains(DirtyFlags::OPACITY);
    if color_dirty {
        update_display_color(scene, id, None);
    }
    if opacity_dirty {
        update_display_opacity(scene, id, None);
    }
    if color_dirty || opacity_dirty || flags.intersects(DirtyFlags::GRADIENT | DirtyFlags::TEXTURE)
    {
        update_color(scene, id);
    }

    if flags.contains(DirtyFlags::TRANSFORM) {
        transform(scene, id, true);
    }

    if let Some(node) = scene.node_mut(id) {
        node.cmd.dirty = DirtyFlags::empty();
    }
}

/// Lighter per-visit step: pull inherited dirty bits, apply the
/// non-recursive color/opacity sync, re-transform this node only.
///
/// The mask is deliberately left in place: children entered later in the
/// visit inherit from it, and the visit clears it when the subtree is
/// exited. Idempotent, so re-running it within a frame changes nothing.
pub(crate) fn sync_status(scene: &mut Scene, id: NodeId, parent: Option<NodeId>) {
    propagate_flags_down(scene, id, parent);

    let Some(node) = scene.node(id) else {
        return;
    };
    let flags = node.cmd.dirty;

    let color_dirty = flags.contains(DirtyFlags::COLOR);
    let opacity_dirty = flags.contains(DirtyFlags::OPACITY);
    if color_dirty {
        sync_display_color(scene, id);
    }
    if opacity_dirty {
        sync_display_opacity(scene, id);
    }
    if color_dirty || opacity_dirty || flags.intersects(DirtyFlags::GRADIENT | DirtyFlags::TEXTURE)
    {
        update_color(scene, id);
    }

    if flags.contains(DirtyFlags::TRANSFORM) {
        transform_one(scene, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::Renderer;
    use crate::scene::{Backend, Scene};
    use crate::types::{Point, Size};

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    fn gpu_scene() -> (Scene, Renderer) {
        (Scene::new(Backend::Gpu), Renderer::new())
    }

    #[test]
    fn test_local_transform_fast_path() {
        let (mut scene, mut renderer) = gpu_scene();
        let id = scene.create_group();
        scene.set_content_size(&mut renderer, id, Size::new(10.0, 10.0));
        scene.set_anchor_point(&mut renderer, id, Point::new(0.5, 0.5));
        scene.set_position(&mut renderer, id, Point::new(10.0, 20.0));
        scene.set_scale(&mut renderer, id, 2.0, 3.0);

        transform_one(&mut scene, id);
        let t = scene.node(id).unwrap().cmd.transform;
        assert_eq!((t.a, t.b, t.c, t.d), (2.0, 0.0, 0.0, 3.0));
        // Anchor offset is scaled: tx = 10 - 5*2, ty = 20 - 5*3.
        assert!(approx_eq(t.tx, 0.0));
        assert!(approx_eq(t.ty, 5.0));
    }

    #[test]
    fn test_anchor_maps_to_position_under_rotation() {
        let (mut scene, mut renderer) = gpu_scene();
        let id = scene.create_group();
        scene.set_content_size(&mut renderer, id, Size::new(8.0, 4.0));
        scene.set_anchor_point(&mut renderer, id, Point::new(0.5, 0.5));
        scene.set_position(&mut renderer, id, Point::new(30.0, 40.0));
        scene.set_rotation(&mut renderer, id, 37.0);
        scene.set_scale(&mut renderer, id, 1.5, 0.5);

        transform_one(&mut scene, id);
        let t = scene.node(id).unwrap().cmd.transform;
        // Whatever the rotation and scale, the anchor point lands on the
        // node's position in parent space.
        let p = t.apply_point(Point::new(4.0, 2.0));
        assert!(approx_eq(p.x, 30.0));
        assert!(approx_eq(p.y, 40.0));
    }

    #[test]
    fn test_skew_shears_axes() {
        let (mut scene, mut renderer) = gpu_scene();
        let id = scene.create_group();
        scene.set_skew(&mut renderer, id, 45.0, 0.0);

        transform_one(&mut scene, id);
        let t = scene.node(id).unwrap().cmd.transform;
        // skew_x shears X by Y: the unit Y vector gains an X component.
        let p = t.apply_point(Point::new(0.0, 1.0));
        assert!(approx_eq(p.x, 1.0));
        assert!(approx_eq(p.y, 1.0));
    }

    #[test]
    fn test_compose_world_no_rotation_formula() {
        let t = AffineTransform::new(2.0, 0.0, 0.0, 3.0, 5.0, 7.0);
        let pt = AffineTransform::new(1.5, 0.25, 0.5, 2.5, 10.0, 20.0);
        let mut wt = AffineTransform::IDENTITY;
        compose_world(&t, &pt, &mut wt);

        assert_eq!(wt.a, t.a * pt.a);
        assert_eq!(wt.b, t.a * pt.b);
        assert_eq!(wt.c, t.d * pt.c);
        assert_eq!(wt.d, t.d * pt.d);
        assert_eq!(wt.tx, t.tx * pt.a + t.ty * pt.c + pt.tx);
        // This branch sums ty in its own operand order; the test pins it.
        assert_eq!(wt.ty, t.ty * pt.d + pt.ty + t.tx * pt.b);
    }

    #[test]
    fn test_compose_world_general_matches_concat() {
        let t = AffineTransform::rotate(0.6).concat(&AffineTransform::translate(3.0, -2.0));
        let pt = AffineTransform::rotate(-0.3).concat(&AffineTransform::scale(2.0, 0.5));
        let mut wt = AffineTransform::IDENTITY;
        compose_world(&t, &pt, &mut wt);

        let expected = t.concat(&pt);
        assert!(approx_eq(wt.a, expected.a));
        assert!(approx_eq(wt.b, expected.b));
        assert!(approx_eq(wt.c, expected.c));
        assert!(approx_eq(wt.d, expected.d));
        assert!(approx_eq(wt.tx, expected.tx));
        assert!(approx_eq(wt.ty, expected.ty));
    }

    #[test]
    fn test_world_transform_three_level_chain() {
        let (mut scene, mut renderer) = gpu_scene();
        let a = scene.create_group();
        let b = scene.create_group();
        let c = scene.create_group();
        scene.add_child(&mut renderer, a, b);
        scene.add_child(&mut renderer, b, c);
        scene.set_position(&mut renderer, a, Point::new(1.0, 0.0));
        scene.set_position(&mut renderer, b, Point::new(0.0, 2.0));
        scene.set_position(&mut renderer, c, Point::new(3.0, 0.0));
        scene.set_scale(&mut renderer, a, 2.0, 2.0);

        transform(&mut scene, a, true);
        let wc = scene.node(c).unwrap().cmd.world_transform;
        // c local (3,0) scaled by a's 2x, shifted by b (0,2) and a (1,0).
        assert!(approx_eq(wc.tx, 7.0));
        assert!(approx_eq(wc.ty, 4.0));
    }

    #[test]
    fn test_transform_survives_deep_chains() {
        let (mut scene, mut renderer) = gpu_scene();
        let root = scene.create_group();
        let mut parent = root;
        for _ in 0..10_000 {
            let child = scene.create_group();
            scene.add_child(&mut renderer, parent, child);
            scene.set_position(&mut renderer, child, Point::new(1.0, 0.0));
            parent = child;
        }

        transform(&mut scene, root, true);
        let leaf = scene.node(parent).unwrap().cmd.world_transform;
        assert!(approx_eq(leaf.tx, 10_000.0));
    }

    #[test]
    fn test_color_cascade_floors_per_channel() {
        let (mut scene, mut renderer) = gpu_scene();
        let parent = scene.create_group();
        let child = scene.create_group();
        scene.add_child(&mut renderer, parent, child);
        scene.set_cascade_color_enabled(&mut renderer, parent, true);
        scene.set_color(&mut renderer, parent, Color::new(200, 100, 50));
        scene.set_color(&mut renderer, child, Color::new(128, 64, 255));

        renderer.update_dirty_nodes(&mut scene);
        let displayed = scene.node(child).unwrap().cmd.displayed_color;
        // floor(128*200/255), floor(64*100/255), floor(255*50/255)
        assert_eq!(displayed, Color::new(100, 25, 50));
    }

    #[test]
    fn test_opacity_cascade_stays_fractional() {
        let (mut scene, mut renderer) = gpu_scene();
        let parent = scene.create_group();
        let child = scene.create_group();
        scene.add_child(&mut renderer, parent, child);
        scene.set_cascade_opacity_enabled(&mut renderer, parent, true);
        scene.set_opacity(&mut renderer, parent, 128);
        scene.set_opacity(&mut renderer, child, 128);

        renderer.update_dirty_nodes(&mut scene);
        let displayed = scene.node(child).unwrap().cmd.displayed_opacity;
        // 128 * 128 / 255, not quantized to u8.
        assert!(approx_eq(displayed, 64.2510));
    }

    #[test]
    fn test_cascade_disable_detaches_to_real_values() {
        let (mut scene, mut renderer) = gpu_scene();
        let parent = scene.create_group();
        let child = scene.create_group();
        scene.add_child(&mut renderer, parent, child);
        scene.set_cascade_color_enabled(&mut renderer, parent, true);
        scene.set_color(&mut renderer, parent, Color::new(100, 100, 100));
        scene.set_color(&mut renderer, child, Color::new(200, 200, 200));
        renderer.update_dirty_nodes(&mut scene);
        assert_eq!(
            scene.node(child).unwrap().cmd.displayed_color,
            Color::new(78, 78, 78)
        );

        scene.set_cascade_color_enabled(&mut renderer, parent, false);
        renderer.update_dirty_nodes(&mut scene);
        assert_eq!(
            scene.node(parent).unwrap().cmd.displayed_color,
            Color::new(100, 100, 100)
        );
        assert_eq!(
            scene.node(child).unwrap().cmd.displayed_color,
            Color::new(200, 200, 200)
        );
    }

    #[test]
    fn test_cascade_disable_refreshes_child_quad_colors() {
        let (mut scene, mut renderer) = gpu_scene();
        let parent = scene.create_group();
        let child = scene.create_group();
        scene.add_child(&mut renderer, parent, child);
        scene.set_content_size(&mut renderer, child, Size::new(2.0, 2.0));
        scene.set_cascade_color_enabled(&mut renderer, parent, true);
        scene.set_color(&mut renderer, parent, Color::new(100, 100, 100));
        scene.set_color(&mut renderer, child, Color::new(200, 200, 200));
        renderer.update_dirty_nodes(&mut scene);
        let quad = *scene.node_mut(child).unwrap().cmd.gpu_mut().unwrap().quad();
        assert!(approx_eq(quad[0].color[0], 78.0 / 255.0));

        // Detaching from the cascade must push the restored color into the
        // backend state, not just the displayed value.
        scene.set_cascade_color_enabled(&mut renderer, parent, false);
        renderer.update_dirty_nodes(&mut scene);
        let quad = *scene.node_mut(child).unwrap().cmd.gpu_mut().unwrap().quad();
        assert!(approx_eq(quad[0].color[0], 200.0 / 255.0));
    }

    #[test]
    fn test_update_status_is_idempotent() {
        let (mut scene, mut renderer) = gpu_scene();
        let parent = scene.create_group();
        let child = scene.create_group();
        scene.add_child(&mut renderer, parent, child);
        scene.set_position(&mut renderer, child, Point::new(5.0, 5.0));
        scene.set_color(&mut renderer, child, Color::new(10, 20, 30));

        update_status(&mut scene, child);
        let world = scene.node(child).unwrap().cmd.world_transform;
        let color = scene.node(child).unwrap().cmd.displayed_color;
        assert!(scene.node(child).unwrap().cmd.dirty.is_empty());

        update_status(&mut scene, child);
        assert_eq!(scene.node(child).unwrap().cmd.world_transform, world);
        assert_eq!(scene.node(child).unwrap().cmd.displayed_color, color);
    }

    #[test]
    fn test_propagate_pulls_transform_unconditionally() {
        let (mut scene, mut renderer) = gpu_scene();
        let parent = scene.create_group();
        let child = scene.create_group();
        scene.add_child(&mut renderer, parent, child);
        renderer.update_dirty_nodes(&mut scene);
        scene.visit(&mut renderer, parent);

        // Parent moves; child has cascades disabled but still inherits the
        // transform bit.
        scene.set_position(&mut renderer, parent, Point::new(1.0, 1.0));
        scene.set_color(&mut renderer, parent, Color::new(9, 9, 9));
        propagate_flags_down(&mut scene, child, Some(parent));
        let child_dirty = scene.node(child).unwrap().cmd.dirty;
        assert!(child_dirty.contains(DirtyFlags::TRANSFORM));
        assert!(!child_dirty.contains(DirtyFlags::COLOR));
    }

    #[test]
    fn test_parent_to_node_transform_recomputes_lazily() {
        let (mut scene, mut renderer) = gpu_scene();
        let id = scene.create_group();
        scene.set_position(&mut renderer, id, Point::new(10.0, 0.0));
        transform_one(&mut scene, id);

        let inv = scene
            .node_mut(id)
            .unwrap()
            .cmd
            .parent_to_node_transform()
            .unwrap();
        let p = inv.apply_point(Point::new(10.0, 0.0));
        assert!(approx_eq(p.x, 0.0));
        assert!(approx_eq(p.y, 0.0));
    }
}
