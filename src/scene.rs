//! Arena-based node storage and the scene-graph mutation API.
//!
//! Nodes live in a sparse-set arena with generational ids: a dense array
//! for cache-friendly traversal, a sparse map for O(1) lookup, and a
//! generation counter per slot so stale ids are detected instead of
//! aliasing a reused slot.
//!
//! All mutators funnel through [`Scene::mark_dirty`], which drives the
//! dirty-flag state machine: the clean→dirty edge enqueues the node into
//! the renderer's per-frame pool exactly once, and mutations under a baked
//! subtree bump the bake counter through the non-owning cache-owner
//! back-reference.

use crate::affine::AffineTransform;
use crate::canvas::{BakeCache, CanvasCmd};
use crate::command::{self, BackendState, RenderState};
use crate::dirty::DirtyFlags;
use crate::gpu::GpuCmd;
use crate::layer::{GradientLayer, MultiplexState};
use crate::renderer::Renderer;
use crate::sprite::Sprite;
use crate::types::{BlendFunc, Color, Point, Size};

/// Which backend the scene's render commands are built for.
///
/// Chosen once at scene construction; every node created afterwards gets
/// the matching command state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    Canvas,
    Gpu,
}

/// Unique identifier for a node in the scene.
///
/// Generational index: `index` addresses a sparse slot, `generation`
/// detects stale references after the slot is reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

/// The visual variant of a node.
#[derive(Clone, Debug)]
pub enum NodeKind {
    /// Pure container; draws nothing.
    Group,
    /// Flat color fill over the content size.
    LayerColor,
    LayerGradient(GradientLayer),
    /// Shows exactly one of its child layers.
    LayerMultiplex(MultiplexState),
    Sprite(Sprite),
}

impl NodeKind {
    fn need_draw(&self) -> bool {
        match self {
            NodeKind::Group | NodeKind::LayerMultiplex(_) => false,
            NodeKind::LayerColor | NodeKind::LayerGradient(_) | NodeKind::Sprite(_) => true,
        }
    }
}

/// A scene-graph node: local geometry, cascade settings, links, payload,
/// and the render command that caches its derived state.
#[derive(Clone, Debug)]
pub struct Node {
    pub(crate) position: Point,
    pub(crate) content_size: Size,
    /// Normalized anchor in `[0,1]` of the content size.
    pub(crate) anchor_point: Point,
    /// Rotation of the X and Y axes in degrees; differing values produce a
    /// skewed rotation.
    pub(crate) rotation_x: f32,
    pub(crate) rotation_y: f32,
    pub(crate) scale_x: f32,
    pub(crate) scale_y: f32,
    pub(crate) skew_x: f32,
    pub(crate) skew_y: f32,
    pub(crate) ignore_anchor_for_position: bool,
    pub(crate) additional_transform: Option<AffineTransform>,
    pub(crate) additional_transform_dirty: bool,

    pub(crate) visible: bool,
    pub(crate) local_z: i32,
    pub(crate) global_z: f32,

    pub(crate) real_color: Color,
    pub(crate) real_opacity: u8,
    pub(crate) cascade_color: bool,
    pub(crate) cascade_opacity: bool,

    pub(crate) blend: Option<BlendFunc>,

    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    /// Children managed internally by composite nodes, excluded from the
    /// normal child-management API and re-transformed after normal children.
    pub(crate) protected_children: Vec<NodeId>,

    pub(crate) kind: NodeKind,
    pub(crate) cmd: RenderState,
}

impl Node {
    fn new(kind: NodeKind, backend: Backend) -> Self {
        let need_draw = kind.need_draw();
        let backend_state = match backend {
            Backend::Canvas => BackendState::Canvas(CanvasCmd::new()),
            Backend::Gpu => BackendState::Gpu(GpuCmd::new()),
        };
        Self {
            position: Point::ZERO,
            content_size: Size::ZERO,
            anchor_point: Point::new(0.5, 0.5),
            rotation_x: 0.0,
            rotation_y: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            skew_x: 0.0,
            skew_y: 0.0,
            ignore_anchor_for_position: false,
            additional_transform: None,
            additional_transform_dirty: false,
            visible: true,
            local_z: 0,
            global_z: 0.0,
            real_color: Color::WHITE,
            real_opacity: 255,
            cascade_color: false,
            cascade_opacity: false,
            blend: None,
            parent: None,
            children: Vec::new(),
            protected_children: Vec::new(),
            kind,
            cmd: RenderState::new(backend_state, need_draw),
        }
    }

    pub fn position(&self) -> Point {
        self.position
    }

    pub fn content_size(&self) -> Size {
        self.content_size
    }

    pub fn anchor_point(&self) -> Point {
        self.anchor_point
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    pub fn real_color(&self) -> Color {
        self.real_color
    }

    pub fn real_opacity(&self) -> u8 {
        self.real_opacity
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn protected_children(&self) -> &[NodeId] {
        &self.protected_children
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn blend_func(&self) -> Option<BlendFunc> {
        self.blend
    }

    /// The node's render command state.
    pub fn cmd(&self) -> &RenderState {
        &self.cmd
    }

    pub fn cmd_mut(&mut self) -> &mut RenderState {
        &mut self.cmd
    }
}

struct SparseEntry {
    dense_index: usize,
    generation: u32,
}

struct Slot {
    node: Node,
    /// Back-pointer into the sparse array for swap-remove fixup.
    sparse_index: u32,
}

/// Central storage for all nodes of one scene graph.
pub struct Scene {
    dense: Vec<Slot>,
    sparse: Vec<Option<SparseEntry>>,
    free_indices: Vec<u32>,
    backend: Backend,
}

impl Scene {
    pub fn new(backend: Backend) -> Self {
        Self {
            dense: Vec::new(),
            sparse: Vec::new(),
            free_indices: Vec::new(),
            backend,
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn node_count(&self) -> usize {
        self.dense.len()
    }

    // ----- arena plumbing -------------------------------------------------

    fn register(&mut self, mut node: Node) -> NodeId {
        // New commands are clean; settle the derived state so a clean node
        // is always consistent with its construction arguments.
        command::init_command(&mut node);
        let (sparse_index, generation) = if let Some(idx) = self.free_indices.pop() {
            let old_gen = self.sparse[idx as usize]
                .as_ref()
                .map(|e| e.generation)
                .unwrap_or(0);
            (idx, old_gen.wrapping_add(1))
        } else {
            let idx = self.sparse.len() as u32;
            self.sparse.push(None);
            (idx, 0)
        };

        let dense_index = self.dense.len();
        self.dense.push(Slot { node, sparse_index });
        self.sparse[sparse_index as usize] = Some(SparseEntry {
            dense_index,
            generation,
        });

        NodeId {
            index: sparse_index,
            generation,
        }
    }

    fn get_dense_index(&self, id: NodeId) -> Option<usize> {
        self.sparse
            .get(id.index as usize)
            .and_then(|e| e.as_ref())
            .filter(|e| e.generation == id.generation)
            .map(|e| e.dense_index)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get_dense_index(id).is_some()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.get_dense_index(id).map(|idx| &self.dense[idx].node)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.get_dense_index(id)
            .map(|idx| &mut self.dense[idx].node)
    }

    fn unregister(&mut self, id: NodeId) {
        let Some(dense_index) = self.get_dense_index(id) else {
            return;
        };
        let last_dense_index = self.dense.len() - 1;
        self.dense.swap_remove(dense_index);
        if dense_index != last_dense_index && !self.dense.is_empty() {
            let moved_sparse = self.dense[dense_index].sparse_index;
            if let Some(entry) = self.sparse[moved_sparse as usize].as_mut() {
                entry.dense_index = dense_index;
            }
        }
        self.sparse[id.index as usize] = None;
        self.free_indices.push(id.index);
    }

    // ----- node construction ----------------------------------------------

    /// Create a detached container node. Attach it with [`Scene::add_child`].
    pub fn create_group(&mut self) -> NodeId {
        self.register(Node::new(NodeKind::Group, self.backend))
    }

    pub fn create_layer_color(&mut self, color: Color, size: Size) -> NodeId {
        let mut node = Node::new(NodeKind::LayerColor, self.backend);
        node.real_color = color;
        node.content_size = size;
        // Layers anchor at the origin and position by it, like the plain
        // container layers of the original system.
        node.anchor_point = Point::ZERO;
        node.ignore_anchor_for_position = true;
        self.register(node)
    }

    pub fn create_layer_gradient(&mut self, gradient: GradientLayer, size: Size) -> NodeId {
        let mut node = Node::new(NodeKind::LayerGradient(gradient), self.backend);
        node.content_size = size;
        node.anchor_point = Point::ZERO;
        node.ignore_anchor_for_position = true;
        self.register(node)
    }

    pub fn create_layer_multiplex(&mut self) -> NodeId {
        let mut node = Node::new(
            NodeKind::LayerMultiplex(MultiplexState::default()),
            self.backend,
        );
        node.anchor_point = Point::ZERO;
        node.ignore_anchor_for_position = true;
        self.register(node)
    }

    pub fn create_sprite(&mut self, sprite: Sprite, size: Size) -> NodeId {
        let mut node = Node::new(NodeKind::Sprite(sprite), self.backend);
        node.content_size = size;
        self.register(node)
    }

    // ----- dirty bookkeeping ----------------------------------------------

    /// Set dirty bits on a node's command, enqueueing it into the dirty pool
    /// on the clean→dirty edge and signaling any covering bake cache.
    pub(crate) fn mark_dirty(&mut self, renderer: &mut Renderer, id: NodeId, flags: DirtyFlags) {
        let Some(node) = self.node_mut(id) else {
            return;
        };
        if node.cmd.dirty.mark(flags) {
            renderer.push_dirty_node(id);
        }
        if flags.intersects(
            DirtyFlags::TRANSFORM
                | DirtyFlags::CONTENT
                | DirtyFlags::COLOR
                | DirtyFlags::OPACITY
                | DirtyFlags::GRADIENT
                | DirtyFlags::TEXTURE
                | DirtyFlags::VISIBLE,
        ) {
            self.invalidate_bake_for(id);
        }
    }

    /// Bump the covering bake cache's update budget: a stale cache at rest
    /// (counter 0) is scheduled for two re-render passes.
    fn invalidate_bake_for(&mut self, id: NodeId) {
        let owner = {
            let Some(node) = self.node(id) else { return };
            if node
                .cmd
                .canvas()
                .map(|c| c.bake.is_some())
                .unwrap_or(false)
            {
                Some(id)
            } else {
                node.cmd.cache_owner
            }
        };
        let Some(owner) = owner else { return };
        if let Some(bake) = self
            .node_mut(owner)
            .and_then(|n| n.cmd.canvas_mut())
            .and_then(|c| c.bake.as_mut())
        {
            bake.invalidate();
        }
    }

    // ----- hierarchy ------------------------------------------------------

    /// Attach `child` under `parent`. The child enters the tree with all
    /// derived state stale and is registered for the status pass.
    pub fn add_child(&mut self, renderer: &mut Renderer, parent: NodeId, child: NodeId) {
        self.add_child_with_z(renderer, parent, child, 0);
    }

    pub fn add_child_with_z(
        &mut self,
        renderer: &mut Renderer,
        parent: NodeId,
        child: NodeId,
        local_z: i32,
    ) {
        if !self.contains(parent) || !self.contains(child) {
            log::warn!("add_child with a stale node id, ignoring");
            return;
        }
        if self.node(child).and_then(|c| c.parent).is_some() {
            log::warn!("add_child: child already has a parent, ignoring");
            return;
        }
        if let Some(node) = self.node_mut(child) {
            node.parent = Some(parent);
            node.local_z = local_z;
            node.cmd.dirty = DirtyFlags::ALL;
        }
        let owner = self.node(parent).and_then(|p| {
            if p.cmd.canvas().map(|c| c.bake.is_some()).unwrap_or(false) {
                Some(parent)
            } else {
                p.cmd.cache_owner
            }
        });
        if let Some(p) = self.node_mut(parent) {
            p.children.push(child);
        }
        self.mark_dirty(renderer, parent, DirtyFlags::ORDER);
        // Entering the tree always registers for the status pass; the drain
        // pass deduplicates repeat entries.
        renderer.push_dirty_node(child);
        if let Some(owner) = owner {
            self.set_subtree_cache_owner(child, Some(owner));
            self.invalidate_bake_for(child);
        }
    }

    /// Attach a protected child: managed by the parent's implementation and
    /// invisible to the normal child-management API.
    pub fn add_protected_child(&mut self, renderer: &mut Renderer, parent: NodeId, child: NodeId) {
        if !self.contains(parent) || !self.contains(child) {
            log::warn!("add_protected_child with a stale node id, ignoring");
            return;
        }
        if let Some(node) = self.node_mut(child) {
            node.parent = Some(parent);
            node.cmd.dirty = DirtyFlags::ALL;
        }
        if let Some(p) = self.node_mut(parent) {
            p.protected_children.push(child);
        }
        renderer.push_dirty_node(child);
        self.mark_dirty(renderer, parent, DirtyFlags::ORDER);
    }

    /// Detach `child` from `parent` and destroy its whole subtree.
    pub fn remove_child(&mut self, renderer: &mut Renderer, parent: NodeId, child: NodeId) {
        let Some(p) = self.node_mut(parent) else {
            return;
        };
        let before = p.children.len();
        p.children.retain(|&c| c != child);
        if p.children.len() == before {
            log::warn!("remove_child: node is not a child of the given parent");
            return;
        }
        self.mark_dirty(renderer, parent, DirtyFlags::ORDER);
        self.invalidate_bake_for(child);
        self.destroy_subtree(child);
    }

    fn destroy_subtree(&mut self, root: NodeId) {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.node(id) {
                stack.extend(node.children.iter().copied());
                stack.extend(node.protected_children.iter().copied());
            }
            self.unregister(id);
        }
    }

    /// Change a child's local draw order.
    pub fn reorder_child(&mut self, renderer: &mut Renderer, child: NodeId, local_z: i32) {
        let parent = match self.node_mut(child) {
            Some(node) => {
                node.local_z = local_z;
                node.parent
            }
            None => return,
        };
        self.mark_dirty(renderer, child, DirtyFlags::ORDER);
        if let Some(parent) = parent {
            self.mark_dirty(renderer, parent, DirtyFlags::ORDER);
        }
    }

    pub(crate) fn set_subtree_cache_owner(&mut self, root: NodeId, owner: Option<NodeId>) {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.node_mut(id) {
                node.cmd.cache_owner = owner;
                stack.extend(node.children.iter().copied());
                stack.extend(node.protected_children.iter().copied());
            }
        }
    }

    // ----- geometry mutators ----------------------------------------------

    pub fn set_position(&mut self, renderer: &mut Renderer, id: NodeId, position: Point) {
        if let Some(node) = self.node_mut(id) {
            node.position = position;
        }
        self.mark_dirty(renderer, id, DirtyFlags::TRANSFORM);
    }

    /// Rotate both axes together (the common case).
    pub fn set_rotation(&mut self, renderer: &mut Renderer, id: NodeId, degrees: f32) {
        if let Some(node) = self.node_mut(id) {
            node.rotation_x = degrees;
            node.rotation_y = degrees;
        }
        self.mark_dirty(renderer, id, DirtyFlags::TRANSFORM);
    }

    /// Rotate the X and Y axes independently (skewed rotation).
    pub fn set_rotation_xy(&mut self, renderer: &mut Renderer, id: NodeId, x: f32, y: f32) {
        if let Some(node) = self.node_mut(id) {
            node.rotation_x = x;
            node.rotation_y = y;
        }
        self.mark_dirty(renderer, id, DirtyFlags::TRANSFORM);
    }

    pub fn set_scale(&mut self, renderer: &mut Renderer, id: NodeId, sx: f32, sy: f32) {
        if let Some(node) = self.node_mut(id) {
            node.scale_x = sx;
            node.scale_y = sy;
        }
        self.mark_dirty(renderer, id, DirtyFlags::TRANSFORM);
    }

    pub fn set_skew(&mut self, renderer: &mut Renderer, id: NodeId, skew_x: f32, skew_y: f32) {
        if let Some(node) = self.node_mut(id) {
            node.skew_x = skew_x;
            node.skew_y = skew_y;
        }
        self.mark_dirty(renderer, id, DirtyFlags::TRANSFORM);
    }

    pub fn set_anchor_point(&mut self, renderer: &mut Renderer, id: NodeId, anchor: Point) {
        if let Some(node) = self.node_mut(id) {
            node.anchor_point = anchor;
        }
        self.mark_dirty(renderer, id, DirtyFlags::TRANSFORM);
    }

    pub fn set_content_size(&mut self, renderer: &mut Renderer, id: NodeId, size: Size) {
        if let Some(node) = self.node_mut(id) {
            node.content_size = size;
        }
        self.mark_dirty(renderer, id, DirtyFlags::CONTENT | DirtyFlags::TRANSFORM);
    }

    pub fn set_ignore_anchor_for_position(
        &mut self,
        renderer: &mut Renderer,
        id: NodeId,
        ignore: bool,
    ) {
        if let Some(node) = self.node_mut(id) {
            node.ignore_anchor_for_position = ignore;
        }
        self.mark_dirty(renderer, id, DirtyFlags::TRANSFORM);
    }

    /// Attach or clear an extra transform concatenated after the node's own
    /// local transform.
    pub fn set_additional_transform(
        &mut self,
        renderer: &mut Renderer,
        id: NodeId,
        additional: Option<AffineTransform>,
    ) {
        if let Some(node) = self.node_mut(id) {
            node.additional_transform_dirty = additional.is_some();
            node.additional_transform = additional;
        }
        self.mark_dirty(renderer, id, DirtyFlags::TRANSFORM);
    }

    pub fn set_visible(&mut self, renderer: &mut Renderer, id: NodeId, visible: bool) {
        if let Some(node) = self.node_mut(id) {
            node.visible = visible;
        }
        self.mark_dirty(renderer, id, DirtyFlags::VISIBLE);
    }

    pub fn set_global_z(&mut self, renderer: &mut Renderer, id: NodeId, z: f32) {
        if let Some(node) = self.node_mut(id) {
            node.global_z = z;
        }
        self.mark_dirty(renderer, id, DirtyFlags::ORDER);
    }

    // ----- color mutators -------------------------------------------------

    pub fn set_color(&mut self, renderer: &mut Renderer, id: NodeId, color: Color) {
        if let Some(node) = self.node_mut(id) {
            node.real_color = color;
        }
        self.mark_dirty(renderer, id, DirtyFlags::COLOR);
    }

    pub fn set_opacity(&mut self, renderer: &mut Renderer, id: NodeId, opacity: u8) {
        if let Some(node) = self.node_mut(id) {
            node.real_opacity = opacity;
        }
        self.mark_dirty(renderer, id, DirtyFlags::OPACITY);
    }

    pub fn set_cascade_color_enabled(
        &mut self,
        renderer: &mut Renderer,
        id: NodeId,
        enabled: bool,
    ) {
        if let Some(node) = self.node_mut(id) {
            if node.cascade_color == enabled {
                return;
            }
            node.cascade_color = enabled;
            node.cmd.cascade_color_dirty = true;
        }
        self.mark_dirty(renderer, id, DirtyFlags::COLOR);
    }

    pub fn set_cascade_opacity_enabled(
        &mut self,
        renderer: &mut Renderer,
        id: NodeId,
        enabled: bool,
    ) {
        if let Some(node) = self.node_mut(id) {
            if node.cascade_opacity == enabled {
                return;
            }
            node.cascade_opacity = enabled;
            node.cmd.cascade_opacity_dirty = true;
        }
        self.mark_dirty(renderer, id, DirtyFlags::OPACITY);
    }

    pub fn set_blend_func(&mut self, renderer: &mut Renderer, id: NodeId, blend: Option<BlendFunc>) {
        if let Some(node) = self.node_mut(id) {
            node.blend = blend;
        }
        self.mark_dirty(renderer, id, DirtyFlags::COLOR);
    }

    // ----- kind-specific mutators -----------------------------------------

    /// Mutate a gradient layer's payload. No-op with a log for other kinds.
    pub fn with_gradient<R>(
        &mut self,
        renderer: &mut Renderer,
        id: NodeId,
        f: impl FnOnce(&mut GradientLayer) -> R,
    ) -> Option<R> {
        let result = match self.node_mut(id) {
            Some(node) => match &mut node.kind {
                NodeKind::LayerGradient(gradient) => Some(f(gradient)),
                _ => {
                    log::warn!("with_gradient on a non-gradient node, ignoring");
                    None
                }
            },
            None => None,
        };
        if result.is_some() {
            self.mark_dirty(renderer, id, DirtyFlags::GRADIENT | DirtyFlags::COLOR);
        }
        result
    }

    /// Mutate a sprite's payload. No-op with a log for other kinds.
    pub fn with_sprite<R>(
        &mut self,
        renderer: &mut Renderer,
        id: NodeId,
        f: impl FnOnce(&mut Sprite) -> R,
    ) -> Option<R> {
        let result = match self.node_mut(id) {
            Some(node) => match &mut node.kind {
                NodeKind::Sprite(sprite) => Some(f(sprite)),
                _ => {
                    log::warn!("with_sprite on a non-sprite node, ignoring");
                    None
                }
            },
            None => None,
        };
        if result.is_some() {
            self.mark_dirty(renderer, id, DirtyFlags::TEXTURE);
        }
        result
    }

    /// Switch a layer multiplexer to the child at `index`, hiding the rest.
    ///
    /// An out-of-range index is reported and ignored; the render loop must
    /// keep presenting frames.
    pub fn multiplex_switch_to(&mut self, renderer: &mut Renderer, id: NodeId, index: usize) {
        let children = match self.node_mut(id) {
            Some(node) => match &mut node.kind {
                NodeKind::LayerMultiplex(state) => {
                    if index >= node.children.len() {
                        log::error!(
                            "multiplex_switch_to: index {} out of range ({} layers)",
                            index,
                            node.children.len()
                        );
                        return;
                    }
                    state.selected = index;
                    node.children.clone()
                }
                _ => {
                    log::warn!("multiplex_switch_to on a non-multiplex node, ignoring");
                    return;
                }
            },
            None => return,
        };
        for (i, child) in children.into_iter().enumerate() {
            self.set_visible(renderer, child, i == index);
        }
    }

    // ----- bake -----------------------------------------------------------

    /// Memoize this layer's subtree into an offscreen surface.
    ///
    /// Every node currently in the subtree gets its cache-owner
    /// back-reference pointed at this layer so later mutations re-arm the
    /// cache, and the cache starts with a full two-pass re-render budget.
    pub fn bake(&mut self, renderer: &mut Renderer, id: NodeId) {
        match self.node_mut(id).map(|n| &mut n.cmd.backend) {
            Some(BackendState::Canvas(canvas)) => {
                if canvas.bake.is_none() {
                    canvas.bake = Some(BakeCache::new());
                }
            }
            Some(BackendState::Gpu(_)) => {
                log::warn!("bake is a canvas-backend feature, ignoring");
                return;
            }
            None => return,
        }
        let children: Vec<NodeId> = self
            .node(id)
            .map(|n| n.children.iter().chain(&n.protected_children).copied().collect())
            .unwrap_or_default();
        for child in children {
            self.set_subtree_cache_owner(child, Some(id));
        }
        self.mark_dirty(renderer, id, DirtyFlags::CACHE);
    }

    /// Drop the bake cache and detach the subtree's cache-owner references.
    pub fn unbake(&mut self, renderer: &mut Renderer, id: NodeId) {
        match self.node_mut(id).map(|n| &mut n.cmd.backend) {
            Some(BackendState::Canvas(canvas)) => {
                canvas.bake = None;
            }
            _ => return,
        }
        let children: Vec<NodeId> = self
            .node(id)
            .map(|n| n.children.iter().chain(&n.protected_children).copied().collect())
            .unwrap_or_default();
        for child in children {
            self.set_subtree_cache_owner(child, None);
        }
        self.mark_dirty(renderer, id, DirtyFlags::CACHE | DirtyFlags::CONTENT);
    }

    pub(crate) fn is_baked(&self, id: NodeId) -> bool {
        self.node(id)
            .and_then(|n| n.cmd.canvas())
            .map(|c| c.bake.is_some())
            .unwrap_or(false)
    }

    // ----- traversal ------------------------------------------------------

    pub(crate) fn sort_children(&mut self, id: NodeId) {
        let Some(node) = self.node(id) else { return };
        let mut children = node.children.clone();
        let keys: std::collections::HashMap<NodeId, i32> = children
            .iter()
            .filter_map(|&c| self.node(c).map(|n| (c, n.local_z)))
            .collect();
        children.sort_by_key(|c| keys.get(c).copied().unwrap_or(0));
        if let Some(node) = self.node_mut(id) {
            node.children = children;
        }
    }

    /// Top-down visit: assign traversal depth, run the per-node sync step,
    /// and push drawable commands to the renderer in painter's order
    /// (negative-Z children, self, remaining children).
    ///
    /// Uses an explicit work stack so depth is bounded independent of the
    /// tree's depth. Children of a baked layer are not descended into here;
    /// the draw pass renders them into the offscreen surface instead.
    pub fn visit(&mut self, renderer: &mut Renderer, root: NodeId) {
        enum Op {
            Enter(NodeId, Option<NodeId>),
            PushCmd(NodeId),
            Exit(NodeId),
        }

        let mut stack = vec![Op::Enter(root, None)];
        while let Some(op) = stack.pop() {
            match op {
                Op::Enter(id, parent) => {
                    let Some(node) = self.node(id) else { continue };
                    if !node.visible {
                        continue;
                    }
                    let level = parent
                        .and_then(|p| self.node(p))
                        .map(|p| p.cmd.cur_level + 1)
                        .unwrap_or(0);
                    let order_dirty = match self.node_mut(id) {
                        Some(node) => {
                            node.cmd.cur_level = level;
                            node.cmd.dirty.contains(DirtyFlags::ORDER)
                        }
                        None => false,
                    };
                    if order_dirty {
                        self.sort_children(id);
                    }
                    command::sync_status(self, id, parent);

                    stack.push(Op::Exit(id));
                    if self.is_baked(id) {
                        // The baked subtree renders through the cache.
                        stack.push(Op::PushCmd(id));
                        continue;
                    }
                    let Some(node) = self.node(id) else { continue };
                    let children = node.children.clone();
                    let protected = node.protected_children.clone();
                    let split = children
                        .iter()
                        .position(|&c| self.node(c).map(|n| n.local_z >= 0).unwrap_or(true))
                        .unwrap_or(children.len());
                    for &child in children[split..].iter().rev() {
                        stack.push(Op::Enter(child, Some(id)));
                    }
                    for &child in protected.iter().rev() {
                        stack.push(Op::Enter(child, Some(id)));
                    }
                    stack.push(Op::PushCmd(id));
                    for &child in children[..split].iter().rev() {
                        stack.push(Op::Enter(child, Some(id)));
                    }
                }
                Op::PushCmd(id) => {
                    let Some(node) = self.node(id) else { continue };
                    if node.cmd.need_draw || self.is_baked(id) {
                        let global_z = node.global_z;
                        renderer.push_render_command(id, global_z);
                    }
                }
                Op::Exit(id) => {
                    if let Some(node) = self.node_mut(id) {
                        node.cmd.dirty = DirtyFlags::empty();
                    }
                }
            }
        }
    }
}
