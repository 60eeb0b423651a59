//! Renderer front-end: per-frame dirty pool and ordered command queue.
//!
//! This is an explicit context object threaded through traversal calls, not
//! ambient global state. It has two ingestion points: `push_dirty_node`
//! registers a command for the frame's status-update pass and
//! `push_render_command` registers it for the draw pass. Draw order is
//! painter's order: a monotonically increasing assigned Z breaks ties among
//! commands that share a global Z.

use crate::command;
use crate::scene::{NodeId, Scene};

/// A queued draw-pass entry.
#[derive(Clone, Copy, Debug)]
pub struct DrawEntry {
    pub node: NodeId,
    /// Explicit cross-tree ordering key; 0 for nodes that don't set one.
    pub global_z: f32,
    /// Traversal-order tie-break assigned at push time.
    pub assigned_z: f32,
}

/// Per-frame render front-end.
pub struct Renderer {
    dirty_pool: Vec<NodeId>,
    commands: Vec<DrawEntry>,
    assigned_z: f32,
    /// Step between consecutive assigned Z values.
    pub assigned_z_step: f32,
}

impl Renderer {
    pub fn new() -> Self {
        Self {
            dirty_pool: Vec::new(),
            commands: Vec::new(),
            assigned_z: 0.0,
            assigned_z_step: 1.0 / 10000.0,
        }
    }

    /// Reset frame state. Call at the start of each frame, before any
    /// mutation or traversal.
    pub fn begin_frame(&mut self) {
        self.commands.clear();
        self.assigned_z = 0.0;
    }

    /// Register a node for this frame's status-update pass.
    ///
    /// Mutators call this exactly once per clean→dirty transition; nodes
    /// entering the tree are pushed unconditionally.
    pub fn push_dirty_node(&mut self, id: NodeId) {
        self.dirty_pool.push(id);
    }

    pub fn dirty_pool_len(&self) -> usize {
        self.dirty_pool.len()
    }

    /// Run the status-update pass: drain the dirty pool and apply the full
    /// recompute step to each node, parents before descendants.
    pub fn update_dirty_nodes(&mut self, scene: &mut Scene) {
        if self.dirty_pool.is_empty() {
            return;
        }
        let mut pool = std::mem::take(&mut self.dirty_pool);
        // Top-down: lower cur_level means closer to the root. Nodes pushed
        // before ever being visited sit at level 0 and go first.
        pool.sort_by_key(|&id| scene.node(id).map(|n| n.cmd.cur_level).unwrap_or(0));
        pool.dedup();
        for id in pool {
            if scene.node(id).is_some() {
                command::update_status(scene, id);
            }
        }
    }

    /// Register a command for this frame's draw pass, assigning the next Z.
    pub fn push_render_command(&mut self, id: NodeId, global_z: f32) {
        self.commands.push(DrawEntry {
            node: id,
            global_z,
            assigned_z: self.assigned_z,
        });
        self.assigned_z += self.assigned_z_step;
    }

    pub fn assigned_z(&self) -> f32 {
        self.assigned_z
    }

    /// Commands in final draw order: global Z first, traversal order within
    /// a global Z.
    pub fn sorted_commands(&mut self) -> &[DrawEntry] {
        self.commands
            .sort_by(|a, b| match a.global_z.total_cmp(&b.global_z) {
                std::cmp::Ordering::Equal => a.assigned_z.total_cmp(&b.assigned_z),
                other => other,
            });
        &self.commands
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}
