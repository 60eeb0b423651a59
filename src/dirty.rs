//! Dirty-flag bitmask for per-node render state.
//!
//! Each render command carries one `DirtyFlags` mask. Derived state
//! (transform, displayed color, ...) is valid only while the corresponding
//! bit is clear; mutators set bits and the traversal steps clear them.
//!
//! The transition that matters for scheduling is clean → dirty: the first
//! bit set on a previously-clean command enqueues the node into the
//! renderer's per-frame dirty pool exactly once, which is how the engine
//! avoids scanning the whole tree every frame.

use bitflags::bitflags;

bitflags! {
    /// Independently trackable dirty aspects of a render command.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct DirtyFlags: u16 {
        /// Local and world transform are stale
        const TRANSFORM = 1 << 0;
        /// Visibility changed
        const VISIBLE   = 1 << 1;
        /// Displayed color is stale
        const COLOR     = 1 << 2;
        /// Displayed opacity is stale
        const OPACITY   = 1 << 3;
        /// A bake cache covering this node is stale
        const CACHE     = 1 << 4;
        /// Child draw order changed
        const ORDER     = 1 << 5;
        /// Text content changed
        const TEXT      = 1 << 6;
        /// Gradient parameters or stops changed
        const GRADIENT  = 1 << 7;
        /// Texture or texture rect changed
        const TEXTURE   = 1 << 8;
        /// Content size or geometry source changed
        const CONTENT   = 1 << 9;
    }
}

impl DirtyFlags {
    /// Every trackable aspect at once; used when a node (re)enters the tree
    /// or a backend is (re)attached and all derived state must be rebuilt.
    pub const ALL: DirtyFlags = DirtyFlags::all();

    /// Set `flags`, reporting whether this was the clean → dirty edge.
    ///
    /// Returns `true` only when the mask was empty and `flags` is not;
    /// the caller must enqueue the node into the dirty pool in that case.
    #[must_use]
    pub fn mark(&mut self, flags: DirtyFlags) -> bool {
        let was_clean = self.is_empty();
        self.insert(flags);
        was_clean && !flags.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_reports_clean_to_dirty_edge() {
        let mut flags = DirtyFlags::empty();
        assert!(flags.mark(DirtyFlags::TRANSFORM));
        // Already dirty: further bits do not re-trigger the edge.
        assert!(!flags.mark(DirtyFlags::COLOR));
        assert!(!flags.mark(DirtyFlags::TRANSFORM));
        assert!(flags.contains(DirtyFlags::TRANSFORM | DirtyFlags::COLOR));
    }

    #[test]
    fn test_mark_empty_is_not_an_edge() {
        let mut flags = DirtyFlags::empty();
        assert!(!flags.mark(DirtyFlags::empty()));
        assert!(flags.is_empty());
    }

    #[test]
    fn test_all_covers_every_bit() {
        assert_eq!(DirtyFlags::ALL.bits().count_ones(), 10);
    }
}
