//! Dirty-rectangle region tracking for the canvas backend.
//!
//! Each canvas render command tracks the world-space bounding rectangle it
//! occupied before and after its latest transform change. The pair drives
//! minimal invalidation-based redraw: the damage for a node is the union of
//! its old and current regions.

use crate::types::Rect;

/// How dirty a node's region is within the current frame.
///
/// The ordering matters: a status is only ever raised within a frame.
/// `DirtyDouble` (both the old and current rects must be repainted, and an
/// out-of-band mutation may have moved the node more than once) is sticky:
/// once set it is never downgraded until the frame-boundary reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum RegionStatus {
    NotDirty,
    Dirty,
    DirtyDouble,
}

/// Region pair for a canvas render command.
#[derive(Clone, Copy, Debug)]
pub struct DirtyRegion {
    /// Bounding rect for the node's current world-space footprint.
    current: Rect,
    /// Bounding rect the node occupied before its latest change. Under
    /// `DirtyDouble` this accumulates the union of all footprints visited
    /// this frame, not only the first.
    old: Rect,
    status: RegionStatus,
}

impl DirtyRegion {
    pub fn new() -> Self {
        Self {
            current: Rect::ZERO,
            old: Rect::ZERO,
            status: RegionStatus::NotDirty,
        }
    }

    pub fn status(&self) -> RegionStatus {
        self.status
    }

    pub fn current(&self) -> Rect {
        self.current
    }

    pub fn old(&self) -> Rect {
        self.old
    }

    /// Raise the region status. Sticky maximum: a `Dirty` notification never
    /// downgrades an earlier `DirtyDouble` within the same frame.
    pub fn notify(&mut self, status: RegionStatus) {
        if status > self.status {
            self.status = status;
        }
    }

    /// Record a new world-space footprint after a transform change.
    ///
    /// Ping-pongs the current rect into the old slot. If the status was
    /// already `DirtyDouble` the previous footprint is unioned into the old
    /// slot instead of overwriting it, preserving every position the node
    /// visited this frame for damage computation.
    pub fn update(&mut self, new_bounds: Rect) {
        if self.status == RegionStatus::DirtyDouble {
            self.old = self.old.union(&self.current);
        } else {
            self.old = self.current;
        }
        self.current = new_bounds;
        self.notify(RegionStatus::Dirty);
    }

    /// Damage rectangle for this node: everything that must be repainted.
    pub fn damage(&self) -> Rect {
        match self.status {
            RegionStatus::NotDirty => Rect::ZERO,
            _ => self.old.union(&self.current),
        }
    }

    /// Frame-boundary reset; the only place the status may go down.
    pub fn reset(&mut self) {
        self.status = RegionStatus::NotDirty;
        self.old = Rect::ZERO;
    }
}

impl Default for DirtyRegion {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_ordering() {
        assert!(RegionStatus::NotDirty < RegionStatus::Dirty);
        assert!(RegionStatus::Dirty < RegionStatus::DirtyDouble);
    }

    #[test]
    fn test_dirty_double_is_sticky() {
        let mut region = DirtyRegion::new();
        region.notify(RegionStatus::DirtyDouble);
        region.notify(RegionStatus::Dirty);
        assert_eq!(region.status(), RegionStatus::DirtyDouble);

        region.notify(RegionStatus::NotDirty);
        assert_eq!(region.status(), RegionStatus::DirtyDouble);

        // Only the frame-boundary reset downgrades.
        region.reset();
        assert_eq!(region.status(), RegionStatus::NotDirty);
    }

    #[test]
    fn test_update_ping_pongs_buffers() {
        let mut region = DirtyRegion::new();
        let first = Rect::new(0.0, 0.0, 10.0, 10.0);
        let second = Rect::new(20.0, 0.0, 10.0, 10.0);

        region.update(first);
        region.update(second);
        assert_eq!(region.old(), first);
        assert_eq!(region.current(), second);
        assert_eq!(region.damage(), Rect::new(0.0, 0.0, 30.0, 10.0));
    }

    #[test]
    fn test_dirty_double_unions_visited_footprints() {
        let mut region = DirtyRegion::new();
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(40.0, 0.0, 10.0, 10.0);
        let c = Rect::new(80.0, 0.0, 10.0, 10.0);

        region.update(a);
        region.notify(RegionStatus::DirtyDouble);
        region.update(b);
        region.update(c);

        // Old buffer holds the union of a and b, not just b.
        assert_eq!(region.old(), Rect::new(0.0, 0.0, 50.0, 10.0));
        assert_eq!(region.damage(), Rect::new(0.0, 0.0, 90.0, 10.0));
    }
}
