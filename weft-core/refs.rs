//! Live address handles.
//!
//! A reference is an externally held handle to a [`Path`], [`Point`], or
//! [`Range`] that the apply engine keeps current: every operation applied
//! to the document walks the registries and maps each handle's address
//! through the operation, respecting the handle's stored affinity. A
//! transform that comes back `None` nulls the handle and drops it from the
//! registry.
//!
//! Handles are arena indices into slotmaps rather than shared pointers:
//! the semantics needed are update-or-invalidate on structural change, not
//! garbage-collector weakness. The idiom every command uses is
//!
//! ```ignore
//! let handle = doc.track_path(path, None);
//! // ... several edits that may shift or consume `path` ...
//! let path = doc.untrack_path(handle);
//! ```
//!
//! References are strictly scoped: a command that creates one resolves it
//! with `untrack_*` before returning.

use slotmap::SlotMap;

use crate::{
  operation::Operation,
  path::{
    Affinity,
    Path,
  },
  point::Point,
  range::Range,
};

slotmap::new_key_type! {
  pub struct PathHandle;
  pub struct PointHandle;
  pub struct RangeHandle;
}

#[derive(Debug)]
struct Tracked<A> {
  current:  Option<A>,
  affinity: Option<Affinity>,
}

/// The three parallel registries of live handles for one document.
#[derive(Debug, Default)]
pub struct RefRegistry {
  paths:  SlotMap<PathHandle, Tracked<Path>>,
  points: SlotMap<PointHandle, Tracked<Point>>,
  ranges: SlotMap<RangeHandle, Tracked<Range>>,
}

impl RefRegistry {
  pub fn track_path(&mut self, path: Path, affinity: Option<Affinity>) -> PathHandle {
    self.paths.insert(Tracked {
      current: Some(path),
      affinity,
    })
  }

  pub fn track_point(&mut self, point: Point, affinity: Option<Affinity>) -> PointHandle {
    self.points.insert(Tracked {
      current: Some(point),
      affinity,
    })
  }

  pub fn track_range(&mut self, range: Range, affinity: Option<Affinity>) -> RangeHandle {
    self.ranges.insert(Tracked {
      current: Some(range),
      affinity,
    })
  }

  pub fn current_path(&self, handle: PathHandle) -> Option<&Path> {
    self.paths.get(handle)?.current.as_ref()
  }

  pub fn current_point(&self, handle: PointHandle) -> Option<&Point> {
    self.points.get(handle)?.current.as_ref()
  }

  pub fn current_range(&self, handle: RangeHandle) -> Option<&Range> {
    self.ranges.get(handle)?.current.as_ref()
  }

  /// Remove the handle and return its final address.
  pub fn untrack_path(&mut self, handle: PathHandle) -> Option<Path> {
    self.paths.remove(handle)?.current
  }

  pub fn untrack_point(&mut self, handle: PointHandle) -> Option<Point> {
    self.points.remove(handle)?.current
  }

  pub fn untrack_range(&mut self, handle: RangeHandle) -> Option<Range> {
    self.ranges.remove(handle)?.current
  }

  /// Map every live handle through `op`; handles whose address no longer
  /// exists are dropped (lazy auto-unref).
  pub fn transform_all(&mut self, op: &Operation) {
    self.paths.retain(|_, tracked| {
      let Some(current) = tracked.current.take() else {
        return false;
      };
      tracked.current = current.transform(op, tracked.affinity);
      tracked.current.is_some()
    });
    self.points.retain(|_, tracked| {
      let Some(current) = tracked.current.take() else {
        return false;
      };
      tracked.current = current.transform(op, tracked.affinity);
      tracked.current.is_some()
    });
    self.ranges.retain(|_, tracked| {
      let Some(current) = tracked.current.take() else {
        return false;
      };
      tracked.current = current.transform(op, tracked.affinity);
      tracked.current.is_some()
    });
  }

  pub fn len(&self) -> usize {
    self.paths.len() + self.points.len() + self.ranges.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::node::Node;

  #[test]
  fn handles_follow_structural_edits() {
    let mut registry = RefRegistry::default();
    let handle = registry.track_path(Path::from(vec![2]), None);

    registry.transform_all(&Operation::InsertNode {
      path: Path::from(vec![0]),
      node: Node::text(""),
    });
    assert_eq!(registry.current_path(handle), Some(&Path::from(vec![3])));

    assert_eq!(registry.untrack_path(handle), Some(Path::from(vec![3])));
    assert!(registry.current_path(handle).is_none());
  }

  #[test]
  fn invalidated_handles_drop_out() {
    let mut registry = RefRegistry::default();
    let handle = registry.track_point(Point::new(Path::from(vec![1, 0]), 2), None);

    registry.transform_all(&Operation::RemoveNode {
      path: Path::from(vec![1]),
      node: Node::text(""),
    });

    assert!(registry.current_point(handle).is_none());
    assert!(registry.is_empty());
    assert_eq!(registry.untrack_point(handle), None);
  }

  #[test]
  fn affinity_sticks_through_splits() {
    let mut registry = RefRegistry::default();
    let ahead = registry.track_path(Path::from(vec![1]), Some(Affinity::Forward));
    let behind = registry.track_path(Path::from(vec![1]), Some(Affinity::Backward));

    registry.transform_all(&Operation::SplitNode {
      path:       Path::from(vec![1]),
      position:   1,
      properties: Default::default(),
    });

    assert_eq!(registry.current_path(ahead), Some(&Path::from(vec![2])));
    assert_eq!(registry.current_path(behind), Some(&Path::from(vec![1])));
  }
}
