//! Directional spans between two points.
//!
//! A [`Range`] is an (anchor, focus) pair; direction is encoded by which
//! point sits after the other, and `anchor == focus` is a collapsed cursor.
//! The document selection is a range, and most commands accept one as their
//! target.

use std::fmt;

use serde::{
  Deserialize,
  Serialize,
};

use crate::{
  operation::Operation,
  path::{
    Affinity,
    Path,
  },
  point::Point,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
  pub anchor: Point,
  pub focus:  Point,
}

impl Range {
  pub fn new(anchor: Point, focus: Point) -> Self {
    Range { anchor, focus }
  }

  /// A cursor: both ends at the same point.
  pub fn collapsed(point: Point) -> Self {
    Range {
      anchor: point.clone(),
      focus:  point,
    }
  }

  #[inline]
  pub fn is_collapsed(&self) -> bool {
    self.anchor == self.focus
  }

  #[inline]
  pub fn is_expanded(&self) -> bool {
    !self.is_collapsed()
  }

  /// Whether the focus sits at or after the anchor.
  pub fn is_forward(&self) -> bool {
    !self.anchor.is_after(&self.focus)
  }

  pub fn is_backward(&self) -> bool {
    !self.is_forward()
  }

  /// The (start, end) points in document order, regardless of direction.
  pub fn edges(&self) -> (&Point, &Point) {
    if self.is_forward() {
      (&self.anchor, &self.focus)
    } else {
      (&self.focus, &self.anchor)
    }
  }

  pub fn start(&self) -> &Point {
    self.edges().0
  }

  pub fn end(&self) -> &Point {
    self.edges().1
  }

  pub fn includes_point(&self, target: &Point) -> bool {
    let (start, end) = self.edges();
    !target.is_before(start) && !target.is_after(end)
  }

  /// Whether the node at `target` lies within the range, by prefix order.
  pub fn includes_path(&self, target: &Path) -> bool {
    let (start, end) = self.edges();
    target.compare(&start.path) != std::cmp::Ordering::Less
      && target.compare(&end.path) != std::cmp::Ordering::Greater
  }

  pub fn includes_range(&self, target: &Range) -> bool {
    if self.includes_point(&target.anchor) || self.includes_point(&target.focus) {
      return true;
    }
    let (start, end) = self.edges();
    let (target_start, target_end) = target.edges();
    start.is_before(target_start) && end.is_after(target_end)
  }

  /// The overlap of two ranges, if any, as a forward range.
  pub fn intersection(&self, other: &Range) -> Option<Range> {
    let (self_start, self_end) = self.edges();
    let (other_start, other_end) = other.edges();
    let start = if self_start.is_before(other_start) {
      other_start
    } else {
      self_start
    };
    let end = if self_end.is_before(other_end) {
      self_end
    } else {
      other_end
    };
    if end.is_before(start) {
      None
    } else {
      Some(Range::new(start.clone(), end.clone()))
    }
  }

  /// Map this range through an already-applied operation. `Inward` and
  /// `Outward` resolve to per-point forward/backward affinities based on
  /// the range's direction; a collapsed inward range keeps both points on
  /// the same side so they cannot cross.
  pub fn transform(&self, op: &Operation, affinity: Option<Affinity>) -> Option<Range> {
    let (anchor_affinity, focus_affinity) = match affinity {
      Some(Affinity::Inward) => {
        let collapsed = self.is_collapsed();
        if self.is_forward() {
          (
            Some(Affinity::Forward),
            if collapsed {
              Some(Affinity::Forward)
            } else {
              Some(Affinity::Backward)
            },
          )
        } else {
          (
            Some(Affinity::Backward),
            if collapsed {
              Some(Affinity::Backward)
            } else {
              Some(Affinity::Forward)
            },
          )
        }
      },
      Some(Affinity::Outward) => {
        if self.is_forward() {
          (Some(Affinity::Backward), Some(Affinity::Forward))
        } else {
          (Some(Affinity::Forward), Some(Affinity::Backward))
        }
      },
      other => (other, other),
    };

    let anchor = self.anchor.transform(op, anchor_affinity)?;
    let focus = self.focus.transform(op, focus_affinity)?;
    Some(Range::new(anchor, focus))
  }
}

impl fmt::Display for Range {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}..{}", self.anchor, self.focus)
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn point(path: &[usize], offset: usize) -> Point {
    Point::new(Path::from(path), offset)
  }

  #[test]
  fn edges_normalize_direction() {
    let forward = Range::new(point(&[0, 0], 1), point(&[0, 2], 0));
    let backward = Range::new(point(&[0, 2], 0), point(&[0, 0], 1));

    assert!(forward.is_forward());
    assert!(backward.is_backward());
    assert_eq!(forward.edges(), backward.edges());
    assert_eq!(forward.start(), &point(&[0, 0], 1));
    assert_eq!(forward.end(), &point(&[0, 2], 0));
  }

  #[test]
  fn includes_and_intersection() {
    let range = Range::new(point(&[0, 0], 1), point(&[0, 2], 2));

    assert!(range.includes_point(&point(&[0, 1], 0)));
    assert!(!range.includes_point(&point(&[0, 2], 3)));
    assert!(range.includes_path(&Path::from(vec![0, 1])));

    let other = Range::new(point(&[0, 1], 0), point(&[0, 3], 0));
    let overlap = range.intersection(&other).unwrap();
    assert_eq!(overlap.anchor, point(&[0, 1], 0));
    assert_eq!(overlap.focus, point(&[0, 2], 2));

    let disjoint = Range::new(point(&[1, 0], 0), point(&[1, 0], 4));
    assert!(range.intersection(&disjoint).is_none());
  }

  #[test]
  fn collapsed_inward_points_do_not_cross() {
    let cursor = Range::collapsed(point(&[0, 0], 2));
    let op = Operation::InsertText {
      path:   Path::from(vec![0, 0]),
      offset: 2,
      text:   "!!".into(),
    };

    let mapped = cursor.transform(&op, Some(Affinity::Inward)).unwrap();
    assert!(mapped.is_collapsed());
    assert_eq!(mapped.anchor, point(&[0, 0], 4));
  }

  #[test]
  fn expanded_outward_grows_around_insert() {
    let range = Range::new(point(&[0, 0], 1), point(&[0, 0], 3));
    let op = Operation::InsertText {
      path:   Path::from(vec![0, 0]),
      offset: 3,
      text:   "ab".into(),
    };

    let outward = range.transform(&op, Some(Affinity::Outward)).unwrap();
    assert_eq!(outward.focus, point(&[0, 0], 5));

    let inward = range.transform(&op, Some(Affinity::Inward)).unwrap();
    assert_eq!(inward.focus, point(&[0, 0], 3));
  }
}
