//! Character addresses inside text leaves.
//!
//! A [`Point`] is a [`Path`] to a text leaf plus a char offset into it.
//! Points order by path first (prefix compare), then by offset, and map
//! through operations with the same affinity rules as paths, extended with
//! offset arithmetic for the textual cases.

use std::{
  cmp::Ordering,
  fmt,
};

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
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
  pub path:   Path,
  pub offset: usize,
}

impl Point {
  pub fn new(path: Path, offset: usize) -> Self {
    Point { path, offset }
  }

  /// Three-way compare in document order. Points whose paths relate as
  /// ancestor/descendant compare by the shared prefix, like paths do.
  pub fn compare(&self, other: &Point) -> Ordering {
    match self.path.compare(&other.path) {
      Ordering::Equal => self.offset.cmp(&other.offset),
      unequal => unequal,
    }
  }

  pub fn is_before(&self, other: &Point) -> bool {
    self.compare(other) == Ordering::Less
  }

  pub fn is_after(&self, other: &Point) -> bool {
    self.compare(other) == Ordering::Greater
  }

  /// Map this point through an already-applied operation. `affinity`
  /// resolves edits landing exactly on the point; `None` at an exact split
  /// invalidates it.
  pub fn transform(&self, op: &Operation, affinity: Option<Affinity>) -> Option<Point> {
    let mut point = self.clone();

    match op {
      Operation::InsertNode { .. } | Operation::MoveNode { .. } => {
        point.path = self.path.transform(op, affinity)?;
      },

      Operation::InsertText {
        path,
        offset,
        text,
      } => {
        if path == &point.path
          && (*offset < point.offset
            || (*offset == point.offset && affinity == Some(Affinity::Forward)))
        {
          point.offset += text.chars().count();
        }
      },

      Operation::RemoveText {
        path,
        offset,
        text,
      } => {
        if path == &point.path && *offset <= point.offset {
          point.offset -= (point.offset - offset).min(text.chars().count());
        }
      },

      Operation::MergeNode { path, position, .. } => {
        if path == &point.path {
          point.offset += position;
        }
        point.path = self.path.transform(op, affinity)?;
      },

      Operation::RemoveNode { path, .. } => {
        if path == &point.path || path.is_ancestor_of(&point.path) {
          return None;
        }
        point.path = self.path.transform(op, affinity)?;
      },

      Operation::SplitNode { path, position, .. } => {
        if path == &point.path {
          if *position == point.offset && affinity.is_none() {
            return None;
          }
          if *position < point.offset
            || (*position == point.offset && affinity == Some(Affinity::Forward))
          {
            point.offset -= position;
            point.path = self.path.transform(op, Some(Affinity::Forward))?;
          }
        } else {
          point.path = self.path.transform(op, affinity)?;
        }
      },

      Operation::SetNode { .. } | Operation::SetSelection { .. } => {},
    }

    Some(point)
  }
}

impl fmt::Display for Point {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.path, self.offset)
  }
}

impl PartialOrd for Point {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for Point {
  fn cmp(&self, other: &Self) -> Ordering {
    // Total order falls back to full path order, not prefix order.
    (&self.path, self.offset).cmp(&(&other.path, other.offset))
  }
}
