//! Command targets.
//!
//! Commands accept any address shape as their target: a bare [`Path`], a
//! [`Point`] inside a text leaf, or a full [`Range`]. [`Location`] is that
//! sum, with conversions so call sites can pass whichever they hold.

use crate::{
  path::Path,
  point::Point,
  range::Range,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Location {
  Path(Path),
  Point(Point),
  Range(Range),
}

impl Location {
  /// The path component of the location's leading edge, without resolving
  /// against a document.
  pub fn primary_path(&self) -> &Path {
    match self {
      Location::Path(path) => path,
      Location::Point(point) => &point.path,
      Location::Range(range) => &range.start().path,
    }
  }

  pub fn as_range(&self) -> Option<&Range> {
    match self {
      Location::Range(range) => Some(range),
      _ => None,
    }
  }
}

impl From<Path> for Location {
  fn from(path: Path) -> Self {
    Location::Path(path)
  }
}

impl From<Vec<usize>> for Location {
  fn from(indices: Vec<usize>) -> Self {
    Location::Path(Path::from(indices))
  }
}

impl<const N: usize> From<[usize; N]> for Location {
  fn from(indices: [usize; N]) -> Self {
    Location::Path(Path::from(indices))
  }
}

impl From<Point> for Location {
  fn from(point: Point) -> Self {
    Location::Point(point)
  }
}

impl From<Range> for Location {
  fn from(range: Range) -> Self {
    Location::Range(range)
  }
}

/// Which end of a location a query should resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
  Start,
  End,
}

/// Granularity of a directional deletion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Unit {
  #[default]
  Character,
  Word,
  Line,
  Block,
}
