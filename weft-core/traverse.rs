//! Tree traversal: lazy depth-first iteration and matcher-driven queries.
//!
//! [`Descendants`] walks the tree in document order (or reverse), pruning
//! void subtrees unless asked not to, and clipping to a span of paths.
//! On top of it, [`Document::nodes`] runs a predicate with the `all`,
//! `highest` or `lowest` match modes and the `universal` quantifier, and
//! the small lookups ([`Document::above`], [`Document::levels`],
//! [`Document::void_above`]) answer the ancestor questions commands ask.

use std::cmp::Ordering;

use crate::{
  document::{
    Document,
    DocumentError,
    Result,
  },
  location::Location,
  node::Node,
  path::Path,
};

/// A node paired with the path it was found at.
pub type NodeEntry<'a> = (Path, &'a Node);

/// How a matcher's hits are reduced when they nest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueryMode {
  /// Every matching node, ancestors and descendants alike.
  #[default]
  All,
  /// Only the outermost match of each matching chain.
  Highest,
  /// Only the innermost match of each matching chain.
  Lowest,
}

/// Options for [`Document::nodes`].
#[derive(Debug, Clone, Default)]
pub struct NodesOptions {
  /// Where to look. `None` means the whole document.
  pub at:        Option<Location>,
  pub mode:      QueryMode,
  /// Require every text leaf in the span to sit inside some match;
  /// otherwise the query yields nothing.
  pub universal: bool,
  pub reverse:   bool,
  /// Descend into void elements.
  pub voids:     bool,
}

/// Lazy pre-order walk over a document's nodes.
///
/// Parents are yielded before their children in both directions; `reverse`
/// only flips sibling order. Entries outside the `from..=to` clip (compared
/// with shared-prefix path order, so ancestors of the endpoints stay in)
/// are skipped.
pub struct Descendants<'a> {
  doc:     &'a Document,
  stack:   Vec<(Path, &'a Node)>,
  from:    Option<Path>,
  to:      Option<Path>,
  reverse: bool,
  voids:   bool,
}

impl<'a> Iterator for Descendants<'a> {
  type Item = NodeEntry<'a>;

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      let (path, node) = self.stack.pop()?;

      let clipped_out = if self.reverse {
        self
          .from
          .as_ref()
          .is_some_and(|from| path.compare(from) == Ordering::Less)
      } else {
        self
          .to
          .as_ref()
          .is_some_and(|to| path.compare(to) == Ordering::Greater)
      };
      if clipped_out {
        // Document order means everything still stacked is further out.
        self.stack.clear();
        return None;
      }

      let descend = self.voids
        || !matches!(node, Node::Element { .. })
        || !self.doc.policy().is_void(node, &path);
      if descend {
        if let Some(children) = node.children() {
          if self.reverse {
            for (i, child) in children.iter().enumerate() {
              self.stack.push((path.child(i), child));
            }
          } else {
            for (i, child) in children.iter().enumerate().rev() {
              self.stack.push((path.child(i), child));
            }
          }
        }
      }

      let before_span = if self.reverse {
        self
          .to
          .as_ref()
          .is_some_and(|to| path.compare(to) == Ordering::Greater)
      } else {
        self
          .from
          .as_ref()
          .is_some_and(|from| path.compare(from) == Ordering::Less)
      };
      if !before_span {
        return Some((path, node));
      }
    }
  }
}

impl Document {
  /// Lazy pre-order walk over the whole tree, root included.
  pub fn descendants(&self) -> Descendants<'_> {
    Descendants {
      doc:     self,
      stack:   vec![(Path::root(), self.root())],
      from:    None,
      to:      None,
      reverse: false,
      voids:   false,
    }
  }

  /// Like [`Document::descendants`], clipped and configured.
  pub fn descendants_in(
    &self,
    from: Option<Path>,
    to: Option<Path>,
    reverse: bool,
    voids: bool,
  ) -> Descendants<'_> {
    Descendants {
      doc: self,
      stack: vec![(Path::root(), self.root())],
      from,
      to,
      reverse,
      voids,
    }
  }

  /// All nodes matching `matcher` at the given location, reduced by mode.
  ///
  /// With `universal`, the result is non-empty only when every text leaf
  /// in the span lies inside some match.
  pub fn nodes<'a>(
    &'a self,
    options: &NodesOptions,
    matcher: impl Fn(&Node, &Path) -> bool,
  ) -> Result<Vec<NodeEntry<'a>>> {
    let (from, to) = match &options.at {
      None => (None, None),
      Some(location) => {
        let (from, to) = self.location_span(location)?;
        (Some(from), Some(to))
      },
    };

    let walk = self.descendants_in(from, to, options.reverse, options.voids);

    let mut out: Vec<NodeEntry<'a>> = Vec::new();
    let mut hit: Option<NodeEntry<'a>> = None;

    for (path, node) in walk {
      let is_lower = hit
        .as_ref()
        .is_some_and(|(hit_path, _)| path.compare(hit_path) == Ordering::Equal);

      if options.mode == QueryMode::Highest && is_lower {
        continue;
      }

      if !matcher(node, &path) {
        // A text leaf not covered by any match sinks a universal query.
        if options.universal && !is_lower && node.is_text() {
          return Ok(Vec::new());
        }
        continue;
      }

      if options.mode == QueryMode::Lowest && is_lower {
        hit = Some((path, node));
        continue;
      }

      let emit = if options.mode == QueryMode::Lowest {
        hit.replace((path, node))
      } else {
        hit = Some((path.clone(), node));
        Some((path, node))
      };
      if let Some(entry) = emit {
        out.push(entry);
      }
    }

    if options.mode == QueryMode::Lowest {
      if let Some(entry) = hit {
        out.push(entry);
      }
    }

    Ok(out)
  }

  /// The nodes on the way down to `path`, root first, `path` last.
  pub fn levels(&self, path: &Path) -> Result<Vec<NodeEntry<'_>>> {
    let mut out = Vec::with_capacity(path.len() + 1);
    for level in path.levels() {
      let node = self.node(&level)?;
      out.push((level, node));
    }
    Ok(out)
  }

  /// The closest strict ancestor of `at` matching `matcher`, innermost
  /// first.
  pub fn above(
    &self,
    at: &Location,
    matcher: impl Fn(&Node, &Path) -> bool,
  ) -> Option<NodeEntry<'_>> {
    let path = at.primary_path();
    for ancestor in path.ancestors().into_iter().rev() {
      let node = self.root().descendant(&ancestor)?;
      if matcher(node, &ancestor) {
        return Some((ancestor, node));
      }
    }
    None
  }

  /// The parent entry of `path`.
  pub fn parent_entry(&self, path: &Path) -> Result<NodeEntry<'_>> {
    if path.is_root() {
      return Err(DocumentError::NotFound { path: path.clone() });
    }
    let parent = path.parent();
    let node = self.node(&parent)?;
    Ok((parent, node))
  }

  /// The text leaf at `path`.
  pub fn leaf(&self, path: &Path) -> Result<&Node> {
    let node = self.node(path)?;
    if !node.is_text() {
      return Err(DocumentError::TextExpected { path: path.clone() });
    }
    Ok(node)
  }

  /// The outermost void element at or above `at`, if any.
  pub fn void_above(&self, at: &Location) -> Option<NodeEntry<'_>> {
    let path = at.primary_path();
    for level in path.levels() {
      let node = self.root().descendant(&level)?;
      if node.is_element() && self.policy().is_void(node, &level) {
        return Some((level, node));
      }
    }
    None
  }

  /// Path of the first leaf under `path` (or `path` itself if childless).
  pub fn first_path(&self, path: &Path) -> Result<Path> {
    let mut current = path.clone();
    loop {
      let node = self.node(&current)?;
      match node.children() {
        Some(children) if !children.is_empty() => current = current.child(0),
        _ => return Ok(current),
      }
    }
  }

  /// Path of the last leaf under `path` (or `path` itself if childless).
  pub fn last_path(&self, path: &Path) -> Result<Path> {
    let mut current = path.clone();
    loop {
      let node = self.node(&current)?;
      match node.children() {
        Some(children) if !children.is_empty() => {
          current = current.child(children.len() - 1)
        },
        _ => return Ok(current),
      }
    }
  }

  /// Clip bounds for a location: the paths of its first and last points.
  pub(crate) fn location_span(&self, location: &Location) -> Result<(Path, Path)> {
    match location {
      Location::Path(path) => Ok((path.clone(), path.clone())),
      Location::Point(point) => Ok((point.path.clone(), point.path.clone())),
      Location::Range(range) => {
        let (start, end) = range.edges();
        Ok((start.path.clone(), end.path.clone()))
      },
    }
  }
}
