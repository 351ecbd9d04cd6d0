//! Composite editing commands, built solely on the apply engine and the
//! traversal and query layers. Every command wraps its whole body in
//! `Document::without_normalizing`, so the repair pass runs once at the
//! outermost scope instead of after each sub-operation.

pub mod node;
pub mod selection;
pub mod text;

use crate::{
  document::Document,
  location::{
    Location,
    Unit,
  },
  node::Node,
  path::Path,
  traverse::QueryMode,
};

/// Which nodes a command targets. `Custom` carries an arbitrary
/// predicate; the named variants cover the defaults the commands fall
/// back to when none is given.
#[derive(Clone, Copy)]
pub enum Match<'m> {
  /// Non-inline elements, the usual unit of structural edits.
  Block,
  /// Text leaves and inline elements.
  InlineOrText,
  /// Text leaves only.
  Text,
  /// Exactly the node at this path.
  At(&'m Path),
  /// Direct children of the node at this path.
  ChildOf(&'m Path),
  Custom(&'m dyn Fn(&Node, &Path) -> bool),
}

impl Match<'_> {
  pub(crate) fn test(&self, doc: &Document, node: &Node, path: &Path) -> bool {
    match self {
      Match::Block => node.is_element() && !doc.policy().is_inline(node, path),
      Match::InlineOrText => {
        node.is_text() || (node.is_element() && doc.policy().is_inline(node, path))
      },
      Match::Text => node.is_text(),
      Match::At(target) => path == *target,
      Match::ChildOf(parent) => {
        path.len() == parent.len() + 1 && parent.is_ancestor_of(path)
      },
      Match::Custom(f) => f(node, path),
    }
  }
}

impl std::fmt::Debug for Match<'_> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Match::Block => f.write_str("Block"),
      Match::InlineOrText => f.write_str("InlineOrText"),
      Match::Text => f.write_str("Text"),
      Match::At(path) => f.debug_tuple("At").field(path).finish(),
      Match::ChildOf(path) => f.debug_tuple("ChildOf").field(path).finish(),
      Match::Custom(_) => f.write_str("Custom(..)"),
    }
  }
}

// Commands reduce their matches with `Lowest` unless told otherwise,
// unlike the raw node query whose default is `All`.

#[derive(Debug)]
pub struct InsertNodesOptions<'m> {
  pub at:      Option<Location>,
  pub matcher: Option<Match<'m>>,
  pub mode:    QueryMode,
  /// Keep a hanging range as given instead of unhanging it first.
  pub hanging: bool,
  /// Move the selection to the end of the inserted run. Defaults to
  /// doing so only when no explicit target was given.
  pub select:  Option<bool>,
  pub voids:   bool,
}

impl Default for InsertNodesOptions<'_> {
  fn default() -> Self {
    InsertNodesOptions {
      at:      None,
      matcher: None,
      mode:    QueryMode::Lowest,
      hanging: false,
      select:  None,
      voids:   false,
    }
  }
}

#[derive(Debug)]
pub struct SplitNodesOptions<'m> {
  pub at:      Option<Location>,
  pub matcher: Option<Match<'m>>,
  pub mode:    QueryMode,
  /// Split even when the point sits at the node's edge, producing an
  /// empty sibling.
  pub always:  bool,
  /// How many ancestor levels above the leaf stay un-split.
  pub height:  usize,
  pub voids:   bool,
}

impl Default for SplitNodesOptions<'_> {
  fn default() -> Self {
    SplitNodesOptions {
      at:      None,
      matcher: None,
      mode:    QueryMode::Lowest,
      always:  false,
      height:  0,
      voids:   false,
    }
  }
}

#[derive(Debug)]
pub struct MergeNodesOptions<'m> {
  pub at:      Option<Location>,
  pub matcher: Option<Match<'m>>,
  pub mode:    QueryMode,
  pub hanging: bool,
  pub voids:   bool,
}

impl Default for MergeNodesOptions<'_> {
  fn default() -> Self {
    MergeNodesOptions {
      at:      None,
      matcher: None,
      mode:    QueryMode::Lowest,
      hanging: false,
      voids:   false,
    }
  }
}

#[derive(Debug)]
pub struct MoveNodesOptions<'m> {
  pub at:      Option<Location>,
  pub matcher: Option<Match<'m>>,
  pub mode:    QueryMode,
  pub voids:   bool,
}

impl Default for MoveNodesOptions<'_> {
  fn default() -> Self {
    MoveNodesOptions {
      at:      None,
      matcher: None,
      mode:    QueryMode::Lowest,
      voids:   false,
    }
  }
}

#[derive(Debug)]
pub struct LiftNodesOptions<'m> {
  pub at:      Option<Location>,
  pub matcher: Option<Match<'m>>,
  pub mode:    QueryMode,
  pub voids:   bool,
}

impl Default for LiftNodesOptions<'_> {
  fn default() -> Self {
    LiftNodesOptions {
      at:      None,
      matcher: None,
      mode:    QueryMode::Lowest,
      voids:   false,
    }
  }
}

#[derive(Debug)]
pub struct WrapNodesOptions<'m> {
  pub at:      Option<Location>,
  pub matcher: Option<Match<'m>>,
  pub mode:    QueryMode,
  /// Split the range edges first so the wrapper covers exactly the
  /// range, not whole matched nodes.
  pub split:   bool,
  pub voids:   bool,
}

impl Default for WrapNodesOptions<'_> {
  fn default() -> Self {
    WrapNodesOptions {
      at:      None,
      matcher: None,
      mode:    QueryMode::Lowest,
      split:   false,
      voids:   false,
    }
  }
}

#[derive(Debug)]
pub struct RemoveNodesOptions<'m> {
  pub at:      Option<Location>,
  pub matcher: Option<Match<'m>>,
  pub mode:    QueryMode,
  pub hanging: bool,
  pub voids:   bool,
}

impl Default for RemoveNodesOptions<'_> {
  fn default() -> Self {
    RemoveNodesOptions {
      at:      None,
      matcher: None,
      mode:    QueryMode::Lowest,
      hanging: false,
      voids:   false,
    }
  }
}

pub struct SetNodesOptions<'m> {
  pub at:      Option<Location>,
  pub matcher: Option<Match<'m>>,
  pub mode:    QueryMode,
  pub hanging: bool,
  /// Split range edges first so the patch boundary aligns with node
  /// boundaries.
  pub split:   bool,
  pub voids:   bool,
  /// Decides whether a key actually changed; defaults to inequality.
  pub compare: Option<&'m dyn Fn(&serde_json::Value, Option<&serde_json::Value>) -> bool>,
}

impl Default for SetNodesOptions<'_> {
  fn default() -> Self {
    SetNodesOptions {
      at:      None,
      matcher: None,
      mode:    QueryMode::Lowest,
      hanging: false,
      split:   false,
      voids:   false,
      compare: None,
    }
  }
}

impl std::fmt::Debug for SetNodesOptions<'_> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SetNodesOptions")
      .field("at", &self.at)
      .field("matcher", &self.matcher)
      .field("mode", &self.mode)
      .field("hanging", &self.hanging)
      .field("split", &self.split)
      .field("voids", &self.voids)
      .finish_non_exhaustive()
  }
}

#[derive(Debug)]
pub struct DeleteOptions {
  pub at:       Option<Location>,
  pub distance: usize,
  pub unit:     Unit,
  pub reverse:  bool,
  pub hanging:  bool,
  pub voids:    bool,
}

impl Default for DeleteOptions {
  fn default() -> Self {
    DeleteOptions {
      at:       None,
      distance: 1,
      unit:     Unit::Character,
      reverse:  false,
      hanging:  false,
      voids:    false,
    }
  }
}

#[derive(Debug, Default)]
pub struct InsertTextOptions {
  pub at:    Option<Location>,
  pub voids: bool,
}

impl Document {
  /// The location a command operates on: the explicit target, or the
  /// current selection.
  pub(crate) fn resolve_at(&self, at: &Option<Location>) -> Option<Location> {
    at
      .clone()
      .or_else(|| self.selection().cloned().map(Location::Range))
  }
}
