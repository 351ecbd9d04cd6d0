//! The nine atomic edit operations.
//!
//! Operations are the only permitted mutation of a document: five
//! structural (`InsertNode`, `RemoveNode`, `MergeNode`, `MoveNode`,
//! `SplitNode`), two textual (`InsertText`, `RemoveText`), one property
//! patch (`SetNode`), and one selection patch (`SetSelection`). Every
//! command decomposes into a sequence of these, and every outstanding
//! address is mapped through each one as it applies.
//!
//! Removal and textual operations carry the removed content so that
//! [`Operation::invert`] can reconstruct it; hosts build undo on top of the
//! inverted operation log the way a changeset's `invert` drives undo in a
//! rope-based editor.

use serde::{
  Deserialize,
  Serialize,
};

use crate::{
  Tendril,
  node::{
    Node,
    Properties,
  },
  path::Path,
  point::Point,
  range::Range,
};

/// A partial selection update: present fields overwrite, absent fields
/// keep their current value. Anchor and focus can never be *removed* from
/// an existing selection, which this shape makes unrepresentable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangePatch {
  pub anchor: Option<Point>,
  pub focus:  Option<Point>,
}

impl RangePatch {
  pub fn is_full(&self) -> bool {
    self.anchor.is_some() && self.focus.is_some()
  }
}

impl From<Range> for RangePatch {
  fn from(range: Range) -> Self {
    RangePatch {
      anchor: Some(range.anchor),
      focus:  Some(range.focus),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
  /// Insert `node` so that it lives at `path`.
  InsertNode { path: Path, node: Node },

  /// Remove the node at `path`. Carries the removed node for inversion.
  RemoveNode { path: Path, node: Node },

  /// Merge the node at `path` into its previous sibling. `position` is the
  /// previous sibling's child count (or text length) before the merge;
  /// `properties` are the merged-away node's, for inversion.
  MergeNode {
    path:       Path,
    position:   usize,
    properties: Properties,
  },

  /// Move the subtree at `path` to `new_path`.
  MoveNode { path: Path, new_path: Path },

  /// Split the node at `path` at child index (or text offset) `position`;
  /// the trailing part becomes a new next sibling carrying `properties`.
  SplitNode {
    path:       Path,
    position:   usize,
    properties: Properties,
  },

  /// Splice `text` into the text leaf at `path` at char offset `offset`.
  InsertText {
    path:   Path,
    offset: usize,
    text:   Tendril,
  },

  /// Remove `text` from the leaf at `path` starting at char offset
  /// `offset`.
  RemoveText {
    path:   Path,
    offset: usize,
    text:   Tendril,
  },

  /// Patch the properties of the node at `path`. `properties` holds the
  /// old values of every touched key, `new_properties` the new ones; a
  /// null value in `new_properties` deletes the key.
  SetNode {
    path:           Path,
    properties:     Properties,
    new_properties: Properties,
  },

  /// Patch the document selection. `new_properties: None` deselects;
  /// `properties: None` means there was no selection before, in which case
  /// the new patch must be a full range.
  SetSelection {
    properties:     Option<RangePatch>,
    new_properties: Option<RangePatch>,
  },
}

impl Operation {
  #[inline]
  pub fn is_selection(&self) -> bool {
    matches!(self, Operation::SetSelection { .. })
  }

  #[inline]
  pub fn is_text(&self) -> bool {
    matches!(
      self,
      Operation::InsertText { .. } | Operation::RemoveText { .. }
    )
  }

  /// The operation that undoes this one, assuming this one has just been
  /// applied.
  pub fn invert(&self) -> Operation {
    match self {
      Operation::InsertNode { path, node } => {
        Operation::RemoveNode {
          path: path.clone(),
          node: node.clone(),
        }
      },

      Operation::RemoveNode { path, node } => {
        Operation::InsertNode {
          path: path.clone(),
          node: node.clone(),
        }
      },

      Operation::MergeNode {
        path,
        position,
        properties,
      } => {
        Operation::SplitNode {
          path:       path.previous().unwrap_or_else(Path::root),
          position:   *position,
          properties: properties.clone(),
        }
      },

      Operation::SplitNode {
        path,
        position,
        properties,
      } => {
        Operation::MergeNode {
          path:       path.next().unwrap_or_else(Path::root),
          position:   *position,
          properties: properties.clone(),
        }
      },

      Operation::MoveNode { path, new_path } => {
        if path == new_path {
          return self.clone();
        }
        if path.is_sibling_of(new_path) {
          return Operation::MoveNode {
            path:     new_path.clone(),
            new_path: path.clone(),
          };
        }
        // Where the node landed, and where its old slot now sits, both
        // seen through the move itself. Neither transform can fail: the
        // moved path maps to its destination, and a non-root path always
        // has a next sibling slot.
        let inverse_path = path
          .transform(self, None)
          .unwrap_or_else(|| new_path.clone());
        let inverse_new_path = path
          .next()
          .and_then(|next| next.transform(self, None))
          .unwrap_or_else(|| path.clone());
        Operation::MoveNode {
          path:     inverse_path,
          new_path: inverse_new_path,
        }
      },

      Operation::InsertText { path, offset, text } => {
        Operation::RemoveText {
          path:   path.clone(),
          offset: *offset,
          text:   text.clone(),
        }
      },

      Operation::RemoveText { path, offset, text } => {
        Operation::InsertText {
          path:   path.clone(),
          offset: *offset,
          text:   text.clone(),
        }
      },

      Operation::SetNode {
        path,
        properties,
        new_properties,
      } => {
        Operation::SetNode {
          path:           path.clone(),
          properties:     new_properties.clone(),
          new_properties: properties.clone(),
        }
      },

      Operation::SetSelection {
        properties,
        new_properties,
      } => {
        Operation::SetSelection {
          properties:     new_properties.clone(),
          new_properties: properties.clone(),
        }
      },
    }
  }
}
