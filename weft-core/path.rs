//! Tree addresses and the transform of an address through an edit.
//!
//! A [`Path`] is a sequence of non-negative child indices from the root:
//! `[]` addresses the root, `[i]` its i-th child, and so on. Paths order
//! lexicographically, shorter-prefix-is-ancestor.
//!
//! [`Path::transform`] is the heart of the crate's consistency story: given
//! an already-applied [`Operation`], it computes where an address ends up,
//! or `None` when the addressed node no longer exists. Every live reference,
//! the dirty-path set, and the selection are kept valid by mapping them
//! through each operation with this one function, the way a changeset maps
//! rope offsets with an association side.
//!
//! # Affinity
//!
//! When a split lands exactly at an address, the address could go either
//! way. [`Affinity`] resolves the tie: `Forward` follows the new next
//! sibling, `Backward` stays put. `Inward`/`Outward` are range-level
//! policies that ranges translate into per-point forward/backward before
//! calling down here; passing `None` at an exact split invalidates the
//! address.

use std::{
  cmp::Ordering,
  fmt,
};

use serde::{
  Deserialize,
  Serialize,
};
use smallvec::SmallVec;

use crate::operation::Operation;

/// Which side an address sticks to when an edit lands exactly on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
  Forward,
  Backward,

  /// Range policy: both edges move toward each other (anchor forward,
  /// focus backward on a forward range). Collapsed ranges keep both points
  /// on the same side so they cannot cross.
  Inward,

  /// Range policy: both edges move away from each other.
  Outward,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Path(SmallVec<[usize; 8]>);

impl Path {
  pub fn root() -> Self {
    Path(SmallVec::new())
  }

  #[inline]
  pub fn is_root(&self) -> bool {
    self.0.is_empty()
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.0.len()
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, usize> {
    self.0.iter()
  }

  pub fn as_slice(&self) -> &[usize] {
    &self.0
  }

  pub fn last(&self) -> Option<usize> {
    self.0.last().copied()
  }

  /// The address of this path's parent. Returns the root for the root.
  pub fn parent(&self) -> Path {
    let mut p = self.clone();
    p.0.pop();
    p
  }

  /// This path extended by one child index.
  pub fn child(&self, index: usize) -> Path {
    let mut p = self.clone();
    p.0.push(index);
    p
  }

  /// The next sibling address. Root has no siblings.
  pub fn next(&self) -> Option<Path> {
    let mut p = self.clone();
    let last = p.0.last_mut()?;
    *last += 1;
    Some(p)
  }

  /// The previous sibling address, if one exists.
  pub fn previous(&self) -> Option<Path> {
    let mut p = self.clone();
    let last = p.0.last_mut()?;
    if *last == 0 {
      return None;
    }
    *last -= 1;
    Some(p)
  }

  pub fn has_previous(&self) -> bool {
    self.last().is_some_and(|i| i > 0)
  }

  /// Every strict ancestor, from the root down to the parent.
  pub fn ancestors(&self) -> Vec<Path> {
    let mut levels = self.levels();
    levels.pop();
    levels
  }

  /// Every level from the root down to this path, inclusive.
  pub fn levels(&self) -> Vec<Path> {
    (0..=self.len())
      .map(|depth| Path(SmallVec::from_slice(&self.0[..depth])))
      .collect()
  }

  /// Longest common prefix of the two paths.
  pub fn common(&self, other: &Path) -> Path {
    let shared = self
      .0
      .iter()
      .zip(other.0.iter())
      .take_while(|(a, b)| a == b)
      .count();
    Path(SmallVec::from_slice(&self.0[..shared]))
  }

  /// Three-way compare over the shared prefix only. Paths where one is an
  /// ancestor of the other compare `Equal`; this tests tree order, not
  /// identity.
  pub fn compare(&self, other: &Path) -> Ordering {
    for (a, b) in self.0.iter().zip(other.0.iter()) {
      match a.cmp(b) {
        Ordering::Equal => continue,
        unequal => return unequal,
      }
    }
    Ordering::Equal
  }

  /// Strictly before in tree order, at a common depth.
  pub fn is_before(&self, other: &Path) -> bool {
    self.compare(other) == Ordering::Less
  }

  pub fn is_after(&self, other: &Path) -> bool {
    self.compare(other) == Ordering::Greater
  }

  /// Strict ancestor: shorter and a prefix of `other`.
  pub fn is_ancestor_of(&self, other: &Path) -> bool {
    self.len() < other.len() && self.compare(other) == Ordering::Equal
  }

  /// Equal to or an ancestor of `other`.
  pub fn is_common_with(&self, other: &Path) -> bool {
    self.len() <= other.len() && self.compare(other) == Ordering::Equal
  }

  pub fn is_descendant_of(&self, other: &Path) -> bool {
    other.is_ancestor_of(self)
  }

  /// Same parent, different index.
  pub fn is_sibling_of(&self, other: &Path) -> bool {
    if self.is_root() || self.len() != other.len() {
      return false;
    }
    let i = self.len() - 1;
    self.0[..i] == other.0[..i] && self.0[i] != other.0[i]
  }

  /// Whether this path's last index sits before `other` at that depth:
  /// the parents agree up to this path's depth and the index here is
  /// smaller. `other` may be deeper.
  pub fn ends_before(&self, other: &Path) -> bool {
    if self.is_root() || other.len() < self.len() {
      return false;
    }
    let i = self.len() - 1;
    self.0[..i] == other.0[..i] && self.0[i] < other.0[i]
  }

  /// Canonical string form, used to key the dirty set.
  pub fn key(&self) -> String {
    self
      .0
      .iter()
      .map(|index| index.to_string())
      .collect::<Vec<_>>()
      .join(",")
  }

  /// Whether `op` can move or invalidate paths at all. Text, property, and
  /// selection edits never do.
  pub fn operation_can_transform(op: &Operation) -> bool {
    matches!(
      op,
      Operation::InsertNode { .. }
        | Operation::RemoveNode { .. }
        | Operation::MergeNode { .. }
        | Operation::MoveNode { .. }
        | Operation::SplitNode { .. }
    )
  }

  /// Map this address through an already-applied operation. Returns `None`
  /// when the addressed node no longer exists.
  pub fn transform(&self, op: &Operation, affinity: Option<Affinity>) -> Option<Path> {
    let mut p = self.clone();

    match op {
      Operation::InsertNode { path, .. } => {
        if path == &p || path.ends_before(&p) || path.is_ancestor_of(&p) {
          p.0[path.len() - 1] += 1;
        }
        Some(p)
      },

      Operation::RemoveNode { path, .. } => {
        if path == &p || path.is_ancestor_of(&p) {
          return None;
        }
        if path.ends_before(&p) {
          p.0[path.len() - 1] -= 1;
        }
        Some(p)
      },

      Operation::MergeNode { path, position, .. } => {
        // A merge addressed at a first child has no previous sibling;
        // the apply engine rejects it, but the address math must not
        // underflow on the way there.
        if path == &p || path.ends_before(&p) {
          p.0[path.len() - 1] = p.0[path.len() - 1].checked_sub(1)?;
        } else if path.is_ancestor_of(&p) {
          // The subtree now lives inside the previous sibling, nested at
          // `position` children in.
          p.0[path.len() - 1] = p.0[path.len() - 1].checked_sub(1)?;
          p.0[path.len()] += position;
        }
        Some(p)
      },

      Operation::SplitNode { path, position, .. } => {
        if path == &p {
          match affinity {
            Some(Affinity::Forward) => {
              let i = p.len() - 1;
              p.0[i] += 1;
            },
            Some(Affinity::Backward) => {},
            // An exact hit with no side to stick to is unresolvable.
            _ => return None,
          }
          Some(p)
        } else if path.ends_before(&p) {
          p.0[path.len() - 1] += 1;
          Some(p)
        } else if path.is_ancestor_of(&p) && p.0[path.len()] >= *position {
          p.0[path.len() - 1] += 1;
          p.0[path.len()] -= position;
          Some(p)
        } else {
          Some(p)
        }
      },

      Operation::MoveNode { path, new_path } => {
        // Moving a node onto itself is a no-op.
        if path == new_path {
          return Some(p);
        }

        if path.is_ancestor_of(&p) || path == &p {
          // The node itself (or a descendant): re-root under the
          // destination.
          let mut copy = new_path.clone();
          if path.ends_before(new_path) && path.len() < new_path.len() {
            copy.0[path.len() - 1] -= 1;
          }
          copy.0.extend_from_slice(&p.0[path.len()..]);
          Some(copy)
        } else if path.is_sibling_of(new_path)
          && (new_path.is_ancestor_of(&p) || new_path == &p)
        {
          // Source and destination share a parent, and `p` lives at or
          // under the destination slot.
          if path.ends_before(&p) {
            p.0[path.len() - 1] -= 1;
          } else {
            p.0[path.len() - 1] += 1;
          }
          Some(p)
        } else if new_path.ends_before(&p) || new_path == &p || new_path.is_ancestor_of(&p) {
          if path.ends_before(&p) {
            p.0[path.len() - 1] -= 1;
          }
          p.0[new_path.len() - 1] += 1;
          Some(p)
        } else if path.ends_before(&p) {
          if new_path == &p {
            p.0[new_path.len() - 1] += 1;
          }
          p.0[path.len() - 1] -= 1;
          Some(p)
        } else {
          Some(p)
        }
      },

      Operation::InsertText { .. }
      | Operation::RemoveText { .. }
      | Operation::SetNode { .. }
      | Operation::SetSelection { .. } => Some(p),
    }
  }
}

impl fmt::Display for Path {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[{}]", self.key())
  }
}

impl From<Vec<usize>> for Path {
  fn from(indices: Vec<usize>) -> Self {
    Path(SmallVec::from_vec(indices))
  }
}

impl From<&[usize]> for Path {
  fn from(indices: &[usize]) -> Self {
    Path(SmallVec::from_slice(indices))
  }
}

impl<const N: usize> From<[usize; N]> for Path {
  fn from(indices: [usize; N]) -> Self {
    Path(SmallVec::from_slice(&indices))
  }
}

impl FromIterator<usize> for Path {
  fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
    Path(iter.into_iter().collect())
  }
}

impl std::ops::Index<usize> for Path {
  type Output = usize;

  fn index(&self, index: usize) -> &usize {
    &self.0[index]
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::node::Node;

  fn p(indices: &[usize]) -> Path {
    Path::from(indices)
  }

  #[test]
  fn ordering_relations() {
    assert!(p(&[0]).is_ancestor_of(&p(&[0, 1])));
    assert!(!p(&[0]).is_ancestor_of(&p(&[0])));
    assert!(!p(&[0, 1]).is_ancestor_of(&p(&[0])));

    assert!(p(&[1, 2]).is_sibling_of(&p(&[1, 4])));
    assert!(!p(&[1, 2]).is_sibling_of(&p(&[2, 2])));
    assert!(!p(&[1, 2]).is_sibling_of(&p(&[1, 2])));

    assert!(p(&[1]).ends_before(&p(&[2, 0, 3])));
    assert!(!p(&[2]).ends_before(&p(&[2, 0, 3])));
    assert!(!Path::root().ends_before(&p(&[0])));

    assert_eq!(p(&[1, 0]).compare(&p(&[1, 0, 5])), Ordering::Equal);
    assert_eq!(p(&[0, 9]).compare(&p(&[1])), Ordering::Less);

    assert_eq!(p(&[1, 2, 3]).common(&p(&[1, 2, 9, 4])), p(&[1, 2]));
    assert_eq!(p(&[0]).common(&p(&[3])), Path::root());
  }

  #[test]
  fn levels_and_ancestors() {
    let path = p(&[1, 2]);
    assert_eq!(path.levels(), vec![Path::root(), p(&[1]), p(&[1, 2])]);
    assert_eq!(path.ancestors(), vec![Path::root(), p(&[1])]);
  }

  #[test]
  fn transform_insert_node() {
    let op = Operation::InsertNode {
      path: p(&[1]),
      node: Node::text(""),
    };

    // Before the insert point: untouched.
    assert_eq!(p(&[0, 4]).transform(&op, None), Some(p(&[0, 4])));
    // At the insert point or after it: bumped.
    assert_eq!(p(&[1]).transform(&op, None), Some(p(&[2])));
    assert_eq!(p(&[2, 7]).transform(&op, None), Some(p(&[3, 7])));
    // A descendant of the insert point shifts with it.
    assert_eq!(p(&[1, 3]).transform(&op, None), Some(p(&[2, 3])));
  }

  #[test]
  fn transform_remove_node() {
    let op = Operation::RemoveNode {
      path: p(&[1]),
      node: Node::text(""),
    };

    assert_eq!(p(&[1]).transform(&op, None), None);
    assert_eq!(p(&[1, 0]).transform(&op, None), None);
    assert_eq!(p(&[0]).transform(&op, None), Some(p(&[0])));
    assert_eq!(p(&[2, 5]).transform(&op, None), Some(p(&[1, 5])));
  }

  #[test]
  fn transform_merge_node() {
    let op = Operation::MergeNode {
      path:       p(&[2]),
      position:   3,
      properties: Default::default(),
    };

    // The merged node and everything after shift left one.
    assert_eq!(p(&[2]).transform(&op, None), Some(p(&[1])));
    assert_eq!(p(&[4]).transform(&op, None), Some(p(&[3])));
    // Descendants nest inside the previous sibling at `position`.
    assert_eq!(p(&[2, 1]).transform(&op, None), Some(p(&[1, 4])));
    assert_eq!(p(&[1, 0]).transform(&op, None), Some(p(&[1, 0])));

    // A merge addressed at a first child is invalid; affected addresses
    // drop instead of underflowing.
    let bogus = Operation::MergeNode {
      path:       p(&[0]),
      position:   3,
      properties: Default::default(),
    };
    assert_eq!(p(&[0]).transform(&bogus, None), None);
    assert_eq!(p(&[0, 2]).transform(&bogus, None), None);
  }

  #[test]
  fn transform_split_node() {
    let op = Operation::SplitNode {
      path:       p(&[1]),
      position:   2,
      properties: Default::default(),
    };

    // Exactly at the split: affinity decides.
    assert_eq!(
      p(&[1]).transform(&op, Some(Affinity::Forward)),
      Some(p(&[2]))
    );
    assert_eq!(
      p(&[1]).transform(&op, Some(Affinity::Backward)),
      Some(p(&[1]))
    );
    assert_eq!(p(&[1]).transform(&op, None), None);

    // Later siblings shift right.
    assert_eq!(p(&[3]).transform(&op, None), Some(p(&[4])));
    // Descendants past the split position move into the new sibling.
    assert_eq!(p(&[1, 2]).transform(&op, None), Some(p(&[2, 0])));
    assert_eq!(p(&[1, 5, 3]).transform(&op, None), Some(p(&[2, 3, 3])));
    // Descendants before the split position stay.
    assert_eq!(p(&[1, 1]).transform(&op, None), Some(p(&[1, 1])));
  }

  #[test]
  fn transform_move_node() {
    // Move [1] under [3] (which becomes [2] after removal).
    let op = Operation::MoveNode {
      path:     p(&[1]),
      new_path: p(&[3, 0]),
    };

    // The moved node and its descendants re-root at the destination.
    assert_eq!(p(&[1]).transform(&op, None), Some(p(&[2, 0])));
    assert_eq!(p(&[1, 4]).transform(&op, None), Some(p(&[2, 0, 4])));
    // A sibling between source and destination slides left.
    assert_eq!(p(&[2]).transform(&op, None), Some(p(&[1])));

    // Same-parent move, forward.
    let op = Operation::MoveNode {
      path:     p(&[0]),
      new_path: p(&[2]),
    };
    assert_eq!(p(&[0]).transform(&op, None), Some(p(&[2])));
    assert_eq!(p(&[1]).transform(&op, None), Some(p(&[0])));
    assert_eq!(p(&[2]).transform(&op, None), Some(p(&[1])));

    // Self-move is a no-op.
    let op = Operation::MoveNode {
      path:     p(&[1]),
      new_path: p(&[1]),
    };
    assert_eq!(p(&[1]).transform(&op, None), Some(p(&[1])));
    assert_eq!(p(&[5]).transform(&op, None), Some(p(&[5])));
  }

  #[test]
  fn insert_then_remove_restores_unaffected_paths() {
    let insert = Operation::InsertNode {
      path: p(&[1]),
      node: Node::text(""),
    };
    let remove = Operation::RemoveNode {
      path: p(&[1]),
      node: Node::text(""),
    };

    for original in [p(&[0]), p(&[2]), p(&[3, 1]), p(&[0, 9, 9])] {
      let through = original
        .transform(&insert, None)
        .and_then(|q| q.transform(&remove, None));
      assert_eq!(through, Some(original));
    }
  }

  #[test]
  fn dirty_key_form() {
    assert_eq!(Path::root().key(), "");
    assert_eq!(p(&[1, 0, 12]).key(), "1,0,12");
  }

  fn clamp(raw: Vec<usize>) -> Path {
    raw.into_iter().take(4).map(|i| i % 4).collect()
  }

  quickcheck::quickcheck! {
      fn insert_then_remove_is_identity(at_raw: Vec<usize>, target_raw: Vec<usize>) -> bool {
          let at = clamp(at_raw);
          if at.is_root() {
              return true;
          }
          let target = clamp(target_raw);
          let insert = Operation::InsertNode { path: at.clone(), node: Node::text("") };
          let remove = Operation::RemoveNode { path: at, node: Node::text("") };
          match target.transform(&insert, None) {
              Some(through) => through.transform(&remove, None) == Some(target),
              None => false,
          }
      }

      fn compare_is_antisymmetric(a_raw: Vec<usize>, b_raw: Vec<usize>) -> bool {
          let a = clamp(a_raw);
          let b = clamp(b_raw);
          a.compare(&b) == b.compare(&a).reverse()
      }
  }
}
