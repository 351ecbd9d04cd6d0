//! The normalization engine: a fixpoint repair loop over dirty paths.
//!
//! Every structural operation queues the paths it may have left invalid
//! (see `Document::apply`); this module drains that queue, re-fetching
//! each node and running the repair rule until the tree settles. The
//! invariants enforced:
//!
//! - every element and the root have at least one child
//! - a node's children are homogeneous: all inline-or-text, or all block
//! - inline elements are surrounded by text siblings
//! - adjacent text leaves with matching properties are merged
//! - an empty text leaf adjacent to a non-empty one is pruned, unless it
//!   sits in first position
//!
//! The loop is bounded at 42 iterations per dirty path at entry. Running
//! past the bound means a repair produced more work than it retired,
//! which is a bug, so it fails loudly instead of capping silently.

use std::{
  collections::HashSet,
  mem,
};

use tracing::trace;

use crate::{
  document::{
    Document,
    DocumentError,
    Result,
  },
  node::Node,
  operation::Operation,
  path::Path,
};

/// LIFO set of paths awaiting repair, deduplicated by the canonical
/// string form of the path.
#[derive(Debug, Default)]
pub(crate) struct DirtySet {
  stack: Vec<Path>,
  keys:  HashSet<String>,
}

impl DirtySet {
  pub(crate) fn push(&mut self, path: Path) {
    if self.keys.insert(path.key()) {
      self.stack.push(path);
    }
  }

  pub(crate) fn pop(&mut self) -> Option<Path> {
    let path = self.stack.pop()?;
    self.keys.remove(&path.key());
    Some(path)
  }

  /// Re-address every queued path through a structural operation,
  /// dropping paths the operation invalidated.
  pub(crate) fn transform_through(&mut self, op: &Operation) {
    let old = mem::take(&mut self.stack);
    self.keys.clear();
    for path in old {
      if let Some(next) = path.transform(op, None) {
        self.push(next);
      }
    }
  }

  pub(crate) fn reseed(&mut self, paths: impl IntoIterator<Item = Path>) {
    self.clear();
    for path in paths {
      self.push(path);
    }
  }

  pub(crate) fn clear(&mut self) {
    self.stack.clear();
    self.keys.clear();
  }

  pub(crate) fn len(&self) -> usize {
    self.stack.len()
  }

  pub(crate) fn is_empty(&self) -> bool {
    self.stack.is_empty()
  }

  fn paths(&self) -> Vec<Path> {
    self.stack.clone()
  }
}

impl Document {
  /// Run the repair loop to fixpoint over the dirty set. No-op while
  /// normalization is suppressed or the set is empty.
  pub(crate) fn normalize(&mut self, force: bool) -> Result<()> {
    if !self.normalizing {
      return Ok(());
    }
    if force {
      let paths: Vec<Path> = self.descendants_in(None, None, false, true)
        .map(|(path, _)| path)
        .collect();
      self.dirty.reseed(paths);
    }
    if self.dirty.is_empty() {
      return Ok(());
    }

    self.without_normalizing(|doc| {
      // Childless elements first, so the main loop never sees one and
      // every other rule can assume at least one child.
      for path in doc.dirty.paths() {
        if !doc.has_node(&path) {
          continue;
        }
        let node = doc.node(&path)?;
        if node.is_element() && node.children().is_some_and(Vec::is_empty) {
          doc.normalize_node(&path)?;
        }
      }

      let max = doc.dirty.len() * 42;
      let mut iterations = 0;
      while let Some(path) = doc.dirty.pop() {
        if iterations > max {
          return Err(DocumentError::NormalizationOverflow { iterations: max });
        }
        if doc.has_node(&path) {
          trace!(path = %path, "normalizing");
          doc.normalize_node(&path)?;
        }
        iterations += 1;
      }
      Ok(())
    })
  }

  /// Discard the dirty set, reseed it with every path in the tree, and
  /// run the repair loop. For use after bulk external mutation.
  pub fn force_normalize(&mut self) -> Result<()> {
    self.normalize(true)
  }

  /// One application of the repair rule to the node at `path`.
  ///
  /// Scans the child list left to right while mutating it, so a write
  /// cursor `n` is tracked separately from the read cursor over the
  /// captured child list.
  fn normalize_node(&mut self, path: &Path) -> Result<()> {
    let node = self.node(path)?;
    if node.is_text() {
      return Ok(());
    }

    let children = node.children().cloned().unwrap_or_default();
    if children.is_empty() {
      if node.is_element() {
        self.apply(Operation::InsertNode {
          path: path.child(0),
          node: Node::text(""),
        })?;
      }
      return Ok(());
    }

    // Whether this node's children live in the inline-or-text world.
    // The root always holds blocks; an element follows its own inline
    // classification, or failing that its first child's.
    let should_have_inlines = if node.is_root() {
      false
    } else {
      self.policy.is_inline(node, path)
        || children[0].is_text()
        || self.policy.is_inline(&children[0], &path.child(0))
    };

    let mut n = 0usize;
    for (i, child) in children.iter().enumerate() {
      let current = self.node(path)?;
      if current.is_text() {
        break;
      }
      let prev = match (n > 0, current.children()) {
        (true, Some(siblings)) => siblings.get(n - 1).cloned(),
        _ => None,
      };
      let is_last = i + 1 == children.len();

      let is_inline_or_text =
        child.is_text() || self.policy.is_inline(child, &path.child(n));
      if is_inline_or_text != should_have_inlines {
        let at = path.child(n);
        let node = self.node(&at)?.clone();
        self.apply(Operation::RemoveNode { path: at, node })?;
        continue;
      }

      if child.is_element() {
        // Inline elements need text on both flanks.
        if self.policy.is_inline(child, &path.child(n)) {
          if !prev.as_ref().is_some_and(Node::is_text) {
            self.apply(Operation::InsertNode {
              path: path.child(n),
              node: Node::text(""),
            })?;
            n += 2;
            continue;
          }
          if is_last {
            self.apply(Operation::InsertNode {
              path: path.child(n + 1),
              node: Node::text(""),
            })?;
            n += 2;
            continue;
          }
        }
        n += 1;
        continue;
      }

      if let Some(prev) = prev.filter(Node::is_text) {
        if self.policy.should_merge(&prev, child) {
          self.apply(Operation::MergeNode {
            path:       path.child(n),
            position:   prev.text_len(),
            properties: child.extract_properties(),
          })?;
          continue;
        }
        if prev.text_len() == 0 && n > 1 {
          let at = path.child(n - 1);
          self.apply(Operation::RemoveNode { path: at, node: prev })?;
          continue;
        }
        if child.text_len() == 0 {
          let at = path.child(n);
          self.apply(Operation::RemoveNode {
            path: at,
            node: child.clone(),
          })?;
          continue;
        }
      }
      n += 1;
    }

    Ok(())
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::{
    node::NodePolicy,
    path::Path,
  };

  /// Marks elements carrying `"inline": true` as inline.
  struct Inlines;

  impl NodePolicy for Inlines {
    fn is_inline(&self, node: &Node, _: &Path) -> bool {
      node
        .properties()
        .get("inline")
        .is_some_and(|v| v.as_bool() == Some(true))
    }

    fn is_void(&self, _: &Node, _: &Path) -> bool {
      false
    }
  }

  fn inline_span(text: &str) -> Node {
    let mut properties = crate::node::Properties::new();
    properties.insert("inline".into(), serde_json::json!(true));
    Node::element_with(vec![Node::text(text)], properties)
  }

  #[test]
  fn empty_element_gains_a_text_child() {
    let mut doc = Document::new(vec![Node::element(vec![Node::text("x")])]);
    doc
      .without_normalizing(|doc| {
        doc.apply(Operation::RemoveNode {
          path: Path::from(vec![0, 0]),
          node: Node::text("x"),
        })
      })
      .unwrap();

    let paragraph = doc.node(&Path::from(vec![0])).unwrap();
    assert_eq!(paragraph.children().map(Vec::len), Some(1));
    assert!(paragraph.children().unwrap()[0].is_text());
  }

  #[test]
  fn adjacent_matching_texts_merge() {
    let mut doc = Document::new(vec![Node::element(vec![Node::text("ab")])]);
    doc
      .apply(Operation::InsertNode {
        path: Path::from(vec![0, 1]),
        node: Node::text("cd"),
      })
      .unwrap();

    let paragraph = doc.node(&Path::from(vec![0])).unwrap();
    assert_eq!(paragraph.children().map(Vec::len), Some(1));
    assert_eq!(
      paragraph.children().unwrap()[0].text_content().unwrap(),
      "abcd"
    );
  }

  #[test]
  fn differing_marks_do_not_merge() {
    let mut bold = crate::node::Properties::new();
    bold.insert("bold".into(), serde_json::json!(true));

    let mut doc = Document::new(vec![Node::element(vec![Node::text("ab")])]);
    doc
      .apply(Operation::InsertNode {
        path: Path::from(vec![0, 1]),
        node: Node::text_with("cd", bold),
      })
      .unwrap();

    let paragraph = doc.node(&Path::from(vec![0])).unwrap();
    assert_eq!(paragraph.children().map(Vec::len), Some(2));
  }

  #[test]
  fn text_directly_under_root_is_removed() {
    let mut doc = Document::new(vec![Node::element(vec![Node::text("keep")])]);
    doc
      .apply(Operation::InsertNode {
        path: Path::from(vec![1]),
        node: Node::text("stray"),
      })
      .unwrap();

    assert_eq!(doc.children().len(), 1);
    assert!(doc.children()[0].is_element());
  }

  #[test]
  fn inline_elements_get_text_flanks() {
    let mut doc = Document::with_policy(
      vec![Node::element(vec![Node::text("a")])],
      Box::new(Inlines),
    );
    doc
      .apply(Operation::InsertNode {
        path: Path::from(vec![0, 1]),
        node: inline_span("link"),
      })
      .unwrap();

    let paragraph = doc.node(&Path::from(vec![0])).unwrap();
    let children = paragraph.children().unwrap();
    assert_eq!(children.len(), 3);
    assert!(children[0].is_text());
    assert!(children[1].is_element());
    assert!(children[2].is_text());
    assert_eq!(children[2].text_len(), 0);
  }

  #[test]
  fn empty_non_first_text_is_pruned() {
    let mut bold = crate::node::Properties::new();
    bold.insert("bold".into(), serde_json::json!(true));

    let mut doc = Document::new(vec![Node::element(vec![
      Node::text_with("a", bold.clone()),
    ])]);
    doc
      .without_normalizing(|doc| {
        doc.apply(Operation::InsertNode {
          path: Path::from(vec![0, 1]),
          node: Node::text(""),
        })?;
        doc.apply(Operation::InsertNode {
          path: Path::from(vec![0, 2]),
          node: Node::text_with("b", bold.clone()),
        })
      })
      .unwrap();

    // The empty plain leaf between two bold leaves goes away and the
    // bold leaves then merge.
    let paragraph = doc.node(&Path::from(vec![0])).unwrap();
    assert_eq!(paragraph.children().map(Vec::len), Some(1));
    assert_eq!(
      paragraph.children().unwrap()[0].text_content().unwrap(),
      "ab"
    );
  }

  #[test]
  fn normalization_is_idempotent() {
    let mut doc = Document::new(vec![Node::element(vec![
      Node::text("ab"),
      Node::text("cd"),
    ])]);
    doc.force_normalize().unwrap();
    let settled = doc.root().clone();

    let ops_seen = std::rc::Rc::new(std::cell::Cell::new(0usize));
    let seen = ops_seen.clone();
    doc.on_change(move |ops| seen.set(seen.get() + ops.len()));

    doc.force_normalize().unwrap();
    assert_eq!(doc.root(), &settled);
    assert_eq!(ops_seen.get(), 0);
  }

  #[test]
  fn overflow_in_the_trailing_repair_pass_rolls_back() {
    // A deep chain: repairing the innermost block queues every ancestor,
    // which blows the iteration bound derived from a single dirty entry.
    let mut chain = Node::element(vec![Node::text("x")]);
    for _ in 0..60 {
      chain = Node::element(vec![chain]);
    }
    let mut doc = Document::new(vec![chain]);
    let deep = Path::from(vec![0; 61]);

    let result = doc.without_normalizing(|doc| {
      // A host slips a block element in next to the text leaf behind the
      // engine's back, then queues only the damaged block for repair.
      if let Some(children) = doc.node_mut(&deep)?.children_mut() {
        children.push(Node::element(vec![Node::text("stray")]));
      }
      doc.dirty.push(deep.clone());
      Ok(())
    });

    assert!(matches!(
      result,
      Err(DocumentError::NormalizationOverflow { .. })
    ));
    // The transaction rolled back to its entry snapshot, so the body's
    // corruption is gone along with the partial repairs.
    let innermost = doc.node(&deep).unwrap();
    assert_eq!(innermost.children().map(Vec::len), Some(1));
    assert_eq!(
      innermost.children().unwrap()[0].text_content().unwrap(),
      "x"
    );
  }

  #[test]
  fn force_normalize_repairs_external_corruption() {
    let mut doc = Document::new(vec![Node::element(vec![Node::text("ok")])]);
    // Simulate a host mutating the tree behind the engine's back.
    if let Some(children) = doc.root.children_mut() {
      children.push(Node::element(Vec::new()));
    }
    doc.force_normalize().unwrap();

    let repaired = doc.node(&Path::from(vec![1])).unwrap();
    assert_eq!(repaired.children().map(Vec::len), Some(1));
    assert!(repaired.children().unwrap()[0].is_text());
  }
}
