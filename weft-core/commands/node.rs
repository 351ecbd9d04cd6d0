//! Structural commands: insert, split, merge, move, lift, wrap, unwrap,
//! remove and property patching. Each resolves its targets up front,
//! pins them with live references so earlier sub-operations cannot
//! invalidate later ones, and then issues atomic operations.

use super::{
  InsertNodesOptions,
  LiftNodesOptions,
  Match,
  MergeNodesOptions,
  MoveNodesOptions,
  RemoveNodesOptions,
  SetNodesOptions,
  SplitNodesOptions,
  WrapNodesOptions,
};
use crate::{
  commands::DeleteOptions,
  document::{
    Document,
    DocumentError,
    Result,
  },
  location::{
    Location,
    Unit,
  },
  node::{
    Node,
    Properties,
  },
  operation::Operation,
  path::{
    Affinity,
    Path,
  },
  range::Range,
  traverse::{
    NodesOptions,
    QueryMode,
  },
};

impl Document {
  /// Insert a run of nodes. A range target is collapsed (deleting its
  /// content) first; a point target splits the insertion container at
  /// the point and inserts at the seam.
  pub fn insert_nodes(&mut self, nodes: Vec<Node>, options: InsertNodesOptions<'_>) -> Result<()> {
    self.without_normalizing(|doc| {
      if nodes.is_empty() {
        return Ok(());
      }
      let first = nodes[0].clone();
      let explicit = options.at.is_some();

      let mut at = match doc.resolve_at(&options.at) {
        Some(at) => at,
        None => Location::Path(Path::from(vec![doc.children().len()])),
      };

      if let Location::Range(range) = at.clone() {
        let range = if options.hanging {
          range
        } else {
          doc.unhang_range(&range, options.voids)?
        };
        if range.is_collapsed() {
          at = Location::Point(range.anchor);
        } else {
          let end_ref = doc.track_point(range.end().clone(), Some(Affinity::Forward));
          doc.delete(DeleteOptions {
            at: Some(Location::Range(range)),
            voids: options.voids,
            ..Default::default()
          })?;
          match doc.untrack_point(end_ref) {
            Some(point) => at = Location::Point(point),
            None => return Ok(()),
          }
        }
      }

      if let Location::Point(point) = at.clone() {
        let matcher = match options.matcher {
          Some(m) => m,
          None if first.is_text() => Match::Text,
          None if doc.policy().is_inline(&first, &Path::root()) => Match::InlineOrText,
          None => Match::Block,
        };
        let found = doc
          .nodes(
            &NodesOptions {
              at: Some(Location::Path(point.path.clone())),
              mode: options.mode,
              voids: options.voids,
              ..Default::default()
            },
            |n, p| matcher.test(doc, n, p),
          )?
          .into_iter()
          .next()
          .map(|(p, _)| p);
        let Some(match_path) = found else {
          return Ok(());
        };
        let is_at_end = doc.is_end(&point, &Location::Path(match_path.clone()))?;
        let path_ref = doc.track_path(match_path, Some(Affinity::Forward));
        doc.split_nodes(SplitNodesOptions {
          at: Some(Location::Point(point)),
          matcher: Some(matcher),
          mode: options.mode,
          voids: options.voids,
          ..Default::default()
        })?;
        let Some(found_path) = doc.untrack_path(path_ref) else {
          return Ok(());
        };
        at = Location::Path(if is_at_end {
          found_path.next().unwrap_or(found_path)
        } else {
          found_path
        });
      }

      let Location::Path(mut path) = at else {
        return Ok(());
      };
      if !options.voids
        && doc
          .void_above(&Location::Path(path.parent()))
          .is_some()
      {
        return Ok(());
      }

      for node in nodes {
        doc.apply(Operation::InsertNode {
          path: path.clone(),
          node,
        })?;
        path = path.next().unwrap_or(path);
      }
      let last_path = path.previous().unwrap_or(path);

      if options.select.unwrap_or(!explicit) {
        if let Ok(point) = doc.end(&Location::Path(last_path)) {
          doc.select(Range::collapsed(point))?;
        }
      }
      Ok(())
    })
  }

  /// Split ancestors of the target point, one `split_node` per level up
  /// to the matched node. Levels where the point already sits at an
  /// edge are skipped unless `always` is set.
  pub fn split_nodes(&mut self, options: SplitNodesOptions<'_>) -> Result<()> {
    self.without_normalizing(|doc| {
      let Some(mut at) = doc.resolve_at(&options.at) else {
        return Ok(());
      };
      let mut always = options.always;
      let mut height = options.height;
      let mut sibling_parent: Option<Path> = None;

      if let Location::Range(range) = at.clone() {
        if range.is_collapsed() {
          at = Location::Point(range.anchor);
        } else {
          let end_ref = doc.track_point(range.end().clone(), Some(Affinity::Forward));
          doc.delete(DeleteOptions {
            at: Some(Location::Range(range)),
            voids: options.voids,
            ..Default::default()
          })?;
          match doc.untrack_point(end_ref) {
            Some(point) => at = Location::Point(point),
            None => return Ok(()),
          }
        }
      }

      // A path target means "split the parent right at this child".
      if let Location::Path(path) = at.clone() {
        let point = doc.start(&Location::Path(path.clone()))?;
        sibling_parent = Some(path.parent());
        height = point.path.len() + 1 - path.len();
        at = Location::Point(point);
        always = true;
      }

      let Location::Point(mut point) = at else {
        return Ok(());
      };

      let matcher = options.matcher;
      let test = |doc: &Document, n: &Node, p: &Path| match (&sibling_parent, matcher) {
        (Some(parent), _) => p == parent,
        (None, Some(m)) => m.test(doc, n, p),
        (None, None) => Match::Block.test(doc, n, p),
      };

      let highest = doc
        .nodes(
          &NodesOptions {
            at: Some(Location::Point(point.clone())),
            mode: options.mode,
            voids: options.voids,
            ..Default::default()
          },
          |n, p| test(doc, n, p),
        )?
        .into_iter()
        .next()
        .map(|(p, _)| p);
      let Some(highest_path) = highest else {
        return Ok(());
      };

      // Splitting beside a void: nudge the point past an inline void,
      // and never split below the void itself.
      if !options.voids {
        if let Some((void_path, void_node)) =
          doc.void_above(&Location::Point(point.clone()))
            .map(|(p, n)| (p, n.clone()))
        {
          if doc.policy().is_inline(&void_node, &void_path) {
            let after = match doc.after(&Location::Path(void_path.clone()), Unit::Character, 1)? {
              Some(after) => after,
              None => {
                let Some(after_path) = void_path.next() else {
                  return Ok(());
                };
                doc.apply(Operation::InsertNode {
                  path: after_path.clone(),
                  node: Node::text(""),
                })?;
                crate::point::Point::new(after_path, 0)
              },
            };
            point = after;
            always = true;
          }
          height = point.path.len() - void_path.len() + 1;
          always = true;
        }
      }

      let before_ref = doc.track_point(point.clone(), Some(Affinity::Backward));
      let depth = point.path.len().saturating_sub(height);
      let lowest_path: Path = point.path.iter().copied().take(depth).collect();
      let mut position = if height == 0 {
        point.offset
      } else {
        point.path.as_slice().get(depth).copied().unwrap_or(0)
      };

      let levels: Vec<(Path, Node)> = doc
        .levels(&lowest_path)?
        .into_iter()
        .rev()
        .map(|(p, n)| (p, n.clone()))
        .collect();
      for (level_path, level_node) in levels {
        if level_path.len() < highest_path.len()
          || level_path.is_root()
          || (!options.voids
            && level_node.is_element()
            && doc.policy().is_void(&level_node, &level_path))
        {
          break;
        }
        let Some(current) = doc.current_point(before_ref).cloned() else {
          break;
        };
        let is_end = doc.is_end(&current, &Location::Path(level_path.clone()))?;
        let mut split = false;
        if always || !doc.is_edge(&current, &Location::Path(level_path.clone()))? {
          split = true;
          doc.apply(Operation::SplitNode {
            path:       level_path.clone(),
            position,
            properties: level_node.extract_properties(),
          })?;
        }
        position = level_path.last().unwrap_or(0) + usize::from(split || is_end);
      }
      doc.untrack_point(before_ref);
      Ok(())
    })
  }

  /// Merge the matched node into its previous matched sibling. If the
  /// two are not literally adjacent, the node is moved next to the
  /// sibling first; a single-child ancestor chain emptied by that move
  /// is removed rather than left dangling.
  pub fn merge_nodes(&mut self, options: MergeNodesOptions<'_>) -> Result<()> {
    self.without_normalizing(|doc| {
      let Some(mut at) = doc.resolve_at(&options.at) else {
        return Ok(());
      };
      let sibling_parent: Path;
      let matcher = match options.matcher {
        Some(m) => m,
        None => match &at {
          Location::Path(p) => {
            sibling_parent = p.parent();
            Match::ChildOf(&sibling_parent)
          },
          _ => Match::Block,
        },
      };

      if let Location::Range(range) = at.clone() {
        let range = if options.hanging {
          range
        } else {
          doc.unhang_range(&range, options.voids)?
        };
        if range.is_collapsed() {
          at = Location::Point(range.anchor);
        } else {
          let explicit = options.at.is_some();
          let end_ref = doc.track_point(range.end().clone(), Some(Affinity::Forward));
          doc.delete(DeleteOptions {
            at: Some(Location::Range(range)),
            voids: options.voids,
            ..Default::default()
          })?;
          match doc.untrack_point(end_ref) {
            Some(point) => {
              if !explicit {
                doc.select(Range::collapsed(point.clone()))?;
              }
              at = Location::Point(point);
            },
            None => return Ok(()),
          }
        }
      }

      let current = doc
        .nodes(
          &NodesOptions {
            at: Some(at.clone()),
            mode: options.mode,
            voids: options.voids,
            ..Default::default()
          },
          |n, p| matcher.test(doc, n, p),
        )?
        .into_iter()
        .next()
        .map(|(p, _)| p);
      let Some(path) = current else {
        return Ok(());
      };
      let Some(prev_path) =
        doc.previous_entry(&at, matcher, options.mode, options.voids)?
      else {
        return Ok(());
      };
      if path.is_root() || prev_path.is_root() {
        return Err(DocumentError::MergeRoot);
      }
      let Some(new_path) = prev_path.next() else {
        return Err(DocumentError::MergeRoot);
      };
      let common = path.common(&prev_path);

      // The outermost single-child chain the merge would leave empty.
      let mut empty_ancestor: Option<Path> = None;
      for ancestor in path.ancestors() {
        if ancestor.len() <= common.len() {
          continue;
        }
        if doc.single_child_chain(&ancestor)? {
          empty_ancestor = Some(ancestor);
          break;
        }
      }
      let empty_ref = empty_ancestor.map(|p| doc.track_path(p, Some(Affinity::Forward)));

      let node = doc.node(&path)?.clone();
      let prev_node = doc.node(&prev_path)?.clone();
      let (position, prev_empty) = match (&node, &prev_node) {
        (Node::Text { .. }, Node::Text { text, .. }) => {
          (text.chars().count(), text.is_empty())
        },
        (Node::Element { .. }, Node::Element { children, .. }) => {
          (children.len(), doc.is_empty_element(&prev_node, &prev_path))
        },
        _ => {
          return Err(DocumentError::MergeKindMismatch { path: path.clone() });
        },
      };

      if path != new_path {
        doc.move_nodes(new_path.clone(), MoveNodesOptions {
          at: Some(Location::Path(path)),
          voids: options.voids,
          ..Default::default()
        })?;
      }

      if let Some(handle) = empty_ref {
        if let Some(p) = doc.untrack_path(handle) {
          doc.remove_nodes(RemoveNodesOptions {
            at: Some(Location::Path(p)),
            voids: options.voids,
            ..Default::default()
          })?;
        }
      }

      if prev_empty {
        doc.remove_nodes(RemoveNodesOptions {
          at: Some(Location::Path(prev_path)),
          voids: options.voids,
          ..Default::default()
        })?;
      } else {
        doc.apply(Operation::MergeNode {
          path:       new_path,
          position,
          properties: node.extract_properties(),
        })?;
      }
      Ok(())
    })
  }

  /// Move every matched node to `to`, keeping the destination
  /// self-consistent as earlier moves shift later targets.
  pub fn move_nodes(&mut self, to: Path, options: MoveNodesOptions<'_>) -> Result<()> {
    self.without_normalizing(|doc| {
      let Some(at) = doc.resolve_at(&options.at) else {
        return Ok(());
      };
      let at_path: Path;
      let matcher = match options.matcher {
        Some(m) => m,
        None => match &at {
          Location::Path(p) => {
            at_path = p.clone();
            Match::At(&at_path)
          },
          _ => Match::Block,
        },
      };

      let targets: Vec<Path> = doc
        .nodes(
          &NodesOptions {
            at: Some(at),
            mode: options.mode,
            voids: options.voids,
            ..Default::default()
          },
          |n, p| matcher.test(doc, n, p),
        )?
        .into_iter()
        .map(|(p, _)| p)
        .collect();
      let path_refs: Vec<_> = targets
        .into_iter()
        .map(|p| doc.track_path(p, Some(Affinity::Forward)))
        .collect();

      let mut to_current = Some(to);
      for handle in path_refs {
        let Some(path) = doc.untrack_path(handle) else {
          continue;
        };
        let Some(new_path) = to_current.clone() else {
          break;
        };
        if path.is_root() || !doc.has_node(&path) {
          continue;
        }
        let op = Operation::MoveNode {
          path:     path.clone(),
          new_path: new_path.clone(),
        };
        to_current = new_path.transform(&op, None);
        doc.apply(op)?;
        // Subsequent inserts land after the node just moved in.
        if new_path.is_sibling_of(&path) && new_path.is_after(&path) {
          to_current = to_current.and_then(|p| p.next());
        }
      }
      Ok(())
    })
  }

  /// Re-parent each matched node one level up.
  pub fn lift_nodes(&mut self, options: LiftNodesOptions<'_>) -> Result<()> {
    self.without_normalizing(|doc| {
      let Some(at) = doc.resolve_at(&options.at) else {
        return Ok(());
      };
      let at_path: Path;
      let matcher = match options.matcher {
        Some(m) => m,
        None => match &at {
          Location::Path(p) => {
            at_path = p.clone();
            Match::At(&at_path)
          },
          _ => Match::Block,
        },
      };

      let targets: Vec<Path> = doc
        .nodes(
          &NodesOptions {
            at: Some(at),
            mode: options.mode,
            voids: options.voids,
            ..Default::default()
          },
          |n, p| matcher.test(doc, n, p),
        )?
        .into_iter()
        .map(|(p, _)| p)
        .collect();
      let path_refs: Vec<_> = targets
        .into_iter()
        .map(|p| doc.track_path(p, Some(Affinity::Forward)))
        .collect();

      for handle in path_refs {
        let Some(path) = doc.untrack_path(handle) else {
          continue;
        };
        if path.len() < 2 {
          return Err(DocumentError::LiftRoot);
        }
        let parent_path = path.parent();
        let parent = doc.node(&parent_path)?;
        let sibling_count = parent.children().map(Vec::len).unwrap_or(0);
        let index = path.last().unwrap_or(0);
        let Some(after_parent) = parent_path.next() else {
          return Err(DocumentError::LiftRoot);
        };

        if sibling_count == 1 {
          doc.move_nodes(after_parent, MoveNodesOptions {
            at: Some(Location::Path(path)),
            voids: options.voids,
            ..Default::default()
          })?;
          doc.remove_nodes(RemoveNodesOptions {
            at: Some(Location::Path(parent_path)),
            voids: options.voids,
            ..Default::default()
          })?;
        } else if index == 0 {
          doc.move_nodes(parent_path, MoveNodesOptions {
            at: Some(Location::Path(path)),
            voids: options.voids,
            ..Default::default()
          })?;
        } else if index == sibling_count - 1 {
          doc.move_nodes(after_parent, MoveNodesOptions {
            at: Some(Location::Path(path)),
            voids: options.voids,
            ..Default::default()
          })?;
        } else {
          // Middle child: split the parent right after it, then move it
          // between the two halves.
          let Some(split_at) = path.next() else {
            return Err(DocumentError::LiftRoot);
          };
          doc.split_nodes(SplitNodesOptions {
            at: Some(Location::Path(split_at)),
            voids: options.voids,
            ..Default::default()
          })?;
          doc.move_nodes(after_parent, MoveNodesOptions {
            at: Some(Location::Path(path)),
            voids: options.voids,
            ..Default::default()
          })?;
        }
      }
      Ok(())
    })
  }

  /// Wrap the matched run in a fresh element inserted as their common
  /// ancestor. The wrapper's own children are ignored; it is inserted
  /// empty and the matches are moved inside.
  pub fn wrap_nodes(&mut self, element: Node, options: WrapNodesOptions<'_>) -> Result<()> {
    self.without_normalizing(|doc| {
      let Some(mut at) = doc.resolve_at(&options.at) else {
        return Ok(());
      };
      let at_path: Path;
      let matcher = match options.matcher {
        Some(m) => m,
        None => match &at {
          Location::Path(p) => {
            at_path = p.clone();
            Match::At(&at_path)
          },
          _ if element.is_element()
            && doc.policy().is_inline(&element, &Path::root()) =>
          {
            Match::InlineOrText
          },
          _ => Match::Block,
        },
      };

      if options.split {
        if let Location::Range(range) = at.clone() {
          let (start, end) = range.edges();
          let (start, end) = (start.clone(), end.clone());
          let range_ref = doc.track_range(range, Some(Affinity::Inward));
          doc.split_nodes(SplitNodesOptions {
            at: Some(Location::Point(end)),
            matcher: Some(matcher),
            voids: options.voids,
            ..Default::default()
          })?;
          doc.split_nodes(SplitNodesOptions {
            at: Some(Location::Point(start)),
            matcher: Some(matcher),
            voids: options.voids,
            ..Default::default()
          })?;
          match doc.untrack_range(range_ref) {
            Some(range) => {
              if options.at.is_none() {
                doc.select(range.clone())?;
              }
              at = Location::Range(range);
            },
            None => return Ok(()),
          }
        }
      }

      let inline_wrapper =
        element.is_element() && doc.policy().is_inline(&element, &Path::root());
      let roots: Vec<Path> = if inline_wrapper {
        doc
          .nodes(
            &NodesOptions {
              at: Some(at.clone()),
              mode: QueryMode::Lowest,
              voids: options.voids,
              ..Default::default()
            },
            |n, p| Match::Block.test(doc, n, p),
          )?
          .into_iter()
          .map(|(p, _)| p)
          .collect()
      } else {
        vec![Path::root()]
      };

      for root_path in roots {
        let scope = if let Location::Range(range) = &at {
          let root_range = doc.range_of(&Location::Path(root_path))?;
          match range.intersection(&root_range) {
            Some(r) => Location::Range(r),
            None => continue,
          }
        } else {
          at.clone()
        };

        let matches: Vec<Path> = doc
          .nodes(
            &NodesOptions {
              at: Some(scope),
              mode: options.mode,
              voids: options.voids,
              ..Default::default()
            },
            |n, p| matcher.test(doc, n, p),
          )?
          .into_iter()
          .map(|(p, _)| p)
          .collect();
        let (Some(first), Some(last)) = (matches.first(), matches.last()) else {
          continue;
        };
        if first.is_root() {
          return Err(DocumentError::WrapRoot);
        }
        let common = if first == last {
          first.parent()
        } else {
          first.common(last)
        };
        let run = Range::new(
          doc.start(&Location::Path(first.clone()))?,
          doc.end(&Location::Path(last.clone()))?,
        );

        let depth = common.len() + 1;
        let base: Path = last.iter().copied().take(depth).collect();
        let Some(wrapper_path) = base.next() else {
          return Err(DocumentError::WrapRoot);
        };
        let wrapper = Node::element_with(Vec::new(), element.extract_properties());
        doc.insert_nodes(vec![wrapper], InsertNodesOptions {
          at: Some(Location::Path(wrapper_path.clone())),
          select: Some(false),
          voids: options.voids,
          ..Default::default()
        })?;

        doc.move_nodes(wrapper_path.child(0), MoveNodesOptions {
          at: Some(Location::Range(run)),
          matcher: Some(Match::ChildOf(&common)),
          voids: options.voids,
          ..Default::default()
        })?;
      }
      Ok(())
    })
  }

  /// Dissolve each matched element, lifting its children into its
  /// place.
  pub fn unwrap_nodes(&mut self, options: WrapNodesOptions<'_>) -> Result<()> {
    self.without_normalizing(|doc| {
      let Some(mut at) = doc.resolve_at(&options.at) else {
        return Ok(());
      };
      let at_path: Path;
      let matcher = match options.matcher {
        Some(m) => m,
        None => match &at {
          Location::Path(p) => {
            at_path = p.clone();
            Match::At(&at_path)
          },
          _ => Match::Block,
        },
      };
      if matches!(at, Location::Path(_)) {
        at = Location::Range(doc.range_of(&at)?);
      }
      let range_ref = match &at {
        Location::Range(range) => Some(doc.track_range(range.clone(), None)),
        _ => None,
      };

      let matches: Vec<Path> = doc
        .nodes(
          &NodesOptions {
            at: Some(at),
            mode: options.mode,
            voids: options.voids,
            ..Default::default()
          },
          |n, p| matcher.test(doc, n, p),
        )?
        .into_iter()
        .map(|(p, _)| p)
        .collect();
      let path_refs: Vec<_> = matches
        .into_iter()
        .map(|p| doc.track_path(p, Some(Affinity::Forward)))
        .collect();

      for handle in path_refs.into_iter().rev() {
        let Some(path) = doc.untrack_path(handle) else {
          continue;
        };
        if !doc.has_node(&path) {
          continue;
        }
        let mut run = doc.range_of(&Location::Path(path.clone()))?;
        if options.split {
          let clip = range_ref
            .and_then(|handle| doc.current_range(handle).cloned());
          match clip.as_ref().and_then(|clip| clip.intersection(&run)) {
            Some(clipped) => run = clipped,
            None => continue,
          }
        }
        doc.lift_nodes(LiftNodesOptions {
          at: Some(Location::Range(run)),
          matcher: Some(Match::ChildOf(&path)),
          voids: options.voids,
          ..Default::default()
        })?;
      }
      if let Some(handle) = range_ref {
        doc.untrack_range(handle);
      }
      Ok(())
    })
  }

  /// Remove every matched node.
  pub fn remove_nodes(&mut self, options: RemoveNodesOptions<'_>) -> Result<()> {
    self.without_normalizing(|doc| {
      let Some(mut at) = doc.resolve_at(&options.at) else {
        return Ok(());
      };
      let at_path: Path;
      let matcher = match options.matcher {
        Some(m) => m,
        None => match &at {
          Location::Path(p) => {
            at_path = p.clone();
            Match::At(&at_path)
          },
          _ => Match::Block,
        },
      };
      if !options.hanging {
        if let Location::Range(range) = &at {
          at = Location::Range(doc.unhang_range(range, options.voids)?);
        }
      }

      let targets: Vec<Path> = doc
        .nodes(
          &NodesOptions {
            at: Some(at),
            mode: options.mode,
            voids: options.voids,
            ..Default::default()
          },
          |n, p| matcher.test(doc, n, p),
        )?
        .into_iter()
        .map(|(p, _)| p)
        .collect();
      let path_refs: Vec<_> = targets
        .into_iter()
        .map(|p| doc.track_path(p, Some(Affinity::Forward)))
        .collect();

      for handle in path_refs {
        let Some(path) = doc.untrack_path(handle) else {
          continue;
        };
        if !doc.has_node(&path) {
          continue;
        }
        let node = doc.node(&path)?.clone();
        doc.apply(Operation::RemoveNode { path, node })?;
      }
      Ok(())
    })
  }

  /// Patch properties on every match, emitting `set_node` only for
  /// nodes where some key actually changes. A null value unsets a key.
  pub fn set_nodes(&mut self, props: Properties, options: SetNodesOptions<'_>) -> Result<()> {
    self.without_normalizing(|doc| {
      let Some(mut at) = doc.resolve_at(&options.at) else {
        return Ok(());
      };
      let at_path: Path;
      let matcher = match options.matcher {
        Some(m) => m,
        None => match &at {
          Location::Path(p) => {
            at_path = p.clone();
            Match::At(&at_path)
          },
          _ => Match::Block,
        },
      };
      if !options.hanging {
        if let Location::Range(range) = &at {
          at = Location::Range(doc.unhang_range(range, options.voids)?);
        }
      }

      if options.split {
        if let Location::Range(range) = at.clone() {
          if range.is_collapsed() && doc.leaf(&range.anchor.path)?.text_len() > 0 {
            // A collapsed point in non-empty text selects nothing; mark
            // state for pending insertions is the host's concern.
            return Ok(());
          }
          let (start, end) = range.edges();
          let (start, end) = (start.clone(), end.clone());
          let range_ref = doc.track_range(range, Some(Affinity::Inward));
          let split_mode = if options.mode == QueryMode::Lowest {
            QueryMode::Lowest
          } else {
            QueryMode::Highest
          };
          let end_at_edge = doc.is_end(&end, &Location::Path(end.path.clone()))?;
          doc.split_nodes(SplitNodesOptions {
            at: Some(Location::Point(end)),
            matcher: Some(matcher),
            mode: split_mode,
            always: !end_at_edge,
            voids: options.voids,
            ..Default::default()
          })?;
          let start_at_edge = doc.is_start(&start, &Location::Path(start.path.clone()))?;
          doc.split_nodes(SplitNodesOptions {
            at: Some(Location::Point(start)),
            matcher: Some(matcher),
            mode: split_mode,
            always: !start_at_edge,
            voids: options.voids,
            ..Default::default()
          })?;
          match doc.untrack_range(range_ref) {
            Some(range) => {
              if options.at.is_none() {
                doc.select(range.clone())?;
              }
              at = Location::Range(range);
            },
            None => return Ok(()),
          }
        }
      }

      let default_compare =
        |new: &serde_json::Value, old: Option<&serde_json::Value>| old != Some(new);
      let compare: &dyn Fn(&serde_json::Value, Option<&serde_json::Value>) -> bool =
        match options.compare {
          Some(compare) => compare,
          None => &default_compare,
        };

      let entries: Vec<(Path, Node)> = doc
        .nodes(
          &NodesOptions {
            at: Some(at),
            mode: options.mode,
            voids: options.voids,
            ..Default::default()
          },
          |n, p| matcher.test(doc, n, p),
        )?
        .into_iter()
        .map(|(p, n)| (p, n.clone()))
        .collect();

      for (path, node) in entries {
        if path.is_root() {
          continue;
        }
        let mut properties = Properties::new();
        let mut new_properties = Properties::new();
        let mut changed = false;
        for (key, value) in &props {
          if key == "children" || key == "text" {
            continue;
          }
          let old = node.properties().get(key);
          if compare(value, old) {
            changed = true;
            if let Some(old) = old {
              properties.insert(key.clone(), old.clone());
            }
            if !value.is_null() {
              new_properties.insert(key.clone(), value.clone());
            }
          }
        }
        if changed {
          doc.apply(Operation::SetNode {
            path,
            properties,
            new_properties,
          })?;
        }
      }
      Ok(())
    })
  }

  /// Remove the named properties from every match.
  pub fn unset_nodes(&mut self, keys: &[&str], options: SetNodesOptions<'_>) -> Result<()> {
    let mut props = Properties::new();
    for key in keys {
      props.insert((*key).to_string(), serde_json::Value::Null);
    }
    self.set_nodes(props, options)
  }

  /// The first matched entry strictly before `at` in document order.
  pub(crate) fn previous_entry(
    &self,
    at: &Location,
    matcher: Match<'_>,
    mode: QueryMode,
    voids: bool,
  ) -> Result<Option<Path>> {
    let start = self.start(at)?;
    let Some(before) = self.before(&Location::Point(start), Unit::Character, 1)? else {
      return Ok(None);
    };
    let doc_start = self.start(&Location::Path(Path::root()))?;
    let span = Location::Range(Range::new(doc_start, before));
    let found = self.nodes(
      &NodesOptions {
        at: Some(span),
        mode,
        reverse: true,
        voids,
        ..Default::default()
      },
      |n, p| matcher.test(self, n, p),
    )?;
    Ok(found.into_iter().next().map(|(p, _)| p))
  }

  /// Childless, or holding a single empty non-void text leaf.
  pub(crate) fn is_empty_element(&self, node: &Node, path: &Path) -> bool {
    let Some(children) = node.children() else {
      return false;
    };
    match children.as_slice() {
      [] => true,
      [only] => {
        only.is_text()
          && only.text_len() == 0
          && !self.policy().is_void(node, path)
      },
      _ => false,
    }
  }

  /// Whether the node at `path` is a chain of single children down to a
  /// leaf, i.e. removing the leaf empties the whole chain.
  fn single_child_chain(&self, path: &Path) -> Result<bool> {
    let node = self.node(path)?;
    match node {
      Node::Text { .. } => Ok(true),
      Node::Root { .. } => Ok(false),
      Node::Element { children, .. } => {
        if self.policy().is_void(node, path) {
          return Ok(true);
        }
        if children.len() == 1 {
          self.single_child_chain(&path.child(0))
        } else {
          Ok(false)
        }
      },
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::point::Point;

  fn paragraph(text: &str) -> Node {
    Node::element(vec![Node::text(text)])
  }

  fn quote(children: Vec<Node>) -> Node {
    let mut props = Properties::new();
    props.insert("kind".into(), serde_json::json!("quote"));
    Node::element_with(children, props)
  }

  #[test]
  fn split_at_point_makes_two_blocks() {
    let mut doc = Document::new(vec![paragraph("hello")]);
    doc
      .split_nodes(SplitNodesOptions {
        at: Some(Location::Point(Point::new(Path::from(vec![0, 0]), 2))),
        ..Default::default()
      })
      .unwrap();

    assert_eq!(doc.children().len(), 2);
    assert_eq!(
      doc.string(&Location::Path(Path::from(vec![0])), false).unwrap(),
      "he"
    );
    assert_eq!(
      doc.string(&Location::Path(Path::from(vec![1])), false).unwrap(),
      "llo"
    );
  }

  #[test]
  fn split_at_edge_is_skipped_without_always() {
    let mut doc = Document::new(vec![paragraph("hello")]);
    doc
      .split_nodes(SplitNodesOptions {
        at: Some(Location::Point(Point::new(Path::from(vec![0, 0]), 0))),
        ..Default::default()
      })
      .unwrap();
    assert_eq!(doc.children().len(), 1);

    doc
      .split_nodes(SplitNodesOptions {
        at: Some(Location::Point(Point::new(Path::from(vec![0, 0]), 0))),
        always: true,
        ..Default::default()
      })
      .unwrap();
    assert_eq!(doc.children().len(), 2);
    assert_eq!(
      doc.string(&Location::Path(Path::from(vec![0])), false).unwrap(),
      ""
    );
  }

  #[test]
  fn insert_block_at_point_splits_the_host() {
    let mut doc = Document::new(vec![paragraph("ab")]);
    doc
      .insert_nodes(vec![paragraph("X")], InsertNodesOptions {
        at: Some(Location::Point(Point::new(Path::from(vec![0, 0]), 1))),
        ..Default::default()
      })
      .unwrap();

    assert_eq!(doc.children().len(), 3);
    assert_eq!(doc.string(&Location::Path(Path::from(vec![0])), false).unwrap(), "a");
    assert_eq!(doc.string(&Location::Path(Path::from(vec![1])), false).unwrap(), "X");
    assert_eq!(doc.string(&Location::Path(Path::from(vec![2])), false).unwrap(), "b");
  }

  #[test]
  fn insert_at_selection_selects_end_of_run() {
    let mut doc = Document::new(vec![paragraph("ab")]);
    doc
      .select(Range::collapsed(Point::new(Path::from(vec![0, 0]), 2)))
      .unwrap();
    doc
      .insert_nodes(vec![paragraph("tail")], InsertNodesOptions::default())
      .unwrap();

    let focus = doc.selection().unwrap().focus.clone();
    assert_eq!(focus, Point::new(Path::from(vec![1, 0]), 4));
  }

  #[test]
  fn remove_nodes_at_path() {
    let mut doc = Document::new(vec![paragraph("a"), paragraph("b")]);
    doc
      .remove_nodes(RemoveNodesOptions {
        at: Some(Location::Path(Path::from(vec![0]))),
        ..Default::default()
      })
      .unwrap();
    assert_eq!(doc.children().len(), 1);
    assert_eq!(doc.string(&Location::Path(Path::root()), false).unwrap(), "b");
  }

  #[test]
  fn merge_blocks_at_point() {
    let mut doc = Document::new(vec![paragraph("ab"), paragraph("cd")]);
    doc
      .merge_nodes(MergeNodesOptions {
        at: Some(Location::Point(Point::new(Path::from(vec![1, 0]), 0))),
        ..Default::default()
      })
      .unwrap();

    assert_eq!(doc.children().len(), 1);
    assert_eq!(doc.string(&Location::Path(Path::root()), false).unwrap(), "abcd");
  }

  #[test]
  fn merge_into_empty_previous_removes_it() {
    let mut doc = Document::new(vec![paragraph(""), paragraph("cd")]);
    doc
      .merge_nodes(MergeNodesOptions {
        at: Some(Location::Point(Point::new(Path::from(vec![1, 0]), 0))),
        ..Default::default()
      })
      .unwrap();

    assert_eq!(doc.children().len(), 1);
    assert_eq!(doc.string(&Location::Path(Path::root()), false).unwrap(), "cd");
  }

  #[test]
  fn move_block_to_end() {
    let mut doc = Document::new(vec![paragraph("a"), paragraph("b"), paragraph("c")]);
    doc
      .move_nodes(Path::from(vec![2]), MoveNodesOptions {
        at: Some(Location::Path(Path::from(vec![0]))),
        ..Default::default()
      })
      .unwrap();

    assert_eq!(doc.string(&Location::Path(Path::root()), false).unwrap(), "bca");
  }

  #[test]
  fn lift_middle_child_splits_the_parent() {
    let mut doc = Document::new(vec![quote(vec![
      paragraph("a"),
      paragraph("b"),
      paragraph("c"),
    ])]);
    doc
      .lift_nodes(LiftNodesOptions {
        at: Some(Location::Path(Path::from(vec![0, 1]))),
        ..Default::default()
      })
      .unwrap();

    assert_eq!(doc.children().len(), 3);
    assert_eq!(doc.string(&Location::Path(Path::from(vec![0])), false).unwrap(), "a");
    assert_eq!(doc.string(&Location::Path(Path::from(vec![1])), false).unwrap(), "b");
    assert_eq!(doc.string(&Location::Path(Path::from(vec![2])), false).unwrap(), "c");
    assert!(doc.children()[1].properties().is_empty());
    assert_eq!(
      doc.children()[0].properties().get("kind"),
      Some(&serde_json::json!("quote"))
    );
  }

  #[test]
  fn lift_sole_child_removes_parent() {
    let mut doc = Document::new(vec![quote(vec![paragraph("only")])]);
    doc
      .lift_nodes(LiftNodesOptions {
        at: Some(Location::Path(Path::from(vec![0, 0]))),
        ..Default::default()
      })
      .unwrap();

    assert_eq!(doc.children().len(), 1);
    assert!(doc.children()[0].properties().is_empty());
    assert_eq!(doc.string(&Location::Path(Path::root()), false).unwrap(), "only");
  }

  #[test]
  fn wrap_two_blocks_in_a_quote() {
    let mut doc = Document::new(vec![paragraph("a"), paragraph("b")]);
    let at = Range::new(
      Point::new(Path::from(vec![0, 0]), 0),
      Point::new(Path::from(vec![1, 0]), 1),
    );
    doc
      .wrap_nodes(quote(Vec::new()), WrapNodesOptions {
        at: Some(Location::Range(at)),
        ..Default::default()
      })
      .unwrap();

    assert_eq!(doc.children().len(), 1);
    let wrapper = &doc.children()[0];
    assert_eq!(wrapper.properties().get("kind"), Some(&serde_json::json!("quote")));
    assert_eq!(wrapper.children().map(Vec::len), Some(2));
    assert_eq!(doc.string(&Location::Path(Path::root()), false).unwrap(), "ab");
  }

  #[test]
  fn wrap_three_leaves_inside_a_block() {
    let mut bold = Properties::new();
    bold.insert("bold".into(), serde_json::json!(true));
    let mut italic = Properties::new();
    italic.insert("italic".into(), serde_json::json!(true));
    let mut doc = Document::new(vec![Node::element(vec![
      Node::text_with("a", bold),
      Node::text("b"),
      Node::text_with("c", italic),
    ])]);

    doc
      .wrap_nodes(quote(Vec::new()), WrapNodesOptions {
        at: Some(Location::Path(Path::from(vec![0]))),
        matcher: Some(Match::Text),
        ..Default::default()
      })
      .unwrap();

    let block = &doc.children()[0];
    assert_eq!(block.children().map(Vec::len), Some(1));
    let wrapper = &block.children().unwrap()[0];
    assert_eq!(wrapper.properties().get("kind"), Some(&serde_json::json!("quote")));
    assert_eq!(wrapper.children().map(Vec::len), Some(3));
    assert_eq!(doc.string(&Location::Path(Path::root()), false).unwrap(), "abc");
  }

  #[test]
  fn unwrap_dissolves_the_wrapper() {
    let mut doc = Document::new(vec![quote(vec![paragraph("a"), paragraph("b")])]);
    doc
      .unwrap_nodes(WrapNodesOptions {
        at: Some(Location::Path(Path::from(vec![0]))),
        ..Default::default()
      })
      .unwrap();

    assert_eq!(doc.children().len(), 2);
    assert!(doc.children()[0].properties().is_empty());
    assert!(doc.children()[1].properties().is_empty());
    assert_eq!(doc.string(&Location::Path(Path::root()), false).unwrap(), "ab");
  }

  #[test]
  fn set_nodes_with_split_marks_a_subrange() {
    let mut doc = Document::new(vec![paragraph("hello")]);
    let mut bold = Properties::new();
    bold.insert("bold".into(), serde_json::json!(true));

    doc
      .set_nodes(bold, SetNodesOptions {
        at: Some(Location::Range(Range::new(
          Point::new(Path::from(vec![0, 0]), 1),
          Point::new(Path::from(vec![0, 0]), 3),
        ))),
        matcher: Some(Match::Text),
        split: true,
        ..Default::default()
      })
      .unwrap();

    let children = doc.children()[0].children().unwrap();
    assert_eq!(children.len(), 3);
    assert_eq!(children[0].text_content().unwrap(), "h");
    assert_eq!(children[1].text_content().unwrap(), "el");
    assert_eq!(
      children[1].properties().get("bold"),
      Some(&serde_json::json!(true))
    );
    assert_eq!(children[2].text_content().unwrap(), "lo");
    assert!(children[2].properties().is_empty());
  }

  #[test]
  fn set_nodes_skips_unchanged_keys() {
    let mut doc = Document::new(vec![paragraph("x")]);
    let mut props = Properties::new();
    props.insert("kind".into(), serde_json::json!("quote"));
    doc
      .set_nodes(props.clone(), SetNodesOptions {
        at: Some(Location::Path(Path::from(vec![0]))),
        ..Default::default()
      })
      .unwrap();

    let seen: std::rc::Rc<std::cell::Cell<usize>> = Default::default();
    let sink = seen.clone();
    doc.on_change(move |ops| sink.set(sink.get() + ops.len()));

    // Same value again: no operation at all.
    doc
      .set_nodes(props, SetNodesOptions {
        at: Some(Location::Path(Path::from(vec![0]))),
        ..Default::default()
      })
      .unwrap();
    assert_eq!(seen.get(), 0);
  }

  #[test]
  fn unset_nodes_drops_the_key() {
    let mut doc = Document::new(vec![quote(vec![paragraph("x")])]);
    doc
      .unset_nodes(&["kind"], SetNodesOptions {
        at: Some(Location::Path(Path::from(vec![0]))),
        ..Default::default()
      })
      .unwrap();
    assert!(doc.children()[0].properties().is_empty());
  }
}
