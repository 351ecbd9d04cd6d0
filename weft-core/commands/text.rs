//! Text commands: insertion and deletion. `delete` is the workhorse
//! behind backspace, forward-delete and fragment removal; it trims the
//! boundary leaves, removes everything wholly inside the range, and
//! merges the end block into the start block when the range crossed a
//! block boundary.

use unicode_general_category::{
  GeneralCategory,
  get_general_category,
};
use unicode_segmentation::UnicodeSegmentation;

use super::{
  DeleteOptions,
  InsertTextOptions,
  Match,
  MergeNodesOptions,
  RemoveNodesOptions,
  SplitNodesOptions,
};
use crate::{
  document::{
    Document,
    Result,
  },
  location::{
    Location,
    Unit,
  },
  operation::Operation,
  path::{
    Affinity,
    Path,
  },
  range::Range,
  traverse::NodesOptions,
};

impl Document {
  /// Insert a string at a location. An expanded range target deletes
  /// its content first; insertion into a void is a no-op.
  pub fn insert_text_at(&mut self, text: &str, options: InsertTextOptions) -> Result<()> {
    self.without_normalizing(|doc| {
      let Some(mut at) = doc.resolve_at(&options.at) else {
        return Ok(());
      };
      if matches!(at, Location::Path(_)) {
        at = Location::Range(doc.range_of(&at)?);
      }
      if let Location::Range(range) = at.clone() {
        if range.is_collapsed() {
          at = Location::Point(range.anchor);
        } else {
          if !options.voids
            && doc
              .void_above(&Location::Point(range.end().clone()))
              .is_some()
          {
            return Ok(());
          }
          let start_ref = doc.track_point(range.start().clone(), Some(Affinity::Backward));
          doc.delete(DeleteOptions {
            at: Some(Location::Range(range)),
            voids: options.voids,
            ..Default::default()
          })?;
          match doc.untrack_point(start_ref) {
            Some(point) => {
              if options.at.is_none() {
                doc.select(Range::collapsed(point.clone()))?;
              }
              at = Location::Point(point);
            },
            None => return Ok(()),
          }
        }
      }

      let Location::Point(point) = at else {
        return Ok(());
      };
      if !options.voids
        && doc
          .void_above(&Location::Point(point.clone()))
          .is_some()
      {
        return Ok(());
      }
      if !text.is_empty() {
        doc.apply(Operation::InsertText {
          path:   point.path,
          offset: point.offset,
          text:   text.into(),
        })?;
      }
      Ok(())
    })
  }

  /// Remove content. A collapsed range or point target expands by
  /// `distance` units in the given direction first; a point inside a
  /// void deletes the whole void; a path target removes the node.
  pub fn delete(&mut self, options: DeleteOptions) -> Result<()> {
    self.without_normalizing(|doc| {
      let Some(mut at) = doc.resolve_at(&options.at) else {
        return Ok(());
      };
      let mut hanging = options.hanging;
      let mut from_cursor = false;

      if let Location::Range(range) = &at {
        if range.is_collapsed() {
          from_cursor = true;
          at = Location::Point(range.anchor.clone());
        }
      }

      if let Location::Point(point) = at.clone() {
        let void = if options.voids {
          None
        } else {
          doc
            .void_above(&Location::Point(point.clone()))
            .map(|(p, _)| p)
        };
        match void {
          Some(void_path) => at = Location::Path(void_path),
          None => {
            let focus = if options.reverse {
              match doc.before(
                &Location::Point(point.clone()),
                options.unit,
                options.distance,
              )? {
                Some(target) => target,
                None => doc.start(&Location::Path(Path::root()))?,
              }
            } else {
              match doc.after(
                &Location::Point(point.clone()),
                options.unit,
                options.distance,
              )? {
                Some(target) => target,
                None => doc.end(&Location::Path(Path::root()))?,
              }
            };
            at = Location::Range(Range::new(point, focus));
            hanging = true;
          },
        }
      }

      if let Location::Path(path) = at {
        return doc.remove_nodes(RemoveNodesOptions {
          at: Some(Location::Path(path)),
          voids: options.voids,
          ..Default::default()
        });
      }
      let Location::Range(mut range) = at else {
        return Ok(());
      };
      if range.is_collapsed() {
        return Ok(());
      }
      if !hanging {
        let doc_end = doc.end(&Location::Path(Path::root()))?;
        if *range.end() != doc_end {
          range = doc.unhang_range(&range, options.voids)?;
        }
      }

      let (mut start, mut end) = {
        let (s, e) = range.edges();
        (s.clone(), e.clone())
      };
      let start_block = doc
        .above(&Location::Point(start.clone()), |n, p| {
          Match::Block.test(doc, n, p)
        })
        .map(|(p, _)| p);
      let end_block = doc
        .above(&Location::Point(end.clone()), |n, p| {
          Match::Block.test(doc, n, p)
        })
        .map(|(p, _)| p);
      let across_blocks = match (&start_block, &end_block) {
        (Some(s), Some(e)) => s != e,
        _ => false,
      };
      let single_text = start.path == end.path;
      let start_void = if options.voids {
        None
      } else {
        doc
          .void_above(&Location::Point(start.clone()))
          .map(|(p, _)| p)
      };
      let end_void = if options.voids {
        None
      } else {
        doc
          .void_above(&Location::Point(end.clone()))
          .map(|(p, _)| p)
      };

      // Endpoints inside a void are nudged to editable text in the same
      // block, if any.
      if start_void.is_some() {
        if let Some(before) = doc.before(&Location::Point(start.clone()), Unit::Character, 1)? {
          if start_block
            .as_ref()
            .is_some_and(|b| b.is_ancestor_of(&before.path))
          {
            start = before;
          }
        }
      }
      if end_void.is_some() {
        if let Some(after) = doc.after(&Location::Point(end.clone()), Unit::Character, 1)? {
          if end_block
            .as_ref()
            .is_some_and(|b| b.is_ancestor_of(&after.path))
          {
            end = after;
          }
        }
      }

      // Highest nodes wholly inside the range. Voids count even when
      // only partially covered.
      let mut covered: Vec<Path> = Vec::new();
      {
        let entries = doc.nodes(
          &NodesOptions {
            at: Some(Location::Range(range.clone())),
            voids: options.voids,
            ..Default::default()
          },
          |_, _| true,
        )?;
        let mut last: Option<Path> = None;
        for (path, node) in entries {
          if last
            .as_ref()
            .is_some_and(|l| path.compare(l) == std::cmp::Ordering::Equal)
          {
            continue;
          }
          let whole = (!options.voids
            && node.is_element()
            && doc.policy().is_void(node, &path))
            || (!path.is_common_with(&start.path) && !path.is_common_with(&end.path));
          if whole {
            covered.push(path.clone());
            last = Some(path);
          }
        }
      }

      let path_refs: Vec<_> = covered
        .into_iter()
        .map(|p| doc.track_path(p, Some(Affinity::Forward)))
        .collect();
      let start_ref = doc.track_point(start.clone(), Some(Affinity::Forward));
      let end_ref = doc.track_point(end.clone(), Some(Affinity::Forward));

      let mut removed_text = String::new();
      if !single_text && start_void.is_none() {
        if let Some(point) = doc.current_point(start_ref).cloned() {
          let leaf = doc.leaf(&point.path)?;
          let tail: String = leaf
            .text_content()
            .map(|t| t.chars().skip(start.offset).collect())
            .unwrap_or_default();
          if !tail.is_empty() {
            doc.apply(Operation::RemoveText {
              path:   point.path,
              offset: start.offset,
              text:   tail.as_str().into(),
            })?;
            removed_text = tail;
          }
        }
      }

      for handle in path_refs.into_iter().rev() {
        if let Some(path) = doc.untrack_path(handle) {
          doc.remove_nodes(RemoveNodesOptions {
            at: Some(Location::Path(path)),
            voids: options.voids,
            ..Default::default()
          })?;
        }
      }

      if end_void.is_none() {
        if let Some(point) = doc.current_point(end_ref).cloned() {
          let leaf = doc.leaf(&point.path)?;
          let offset = if single_text { start.offset } else { 0 };
          let head: String = leaf
            .text_content()
            .map(|t| {
              t.chars()
                .skip(offset)
                .take(end.offset.saturating_sub(offset))
                .collect()
            })
            .unwrap_or_default();
          if !head.is_empty() {
            doc.apply(Operation::RemoveText {
              path: point.path,
              offset,
              text: head.as_str().into(),
            })?;
            removed_text = head;
          }
        }
      }

      if !single_text
        && across_blocks
        && doc.current_point(end_ref).is_some()
        && doc.current_point(start_ref).is_some()
      {
        if let Some(point) = doc.current_point(end_ref).cloned() {
          doc.merge_nodes(MergeNodesOptions {
            at: Some(Location::Point(point)),
            hanging: true,
            voids: options.voids,
            ..Default::default()
          })?;
        }
      }

      // Backspacing over a combining sequence removes the whole
      // grapheme; put everything but the final mark back so the base
      // character survives.
      if from_cursor
        && options.reverse
        && options.unit == Unit::Character
        && options.distance == 1
        && removed_text.graphemes(true).count() == 1
      {
        let chars: Vec<char> = removed_text.chars().collect();
        if chars.len() > 1 && chars.last().copied().is_some_and(is_mark) {
          let keep: String = chars[..chars.len() - 1].iter().collect();
          doc.insert_text_at(&keep, InsertTextOptions::default())?;
        }
      }

      let start_point = doc.untrack_point(start_ref);
      let end_point = doc.untrack_point(end_ref);
      if options.at.is_none() {
        let collapse_to = if options.reverse {
          start_point.or(end_point)
        } else {
          end_point.or(start_point)
        };
        if let Some(point) = collapse_to {
          doc.select(Range::collapsed(point))?;
        }
      }
      Ok(())
    })
  }

  // Host entry points, driven by the current selection.
  //

  /// Type `text` at the cursor, replacing the selection if expanded.
  pub fn insert_text(&mut self, text: &str) -> Result<()> {
    self.insert_text_at(text, InsertTextOptions::default())
  }

  /// Split the closest block at the cursor.
  pub fn insert_break(&mut self) -> Result<()> {
    self.split_nodes(SplitNodesOptions {
      always: true,
      ..Default::default()
    })
  }

  /// Soft line break. The core has no intra-block newline notion, so the
  /// default splits the block like [`Document::insert_break`]; hosts that
  /// render soft breaks differently intercept this entrypoint.
  pub fn insert_soft_break(&mut self) -> Result<()> {
    self.split_nodes(SplitNodesOptions {
      always: true,
      ..Default::default()
    })
  }

  /// Backspace by one unit when the selection is collapsed.
  pub fn delete_backward(&mut self, unit: Unit) -> Result<()> {
    if self.selection().is_some_and(Range::is_collapsed) {
      return self.delete(DeleteOptions {
        unit,
        reverse: true,
        ..Default::default()
      });
    }
    Ok(())
  }

  /// Forward-delete by one unit when the selection is collapsed.
  pub fn delete_forward(&mut self, unit: Unit) -> Result<()> {
    if self.selection().is_some_and(Range::is_collapsed) {
      return self.delete(DeleteOptions {
        unit,
        ..Default::default()
      });
    }
    Ok(())
  }

  /// Remove the selected content when the selection is expanded.
  pub fn delete_fragment(&mut self) -> Result<()> {
    if self.selection().is_some_and(|s| !s.is_collapsed()) {
      return self.delete(DeleteOptions::default());
    }
    Ok(())
  }
}

fn is_mark(ch: char) -> bool {
  matches!(
    get_general_category(ch),
    GeneralCategory::NonspacingMark
      | GeneralCategory::SpacingMark
      | GeneralCategory::EnclosingMark
  )
}
