//! Read-only queries: resolving locations to points, extracting text, and
//! stepping through unit positions.
//!
//! Offsets are always in chars; stepping by [`Unit::Character`] moves over
//! extended grapheme clusters so a composed emoji or a combining sequence
//! is one step. Word steps use unicode word bounds, where a segment counts
//! as a word only if it contains a letter or number.

use std::cmp::Ordering;

use unicode_general_category::{
  GeneralCategory,
  get_general_category,
};
use unicode_segmentation::UnicodeSegmentation;

use crate::{
  document::{
    Document,
    Result,
    byte_of_char,
  },
  location::{
    Edge,
    Location,
    Unit,
  },
  node::Node,
  path::Path,
  point::Point,
  range::Range,
};

impl Document {
  /// Resolve a location to a single point at one of its edges.
  pub fn point(&self, at: &Location, edge: Edge) -> Result<Point> {
    match at {
      Location::Point(point) => Ok(point.clone()),
      Location::Range(range) => {
        let (start, end) = range.edges();
        Ok(match edge {
          Edge::Start => start.clone(),
          Edge::End => end.clone(),
        })
      },
      Location::Path(path) => {
        let leaf_path = match edge {
          Edge::Start => self.first_path(path)?,
          Edge::End => self.last_path(path)?,
        };
        let leaf = self.leaf(&leaf_path)?;
        let offset = match edge {
          Edge::Start => 0,
          Edge::End => leaf.text_len(),
        };
        Ok(Point::new(leaf_path, offset))
      },
    }
  }

  pub fn start(&self, at: &Location) -> Result<Point> {
    self.point(at, Edge::Start)
  }

  pub fn end(&self, at: &Location) -> Result<Point> {
    self.point(at, Edge::End)
  }

  /// The full range spanned by a location.
  pub fn range_of(&self, at: &Location) -> Result<Range> {
    match at {
      Location::Range(range) => Ok(range.clone()),
      _ => Ok(Range::new(self.start(at)?, self.end(at)?)),
    }
  }

  pub fn is_start(&self, point: &Point, at: &Location) -> Result<bool> {
    // Cheap exit before resolving the edge.
    if point.offset != 0 {
      return Ok(false);
    }
    Ok(*point == self.start(at)?)
  }

  pub fn is_end(&self, point: &Point, at: &Location) -> Result<bool> {
    Ok(*point == self.end(at)?)
  }

  pub fn is_edge(&self, point: &Point, at: &Location) -> Result<bool> {
    Ok(self.is_start(point, at)? || self.is_end(point, at)?)
  }

  /// The concatenated text of all leaves in `at`, clipped at the endpoint
  /// offsets. Void subtrees contribute nothing unless `voids`.
  pub fn string(&self, at: &Location, voids: bool) -> Result<String> {
    let range = self.range_of(at)?;
    let (start, end) = range.edges();

    let mut out = String::new();
    let walk = self.descendants_in(
      Some(start.path.clone()),
      Some(end.path.clone()),
      false,
      voids,
    );
    for (path, node) in walk {
      let Node::Text { text, .. } = node else {
        continue;
      };
      let from = if path == start.path { start.offset } else { 0 };
      let to = if path == end.path {
        end.offset
      } else {
        text.chars().count()
      };
      if from >= to {
        continue;
      }
      let a = byte_of_char(text, from).unwrap_or(text.len());
      let b = byte_of_char(text, to).unwrap_or(text.len());
      out.push_str(&text[a..b]);
    }
    Ok(out)
  }

  /// Every `unit` position inside `at`, in document order.
  ///
  /// Leaves are grouped per block; within a block positions fall on
  /// grapheme or word boundaries of the concatenated text, so a boundary
  /// between two adjacent leaves is a single position. Block edges are
  /// always positions, which makes a block transition one step.
  pub fn positions(&self, at: &Location, unit: Unit) -> Result<Vec<Point>> {
    let range = self.range_of(at)?;
    let (start, end) = range.edges();

    let mut out = Vec::new();
    for block in self.blocks_between(&start.path, &end.path) {
      let text: String = block
        .leaves
        .iter()
        .map(|(_, text)| *text)
        .collect();
      let boundaries = match unit {
        Unit::Character => grapheme_boundaries(&text),
        Unit::Word => word_boundaries(&text),
        Unit::Line | Unit::Block => vec![0, text.chars().count()],
      };
      for offset in boundaries {
        if let Some(point) = block.point_at(offset) {
          if point.compare(start) != Ordering::Less
            && point.compare(end) != Ordering::Greater
          {
            out.push(point);
          }
        }
      }
    }
    out.dedup();
    Ok(out)
  }

  /// The `distance`-th `unit` position before `at`, or `None` at the
  /// document start.
  pub fn before(&self, at: &Location, unit: Unit, distance: usize) -> Result<Option<Point>> {
    let target = self.start(at)?;
    let doc_start = self.start(&Location::Path(Path::root()))?;
    let span = Location::Range(Range::new(doc_start, target.clone()));

    let positions = self.positions(&span, unit)?;
    let anchor = positions
      .iter()
      .rposition(|p| p.compare(&target) != Ordering::Greater);
    Ok(match anchor {
      Some(i) if i >= distance => positions.get(i - distance).cloned(),
      _ => None,
    })
  }

  /// The `distance`-th `unit` position after `at`, or `None` at the
  /// document end.
  pub fn after(&self, at: &Location, unit: Unit, distance: usize) -> Result<Option<Point>> {
    let target = self.end(at)?;
    let doc_end = self.end(&Location::Path(Path::root()))?;
    let span = Location::Range(Range::new(target.clone(), doc_end));

    let positions = self.positions(&span, unit)?;
    let anchor = positions
      .iter()
      .position(|p| p.compare(&target) != Ordering::Less);
    Ok(match anchor {
      Some(i) => positions.get(i + distance).cloned(),
      None => None,
    })
  }

  /// Shrink a range whose end hangs at offset 0 of a following block, the
  /// shape a triple-click produces, back to the end of the last real text
  /// before it.
  pub fn unhang_range(&self, range: &Range, voids: bool) -> Result<Range> {
    let (start, end) = range.edges();
    let (start, mut end) = (start.clone(), end.clone());

    // Only a fully block-aligned expanded range can hang.
    if start.offset != 0
      || end.offset != 0
      || range.is_collapsed()
      || end.path.has_previous()
    {
      return Ok(range.clone());
    }

    let block_path = self
      .above(&Location::Point(end.clone()), |node, path| {
        node.is_element() && !self.policy().is_inline(node, path)
      })
      .map(|(path, _)| path)
      .unwrap_or_else(Path::root);

    let first = self.start(&Location::Point(start.clone()))?;
    let before = Location::Range(Range::new(first, end.clone()));
    let mut skip = true;
    let entries = self.nodes(
      &crate::traverse::NodesOptions {
        at: Some(before),
        reverse: true,
        voids,
        ..Default::default()
      },
      |node, _| node.is_text(),
    )?;
    for (path, node) in entries {
      if skip {
        skip = false;
        continue;
      }
      let text = node.text_content().map(|t| t.as_str()).unwrap_or("");
      if !text.is_empty() || path.is_before(&block_path) {
        end = Point::new(path, text.chars().count());
        break;
      }
    }

    Ok(Range::new(start, end))
  }

  /// Text leaves between two paths, grouped by lowest block ancestor.
  fn blocks_between(&self, from: &Path, to: &Path) -> Vec<BlockText<'_>> {
    let mut blocks: Vec<BlockText<'_>> = Vec::new();
    let walk = self.descendants_in(Some(from.clone()), Some(to.clone()), false, false);
    for (path, node) in walk {
      let Node::Text { text, .. } = node else {
        continue;
      };
      let block_path = path.parent();
      let same_block = blocks
        .last()
        .is_some_and(|block| block.block_path == block_path);
      if !same_block {
        blocks.push(BlockText {
          block_path,
          leaves: Vec::new(),
        });
      }
      if let Some(block) = blocks.last_mut() {
        block.leaves.push((path, text.as_str()));
      }
    }
    blocks
  }
}

struct BlockText<'a> {
  block_path: Path,
  leaves:     Vec<(Path, &'a str)>,
}

impl BlockText<'_> {
  /// Map a block-relative char offset back to a leaf point. An interior
  /// leaf boundary resolves to the start of the later leaf; the block end
  /// resolves to the end of the last leaf.
  fn point_at(&self, offset: usize) -> Option<Point> {
    let mut consumed = 0;
    let last = self.leaves.len().checked_sub(1)?;
    for (i, (path, text)) in self.leaves.iter().enumerate() {
      let len = text.chars().count();
      if offset < consumed + len || (i == last && offset == consumed + len) {
        return Some(Point::new(path.clone(), offset - consumed));
      }
      if offset == consumed {
        return Some(Point::new(path.clone(), 0));
      }
      consumed += len;
    }
    None
  }
}

fn grapheme_boundaries(text: &str) -> Vec<usize> {
  let mut out = vec![0];
  let mut chars = 0;
  for grapheme in text.graphemes(true) {
    chars += grapheme.chars().count();
    out.push(chars);
  }
  out
}

/// Starts and ends of word segments, in char offsets. A segment is a word
/// when it contains a letter or a number.
fn word_boundaries(text: &str) -> Vec<usize> {
  let mut out = vec![0];
  let mut chars = 0;
  for segment in text.split_word_bounds() {
    let start = chars;
    chars += segment.chars().count();
    if segment.chars().any(is_word_char) {
      out.push(start);
      out.push(chars);
    }
  }
  out.push(chars);
  out.sort_unstable();
  out.dedup();
  out
}

fn is_word_char(ch: char) -> bool {
  matches!(
    get_general_category(ch),
    GeneralCategory::LowercaseLetter
      | GeneralCategory::UppercaseLetter
      | GeneralCategory::TitlecaseLetter
      | GeneralCategory::ModifierLetter
      | GeneralCategory::OtherLetter
      | GeneralCategory::DecimalNumber
      | GeneralCategory::LetterNumber
      | GeneralCategory::OtherNumber
      | GeneralCategory::NonspacingMark
      | GeneralCategory::SpacingMark
      | GeneralCategory::ConnectorPunctuation
  )
}
