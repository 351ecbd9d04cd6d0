//! Selection commands. All of them funnel through `set_selection`
//! operations so undo history and live references see every cursor move.

use crate::{
  document::{
    Document,
    Result,
  },
  location::{
    Location,
    Unit,
  },
  operation::{
    Operation,
    RangePatch,
  },
  point::Point,
  range::Range,
};

/// Which end of the selection a command addresses. `Start`/`End` are in
/// document order; `Anchor`/`Focus` follow the selection's own
/// orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionEdge {
  Anchor,
  Focus,
  Start,
  End,
}

#[derive(Debug)]
pub struct MoveSelectionOptions {
  pub distance: usize,
  pub unit:     Unit,
  pub reverse:  bool,
  /// Move only one end. `None` moves both.
  pub edge:     Option<SelectionEdge>,
}

impl Default for MoveSelectionOptions {
  fn default() -> Self {
    MoveSelectionOptions {
      distance: 1,
      unit:     Unit::Character,
      reverse:  false,
      edge:     None,
    }
  }
}

impl Document {
  /// Set the selection to the full range of `at`.
  pub fn select(&mut self, at: impl Into<Location>) -> Result<()> {
    let range = self.range_of(&at.into())?;
    self.apply_select(range)
  }

  pub fn deselect(&mut self) -> Result<()> {
    self.apply_deselect()
  }

  /// Collapse the selection onto one of its ends.
  pub fn collapse(&mut self, edge: SelectionEdge) -> Result<()> {
    let Some(selection) = self.selection().cloned() else {
      return Ok(());
    };
    let point = match edge {
      SelectionEdge::Anchor => selection.anchor,
      SelectionEdge::Focus => selection.focus,
      SelectionEdge::Start => selection.start().clone(),
      SelectionEdge::End => selection.end().clone(),
    };
    self.apply_select(Range::collapsed(point))
  }

  /// Move one or both ends of the selection by whole unit steps.
  pub fn move_selection(&mut self, options: MoveSelectionOptions) -> Result<()> {
    let Some(selection) = self.selection().cloned() else {
      return Ok(());
    };

    // Resolve document-order edges onto the concrete ends.
    let edge = options.edge.map(|edge| match edge {
      SelectionEdge::Start if selection.is_backward() => SelectionEdge::Focus,
      SelectionEdge::Start => SelectionEdge::Anchor,
      SelectionEdge::End if selection.is_backward() => SelectionEdge::Anchor,
      SelectionEdge::End => SelectionEdge::Focus,
      other => other,
    });

    let step = |doc: &Document, point: &Point| -> Result<Option<Point>> {
      let at = Location::Point(point.clone());
      if options.reverse {
        doc.before(&at, options.unit, options.distance)
      } else {
        doc.after(&at, options.unit, options.distance)
      }
    };

    let mut patch = RangePatch::default();
    if edge.is_none() || edge == Some(SelectionEdge::Anchor) {
      patch.anchor = step(self, &selection.anchor)?;
    }
    if edge.is_none() || edge == Some(SelectionEdge::Focus) {
      patch.focus = step(self, &selection.focus)?;
    }

    self.set_selection(patch)
  }

  /// Re-seat one end of the selection.
  pub fn set_point(&mut self, point: Point, edge: SelectionEdge) -> Result<()> {
    let Some(selection) = self.selection().cloned() else {
      return Ok(());
    };
    let edge = match edge {
      SelectionEdge::Start if selection.is_backward() => SelectionEdge::Focus,
      SelectionEdge::Start => SelectionEdge::Anchor,
      SelectionEdge::End if selection.is_backward() => SelectionEdge::Anchor,
      SelectionEdge::End => SelectionEdge::Focus,
      other => other,
    };
    let patch = match edge {
      SelectionEdge::Anchor => RangePatch {
        anchor: Some(point),
        focus:  None,
      },
      _ => RangePatch {
        anchor: None,
        focus:  Some(point),
      },
    };
    self.set_selection(patch)
  }

  /// Apply a partial selection patch. Fields left `None` keep their
  /// current value; an empty patch is a no-op.
  pub fn set_selection(&mut self, patch: RangePatch) -> Result<()> {
    let Some(selection) = self.selection().cloned() else {
      // Without an existing selection only a full patch is meaningful;
      // the apply engine enforces that.
      if patch.anchor.is_none() && patch.focus.is_none() {
        return Ok(());
      }
      return self.apply(Operation::SetSelection {
        properties:     None,
        new_properties: Some(patch),
      });
    };

    // Record only the fields that change, so inversion restores exactly
    // what was overwritten.
    let mut old = RangePatch::default();
    let mut new = RangePatch::default();
    if let Some(anchor) = patch.anchor {
      if anchor != selection.anchor {
        old.anchor = Some(selection.anchor.clone());
        new.anchor = Some(anchor);
      }
    }
    if let Some(focus) = patch.focus {
      if focus != selection.focus {
        old.focus = Some(selection.focus.clone());
        new.focus = Some(focus);
      }
    }
    if new.anchor.is_none() && new.focus.is_none() {
      return Ok(());
    }
    self.apply(Operation::SetSelection {
      properties:     Some(old),
      new_properties: Some(new),
    })
  }
}
