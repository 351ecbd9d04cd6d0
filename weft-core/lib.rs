//! Editable rich-text document core.
//!
//! This crate is the mutable heart of a rich-text editor: a tree of
//! structured nodes, nine atomic edit operations that are the only legal way
//! to mutate that tree, an address algebra that keeps every outstanding
//! [`Path`]/[`Point`]/[`Range`] consistent as operations apply, and a
//! post-edit normalization pass that repairs structural invariants.
//!
//! # Architecture
//!
//! - [`node`] - the [`Node`] tree (root, elements, text leaves) plus the
//!   host-supplied [`NodePolicy`] that classifies elements as
//!   block/inline/void.
//! - [`path`], [`point`], [`range`] - pure address arithmetic, including the
//!   transform of an address through an already-applied [`Operation`].
//! - [`operation`] - the nine atomic edit shapes and their inverses.
//! - [`document`] - the [`Document`] itself: the apply engine, dirty-path
//!   bookkeeping, transactions, and change notification.
//! - [`refs`] - live address handles that auto-adjust or self-invalidate as
//!   operations apply.
//! - [`traverse`], [`query`] - read-only navigation and positional queries
//!   over the current tree.
//! - [`normalize`] - the fixpoint repair loop.
//! - [`commands`] - composite editing transforms (insert/split/merge/move/
//!   lift/wrap/unwrap/remove/delete/set) built only from the layers above.
//!
//! # Basic Usage
//!
//! ```ignore
//! use weft_core::{document::Document, node::Node};
//!
//! use weft_core::{location::Location, path::Path, point::Point, range::Range};
//!
//! let mut doc = Document::new(vec![Node::element(vec![Node::text("hello")])]);
//! doc.select(Range::collapsed(Point::new(Path::from(vec![0, 0]), 5)))?;
//! doc.insert_text("!")?;
//! assert_eq!(doc.string(&Location::Path(Path::root()), false)?, "hello!");
//! ```
//!
//! # Mutation Discipline
//!
//! Every edit funnels through [`Document::apply`]; commands decompose into
//! operation sequences inside a `without_normalizing` scope so the repair
//! pass runs once, at the outermost transaction boundary. Hosts observe
//! committed transactions through change listeners; exactly one notification
//! fires per outermost commit, no matter how many operations it contained.

use smartstring::{
  LazyCompact,
  SmartString,
};

pub mod commands;
pub mod document;
pub mod location;
pub mod node;
pub mod normalize;
pub mod operation;
pub mod path;
pub mod point;
pub mod query;
pub mod range;
pub mod refs;
pub mod traverse;

pub type Tendril = SmartString<LazyCompact>;

pub use document::Document;
pub use node::{
  Node,
  NodePolicy,
};
pub use operation::Operation;
pub use path::{
  Affinity,
  Path,
};
pub use point::Point;
pub use range::Range;
