//! Document tree nodes.
//!
//! A document is a tree of [`Node`]s with three variants:
//!
//! - **Root** - the document itself; holds children, exactly one per
//!   document, never nested.
//! - **Element** - an ordered sequence of children plus an open map of
//!   opaque properties. Classified at runtime as block/inline/void by the
//!   host's [`NodePolicy`], never by this crate.
//! - **Text** - a leaf holding a string plus opaque properties.
//!
//! Only Root/Element have children; Text never does. Properties are plain
//! JSON values the core stores but does not interpret.

use serde::{
  Deserialize,
  Serialize,
};
use serde_json::Value;

use crate::{
  Tendril,
  path::Path,
};

/// Open key/value data attached to elements and text leaves. The client
/// interprets these; the core only stores, diffs, and patches them.
pub type Properties = serde_json::Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
  Root {
    children: Vec<Node>,
  },
  Element {
    children:   Vec<Node>,
    properties: Properties,
  },
  Text {
    text:       Tendril,
    properties: Properties,
  },
}

impl Node {
  pub fn root(children: Vec<Node>) -> Self {
    Node::Root { children }
  }

  pub fn text(text: impl Into<Tendril>) -> Self {
    Node::Text {
      text:       text.into(),
      properties: Properties::new(),
    }
  }

  pub fn text_with(text: impl Into<Tendril>, properties: Properties) -> Self {
    Node::Text {
      text: text.into(),
      properties,
    }
  }

  pub fn element(children: Vec<Node>) -> Self {
    Node::Element {
      children,
      properties: Properties::new(),
    }
  }

  pub fn element_with(children: Vec<Node>, properties: Properties) -> Self {
    Node::Element {
      children,
      properties,
    }
  }

  #[inline]
  pub fn is_root(&self) -> bool {
    matches!(self, Node::Root { .. })
  }

  #[inline]
  pub fn is_text(&self) -> bool {
    matches!(self, Node::Text { .. })
  }

  #[inline]
  pub fn is_element(&self) -> bool {
    matches!(self, Node::Element { .. })
  }

  /// Properties of an element or text leaf; the root carries none.
  pub fn properties(&self) -> &Properties {
    static EMPTY: std::sync::OnceLock<Properties> = std::sync::OnceLock::new();
    match self {
      Node::Text { properties, .. } | Node::Element { properties, .. } => properties,
      Node::Root { .. } => EMPTY.get_or_init(Properties::new),
    }
  }

  pub fn properties_mut(&mut self) -> Option<&mut Properties> {
    match self {
      Node::Text { properties, .. } | Node::Element { properties, .. } => Some(properties),
      Node::Root { .. } => None,
    }
  }

  pub fn children(&self) -> Option<&Vec<Node>> {
    match self {
      Node::Root { children } | Node::Element { children, .. } => Some(children),
      Node::Text { .. } => None,
    }
  }

  pub fn children_mut(&mut self) -> Option<&mut Vec<Node>> {
    match self {
      Node::Root { children } | Node::Element { children, .. } => Some(children),
      Node::Text { .. } => None,
    }
  }

  pub fn text_content(&self) -> Option<&Tendril> {
    match self {
      Node::Text { text, .. } => Some(text),
      _ => None,
    }
  }

  /// Length of a text leaf in chars; `0` for containers.
  pub fn text_len(&self) -> usize {
    self
      .text_content()
      .map(|text| text.chars().count())
      .unwrap_or(0)
  }

  /// Descend by child index along `path`, relative to this node.
  pub fn descendant(&self, path: &Path) -> Option<&Node> {
    let mut node = self;
    for &index in path.iter() {
      node = node.children()?.get(index)?;
    }
    Some(node)
  }

  pub fn descendant_mut(&mut self, path: &Path) -> Option<&mut Node> {
    let mut node = self;
    for &index in path.iter() {
      node = node.children_mut()?.get_mut(index)?;
    }
    Some(node)
  }

  /// Depth-first paths of this node's strict descendants, relative to it.
  /// Used to seed dirty paths for a freshly inserted subtree.
  pub fn descendant_paths(&self) -> Vec<Path> {
    let mut out = Vec::new();
    let mut stack: Vec<(Path, &Node)> = Vec::new();
    if let Some(children) = self.children() {
      for (i, child) in children.iter().enumerate().rev() {
        stack.push((Path::from(vec![i]), child));
      }
    }
    while let Some((path, node)) = stack.pop() {
      if let Some(children) = node.children() {
        for (i, child) in children.iter().enumerate().rev() {
          stack.push((path.child(i), child));
        }
      }
      out.push(path);
    }
    out
  }

  /// Properties that travel with a node through a split: everything except
  /// its structural content.
  pub fn extract_properties(&self) -> Properties {
    self.properties().clone()
  }

  /// Loose text equality: same properties, text content ignored. The
  /// normalizer merges adjacent text leaves that compare equal here.
  pub fn text_properties_eq(&self, other: &Node) -> bool {
    self.is_text() && other.is_text() && self.properties() == other.properties()
  }
}

/// Host-supplied classification of elements. Normalization and traversal
/// call back into this; the core itself has no notion of what an element
/// means.
pub trait NodePolicy {
  /// Inline elements flow with text; block elements do not. Only called on
  /// elements.
  fn is_inline(&self, element: &Node, path: &Path) -> bool;

  /// Void elements have host-opaque content and are not descended into by
  /// default traversal.
  fn is_void(&self, element: &Node, path: &Path) -> bool;

  /// Whether two adjacent text leaves may merge. The default compares
  /// properties for equality.
  fn should_merge(&self, a: &Node, b: &Node) -> bool {
    a.text_properties_eq(b)
  }
}

/// Everything is a block, nothing is void.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockPolicy;

impl NodePolicy for BlockPolicy {
  fn is_inline(&self, _element: &Node, _path: &Path) -> bool {
    false
  }

  fn is_void(&self, _element: &Node, _path: &Path) -> bool {
    false
  }
}
