//! Document host abstraction.
//!
//! Defines the [`DomHost`] trait: the document operations the engine needs,
//! and nothing more. [`MemoryDocument`] implements it in memory for tests,
//! the CLI simulator, and embedders that mirror a real DOM.

pub mod memory;

pub use memory::{LoadRecord, MemoryDocument};

use serde::{Deserialize, Serialize};

use crate::types::DomError;

/// Identity of a node in the host document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A document the engine can govern.
pub trait DomHost {
    /// Create a detached element through the native (un-intercepted) path.
    fn create_element(&mut self, tag: &str) -> NodeId;

    /// Lowercase tag name, or `None` for an unknown node.
    fn tag_name(&self, node: NodeId) -> Option<String>;

    fn get_attribute(&self, node: NodeId, name: &str) -> Option<String>;

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> Result<(), DomError>;

    fn remove_attribute(&mut self, node: NodeId, name: &str);

    /// All attributes in the order they were first set.
    fn attributes(&self, node: NodeId) -> Vec<(String, String)>;

    fn set_text(&mut self, node: NodeId, text: &str) -> Result<(), DomError>;

    fn parent(&self, node: NodeId) -> Option<NodeId>;

    fn next_sibling(&self, node: NodeId) -> Option<NodeId>;

    fn children(&self, node: NodeId) -> Vec<NodeId>;

    /// Whether the node is attached to the document tree.
    fn is_connected(&self, node: NodeId) -> bool;

    /// Insert `node` into `parent` before `reference` (append when `None`).
    fn insert_before(
        &mut self,
        parent: NodeId,
        node: NodeId,
        reference: Option<NodeId>,
    ) -> Result<(), DomError>;

    fn append_child(&mut self, parent: NodeId, node: NodeId) -> Result<(), DomError> {
        self.insert_before(parent, node, None)
    }

    /// Detach `node` from its parent. No-op when already detached.
    fn remove(&mut self, node: NodeId);

    fn head(&self) -> Option<NodeId>;

    fn body(&self) -> Option<NodeId>;

    /// Top edge of the node's bounding box relative to the viewport.
    fn bounding_top(&self, node: NodeId) -> Option<f64>;

    fn viewport_height(&self) -> f64;

    /// Base URL used to resolve relative resource URLs.
    fn base_url(&self) -> Option<String>;

    /// Start recording added nodes for [`take_mutations`](Self::take_mutations).
    fn observe_mutations(&mut self);

    /// Drain the nodes added since the last call, in insertion order.
    fn take_mutations(&mut self) -> Vec<NodeId>;

    /// Called at each microtask checkpoint, after mutation observers ran.
    fn checkpoint(&mut self) {}
}
