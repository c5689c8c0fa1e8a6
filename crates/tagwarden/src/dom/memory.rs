//! In-memory document.
//!
//! A small element tree with ordered attributes, a mutation log, and a
//! load log: every time a connected `script`, `iframe` or `img` carrying a
//! `src` survives a microtask checkpoint, the document "starts" that load and
//! records it. Tests use the load log to observe what actually ran and in
//! which order.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use super::{DomHost, NodeId};
use crate::types::DomError;

const DEFAULT_VIEWPORT_HEIGHT: f64 = 800.0;

#[derive(Debug, Clone)]
struct Node {
    tag: String,
    attrs: Vec<(String, String)>,
    text: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    layout_top: Option<f64>,
}

impl Node {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attrs: Vec::new(),
            text: String::new(),
            parent: None,
            children: Vec::new(),
            layout_top: None,
        }
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A resource load the document started.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadRecord {
    pub node: NodeId,
    pub tag: String,
    pub url: String,
    /// Whether the element carried `loading="lazy"` when the load started.
    pub lazy: bool,
}

/// In-memory [`DomHost`].
#[derive(Debug, Clone)]
pub struct MemoryDocument {
    nodes: HashMap<NodeId, Node>,
    next_id: u64,
    root: NodeId,
    head: NodeId,
    body: NodeId,
    url: String,
    viewport_height: f64,
    observing: bool,
    mutations: Vec<NodeId>,
    /// Nodes that may need to start a load at the next checkpoint.
    pending_loads: Vec<NodeId>,
    started: HashSet<(NodeId, String)>,
    loads: Vec<LoadRecord>,
    rejecting: HashSet<NodeId>,
}

impl MemoryDocument {
    /// An empty `html > head + body` document at `url`.
    pub fn new(url: &str) -> Self {
        let mut doc = Self {
            nodes: HashMap::new(),
            next_id: 1,
            root: NodeId(0),
            head: NodeId(0),
            body: NodeId(0),
            url: url.to_string(),
            viewport_height: DEFAULT_VIEWPORT_HEIGHT,
            observing: false,
            mutations: Vec::new(),
            pending_loads: Vec::new(),
            started: HashSet::new(),
            loads: Vec::new(),
            rejecting: HashSet::new(),
        };
        let root = doc.alloc("html");
        let head = doc.alloc("head");
        let body = doc.alloc("body");
        doc.link(root, head, None);
        doc.link(root, body, None);
        doc.root = root;
        doc.head = head;
        doc.body = body;
        doc
    }

    pub fn set_viewport_height(&mut self, height: f64) {
        self.viewport_height = height;
    }

    /// Place a node's top edge at `top` pixels from the viewport top.
    pub fn set_layout_top(&mut self, node: NodeId, top: f64) {
        if let Some(n) = self.nodes.get_mut(&node) {
            n.layout_top = Some(top);
        }
    }

    /// Make every insertion into `parent` fail.
    pub fn reject_insertions_into(&mut self, parent: NodeId) {
        self.rejecting.insert(parent);
    }

    /// Loads started so far, in start order.
    pub fn loads(&self) -> &[LoadRecord] {
        &self.loads
    }

    pub fn load_urls(&self) -> Vec<String> {
        self.loads.iter().map(|l| l.url.clone()).collect()
    }

    pub fn text(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(&node).map(|n| n.text.as_str())
    }

    /// Connected elements with the given tag, in tree order.
    pub fn elements_by_tag(&self, tag: &str) -> Vec<NodeId> {
        let tag = tag.to_ascii_lowercase();
        let mut out = Vec::new();
        self.walk(self.root, &mut |id, node| {
            if node.tag == tag {
                out.push(id);
            }
        });
        out
    }

    fn walk<F: FnMut(NodeId, &Node)>(&self, from: NodeId, f: &mut F) {
        if let Some(node) = self.nodes.get(&from) {
            f(from, node);
            for child in &node.children {
                self.walk(*child, f);
            }
        }
    }

    fn alloc(&mut self, tag: &str) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, Node::new(tag));
        id
    }

    fn link(&mut self, parent: NodeId, node: NodeId, reference: Option<NodeId>) {
        if let Some(p) = self.nodes.get_mut(&parent) {
            let at = reference
                .and_then(|r| p.children.iter().position(|c| *c == r))
                .unwrap_or(p.children.len());
            p.children.insert(at, node);
        }
        if let Some(n) = self.nodes.get_mut(&node) {
            n.parent = Some(parent);
        }
    }

    fn unlink(&mut self, node: NodeId) {
        let parent = self.nodes.get_mut(&node).and_then(|n| n.parent.take());
        if let Some(p) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            p.children.retain(|c| *c != node);
        }
    }

    fn is_inclusive_ancestor(&self, ancestor: NodeId, mut node: NodeId) -> bool {
        loop {
            if node == ancestor {
                return true;
            }
            match self.nodes.get(&node).and_then(|n| n.parent) {
                Some(p) => node = p,
                None => return false,
            }
        }
    }

    fn node(&self, id: NodeId) -> Result<&Node, DomError> {
        self.nodes.get(&id).ok_or(DomError::UnknownNode(id.0))
    }

    fn subtree(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.walk(node, &mut |id, _| out.push(id));
        out
    }
}

impl DomHost for MemoryDocument {
    fn create_element(&mut self, tag: &str) -> NodeId {
        self.alloc(tag)
    }

    fn tag_name(&self, node: NodeId) -> Option<String> {
        self.nodes.get(&node).map(|n| n.tag.clone())
    }

    fn get_attribute(&self, node: NodeId, name: &str) -> Option<String> {
        self.nodes
            .get(&node)
            .and_then(|n| n.attr(name))
            .map(String::from)
    }

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> Result<(), DomError> {
        let n = self
            .nodes
            .get_mut(&node)
            .ok_or(DomError::UnknownNode(node.0))?;
        let name = name.to_ascii_lowercase();
        match n.attrs.iter_mut().find(|(k, _)| *k == name) {
            Some((_, v)) => *v = value.to_string(),
            None => n.attrs.push((name.clone(), value.to_string())),
        }
        if name == "src" && self.is_connected(node) {
            self.pending_loads.push(node);
        }
        Ok(())
    }

    fn remove_attribute(&mut self, node: NodeId, name: &str) {
        if let Some(n) = self.nodes.get_mut(&node) {
            let name = name.to_ascii_lowercase();
            n.attrs.retain(|(k, _)| *k != name);
        }
    }

    fn attributes(&self, node: NodeId) -> Vec<(String, String)> {
        self.nodes
            .get(&node)
            .map(|n| n.attrs.clone())
            .unwrap_or_default()
    }

    fn set_text(&mut self, node: NodeId, text: &str) -> Result<(), DomError> {
        let n = self
            .nodes
            .get_mut(&node)
            .ok_or(DomError::UnknownNode(node.0))?;
        n.text = text.to_string();
        Ok(())
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(&node).and_then(|n| n.parent)
    }

    fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        let parent = self.parent(node)?;
        let siblings = &self.nodes.get(&parent)?.children;
        let at = siblings.iter().position(|c| *c == node)?;
        siblings.get(at + 1).copied()
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(&node)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    fn is_connected(&self, node: NodeId) -> bool {
        self.nodes.contains_key(&node) && self.is_inclusive_ancestor(self.root, node)
    }

    fn insert_before(
        &mut self,
        parent: NodeId,
        node: NodeId,
        reference: Option<NodeId>,
    ) -> Result<(), DomError> {
        self.node(parent)?;
        self.node(node)?;
        if self.rejecting.contains(&parent) {
            return Err(DomError::Rejected(format!("insertion into {parent}")));
        }
        if self.is_inclusive_ancestor(node, parent) {
            return Err(DomError::Hierarchy(format!(
                "{node} is an ancestor of {parent}"
            )));
        }
        if let Some(r) = reference {
            if self.parent(r) != Some(parent) || r == node {
                return Err(DomError::Hierarchy(format!(
                    "{r} is not a child of {parent}"
                )));
            }
        }

        self.unlink(node);
        self.link(parent, node, reference);

        if self.is_connected(node) {
            if self.observing {
                self.mutations.push(node);
            }
            let subtree = self.subtree(node);
            self.pending_loads.extend(subtree);
        }
        Ok(())
    }

    fn remove(&mut self, node: NodeId) {
        self.unlink(node);
    }

    fn head(&self) -> Option<NodeId> {
        self.nodes.contains_key(&self.head).then_some(self.head)
    }

    fn body(&self) -> Option<NodeId> {
        self.nodes.contains_key(&self.body).then_some(self.body)
    }

    fn bounding_top(&self, node: NodeId) -> Option<f64> {
        self.nodes.get(&node).and_then(|n| n.layout_top)
    }

    fn viewport_height(&self) -> f64 {
        self.viewport_height
    }

    fn base_url(&self) -> Option<String> {
        Some(self.url.clone())
    }

    fn observe_mutations(&mut self) {
        self.observing = true;
    }

    fn take_mutations(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.mutations)
    }

    fn checkpoint(&mut self) {
        for node in std::mem::take(&mut self.pending_loads) {
            if !self.is_connected(node) {
                continue;
            }
            let Some(n) = self.nodes.get(&node) else {
                continue;
            };
            if !matches!(n.tag.as_str(), "script" | "iframe" | "img") {
                continue;
            }
            let Some(src) = n.attr("src").filter(|s| !s.is_empty()) else {
                continue;
            };
            if !self.started.insert((node, src.to_string())) {
                continue;
            }
            self.loads.push(LoadRecord {
                node,
                tag: n.tag.clone(),
                url: src.to_string(),
                lazy: n.attr("loading") == Some("lazy"),
            });
        }
    }
}
