//! Deferred-execution queues.

use serde::Serialize;

use crate::dom::NodeId;
use crate::types::{TagKind, Tier};

/// One deferred element, captured when it was intercepted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedResource {
    /// The element the page created or inserted.
    pub original: NodeId,
    /// Resolved source URL.
    pub url: String,
    pub kind: TagKind,
    /// Attributes other than `src`, in their original order.
    pub attributes: Vec<(String, String)>,
    /// Parent at enqueue time; `None` for elements that were never inserted.
    pub parent: Option<NodeId>,
    /// Next sibling at enqueue time.
    pub next_sibling: Option<NodeId>,
}

impl QueuedResource {
    /// Set or replace an attribute, keeping its original position.
    pub fn set_attribute(&mut self, name: &str, value: &str) {
        if name.eq_ignore_ascii_case("src") {
            return;
        }
        let name = name.to_ascii_lowercase();
        match self.attributes.iter_mut().find(|(k, _)| *k == name) {
            Some((_, v)) => *v = value.to_string(),
            None => self.attributes.push((name, value.to_string())),
        }
    }

    pub fn remove_attribute(&mut self, name: &str) {
        let name = name.to_ascii_lowercase();
        self.attributes.retain(|(k, _)| *k != name);
    }
}

/// FIFO queues for the tiers that defer execution.
#[derive(Debug, Default)]
pub struct TierQueues {
    defer: Vec<QueuedResource>,
    delay: Vec<QueuedResource>,
}

impl TierQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append in encounter order. Returns false for tiers without a queue.
    pub fn enqueue(&mut self, tier: Tier, resource: QueuedResource) -> bool {
        match self.queue_mut(tier) {
            Some(q) => {
                q.push(resource);
                true
            }
            None => false,
        }
    }

    /// Take the whole queue, leaving an empty one behind.
    pub fn take(&mut self, tier: Tier) -> Vec<QueuedResource> {
        self.queue_mut(tier).map(std::mem::take).unwrap_or_default()
    }

    pub fn len(&self, tier: Tier) -> usize {
        match tier {
            Tier::Defer => self.defer.len(),
            Tier::Delay => self.delay.len(),
            Tier::Allow | Tier::Block => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.defer.is_empty() && self.delay.is_empty()
    }

    /// Find the queued record for an original element, in any tier.
    pub fn find_mut(&mut self, original: NodeId) -> Option<&mut QueuedResource> {
        self.defer
            .iter_mut()
            .chain(self.delay.iter_mut())
            .find(|r| r.original == original)
    }

    pub fn iter(&self, tier: Tier) -> impl Iterator<Item = &QueuedResource> {
        let q: &[QueuedResource] = match tier {
            Tier::Defer => &self.defer,
            Tier::Delay => &self.delay,
            Tier::Allow | Tier::Block => &[],
        };
        q.iter()
    }

    fn queue_mut(&mut self, tier: Tier) -> Option<&mut Vec<QueuedResource>> {
        match tier {
            Tier::Defer => Some(&mut self.defer),
            Tier::Delay => Some(&mut self.delay),
            Tier::Allow | Tier::Block => None,
        }
    }
}
