//! Per-page engine state and the metrics snapshot exposed for debugging.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::dom::NodeId;
use crate::queue::TierQueues;
use crate::types::{Manifest, Tier};

/// One-shot milestones. Each flips to true at most once per page load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Milestones {
    pub manifest_loaded: bool,
    pub user_interacted: bool,
    pub idle_fired: bool,
    pub delayed_fired: bool,
}

/// Running totals of classification and execution outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub allowed: u64,
    pub blocked: u64,
    pub queued: u64,
    pub executed: u64,
    pub dropped: u64,
    pub lazy_marked: u64,
}

/// Everything the engine knows about the current page load.
#[derive(Debug, Default)]
pub struct EngineState {
    /// `None` until the manifest has been loaded (or the fallback applied).
    pub manifest: Option<Manifest>,
    pub milestones: Milestones,
    /// Nodes already classified; never processed twice.
    pub processed: HashSet<NodeId>,
    /// Images and iframes already marked for lazy loading.
    pub lazy: HashSet<NodeId>,
    pub queues: TierQueues,
    /// Named timing marks in virtual milliseconds; first write wins.
    pub marks: BTreeMap<String, u64>,
    pub counters: Counters,
}

impl EngineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a timing mark unless it already exists.
    pub fn mark(&mut self, name: &str, at_ms: u64) {
        self.marks.entry(name.to_string()).or_insert(at_ms);
    }

    /// Mark a node as classified. Returns false if it already was.
    pub fn claim(&mut self, node: NodeId) -> bool {
        self.processed.insert(node)
    }

    pub fn debug_enabled(&self) -> bool {
        self.manifest.as_ref().is_some_and(|m| m.debug)
    }
}

/// Which interception strategies are live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InterceptionStatus {
    pub creation_override: bool,
    pub mutation_fallback: bool,
}

/// Point-in-time view of the engine for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub active: bool,
    pub now_ms: u64,
    pub defer_queue: usize,
    pub delay_queue: usize,
    pub milestones: Milestones,
    pub counters: Counters,
    pub interception: InterceptionStatus,
    pub marks: BTreeMap<String, u64>,
}

impl MetricsSnapshot {
    pub fn queue_len(&self, tier: Tier) -> usize {
        match tier {
            Tier::Defer => self.defer_queue,
            Tier::Delay => self.delay_queue,
            Tier::Allow | Tier::Block => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marks_first_write_wins() {
        let mut s = EngineState::new();
        s.mark("idle-fired", 10);
        s.mark("idle-fired", 20);
        assert_eq!(s.marks["idle-fired"], 10);
    }

    #[test]
    fn test_claim_once() {
        let mut s = EngineState::new();
        assert!(s.claim(NodeId(4)));
        assert!(!s.claim(NodeId(4)));
    }
}
