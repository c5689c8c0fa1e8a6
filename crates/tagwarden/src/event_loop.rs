//! Cooperative virtual-time event loop.
//!
//! Timers, idle callbacks and event listeners are registered here and handed
//! back to the engine as [`Task`] values when they come due. Time only moves
//! when the driver calls [`EventLoop::pop_due`], so tests control it exactly.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::Tier;

/// Work the engine scheduled for later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {
    /// Idle trigger (idle callback or its timer fallback).
    Idle,
    /// Delay-tier timeout.
    Delayed,
    /// Re-arm the idle trigger after the load milestone.
    RearmIdle,
    /// Drain a tier whose trigger already fired.
    Drain(Tier),
}

/// Cancellable handle for a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(u64);

/// User interaction events the engine listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    PointerDown,
    MouseDown,
    MouseMove,
    TouchStart,
    Scroll,
    Wheel,
    KeyDown,
    Click,
}

impl InteractionKind {
    pub const ALL: [InteractionKind; 8] = [
        InteractionKind::PointerDown,
        InteractionKind::MouseDown,
        InteractionKind::MouseMove,
        InteractionKind::TouchStart,
        InteractionKind::Scroll,
        InteractionKind::Wheel,
        InteractionKind::KeyDown,
        InteractionKind::Click,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionKind::PointerDown => "pointerdown",
            InteractionKind::MouseDown => "mousedown",
            InteractionKind::MouseMove => "mousemove",
            InteractionKind::TouchStart => "touchstart",
            InteractionKind::Scroll => "scroll",
            InteractionKind::Wheel => "wheel",
            InteractionKind::KeyDown => "keydown",
            InteractionKind::Click => "click",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

/// Listener registration options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ListenerOptions {
    pub capture: bool,
    pub passive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Listener {
    pub id: u64,
    pub kind: InteractionKind,
    pub options: ListenerOptions,
}

/// Virtual-time task queue.
#[derive(Debug)]
pub struct EventLoop {
    now_ms: u64,
    next_id: u64,
    /// `(due_ms, handle)`; handles are allocated monotonically, so ties run
    /// in registration order.
    timers: BinaryHeap<Reverse<(u64, TaskHandle)>>,
    tasks: std::collections::HashMap<TaskHandle, Task>,
    cancelled: HashSet<TaskHandle>,
    /// Pending idle callbacks, in registration order.
    idle_waiters: Vec<TaskHandle>,
    idle_supported: bool,
    listeners: Vec<Listener>,
}

impl EventLoop {
    pub fn new(idle_supported: bool) -> Self {
        Self {
            now_ms: 0,
            next_id: 1,
            timers: BinaryHeap::new(),
            tasks: std::collections::HashMap::new(),
            cancelled: HashSet::new(),
            idle_waiters: Vec::new(),
            idle_supported,
            listeners: Vec::new(),
        }
    }

    /// Current virtual time in milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub fn idle_supported(&self) -> bool {
        self.idle_supported
    }

    fn alloc(&mut self) -> TaskHandle {
        let h = TaskHandle(self.next_id);
        self.next_id += 1;
        h
    }

    pub fn set_timeout(&mut self, delay: Duration, task: Task) -> TaskHandle {
        let handle = self.alloc();
        let due = self.now_ms.saturating_add(delay.as_millis() as u64);
        self.timers.push(Reverse((due, handle)));
        self.tasks.insert(handle, task);
        handle
    }

    /// Run `task` at the next idle period, or after `timeout` at the latest.
    ///
    /// Without idle support this is a plain timer.
    pub fn request_idle(&mut self, timeout: Duration, task: Task) -> TaskHandle {
        let handle = self.set_timeout(timeout, task);
        if self.idle_supported {
            self.idle_waiters.push(handle);
        }
        handle
    }

    /// Cancel a pending task. Returns false if it already ran or was cancelled.
    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        if self.tasks.remove(&handle).is_some() {
            self.cancelled.insert(handle);
            self.idle_waiters.retain(|h| *h != handle);
            true
        } else {
            false
        }
    }

    pub fn is_pending(&self, handle: TaskHandle) -> bool {
        self.tasks.contains_key(&handle)
    }

    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// The host reports an idle period: every pending idle callback is due now.
    pub fn idle_period(&mut self) -> Vec<Task> {
        let waiters = std::mem::take(&mut self.idle_waiters);
        waiters
            .into_iter()
            .filter_map(|h| {
                let task = self.tasks.remove(&h)?;
                self.cancelled.insert(h);
                Some(task)
            })
            .collect()
    }

    /// Pop the next task due at or before `until`, advancing the clock to its
    /// due time. Returns `None` (and moves the clock to `until`) when nothing
    /// else is due.
    pub fn pop_due(&mut self, until: u64) -> Option<Task> {
        while let Some(Reverse((due, handle))) = self.timers.peek().copied() {
            if due > until {
                break;
            }
            self.timers.pop();
            if self.cancelled.remove(&handle) {
                continue;
            }
            let Some(task) = self.tasks.remove(&handle) else {
                continue;
            };
            self.idle_waiters.retain(|h| *h != handle);
            self.now_ms = self.now_ms.max(due);
            return Some(task);
        }
        self.now_ms = self.now_ms.max(until);
        None
    }

    pub fn add_listener(&mut self, kind: InteractionKind, options: ListenerOptions) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.listeners.push(Listener { id, kind, options });
        id
    }

    pub fn remove_listener(&mut self, id: u64) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| l.id != id);
        self.listeners.len() != before
    }

    pub fn has_listener(&self, kind: InteractionKind) -> bool {
        self.listeners.iter().any(|l| l.kind == kind)
    }

    pub fn listeners(&self) -> &[Listener] {
        &self.listeners
    }
}
