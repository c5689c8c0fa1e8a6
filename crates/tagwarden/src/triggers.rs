//! Trigger controller: racing, once-only flush triggers.
//!
//! | Trigger     | Flushes        | Condition                     |
//! |-------------|----------------|-------------------------------|
//! | interaction | defer + delay  | first interaction event       |
//! | idle        | defer          | interaction has not fired     |
//! | delayed     | delay          | interaction has not fired     |
//!
//! The controller only decides *which* tiers to flush; the engine does the
//! flushing. Because a flush always empties its queue, a trigger that loses
//! the race finds nothing left to run.

use std::collections::HashMap;
use std::time::Duration;

use crate::event_loop::{EventLoop, InteractionKind, ListenerOptions, Task, TaskHandle};
use crate::state::Milestones;
use crate::types::Tier;

#[derive(Debug, Default)]
pub struct TriggerController {
    listeners: Vec<u64>,
    idle: Option<TaskHandle>,
    delayed: Option<TaskHandle>,
    rearm: Option<TaskHandle>,
    rearmed: bool,
    drains: HashMap<Tier, TaskHandle>,
}

impl TriggerController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interaction listeners, the idle trigger and the delay timer.
    pub fn arm(&mut self, lp: &mut EventLoop, idle_timeout: Duration, delayed_timeout: Duration) {
        let options = ListenerOptions {
            capture: true,
            passive: true,
        };
        self.listeners = InteractionKind::ALL
            .into_iter()
            .map(|kind| lp.add_listener(kind, options))
            .collect();
        if !lp.idle_supported() {
            tracing::debug!("No idle callbacks; defer tier falls back to a {idle_timeout:?} timer");
        }
        self.idle = Some(lp.request_idle(idle_timeout, Task::Idle));
        self.delayed = Some(lp.set_timeout(delayed_timeout, Task::Delayed));
    }

    pub fn is_listening(&self) -> bool {
        !self.listeners.is_empty()
    }

    /// The page reached its load milestone: re-arm idle once, shortly after.
    pub fn on_load(&mut self, lp: &mut EventLoop, delay: Duration) {
        if self.rearmed || self.rearm.is_some() {
            return;
        }
        self.rearm = Some(lp.set_timeout(delay, Task::RearmIdle));
    }

    /// Second (and last) idle request, scheduled by [`on_load`](Self::on_load).
    pub fn rearm_idle(&mut self, lp: &mut EventLoop, idle_timeout: Duration, m: &Milestones) {
        self.rearm = None;
        if self.rearmed {
            return;
        }
        self.rearmed = true;
        if !m.idle_fired {
            self.idle = Some(lp.request_idle(idle_timeout, Task::Idle));
        }
    }

    /// First interaction flushes both queued tiers and detaches every listener.
    pub fn on_interaction(&mut self, lp: &mut EventLoop, m: &mut Milestones) -> Vec<Tier> {
        if m.user_interacted {
            return Vec::new();
        }
        m.user_interacted = true;
        for id in self.listeners.drain(..) {
            lp.remove_listener(id);
        }
        // Nothing is left for the timers to do.
        for handle in [self.idle.take(), self.delayed.take(), self.rearm.take()]
            .into_iter()
            .flatten()
        {
            lp.cancel(handle);
        }
        vec![Tier::Defer, Tier::Delay]
    }

    pub fn on_idle(&mut self, m: &mut Milestones) -> Vec<Tier> {
        self.idle = None;
        if m.idle_fired {
            return Vec::new();
        }
        m.idle_fired = true;
        if m.user_interacted {
            Vec::new()
        } else {
            vec![Tier::Defer]
        }
    }

    pub fn on_delayed(&mut self, m: &mut Milestones) -> Vec<Tier> {
        self.delayed = None;
        if m.delayed_fired {
            return Vec::new();
        }
        m.delayed_fired = true;
        if m.user_interacted {
            Vec::new()
        } else {
            vec![Tier::Delay]
        }
    }

    /// Whether the trigger that would flush `tier` has already come and gone.
    pub fn already_fired(tier: Tier, m: &Milestones) -> bool {
        match tier {
            Tier::Defer => m.user_interacted || m.idle_fired,
            Tier::Delay => m.user_interacted || m.delayed_fired,
            Tier::Allow | Tier::Block => false,
        }
    }

    /// Schedule a zero-delay drain for a late arrival, at most one per tier.
    pub fn schedule_drain(&mut self, lp: &mut EventLoop, tier: Tier) {
        if let Some(h) = self.drains.get(&tier) {
            if lp.is_pending(*h) {
                return;
            }
        }
        let h = lp.set_timeout(Duration::ZERO, Task::Drain(tier));
        self.drains.insert(tier, h);
    }

    pub fn drain_ran(&mut self, tier: Tier) {
        self.drains.remove(&tier);
    }
}
