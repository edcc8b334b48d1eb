//! Per-graph subscriber pool driving behavior callbacks each tick.
//!
//! Every subscription names an owning cell, one of that cell's behaviors, a
//! [`Phase`], and a priority. Within a phase, lower priorities run first and
//! equal priorities keep subscription order. A tick runs all `Pre`
//! subscribers, steps the solvers, then runs all `Post` subscribers.

use crate::id::{Locator, SubscriptionId};

// ---------------------------------------------------------------------------
// Phase, scope, spec
// ---------------------------------------------------------------------------

/// Which side of the solver step a callback runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// Before solvers step: prepare solver inputs.
    Pre,
    /// After solvers step: react to solver outputs.
    Post,
}

/// Lifetime a subscription is tied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionScope {
    /// Lives while the cell is a member of the current graph. Re-created on
    /// every graph change.
    Graph,
    /// Lives while the host has the cell's container present (loaded).
    Presence,
}

/// A behavior's request for one callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberSpec {
    pub phase: Phase,
    pub priority: i32,
    /// Passed back to the behavior so one behavior can tell its own
    /// callbacks apart.
    pub hook: u32,
}

impl SubscriberSpec {
    pub fn pre(priority: i32) -> Self {
        Self {
            phase: Phase::Pre,
            priority,
            hook: 0,
        }
    }

    pub fn post(priority: i32) -> Self {
        Self {
            phase: Phase::Post,
            priority,
            hook: 0,
        }
    }

    pub fn with_hook(mut self, hook: u32) -> Self {
        self.hook = hook;
        self
    }
}

// ---------------------------------------------------------------------------
// SubscriberPool
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Subscription {
    id: SubscriptionId,
    owner: Locator,
    behavior: usize,
    spec: SubscriberSpec,
    scope: SubscriptionScope,
}

/// One callback to invoke, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberTarget {
    pub id: SubscriptionId,
    pub owner: Locator,
    /// Index into the owner's behavior container.
    pub behavior: usize,
    pub hook: u32,
}

/// The scheduler for one graph.
///
/// Entries are kept sorted by `(phase, priority, id)`; ids are issued
/// monotonically, which makes ordering among equal priorities stable.
#[derive(Debug, Default)]
pub struct SubscriberPool {
    entries: Vec<Subscription>,
    next_id: u64,
}

impl SubscriberPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &mut self,
        owner: Locator,
        behavior: usize,
        spec: SubscriberSpec,
        scope: SubscriptionScope,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        let key = (spec.phase, spec.priority, id);
        let at = self
            .entries
            .partition_point(|e| (e.spec.phase, e.spec.priority, e.id) < key);
        self.entries.insert(
            at,
            Subscription {
                id,
                owner,
                behavior,
                spec,
                scope,
            },
        );
        id
    }

    /// Remove one subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        match self.entries.iter().position(|e| e.id == id) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Remove every subscription owned by `owner`, in any scope.
    pub fn remove_owner(&mut self, owner: &Locator) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.owner != *owner);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count_in_scope(&self, owner: &Locator, scope: SubscriptionScope) -> usize {
        self.entries
            .iter()
            .filter(|e| e.owner == *owner && e.scope == scope)
            .count()
    }

    /// Callbacks for `phase` in execution order.
    ///
    /// Returned by value so callers can run them while mutating the cells
    /// that own them.
    pub fn targets(&self, phase: Phase) -> Vec<SubscriberTarget> {
        self.entries
            .iter()
            .filter(|e| e.spec.phase == phase)
            .map(|e| SubscriberTarget {
                id: e.id,
                owner: e.owner,
                behavior: e.behavior,
                hook: e.spec.hook,
            })
            .collect()
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }
}
