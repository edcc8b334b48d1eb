//! Behaviors: composable per-tick logic attached to a cell.
//!
//! A behavior declares the callbacks it wants through
//! [`Behavior::subscriptions`] (graph lifetime) and
//! [`Behavior::presence_subscriptions`] (host presence lifetime). The owning
//! cell registers them into its graph's
//! [`SubscriberPool`](crate::subscriber::SubscriberPool) whenever its graph
//! changes. At most one behavior of each concrete type lives in a cell;
//! siblings are reached by type through [`BehaviorContext::sibling`].

use crate::container::CellEnvironment;
use crate::id::{Locator, SimulationKind};
use crate::object::ObjectSlot;
use crate::solver::{Solver, SolverInstance};
use crate::subscriber::{Phase, SubscriberSpec};
use std::any::{Any, TypeId};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BehaviorError {
    /// A behavior of this type is already attached to the cell.
    #[error("duplicate behavior type {0}")]
    Duplicate(&'static str),
    /// A required sibling behavior is missing.
    #[error("missing sibling behavior {0}")]
    MissingSibling(&'static str),
    /// A solver-derived value was read before the cell joined a solver.
    #[error("{0:?} solver not attached")]
    NotReady(SimulationKind),
    #[error("behavior failed: {0}")]
    Failed(String),
}

// ---------------------------------------------------------------------------
// Behavior trait
// ---------------------------------------------------------------------------

pub trait Behavior: Send + std::fmt::Debug {
    fn name(&self) -> &str;

    /// Callbacks tied to graph membership.
    fn subscriptions(&self) -> Vec<SubscriberSpec> {
        Vec::new()
    }

    /// Callbacks tied to host presence (only active while the container is loaded).
    fn presence_subscriptions(&self) -> Vec<SubscriberSpec> {
        Vec::new()
    }

    /// Invoked for every subscribed callback. `ctx.phase` and `ctx.hook`
    /// identify which one.
    fn on_tick(&mut self, ctx: &mut BehaviorContext<'_>) -> Result<(), BehaviorError> {
        let _ = ctx;
        Ok(())
    }

    /// Release resources when the owning cell is destroyed.
    fn destroy(&mut self) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

// ---------------------------------------------------------------------------
// BehaviorContainer
// ---------------------------------------------------------------------------

/// Ordered, type-unique set of behaviors owned by one cell.
#[derive(Debug, Default)]
pub struct BehaviorContainer {
    behaviors: Vec<Box<dyn Behavior>>,
    types: Vec<TypeId>,
}

impl BehaviorContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a behavior. A second behavior of the same type is rejected.
    pub fn insert<B: Behavior + 'static>(&mut self, behavior: B) -> Result<usize, BehaviorError> {
        let type_id = TypeId::of::<B>();
        if self.types.contains(&type_id) {
            return Err(BehaviorError::Duplicate(std::any::type_name::<B>()));
        }
        self.types.push(type_id);
        self.behaviors.push(Box::new(behavior));
        Ok(self.behaviors.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Behavior> {
        self.behaviors.iter().map(|b| b.as_ref())
    }

    pub fn get<B: Behavior + 'static>(&self) -> Option<&B> {
        let index = self.index_of::<B>()?;
        self.behaviors[index].as_any().downcast_ref::<B>()
    }

    pub fn get_mut<B: Behavior + 'static>(&mut self) -> Option<&mut B> {
        let index = self.index_of::<B>()?;
        self.behaviors[index].as_any_mut().downcast_mut::<B>()
    }

    fn index_of<B: 'static>(&self) -> Option<usize> {
        let type_id = TypeId::of::<B>();
        self.types.iter().position(|t| *t == type_id)
    }

    /// Borrow one behavior mutably and all others immutably.
    pub fn split_mut(&mut self, index: usize) -> Option<(&mut dyn Behavior, Siblings<'_>)> {
        if index >= self.behaviors.len() {
            return None;
        }
        let (before, rest) = self.behaviors.split_at_mut(index);
        let (target, after) = rest.split_first_mut()?;
        Some((target.as_mut(), Siblings { before, after }))
    }

    pub(crate) fn destroy_all(&mut self) {
        for behavior in &mut self.behaviors {
            behavior.destroy();
        }
    }
}

/// Read-only view of the behaviors next to the one currently running.
#[derive(Debug, Clone, Copy)]
pub struct Siblings<'a> {
    before: &'a [Box<dyn Behavior>],
    after: &'a [Box<dyn Behavior>],
}

impl<'a> Siblings<'a> {
    pub fn get<B: Behavior + 'static>(&self) -> Option<&'a B> {
        self.before
            .iter()
            .chain(self.after.iter())
            .find_map(|b| b.as_any().downcast_ref::<B>())
    }
}

// ---------------------------------------------------------------------------
// BehaviorContext
// ---------------------------------------------------------------------------

/// Everything a behavior callback may touch during a tick: its own cell's
/// simulation objects, the solvers those objects are attached to, and its
/// sibling behaviors.
pub struct BehaviorContext<'a> {
    /// Fixed simulated timestep in seconds.
    pub dt: f64,
    pub phase: Phase,
    pub hook: u32,
    /// Index of the tick being run.
    pub tick: u64,
    locator: Locator,
    environment: &'a CellEnvironment,
    objects: &'a mut [ObjectSlot],
    solvers: &'a mut [SolverInstance],
    siblings: Siblings<'a>,
}

impl<'a> BehaviorContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        dt: f64,
        phase: Phase,
        hook: u32,
        tick: u64,
        locator: Locator,
        environment: &'a CellEnvironment,
        objects: &'a mut [ObjectSlot],
        solvers: &'a mut [SolverInstance],
        siblings: Siblings<'a>,
    ) -> Self {
        Self {
            dt,
            phase,
            hook,
            tick,
            locator,
            environment,
            objects,
            solvers,
            siblings,
        }
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    pub fn environment(&self) -> &CellEnvironment {
        self.environment
    }

    /// This cell's simulation object of concrete type `T`.
    pub fn object<T: Any>(&self) -> Option<&T> {
        self.objects.iter().find_map(|slot| slot.downcast_ref::<T>())
    }

    pub fn object_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.objects.iter_mut().find_map(|slot| slot.downcast_mut::<T>())
    }

    /// The solver this cell's `kind` object is attached to, or `None` if the
    /// cell has no such object or the graph has not been built yet.
    pub fn solver(&self, kind: SimulationKind) -> Option<&dyn Solver> {
        let slot = self
            .objects
            .iter()
            .find(|o| o.kind() == kind)
            .and_then(|o| o.solver())?;
        let instance = self.solvers.get(slot.0)?;
        Some(instance.solver.as_ref())
    }

    pub fn solver_mut(&mut self, kind: SimulationKind) -> Option<&mut dyn Solver> {
        let slot = self
            .objects
            .iter()
            .find(|o| o.kind() == kind)
            .and_then(|o| o.solver())?;
        let instance = self.solvers.get_mut(slot.0)?;
        let solver: &mut dyn Solver = instance.solver.as_mut();
        Some(solver)
    }

    /// Like [`solver`](Self::solver) but as a `Result` for `?` chains.
    pub fn require_solver(&self, kind: SimulationKind) -> Result<&dyn Solver, BehaviorError> {
        self.solver(kind).ok_or(BehaviorError::NotReady(kind))
    }

    pub fn sibling<B: Behavior + 'static>(&self) -> Option<&'a B> {
        self.siblings.get::<B>()
    }
}
