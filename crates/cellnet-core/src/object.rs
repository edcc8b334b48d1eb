//! Simulation objects: a cell's typed participation in a shared solver.
//!
//! A cell owns at most one object per [`SimulationKind`]. The graph drives
//! each object through the same rebuild sequence every time topology
//! changes:
//!
//! 1. [`SimObject::clear`] -- forget components placed in the old solver.
//! 2. placement links to same-kind neighbors are recorded on the slot.
//! 3. the slot is attached to the solver instance of its connected subset.
//! 4. [`SimObject::build`] -- place components into that instance.

use crate::id::{Locator, SimulationKind};
use crate::solver::{Solver, SolverSlot};
use std::any::Any;

// ---------------------------------------------------------------------------
// SimObject trait
// ---------------------------------------------------------------------------

pub trait SimObject: Send + std::fmt::Debug {
    fn kind(&self) -> SimulationKind;

    /// Locational policy for placement links. Evaluated on both ends; a link
    /// forms only if both objects accept.
    fn accepts_connection(&self, local: &Locator, remote: &Locator) -> bool {
        let _ = (local, remote);
        true
    }

    /// Drop all components placed during the previous build.
    fn clear(&mut self);

    /// Place components into the attached solver and wire them to the
    /// linked neighbors.
    fn build(&mut self, ctx: &mut PlacementContext<'_>);

    /// Release resources when the owning cell is destroyed.
    fn destroy(&mut self) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// What an object sees while placing itself into a solver.
pub struct PlacementContext<'a> {
    pub locator: &'a Locator,
    /// Neighbors this object formed placement links with, in neighbor order.
    pub links: &'a [Locator],
    pub solver: &'a mut dyn Solver,
}

// ---------------------------------------------------------------------------
// ObjectSlot
// ---------------------------------------------------------------------------

/// A simulation object plus the per-rebuild bookkeeping the graph keeps for it.
#[derive(Debug)]
pub struct ObjectSlot {
    object: Box<dyn SimObject>,
    links: Vec<Locator>,
    solver: Option<SolverSlot>,
}

impl ObjectSlot {
    pub fn new(object: Box<dyn SimObject>) -> Self {
        Self {
            object,
            links: Vec::new(),
            solver: None,
        }
    }

    pub fn kind(&self) -> SimulationKind {
        self.object.kind()
    }

    pub fn object(&self) -> &dyn SimObject {
        self.object.as_ref()
    }

    pub fn object_mut(&mut self) -> &mut dyn SimObject {
        self.object.as_mut()
    }

    pub fn links(&self) -> &[Locator] {
        &self.links
    }

    /// The solver instance this object was attached to by the last rebuild.
    pub fn solver(&self) -> Option<SolverSlot> {
        self.solver
    }

    /// Reset for a rebuild: no links, no solver, no placed components.
    pub(crate) fn clear(&mut self) {
        self.links.clear();
        self.solver = None;
        self.object.clear();
    }

    pub(crate) fn link(&mut self, remote: Locator) {
        if !self.links.contains(&remote) {
            self.links.push(remote);
        }
    }

    pub(crate) fn attach(&mut self, slot: SolverSlot) {
        self.solver = Some(slot);
    }

    /// Forget the solver without touching placed components. Used when a
    /// cell leaves its graph; the old instances are discarded wholesale.
    pub(crate) fn detach(&mut self) {
        self.links.clear();
        self.solver = None;
    }

    pub(crate) fn build(&mut self, locator: &Locator, solver: &mut dyn Solver) {
        let mut ctx = PlacementContext {
            locator,
            links: &self.links,
            solver,
        };
        self.object.build(&mut ctx);
    }

    pub(crate) fn destroy(&mut self) {
        self.links.clear();
        self.solver = None;
        self.object.destroy();
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.object.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.object.as_any_mut().downcast_mut::<T>()
    }
}
