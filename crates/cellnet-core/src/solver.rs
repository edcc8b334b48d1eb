//! Injected solver abstraction.
//!
//! The core never computes physical quantities itself. A [`SolverFactory`]
//! supplied by the host creates one [`Solver`] per connected subset of cells
//! per [`SimulationKind`]; cells place their components into it during a
//! graph rebuild and the graph steps it once per tick.

use crate::id::{Locator, SimulationKind};
use std::any::Any;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure of a single solver step. Always recoverable: the graph keeps
/// ticking and the instance is stepped again next tick.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SolveError {
    #[error("solver did not converge after {iterations} iterations")]
    NotConverged { iterations: u32 },
    #[error("system matrix is singular")]
    Singular,
    #[error("solver failure: {0}")]
    Other(String),
}

// ---------------------------------------------------------------------------
// Solver trait
// ---------------------------------------------------------------------------

/// One realized solver instance shared by a connected subset of cells.
pub trait Solver: Send + std::fmt::Debug {
    fn kind(&self) -> SimulationKind;

    /// Advance by `dt` simulated seconds.
    fn step(&mut self, dt: f64) -> Result<(), SolveError>;

    /// Whether the system as placed has a unique solution.
    fn is_well_constrained(&self) -> bool;

    /// Whether a reference (ground) node exists. Only meaningful for
    /// electrical instances; other kinds report `true`.
    fn has_reference(&self) -> bool {
        true
    }

    /// Ground one terminal of an arbitrary voltage-defining component.
    /// Returns `false` when the instance contains no such component.
    fn ground_any_source(&mut self) -> bool {
        false
    }

    /// Number of components currently placed.
    fn component_count(&self) -> usize;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Creates empty solver instances on demand during graph rebuilds.
pub trait SolverFactory: Send + Sync {
    fn create(&self, kind: SimulationKind) -> Box<dyn Solver>;
}

impl<F> SolverFactory for F
where
    F: Fn(SimulationKind) -> Box<dyn Solver> + Send + Sync,
{
    fn create(&self, kind: SimulationKind) -> Box<dyn Solver> {
        self(kind)
    }
}

// ---------------------------------------------------------------------------
// SolverInstance
// ---------------------------------------------------------------------------

/// Index of a [`SolverInstance`] within its graph's current rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SolverSlot(pub usize);

/// A solver together with the subset of cells it was realized for.
#[derive(Debug)]
pub struct SolverInstance {
    pub kind: SimulationKind,
    /// Members of this connected subset, in discovery order.
    pub members: Vec<Locator>,
    pub solver: Box<dyn Solver>,
    /// Intentionally under-constrained. Step failures are expected and
    /// not reported every tick.
    pub floating: bool,
    /// Outcome of the most recent step.
    pub last_converged: bool,
}

impl SolverInstance {
    pub fn new(kind: SimulationKind, members: Vec<Locator>, solver: Box<dyn Solver>) -> Self {
        Self {
            kind,
            members,
            solver,
            floating: false,
            last_converged: true,
        }
    }
}
