//! Cellnet Core -- live networks of simulation cells with background ticking.
//!
//! This crate maintains a dynamic graph of connected cells (units that take
//! part in electrical and thermal simulation), keeps each connected network
//! in its own [`graph::CellGraph`], and runs a fixed-timestep simulation
//! over every network concurrently with the host's control thread.
//!
//! # Topology
//!
//! Cells are inserted and removed through the registry
//! ([`manager::CellGraphManager`]). Insertion merges every network the new
//! cell touches into one; removal of a cut vertex splits its network into
//! one graph per remaining component:
//!
//! ```rust,ignore
//! let graph = manager.insert_cell(cell)?;
//! let removed = manager.remove_cell(&locator)?;
//! ```
//!
//! # Tick
//!
//! Each running graph owns one periodic task on the shared
//! [`pool::WorkerPool`]. A tick runs in three stages:
//!
//! 1. **Pre** -- behaviors subscribed to [`subscriber::Phase::Pre`] prepare
//!    solver inputs.
//! 2. **Solve** -- every solver instance steps once by the fixed timestep.
//! 3. **Post** -- behaviors subscribed to [`subscriber::Phase::Post`] react to
//!    solver outputs.
//!
//! # Mutation discipline
//!
//! Topology changes require the target graph to be stopped and the caller to
//! be on the designated mutation thread ([`thread::MutationGuard`]).
//! Violations are returned as errors before anything is mutated.
//!
//! # Key Types
//!
//! - [`cell::Cell`] -- a node with simulation objects, behaviors, and hooks.
//! - [`graph::CellGraph`] -- one connected network, its solvers and tick lock.
//! - [`manager::CellGraphManager`] -- registry, persistence, and lifecycle.
//! - [`solver::Solver`] -- injected physics per connected subset and kind.
//! - [`serialize`] -- versioned persistence via bitcode.

pub mod behavior;
pub mod cell;
pub mod config;
pub mod connections;
pub mod container;
pub mod graph;
pub mod id;
pub mod manager;
pub mod object;
pub mod pool;
pub mod serialize;
pub mod solver;
pub mod subscriber;
pub mod thread;
pub mod validation;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
