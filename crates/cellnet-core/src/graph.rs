//! The cell graph: one connected network and its background simulation.
//!
//! A [`CellGraph`] owns its member cells, one solver instance per connected
//! subset per [`SimulationKind`], and a subscriber pool. Everything a tick
//! touches lives in [`GraphState`] behind a `parking_lot::Mutex`; that mutex
//! is the tick lock. The periodic job takes it for the whole tick, and
//! [`CellGraph::stop_simulation`] takes it before cancelling the job, so a
//! stop never returns while a tick is in flight.
//!
//! Membership changes and solver rebuilds require a stopped graph and the
//! designated mutation thread; both preconditions are checked before any
//! state is touched.

use crate::behavior::BehaviorError;
use crate::cell::{Cell, CellError};
use crate::id::{GraphId, Locator, SimulationKind};
use crate::pool::{panic_message, CancelToken, TaskHandle, WorkerPool};
use crate::solver::{SolverFactory, SolverInstance, SolverSlot};
use crate::subscriber::{Phase, SubscriberPool};
use crate::thread::{MutationGuard, WrongThread};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("{0} is running; stop it before mutating")]
    SimulationRunning(GraphId),
    #[error("{0} is not running")]
    NotRunning(GraphId),
    #[error("{0} is already running")]
    AlreadyRunning(GraphId),
    #[error(transparent)]
    WrongThread(#[from] WrongThread),
    #[error("{graph} already contains a cell at {locator}")]
    DuplicateLocator { graph: GraphId, locator: Locator },
    #[error("{graph} has no cell at {locator}")]
    CellNotFound { graph: GraphId, locator: Locator },
    #[error("{graph} still has {members} members")]
    NotEmpty { graph: GraphId, members: usize },
    #[error(transparent)]
    Cell(#[from] CellError),
}

/// Why a tick ended early.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TickError {
    #[error("behavior {behavior} of {locator} failed: {source}")]
    Behavior {
        locator: Locator,
        behavior: usize,
        source: BehaviorError,
    },
    #[error("panic: {0}")]
    Panic(String),
}

// ---------------------------------------------------------------------------
// Tick report
// ---------------------------------------------------------------------------

/// The stage of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TickStage {
    Pre,
    Solve,
    Post,
}

/// Outcome of one call to [`CellGraph::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Index of the tick that ran.
    pub tick: u64,
    /// Every electrical solver instance converged this tick.
    pub converged: bool,
    /// Set when a stage failed and the rest of the tick was skipped.
    pub aborted: Option<TickStage>,
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

/// Shared resources every graph of a domain is created with.
#[derive(Clone)]
pub struct GraphRuntime {
    pub pool: Arc<WorkerPool>,
    pub solvers: Arc<dyn SolverFactory>,
    pub guard: MutationGuard,
    /// Wall-clock period between ticks.
    pub period: Duration,
    /// Simulated seconds per tick.
    pub timestep: f64,
}

impl std::fmt::Debug for GraphRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphRuntime")
            .field("pool", &self.pool)
            .field("guard", &self.guard)
            .field("period", &self.period)
            .field("timestep", &self.timestep)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// GraphState
// ---------------------------------------------------------------------------

/// Everything guarded by the tick lock.
#[derive(Debug)]
pub struct GraphState {
    id: GraphId,
    cells: BTreeMap<Locator, Cell>,
    solvers: Vec<SolverInstance>,
    subscribers: SubscriberPool,
    timestep: f64,
    tick: u64,
    topology_version: u64,
}

impl GraphState {
    fn new(id: GraphId, timestep: f64) -> Self {
        Self {
            id,
            cells: BTreeMap::new(),
            solvers: Vec::new(),
            subscribers: SubscriberPool::new(),
            timestep,
            tick: 0,
            topology_version: 0,
        }
    }

    pub fn id(&self) -> GraphId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn contains(&self, locator: &Locator) -> bool {
        self.cells.contains_key(locator)
    }

    pub fn cell(&self, locator: &Locator) -> Option<&Cell> {
        self.cells.get(locator)
    }

    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.values()
    }

    pub fn locators(&self) -> Vec<Locator> {
        self.cells.keys().copied().collect()
    }

    pub fn solvers(&self) -> &[SolverInstance] {
        &self.solvers
    }

    pub fn subscribers(&self) -> &SubscriberPool {
        &self.subscribers
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Incremented on every solver rebuild.
    pub fn topology_version(&self) -> u64 {
        self.topology_version
    }

    // -- Partitioning --------------------------------------------------------

    /// Maximal connected subsets of members supporting `kind`, using only
    /// edges between capable members. Seeds are taken in locator order.
    pub fn partition(&self, kind: SimulationKind) -> Vec<Vec<Locator>> {
        let mut visited = BTreeSet::new();
        let mut partitions = Vec::new();
        for (seed, cell) in &self.cells {
            if !cell.supports(kind) || visited.contains(seed) {
                continue;
            }
            visited.insert(*seed);
            let mut members = Vec::new();
            let mut queue = VecDeque::from([*seed]);
            while let Some(current) = queue.pop_front() {
                members.push(current);
                let Some(cell) = self.cells.get(&current) else {
                    continue;
                };
                for next in cell.neighbors() {
                    if visited.contains(next) {
                        continue;
                    }
                    if self.cells.get(next).is_some_and(|c| c.supports(kind)) {
                        visited.insert(*next);
                        queue.push_back(*next);
                    }
                }
            }
            partitions.push(members);
        }
        partitions
    }

    // -- Rebuild -------------------------------------------------------------

    fn build_solver(&mut self, factory: &dyn SolverFactory) {
        let mut instances = Vec::new();
        for kind in SimulationKind::ALL {
            for members in self.partition(kind) {
                instances.push(SolverInstance::new(kind, members, factory.create(kind)));
            }
        }

        for cell in self.cells.values_mut() {
            cell.clear_object_connections();
        }

        let mut links = Vec::new();
        for cell in self.cells.values() {
            for remote in cell.neighbors() {
                let Some(other) = self.cells.get(remote) else {
                    continue;
                };
                for kind in cell.placement_links(other) {
                    links.push((*cell.locator(), kind, *remote));
                }
            }
        }
        for (local, kind, remote) in links {
            if let Some(cell) = self.cells.get_mut(&local) {
                cell.link_object(kind, remote);
            }
        }

        for (index, instance) in instances.iter().enumerate() {
            for member in &instance.members {
                if let Some(cell) = self.cells.get_mut(member) {
                    cell.attach_object(instance.kind, SolverSlot(index));
                }
            }
        }

        for cell in self.cells.values_mut() {
            cell.build(&mut instances);
        }

        for instance in instances
            .iter_mut()
            .filter(|i| i.kind == SimulationKind::Electrical)
        {
            let grounded = instance.solver.has_reference() || instance.solver.ground_any_source();
            if grounded && instance.solver.is_well_constrained() {
                continue;
            }
            instance.floating = true;
            if grounded {
                warn!(
                    graph = %self.id,
                    members = instance.members.len(),
                    "electrical instance is grounded but under-constrained; running floating"
                );
            } else {
                warn!(
                    graph = %self.id,
                    members = instance.members.len(),
                    "electrical instance has no reference and no source to ground; running floating"
                );
            }
        }

        self.solvers = instances;
        self.topology_version += 1;
        debug!(
            graph = %self.id,
            members = self.cells.len(),
            instances = self.solvers.len(),
            "solver rebuilt"
        );
    }

    // -- Tick ----------------------------------------------------------------

    /// One fixed tick: `Pre` subscribers, solver step, `Post` subscribers.
    pub(crate) fn run_tick(&mut self) -> TickReport {
        let mut report = TickReport {
            tick: self.tick,
            converged: true,
            aborted: None,
        };
        self.tick += 1;

        if self.run_stage(TickStage::Pre, |s| s.run_phase(Phase::Pre)).is_none() {
            report.aborted = Some(TickStage::Pre);
            return report;
        }
        match self.run_stage(TickStage::Solve, |s| Ok(s.step_solvers())) {
            Some(converged) => report.converged = converged,
            None => {
                report.converged = false;
                report.aborted = Some(TickStage::Solve);
                return report;
            }
        }
        if self.run_stage(TickStage::Post, |s| s.run_phase(Phase::Post)).is_none() {
            report.aborted = Some(TickStage::Post);
        }
        report
    }

    fn run_stage<T>(
        &mut self,
        stage: TickStage,
        f: impl FnOnce(&mut Self) -> Result<T, TickError>,
    ) -> Option<T> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(&mut *self)))
            .unwrap_or_else(|payload| Err(TickError::Panic(panic_message(&*payload))));
        match outcome {
            Ok(value) => Some(value),
            Err(e) => {
                error!(graph = %self.id, stage = ?stage, tick = self.tick, "tick aborted: {e}");
                None
            }
        }
    }

    fn run_phase(&mut self, phase: Phase) -> Result<(), TickError> {
        let dt = self.timestep;
        let tick = self.tick;
        for target in self.subscribers.targets(phase) {
            let Some(cell) = self.cells.get_mut(&target.owner) else {
                continue;
            };
            cell.run_behavior(target.behavior, target.hook, phase, dt, tick, &mut self.solvers)
                .map_err(|source| TickError::Behavior {
                    locator: target.owner,
                    behavior: target.behavior,
                    source,
                })?;
        }
        Ok(())
    }

    fn step_solvers(&mut self) -> bool {
        let mut converged = true;
        for instance in &mut self.solvers {
            match instance.solver.step(self.timestep) {
                Ok(()) => instance.last_converged = true,
                Err(e) => {
                    instance.last_converged = false;
                    if instance.kind == SimulationKind::Electrical {
                        converged = false;
                    }
                    if !instance.floating {
                        warn!(graph = %self.id, kind = ?instance.kind, "solver step failed: {e}");
                    }
                }
            }
        }
        converged
    }
}

// ---------------------------------------------------------------------------
// CellGraph
// ---------------------------------------------------------------------------

pub struct CellGraph {
    id: GraphId,
    state: Arc<Mutex<GraphState>>,
    task: Option<TaskHandle>,
    runtime: GraphRuntime,
    dirty: bool,
}

impl std::fmt::Debug for CellGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellGraph")
            .field("id", &self.id)
            .field("running", &self.is_running())
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

impl CellGraph {
    pub fn new(id: GraphId, runtime: GraphRuntime) -> Self {
        Self {
            id,
            state: Arc::new(Mutex::new(GraphState::new(id, runtime.timestep))),
            task: None,
            runtime,
            dirty: false,
        }
    }

    pub fn id(&self) -> GraphId {
        self.id
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Membership changed since the last [`mark_clean`](Self::mark_clean).
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().is_empty()
    }

    pub fn contains(&self, locator: &Locator) -> bool {
        self.state.lock().contains(locator)
    }

    pub fn locators(&self) -> Vec<Locator> {
        self.state.lock().locators()
    }

    pub fn tick(&self) -> u64 {
        self.state.lock().tick()
    }

    pub fn topology_version(&self) -> u64 {
        self.state.lock().topology_version()
    }

    /// Inspect the graph under the tick lock. Blocks while a tick runs.
    pub fn with_state<R>(&self, f: impl FnOnce(&GraphState) -> R) -> R {
        f(&self.state.lock())
    }

    pub fn with_cell<R>(
        &self,
        locator: &Locator,
        f: impl FnOnce(&Cell) -> R,
    ) -> Result<R, GraphError> {
        let state = self.state.lock();
        let cell = state.cells.get(locator).ok_or(GraphError::CellNotFound {
            graph: self.id,
            locator: *locator,
        })?;
        Ok(f(cell))
    }

    /// Realized per-kind partitioning from the last rebuild.
    pub fn partitions(&self, kind: SimulationKind) -> Vec<Vec<Locator>> {
        self.state
            .lock()
            .solvers
            .iter()
            .filter(|i| i.kind == kind)
            .map(|i| i.members.clone())
            .collect()
    }

    fn check_mutable(&self) -> Result<(), GraphError> {
        self.runtime.guard.check()?;
        if self.is_running() {
            return Err(GraphError::SimulationRunning(self.id));
        }
        Ok(())
    }

    // -- Membership ----------------------------------------------------------

    pub fn add_cell(&mut self, mut cell: Cell) -> Result<(), GraphError> {
        self.check_mutable()?;
        let locator = *cell.locator();
        let mut state = self.state.lock();
        if state.cells.contains_key(&locator) {
            return Err(GraphError::DuplicateLocator {
                graph: self.id,
                locator,
            });
        }
        cell.set_graph(Some(self.id));
        state.cells.insert(locator, cell);
        self.dirty = true;
        Ok(())
    }

    /// Take a member out. Its subscriptions and solver attachment are
    /// dropped; edges are left to the caller.
    pub fn remove_cell(&mut self, locator: &Locator) -> Result<Cell, GraphError> {
        self.check_mutable()?;
        let mut state = self.state.lock();
        let state = &mut *state;
        let mut cell = state.cells.remove(locator).ok_or(GraphError::CellNotFound {
            graph: self.id,
            locator: *locator,
        })?;
        cell.detach_from_graph(&mut state.subscribers);
        self.dirty = true;
        Ok(cell)
    }

    /// Empty the graph, handing every member to the caller.
    pub(crate) fn take_cells(&mut self) -> Result<Vec<Cell>, GraphError> {
        self.check_mutable()?;
        let mut state = self.state.lock();
        let state = &mut *state;
        let cells = std::mem::take(&mut state.cells);
        let mut out = Vec::with_capacity(cells.len());
        for (_, mut cell) in cells {
            cell.detach_from_graph(&mut state.subscribers);
            out.push(cell);
        }
        state.solvers.clear();
        self.dirty = true;
        Ok(out)
    }

    /// Mutate a member while the graph is stopped.
    pub(crate) fn with_cell_mut<R>(
        &mut self,
        locator: &Locator,
        f: impl FnOnce(&mut Cell, &mut SubscriberPool) -> R,
    ) -> Result<R, GraphError> {
        self.check_mutable()?;
        self.locked_cell_mut(locator, f)
    }

    /// Mutate a member under the tick lock without stopping the graph.
    /// Used for presence binding, which never touches topology.
    pub(crate) fn locked_cell_mut<R>(
        &self,
        locator: &Locator,
        f: impl FnOnce(&mut Cell, &mut SubscriberPool) -> R,
    ) -> Result<R, GraphError> {
        self.runtime.guard.check()?;
        let mut state = self.state.lock();
        let state = &mut *state;
        let cell = state
            .cells
            .get_mut(locator)
            .ok_or(GraphError::CellNotFound {
                graph: self.id,
                locator: *locator,
            })?;
        Ok(f(cell, &mut state.subscribers))
    }

    pub(crate) fn update_cell(
        &mut self,
        locator: &Locator,
        connections_changed: bool,
        graph_changed: bool,
    ) -> Result<(), GraphError> {
        self.with_cell_mut(locator, |cell, pool| {
            cell.update(connections_changed, graph_changed, pool)
        })
    }

    /// Run `f` on every member in locator order under the tick lock.
    /// Lifecycle hooks only; never topology.
    pub(crate) fn for_each_cell(
        &self,
        mut f: impl FnMut(&mut Cell, &mut SubscriberPool),
    ) -> Result<(), GraphError> {
        self.runtime.guard.check()?;
        let mut state = self.state.lock();
        let state = &mut *state;
        for cell in state.cells.values_mut() {
            f(cell, &mut state.subscribers);
        }
        Ok(())
    }

    // -- Solver --------------------------------------------------------------

    /// Partition members per kind and realize fresh solver instances.
    pub fn build_solver(&mut self) -> Result<(), GraphError> {
        self.check_mutable()?;
        let factory = Arc::clone(&self.runtime.solvers);
        self.state.lock().build_solver(factory.as_ref());
        Ok(())
    }

    /// Run one tick on the calling thread. Takes the tick lock.
    pub fn update(&self) -> TickReport {
        self.state.lock().run_tick()
    }

    // -- Start / stop --------------------------------------------------------

    pub fn start_simulation(&mut self) -> Result<(), GraphError> {
        self.runtime.guard.check()?;
        if self.task.is_some() {
            return Err(GraphError::AlreadyRunning(self.id));
        }
        let token = CancelToken::new();
        let job_token = token.clone();
        let state = Arc::clone(&self.state);
        let handle = self.runtime.pool.schedule(
            self.id.to_string(),
            self.runtime.period,
            token,
            Box::new(move || {
                let mut state = state.lock();
                if job_token.is_cancelled() {
                    return;
                }
                state.run_tick();
            }),
        );
        self.task = Some(handle);
        debug!(graph = %self.id, "simulation started");
        Ok(())
    }

    /// Cancel the periodic tick. Blocks until an in-flight tick completes.
    pub fn stop_simulation(&mut self) -> Result<(), GraphError> {
        self.runtime.guard.check()?;
        let handle = self.task.take().ok_or(GraphError::NotRunning(self.id))?;
        let state = self.state.lock();
        handle.cancel();
        drop(state);
        debug!(graph = %self.id, "simulation stopped");
        Ok(())
    }

    /// Stop if running, run `f`, restart if it was running.
    pub fn run_suspended<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> R,
    ) -> Result<R, GraphError> {
        let was_running = self.is_running();
        if was_running {
            self.stop_simulation()?;
        }
        let out = f(self);
        if was_running {
            self.start_simulation()?;
        }
        Ok(out)
    }
}

impl Drop for CellGraph {
    fn drop(&mut self) {
        if let Some(handle) = self.task.take() {
            let _state = self.state.lock();
            handle.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::Solver;
    use crate::test_utils::*;
    use std::sync::atomic::Ordering;

    fn link(graph: &mut CellGraph, a: Locator, b: Locator) {
        graph.with_cell_mut(&a, |c, _| c.connect(b)).unwrap().unwrap();
        graph.with_cell_mut(&b, |c, _| c.connect(a)).unwrap().unwrap();
    }

    fn chain(graph: &mut CellGraph, cells: Vec<Cell>) -> Vec<Locator> {
        let locators: Vec<Locator> = cells.iter().map(|c| *c.locator()).collect();
        for cell in cells {
            graph.add_cell(cell).unwrap();
        }
        for pair in locators.windows(2) {
            link(graph, pair[0], pair[1]);
        }
        locators
    }

    #[test]
    fn add_and_remove_mark_dirty() {
        let mut graph = CellGraph::new(GraphId(1), test_runtime());
        let container = TestContainer::new();
        graph.add_cell(make_cell(&container, 0, Kinds::ELECTRICAL)).unwrap();
        assert!(graph.is_dirty());
        graph.mark_clean();
        graph.remove_cell(&Locator::at(0, 0, 0)).unwrap();
        assert!(graph.is_dirty());
        assert!(graph.is_empty());
    }

    #[test]
    fn duplicate_locator_rejected() {
        let mut graph = CellGraph::new(GraphId(1), test_runtime());
        let container = TestContainer::new();
        graph.add_cell(make_cell(&container, 0, Kinds::NONE)).unwrap();
        let err = graph.add_cell(make_cell(&container, 0, Kinds::NONE)).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateLocator { .. }));
    }

    #[test]
    fn partitions_respect_capability() {
        let mut graph = CellGraph::new(GraphId(1), test_runtime());
        let container = TestContainer::new();
        // E+T, E, E+T: electrically one network, thermally two islands.
        chain(
            &mut graph,
            vec![
                make_cell(&container, 0, Kinds::BOTH),
                make_cell(&container, 1, Kinds::ELECTRICAL),
                make_cell(&container, 2, Kinds::BOTH),
            ],
        );
        graph.build_solver().unwrap();
        assert_eq!(graph.partitions(SimulationKind::Electrical).len(), 1);
        assert_eq!(graph.partitions(SimulationKind::Thermal).len(), 2);
    }

    #[test]
    fn rebuild_is_idempotent() {
        let mut graph = CellGraph::new(GraphId(1), test_runtime());
        let container = TestContainer::new();
        chain(
            &mut graph,
            (0..4).map(|x| make_cell(&container, x, Kinds::BOTH)).collect(),
        );
        graph.build_solver().unwrap();
        let first = graph.partitions(SimulationKind::Electrical);
        let version = graph.topology_version();
        graph.build_solver().unwrap();
        assert_eq!(graph.partitions(SimulationKind::Electrical), first);
        assert_eq!(graph.topology_version(), version + 1);
    }

    #[test]
    fn ungrounded_electrical_instance_is_floating() {
        let mut graph = CellGraph::new(GraphId(1), test_runtime());
        let container = TestContainer::new();
        chain(
            &mut graph,
            vec![
                make_cell(&container, 0, Kinds::ELECTRICAL),
                make_cell(&container, 1, Kinds::ELECTRICAL),
            ],
        );
        graph.build_solver().unwrap();
        graph.with_state(|s| {
            assert_eq!(s.solvers().len(), 1);
            assert!(s.solvers()[0].floating);
        });
    }

    #[test]
    fn source_gets_grounded() {
        let mut graph = CellGraph::new(GraphId(1), test_runtime());
        let container = TestContainer::new();
        chain(
            &mut graph,
            vec![
                make_source_cell(&container, 0),
                make_cell(&container, 1, Kinds::ELECTRICAL),
            ],
        );
        graph.build_solver().unwrap();
        graph.with_state(|s| {
            let instance = &s.solvers()[0];
            assert!(!instance.floating);
            let solver = instance.solver.as_any().downcast_ref::<TestSolver>().unwrap();
            assert!(solver.grounded);
            assert_eq!(solver.components.len(), 2);
        });
    }

    #[test]
    fn grounded_but_under_constrained_instance_is_floating() {
        let solvers: Arc<dyn SolverFactory> = Arc::new(|kind| {
            let mut solver = TestSolver::new(kind);
            solver.under_constrained = true;
            Box::new(solver) as Box<dyn Solver>
        });
        let runtime = GraphRuntime {
            solvers,
            ..test_runtime()
        };
        let mut graph = CellGraph::new(GraphId(1), runtime);
        let container = TestContainer::new();
        chain(
            &mut graph,
            vec![
                make_source_cell(&container, 0),
                make_cell(&container, 1, Kinds::ELECTRICAL),
            ],
        );
        graph.build_solver().unwrap();
        graph.with_state(|s| {
            let instance = &s.solvers()[0];
            assert!(instance.solver.has_reference());
            assert!(instance.floating);
        });
    }

    #[test]
    fn update_runs_phases_in_order() {
        let mut graph = CellGraph::new(GraphId(1), test_runtime());
        let container = TestContainer::new();
        let counter = TickCounter::new();
        let cell = make_counting_cell(&container, 0, &counter);
        graph.add_cell(cell).unwrap();
        graph.update_cell(&Locator::at(0, 0, 0), true, true).unwrap();
        graph.build_solver().unwrap();

        let report = graph.update();
        assert_eq!(report.tick, 0);
        assert!(report.aborted.is_none());
        assert_eq!(counter.pre.load(Ordering::SeqCst), 1);
        assert_eq!(counter.post.load(Ordering::SeqCst), 1);
        assert_eq!(graph.tick(), 1);
    }

    #[test]
    fn failing_solver_is_recorded_not_fatal() {
        let mut graph = CellGraph::new(GraphId(1), test_runtime());
        let container = TestContainer::new();
        graph.add_cell(make_source_cell(&container, 0)).unwrap();
        graph.build_solver().unwrap();
        {
            let mut state = graph.state.lock();
            let solver = state.solvers[0]
                .solver
                .as_any_mut()
                .downcast_mut::<TestSolver>()
                .unwrap();
            solver.fail = true;
        }
        let report = graph.update();
        assert!(!report.converged);
        assert!(report.aborted.is_none());
        let report = graph.update();
        assert_eq!(report.tick, 1);
    }

    #[test]
    fn panicking_behavior_aborts_only_that_tick() {
        let mut graph = CellGraph::new(GraphId(1), test_runtime());
        let container = TestContainer::new();
        let counter = TickCounter::new();
        counter.panic_on_pre.store(true, Ordering::SeqCst);
        graph.add_cell(make_counting_cell(&container, 0, &counter)).unwrap();
        graph.update_cell(&Locator::at(0, 0, 0), true, true).unwrap();

        let report = graph.update();
        assert_eq!(report.aborted, Some(TickStage::Pre));
        assert_eq!(counter.post.load(Ordering::SeqCst), 0);

        counter.panic_on_pre.store(false, Ordering::SeqCst);
        let report = graph.update();
        assert!(report.aborted.is_none());
        assert_eq!(counter.post.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mutation_while_running_is_rejected() {
        let mut graph = CellGraph::new(GraphId(1), test_runtime());
        let container = TestContainer::new();
        graph.start_simulation().unwrap();
        let err = graph.add_cell(make_cell(&container, 0, Kinds::NONE)).unwrap_err();
        assert_eq!(err, GraphError::SimulationRunning(GraphId(1)));
        assert_eq!(graph.build_solver(), Err(GraphError::SimulationRunning(GraphId(1))));
        graph.stop_simulation().unwrap();
        graph.add_cell(make_cell(&container, 0, Kinds::NONE)).unwrap();
    }

    #[test]
    fn start_stop_preconditions() {
        let mut graph = CellGraph::new(GraphId(3), test_runtime());
        assert_eq!(graph.stop_simulation(), Err(GraphError::NotRunning(GraphId(3))));
        graph.start_simulation().unwrap();
        assert_eq!(graph.start_simulation(), Err(GraphError::AlreadyRunning(GraphId(3))));
        graph.stop_simulation().unwrap();
        assert!(!graph.is_running());
    }

    #[test]
    fn run_suspended_restores_running_state() {
        let mut graph = CellGraph::new(GraphId(1), test_runtime());
        let container = TestContainer::new();
        graph.start_simulation().unwrap();
        graph
            .run_suspended(|g| g.add_cell(make_cell(&container, 0, Kinds::NONE)))
            .unwrap()
            .unwrap();
        assert!(graph.is_running());

        graph.stop_simulation().unwrap();
        graph.run_suspended(|g| assert!(!g.is_running())).unwrap();
        assert!(!graph.is_running());
    }

    #[test]
    fn mutation_from_other_thread_is_rejected() {
        let graph = Arc::new(Mutex::new(CellGraph::new(GraphId(1), test_runtime())));
        let container = TestContainer::new();
        let cell = make_cell(&container, 0, Kinds::NONE);
        let shared = Arc::clone(&graph);
        let err = std::thread::spawn(move || shared.lock().add_cell(cell).unwrap_err())
            .join()
            .unwrap();
        assert!(matches!(err, GraphError::WrongThread(_)));
        assert!(graph.lock().is_empty());
    }
}
