//! Shared test helpers for unit and integration tests.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]`. Provides a
//! recording container with explicit adjacency, a solver that records what
//! was placed into it, simple simulation objects, a counting behavior, and
//! ready-made managers.

use crate::behavior::{Behavior, BehaviorContext, BehaviorError};
use crate::cell::{Cell, CellCreateInfo, CellError, CellFactory, CellInfo, CellLogic};
use crate::config::SimulationConfig;
use crate::container::{CellContainer, CellEnvironment, ContainerResolver};
use crate::graph::GraphRuntime;
use crate::id::{CellTypeId, Face, Locator, SimulationKind};
use crate::manager::CellGraphManager;
use crate::object::{PlacementContext, SimObject};
use crate::pool::WorkerPool;
use crate::solver::{SolveError, Solver, SolverFactory};
use crate::subscriber::{Phase, SubscriberSpec};
use crate::thread::MutationGuard;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

// ===========================================================================
// Cell types
// ===========================================================================

pub const INSULATOR_TYPE: CellTypeId = CellTypeId(40);
pub const SOURCE_TYPE: CellTypeId = CellTypeId(20);
pub const COUNTING_TYPE: CellTypeId = CellTypeId(30);

/// Which simulation objects a test cell carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Kinds {
    pub electrical: bool,
    pub thermal: bool,
}

impl Kinds {
    pub const NONE: Kinds = Kinds {
        electrical: false,
        thermal: false,
    };
    pub const ELECTRICAL: Kinds = Kinds {
        electrical: true,
        thermal: false,
    };
    pub const THERMAL: Kinds = Kinds {
        electrical: false,
        thermal: true,
    };
    pub const BOTH: Kinds = Kinds {
        electrical: true,
        thermal: true,
    };

    pub fn type_id(self) -> CellTypeId {
        CellTypeId(10 + u32::from(self.electrical) + 2 * u32::from(self.thermal))
    }

    fn from_type(type_id: CellTypeId) -> Option<Kinds> {
        match type_id.0 {
            10 => Some(Kinds::NONE),
            11 => Some(Kinds::ELECTRICAL),
            12 => Some(Kinds::THERMAL),
            13 => Some(Kinds::BOTH),
            _ => None,
        }
    }
}

// ===========================================================================
// Container
// ===========================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerEvent {
    Connected(Locator, Locator),
    Disconnected(Locator, Locator),
    TopologyChanged,
}

/// A container whose adjacency is either declared explicitly or derived
/// from the six axis neighbors of a locator.
#[derive(Debug, Default)]
pub struct TestContainer {
    spatial: bool,
    links: Mutex<HashMap<Locator, Vec<Locator>>>,
    cells: Mutex<Vec<Locator>>,
    events: Mutex<Vec<ContainerEvent>>,
}

impl TestContainer {
    /// Adjacency only where declared with [`adjacent`](Self::adjacent).
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every axis-aligned neighbor position is adjacent.
    pub fn spatial() -> Arc<Self> {
        Arc::new(Self {
            spatial: true,
            ..Self::default()
        })
    }

    pub fn adjacent(&self, a: Locator, b: Locator) {
        let mut links = self.links.lock();
        links.entry(a).or_default().push(b);
        links.entry(b).or_default().push(a);
    }

    pub fn register(&self, locator: Locator) {
        let mut cells = self.cells.lock();
        if !cells.contains(&locator) {
            cells.push(locator);
        }
    }

    pub fn events(&self) -> Vec<ContainerEvent> {
        self.events.lock().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    pub fn topology_changes(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| **e == ContainerEvent::TopologyChanged)
            .count()
    }
}

impl CellContainer for TestContainer {
    fn cells(&self) -> Vec<Locator> {
        self.cells.lock().clone()
    }

    fn neighbor_scan(&self, locator: &Locator) -> Vec<Locator> {
        if self.spatial {
            return Face::ALL.iter().map(|face| locator.offset(*face)).collect();
        }
        self.links.lock().get(locator).cloned().unwrap_or_default()
    }

    fn on_cell_connected(&self, local: &Locator, remote: &Locator) {
        self.events
            .lock()
            .push(ContainerEvent::Connected(*local, *remote));
    }

    fn on_cell_disconnected(&self, local: &Locator, remote: &Locator) {
        self.events
            .lock()
            .push(ContainerEvent::Disconnected(*local, *remote));
    }

    fn on_topology_changed(&self) {
        self.events.lock().push(ContainerEvent::TopologyChanged);
    }
}

/// Resolves every locator to the same container.
pub struct SingleContainer(pub Arc<TestContainer>);

impl ContainerResolver for SingleContainer {
    fn container(&self, locator: &Locator) -> Option<Arc<dyn CellContainer>> {
        self.0.register(*locator);
        Some(self.0.clone())
    }
}

// ===========================================================================
// Solver
// ===========================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedComponent {
    pub owner: Locator,
    pub is_source: bool,
    pub links: Vec<Locator>,
}

/// Records placed components; electrical instances need a grounded source
/// to count as referenced.
#[derive(Debug)]
pub struct TestSolver {
    pub kind: SimulationKind,
    pub components: Vec<PlacedComponent>,
    pub grounded: bool,
    /// Report under-constrained even once grounded.
    pub under_constrained: bool,
    pub fail: bool,
    pub steps: u64,
}

impl TestSolver {
    pub fn new(kind: SimulationKind) -> Self {
        Self {
            kind,
            components: Vec::new(),
            grounded: false,
            under_constrained: false,
            fail: false,
            steps: 0,
        }
    }
}

impl Solver for TestSolver {
    fn kind(&self) -> SimulationKind {
        self.kind
    }

    fn step(&mut self, _dt: f64) -> Result<(), SolveError> {
        self.steps += 1;
        if self.fail {
            return Err(SolveError::NotConverged { iterations: 0 });
        }
        Ok(())
    }

    fn is_well_constrained(&self) -> bool {
        self.has_reference() && !self.under_constrained
    }

    fn has_reference(&self) -> bool {
        self.kind != SimulationKind::Electrical || self.grounded
    }

    fn ground_any_source(&mut self) -> bool {
        if self.components.iter().any(|c| c.is_source) {
            self.grounded = true;
        }
        self.grounded
    }

    fn component_count(&self) -> usize {
        self.components.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub fn test_solver_factory() -> Arc<dyn SolverFactory> {
    Arc::new(|kind| Box::new(TestSolver::new(kind)) as Box<dyn Solver>)
}

// ===========================================================================
// Simulation object
// ===========================================================================

#[derive(Debug)]
pub struct TestObject {
    pub kind: SimulationKind,
    pub is_source: bool,
    pub builds: u32,
    pub clears: u32,
    pub destroyed: bool,
    pub links: Vec<Locator>,
}

impl TestObject {
    pub fn wire(kind: SimulationKind) -> Self {
        Self {
            kind,
            is_source: false,
            builds: 0,
            clears: 0,
            destroyed: false,
            links: Vec::new(),
        }
    }

    pub fn source() -> Self {
        Self {
            is_source: true,
            ..Self::wire(SimulationKind::Electrical)
        }
    }
}

impl SimObject for TestObject {
    fn kind(&self) -> SimulationKind {
        self.kind
    }

    fn clear(&mut self) {
        self.clears += 1;
        self.links.clear();
    }

    fn build(&mut self, ctx: &mut PlacementContext<'_>) {
        self.builds += 1;
        self.links = ctx.links.to_vec();
        if let Some(solver) = ctx.solver.as_any_mut().downcast_mut::<TestSolver>() {
            solver.components.push(PlacedComponent {
                owner: *ctx.locator,
                is_source: self.is_source,
                links: ctx.links.to_vec(),
            });
        }
    }

    fn destroy(&mut self) {
        self.destroyed = true;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ===========================================================================
// Cell logic
// ===========================================================================

/// Records every lifecycle hook by name and round-trips `payload`.
#[derive(Debug, Default)]
pub struct TestLogic {
    pub insulator: bool,
    pub hooks: Vec<&'static str>,
    pub payload: Vec<u8>,
    pub fail_save: bool,
}

impl CellLogic for TestLogic {
    fn accepts_connection(&self, _local: &CellInfo, _remote: &CellInfo) -> bool {
        !self.insulator
    }
    fn on_created(&mut self) {
        self.hooks.push("created");
    }
    fn on_removing(&mut self) {
        self.hooks.push("removing");
    }
    fn on_connections_changed(&mut self) {
        self.hooks.push("connections_changed");
    }
    fn on_graph_changed(&mut self) {
        self.hooks.push("graph_changed");
    }
    fn on_loaded_from_disk(&mut self) {
        self.hooks.push("loaded_from_disk");
    }
    fn on_world_loaded_pre_solver(&mut self) {
        self.hooks.push("pre_solver");
    }
    fn on_world_loaded_post_solver(&mut self) {
        self.hooks.push("post_solver");
    }
    fn on_world_loaded_pre_sim(&mut self) {
        self.hooks.push("pre_sim");
    }
    fn on_world_loaded_post_sim(&mut self) {
        self.hooks.push("post_sim");
    }
    fn on_container_loaded(&mut self) {
        self.hooks.push("container_loaded");
    }
    fn on_container_unloading(&mut self) {
        self.hooks.push("container_unloading");
    }
    fn on_container_unloaded(&mut self) {
        self.hooks.push("container_unloaded");
    }
    fn save(&self) -> Result<Vec<u8>, CellError> {
        if self.fail_save {
            return Err(CellError::Payload("save refused".into()));
        }
        Ok(self.payload.clone())
    }
    fn load(&mut self, data: &[u8]) -> Result<(), CellError> {
        self.payload = data.to_vec();
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ===========================================================================
// Behavior
// ===========================================================================

/// Shared tick counters observed by [`CountingBehavior`].
#[derive(Debug, Default)]
pub struct TickCounter {
    pub pre: AtomicU64,
    pub post: AtomicU64,
    pub presence: AtomicU64,
    pub panic_on_pre: AtomicBool,
}

impl TickCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

const HOOK_PRE: u32 = 0;
const HOOK_POST: u32 = 1;
const HOOK_PRESENCE: u32 = 2;

#[derive(Debug)]
pub struct CountingBehavior {
    counter: Arc<TickCounter>,
}

impl CountingBehavior {
    pub fn new(counter: Arc<TickCounter>) -> Self {
        Self { counter }
    }
}

impl Behavior for CountingBehavior {
    fn name(&self) -> &str {
        "counting"
    }

    fn subscriptions(&self) -> Vec<SubscriberSpec> {
        vec![
            SubscriberSpec::pre(0).with_hook(HOOK_PRE),
            SubscriberSpec::post(0).with_hook(HOOK_POST),
        ]
    }

    fn presence_subscriptions(&self) -> Vec<SubscriberSpec> {
        vec![SubscriberSpec::post(10).with_hook(HOOK_PRESENCE)]
    }

    fn on_tick(&mut self, ctx: &mut BehaviorContext<'_>) -> Result<(), BehaviorError> {
        match (ctx.phase, ctx.hook) {
            (Phase::Pre, _) => {
                if self.counter.panic_on_pre.load(Ordering::SeqCst) {
                    panic!("counting behavior asked to panic");
                }
                self.counter.pre.fetch_add(1, Ordering::SeqCst);
            }
            (Phase::Post, HOOK_PRESENCE) => {
                self.counter.presence.fetch_add(1, Ordering::SeqCst);
            }
            (Phase::Post, _) => {
                self.counter.post.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ===========================================================================
// Cell constructors
// ===========================================================================

pub fn create_info(
    container: &Arc<TestContainer>,
    locator: Locator,
    type_id: CellTypeId,
) -> CellCreateInfo {
    container.register(locator);
    CellCreateInfo {
        locator,
        type_id,
        environment: CellEnvironment::default(),
        container: container.clone(),
    }
}

/// Constructor for every type in [`test_factory`].
pub fn construct(info: CellCreateInfo) -> Result<Cell, CellError> {
    let type_id = info.type_id;
    let mut builder = Cell::builder(info);
    if type_id == SOURCE_TYPE {
        builder = builder.object(TestObject::source());
    } else if type_id == INSULATOR_TYPE {
        return builder
            .logic(TestLogic {
                insulator: true,
                ..TestLogic::default()
            })
            .build();
    } else {
        let kinds = Kinds::from_type(type_id).ok_or(CellError::UnknownType(type_id))?;
        if kinds.electrical {
            builder = builder.object(TestObject::wire(SimulationKind::Electrical));
        }
        if kinds.thermal {
            builder = builder.object(TestObject::wire(SimulationKind::Thermal));
        }
    }
    builder.logic(TestLogic::default()).build()
}

/// Cell at `(x, 0, 0)`.
pub fn make_cell(container: &Arc<TestContainer>, x: i32, kinds: Kinds) -> Cell {
    make_cell_at(container, Locator::at(x, 0, 0), kinds)
}

pub fn make_cell_at(container: &Arc<TestContainer>, locator: Locator, kinds: Kinds) -> Cell {
    construct(create_info(container, locator, kinds.type_id())).expect("test cell")
}

pub fn make_source_cell(container: &Arc<TestContainer>, x: i32) -> Cell {
    construct(create_info(container, Locator::at(x, 0, 0), SOURCE_TYPE)).expect("source cell")
}

pub fn make_insulator(container: &Arc<TestContainer>, x: i32) -> Cell {
    construct(create_info(container, Locator::at(x, 0, 0), INSULATOR_TYPE)).expect("insulator")
}

/// Electrical cell carrying a [`CountingBehavior`].
pub fn make_counting_cell(
    container: &Arc<TestContainer>,
    x: i32,
    counter: &Arc<TickCounter>,
) -> Cell {
    Cell::builder(create_info(container, Locator::at(x, 0, 0), COUNTING_TYPE))
        .object(TestObject::wire(SimulationKind::Electrical))
        .behavior(CountingBehavior::new(Arc::clone(counter)))
        .logic(TestLogic::default())
        .build()
        .expect("counting cell")
}

pub fn test_factory() -> CellFactory {
    let mut factory = CellFactory::new();
    for kinds in [Kinds::NONE, Kinds::ELECTRICAL, Kinds::THERMAL, Kinds::BOTH] {
        factory.register(kinds.type_id(), construct);
    }
    factory.register(SOURCE_TYPE, construct);
    factory.register(INSULATOR_TYPE, construct);
    factory
}

// ===========================================================================
// Runtime and managers
// ===========================================================================

/// Tick period long enough that only the immediate first tick runs during
/// a test.
pub const SLOW_TICK_MS: u64 = 3_600_000;

pub fn test_pool() -> Arc<WorkerPool> {
    Arc::new(WorkerPool::new(2).expect("worker pool"))
}

pub fn test_runtime() -> GraphRuntime {
    GraphRuntime {
        pool: test_pool(),
        solvers: test_solver_factory(),
        guard: MutationGuard::current(),
        period: Duration::from_millis(SLOW_TICK_MS),
        timestep: 0.05,
    }
}

pub fn manager_with_interval(tick_interval_ms: u64) -> CellGraphManager {
    let config = SimulationConfig {
        tick_interval_ms,
        ..SimulationConfig::default()
    };
    let pool = Arc::new(WorkerPool::from_config(&config).expect("worker pool"));
    CellGraphManager::new(config, pool, test_solver_factory(), test_factory()).expect("manager")
}

/// Manager for topology tests: graphs tick once on start, then idle.
pub fn test_manager() -> CellGraphManager {
    manager_with_interval(SLOW_TICK_MS)
}

/// Manager whose graphs tick every millisecond.
pub fn fast_manager() -> CellGraphManager {
    manager_with_interval(1)
}
