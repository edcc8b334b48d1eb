//! The graph registry for one simulation domain.
//!
//! [`CellGraphManager`] owns every [`CellGraph`] of a domain, keeps a
//! locator index for O(1) ownership lookup, allocates graph ids, and drives
//! the domain-wide lifecycle: topology edits, bulk restore with its ordered
//! post-load hooks, container presence, and shutdown.
//!
//! Containers hold no reference back to the registry. Hosts keep the
//! registry themselves and pass containers into
//! [`container_loaded`](CellGraphManager::container_loaded) and friends.

use crate::cell::{Cell, CellCreateInfo, CellError, CellFactory};
use crate::config::{ConfigError, SimulationConfig};
use crate::connections::{self, ConnectionError};
use crate::container::{CellContainer, ContainerResolver};
use crate::graph::{CellGraph, GraphError, GraphRuntime};
use crate::id::{GraphId, Locator};
use crate::pool::WorkerPool;
use crate::serialize::{DeserializeError, DomainSnapshot, GraphRecord, SerializeError};
use crate::solver::SolverFactory;
use crate::thread::{MutationGuard, WrongThread};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{error, info, warn};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("no cell at {0}")]
    CellNotFound(Locator),
    #[error("{0} is not registered")]
    GraphNotFound(GraphId),
    #[error("{0} is already registered")]
    GraphExists(GraphId),
    #[error("{graph} still has {members} members")]
    GraphNotEmpty { graph: GraphId, members: usize },
    #[error("a cell already exists at {0}")]
    DuplicateLocator(Locator),
    #[error(transparent)]
    WrongThread(#[from] WrongThread),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Cell(#[from] CellError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Serialize(#[from] SerializeError),
    #[error(transparent)]
    Deserialize(#[from] DeserializeError),
}

/// Summary of a [`CellGraphManager::load`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub graphs: usize,
    pub cells: usize,
    /// Cells whose container or type could not be resolved.
    pub skipped_cells: usize,
    /// Persisted graphs with no restorable members.
    pub dropped_graphs: usize,
}

// ---------------------------------------------------------------------------
// CellGraphManager
// ---------------------------------------------------------------------------

pub struct CellGraphManager {
    graphs: BTreeMap<GraphId, CellGraph>,
    index: HashMap<Locator, GraphId>,
    next_id: u64,
    runtime: GraphRuntime,
    config: SimulationConfig,
    cells: CellFactory,
    dirty: bool,
}

impl std::fmt::Debug for CellGraphManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellGraphManager")
            .field("graphs", &self.graphs.len())
            .field("cells", &self.index.len())
            .field("next_id", &self.next_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CellGraphManager {
    /// Create an empty registry. The calling thread becomes the mutation
    /// thread.
    pub fn new(
        config: SimulationConfig,
        pool: Arc<WorkerPool>,
        solvers: Arc<dyn SolverFactory>,
        cells: CellFactory,
    ) -> Result<Self, ManagerError> {
        Self::with_guard(config, pool, solvers, cells, MutationGuard::current())
    }

    pub fn with_guard(
        config: SimulationConfig,
        pool: Arc<WorkerPool>,
        solvers: Arc<dyn SolverFactory>,
        cells: CellFactory,
        guard: MutationGuard,
    ) -> Result<Self, ManagerError> {
        config.validate()?;
        let runtime = GraphRuntime {
            pool,
            solvers,
            guard,
            period: config.tick_interval(),
            timestep: config.timestep,
        };
        Ok(Self {
            graphs: BTreeMap::new(),
            index: HashMap::new(),
            next_id: 1,
            runtime,
            config,
            cells,
            dirty: false,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn guard(&self) -> MutationGuard {
        self.runtime.guard
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.runtime.pool
    }

    pub fn cell_factory(&self) -> &CellFactory {
        &self.cells
    }

    pub fn cell_factory_mut(&mut self) -> &mut CellFactory {
        &mut self.cells
    }

    // -- Queries -------------------------------------------------------------

    pub fn graph(&self, id: GraphId) -> Option<&CellGraph> {
        self.graphs.get(&id)
    }

    pub fn graph_mut(&mut self, id: GraphId) -> Option<&mut CellGraph> {
        self.graphs.get_mut(&id)
    }

    pub fn graphs(&self) -> impl Iterator<Item = &CellGraph> {
        self.graphs.values()
    }

    pub fn graph_ids(&self) -> Vec<GraphId> {
        self.graphs.keys().copied().collect()
    }

    pub fn graph_count(&self) -> usize {
        self.graphs.len()
    }

    pub fn cell_count(&self) -> usize {
        self.index.len()
    }

    pub fn contains(&self, locator: &Locator) -> bool {
        self.index.contains_key(locator)
    }

    /// The graph owning the cell at `locator`.
    pub fn graph_of(&self, locator: &Locator) -> Option<GraphId> {
        self.index.get(locator).copied()
    }

    pub fn with_cell<R>(
        &self,
        locator: &Locator,
        f: impl FnOnce(&Cell) -> R,
    ) -> Result<R, ManagerError> {
        let id = self
            .graph_of(locator)
            .ok_or(ManagerError::CellNotFound(*locator))?;
        let graph = self.graphs.get(&id).ok_or(ManagerError::GraphNotFound(id))?;
        Ok(graph.with_cell(locator, f)?)
    }

    /// Mutate a cell's own state under its graph's tick lock. Topology is
    /// not reachable from here, so the graph keeps running.
    pub fn with_cell_mut<R>(
        &mut self,
        locator: &Locator,
        f: impl FnOnce(&mut Cell) -> R,
    ) -> Result<R, ManagerError> {
        let id = self
            .graph_of(locator)
            .ok_or(ManagerError::CellNotFound(*locator))?;
        let graph = self.graphs.get(&id).ok_or(ManagerError::GraphNotFound(id))?;
        Ok(graph.locked_cell_mut(locator, |cell, _| f(cell))?)
    }

    pub(crate) fn index(&self) -> &HashMap<Locator, GraphId> {
        &self.index
    }

    /// Whether membership changed since the last [`save`](Self::save).
    pub fn is_dirty(&self) -> bool {
        self.dirty || self.graphs.values().any(CellGraph::is_dirty)
    }

    // -- Graph lifecycle -----------------------------------------------------

    /// Allocate and register a new empty graph.
    pub fn create_graph(&mut self) -> GraphId {
        let id = GraphId(self.next_id);
        self.next_id += 1;
        self.graphs.insert(id, CellGraph::new(id, self.runtime.clone()));
        self.dirty = true;
        id
    }

    /// Unregister an empty graph.
    pub fn destroy_graph(&mut self, id: GraphId) -> Result<(), ManagerError> {
        self.runtime.guard.check()?;
        let graph = self.graphs.get(&id).ok_or(ManagerError::GraphNotFound(id))?;
        let members = graph.len();
        if members > 0 {
            return Err(ManagerError::GraphNotEmpty { graph: id, members });
        }
        self.graphs.remove(&id);
        self.dirty = true;
        Ok(())
    }

    pub(crate) fn graph_entry(&mut self, id: GraphId) -> Result<&mut CellGraph, ConnectionError> {
        self.graphs
            .get_mut(&id)
            .ok_or(ConnectionError::GraphNotFound(id))
    }

    pub(crate) fn attach(&mut self, id: GraphId, cell: Cell) -> Result<(), ConnectionError> {
        let locator = *cell.locator();
        self.graph_entry(id)?.add_cell(cell)?;
        self.index.insert(locator, id);
        Ok(())
    }

    pub(crate) fn detach(
        &mut self,
        id: GraphId,
        locator: &Locator,
    ) -> Result<Cell, ConnectionError> {
        let cell = self.graph_entry(id)?.remove_cell(locator)?;
        self.index.remove(locator);
        Ok(cell)
    }

    /// Take every member out of graph `id` and unregister it.
    pub(crate) fn drain_graph(&mut self, id: GraphId) -> Result<Vec<Cell>, ConnectionError> {
        let cells = self.graph_entry(id)?.take_cells()?;
        for cell in &cells {
            self.index.remove(cell.locator());
        }
        self.remove_graph(id)?;
        Ok(cells)
    }

    pub(crate) fn remove_graph(&mut self, id: GraphId) -> Result<(), ConnectionError> {
        let graph = self.graph_entry(id)?;
        let members = graph.len();
        if members > 0 {
            return Err(GraphError::NotEmpty { graph: id, members }.into());
        }
        self.graphs.remove(&id);
        self.dirty = true;
        Ok(())
    }

    // -- Topology ------------------------------------------------------------

    /// Insert a constructed cell, merging graphs as needed.
    pub fn insert_cell(&mut self, cell: Cell) -> Result<GraphId, ManagerError> {
        Ok(connections::insert(self, cell)?)
    }

    /// Construct a cell through the factory and insert it.
    pub fn place(&mut self, info: CellCreateInfo) -> Result<GraphId, ManagerError> {
        self.runtime.guard.check()?;
        if self.contains(&info.locator) {
            return Err(ManagerError::DuplicateLocator(info.locator));
        }
        let cell = self.cells.create(info)?;
        self.insert_cell(cell)
    }

    /// Remove a cell, splitting its graph as needed. Returns the destroyed cell.
    pub fn remove_cell(&mut self, locator: &Locator) -> Result<Cell, ManagerError> {
        if !self.contains(locator) {
            return Err(ManagerError::CellNotFound(*locator));
        }
        Ok(connections::remove(self, locator)?)
    }

    // -- Persistence ---------------------------------------------------------

    /// Capture every graph. Payload failures are logged per cell and stored
    /// as absent payloads. Clears the dirty flag.
    pub fn save(&mut self) -> DomainSnapshot {
        let mut records = Vec::with_capacity(self.graphs.len());
        for graph in self.graphs.values_mut() {
            records.push(graph.with_state(GraphRecord::capture));
            graph.mark_clean();
        }
        self.dirty = false;
        DomainSnapshot::new(records)
    }

    pub fn save_bytes(&mut self) -> Result<Vec<u8>, ManagerError> {
        Ok(self.save().to_bytes()?)
    }

    pub fn load_bytes(
        &mut self,
        data: &[u8],
        resolver: &dyn ContainerResolver,
    ) -> Result<LoadReport, ManagerError> {
        let snapshot = DomainSnapshot::from_bytes(data)?;
        self.load(&snapshot, resolver)
    }

    /// Restore persisted graphs.
    ///
    /// All graphs are fully wired before any hook runs, and no graph starts
    /// ticking before every graph's solver is built:
    /// instantiate and connect, `pre_solver`, build, `post_solver`,
    /// `pre_sim`, start, `post_sim`.
    pub fn load(
        &mut self,
        snapshot: &DomainSnapshot,
        resolver: &dyn ContainerResolver,
    ) -> Result<LoadReport, ManagerError> {
        self.runtime.guard.check()?;
        snapshot.header.validate()?;
        for record in &snapshot.graphs {
            if self.graphs.contains_key(&record.id) {
                return Err(ManagerError::GraphExists(record.id));
            }
            for member in record.members.iter().flatten() {
                if self.contains(&member.locator) {
                    return Err(ManagerError::DuplicateLocator(member.locator));
                }
            }
        }
        // Ids handed out while splitting must not collide with later records.
        for record in &snapshot.graphs {
            self.next_id = self.next_id.max(record.id.0 + 1);
        }

        let mut report = LoadReport::default();
        let mut loaded = Vec::new();
        for record in &snapshot.graphs {
            let restored = self.restore_graph(record, resolver, &mut report)?;
            if restored.is_empty() {
                report.dropped_graphs += 1;
            }
            loaded.extend(restored);
        }

        for id in &loaded {
            self.each_cell(*id, |cell| cell.logic_mut().on_world_loaded_pre_solver())?;
        }
        for id in &loaded {
            self.graph_entry(*id)?.build_solver()?;
        }
        for id in &loaded {
            self.each_cell(*id, |cell| cell.logic_mut().on_world_loaded_post_solver())?;
        }
        for id in &loaded {
            self.each_cell(*id, |cell| cell.logic_mut().on_world_loaded_pre_sim())?;
        }
        for id in &loaded {
            self.graph_entry(*id)?.start_simulation()?;
        }
        for id in &loaded {
            self.each_cell(*id, |cell| cell.logic_mut().on_world_loaded_post_sim())?;
        }

        report.graphs = loaded.len();
        self.dirty = false;
        for id in &loaded {
            if let Some(graph) = self.graphs.get_mut(id) {
                graph.mark_clean();
            }
        }
        info!(
            graphs = report.graphs,
            cells = report.cells,
            skipped = report.skipped_cells,
            dropped = report.dropped_graphs,
            "domain loaded"
        );
        Ok(report)
    }

    /// Instantiate one persisted graph's members and edges. A persisted
    /// graph whose skipped cells leave it disconnected comes back as one
    /// graph per component: the first keeps the persisted id, the rest get
    /// fresh ids. Returns no ids when nothing restorable was left.
    fn restore_graph(
        &mut self,
        record: &GraphRecord,
        resolver: &dyn ContainerResolver,
        report: &mut LoadReport,
    ) -> Result<Vec<GraphId>, ManagerError> {
        let id = record.id;
        let members = record.members.as_deref().unwrap_or_default();
        if members.is_empty() {
            warn!(graph = %id, "persisted graph has no members; dropped");
            return Ok(Vec::new());
        }

        let mut cells: BTreeMap<Locator, Cell> = BTreeMap::new();
        for member in members {
            let locator = member.locator;
            if self.contains(&locator) || cells.contains_key(&locator) {
                error!(graph = %id, locator = %locator, "duplicate persisted cell skipped");
                report.skipped_cells += 1;
                continue;
            }
            let Some(container) = resolver.container(&locator) else {
                error!(graph = %id, locator = %locator, "no container for persisted cell");
                report.skipped_cells += 1;
                continue;
            };
            let info = CellCreateInfo {
                locator,
                type_id: member.type_id,
                environment: resolver.environment(&locator),
                container,
            };
            let mut cell = match self.cells.create(info) {
                Ok(cell) => cell,
                Err(e) => {
                    error!(graph = %id, locator = %locator, "cell restore failed: {e}");
                    report.skipped_cells += 1;
                    continue;
                }
            };
            if let Some(payload) = &member.payload
                && let Err(e) = cell.logic_mut().load(payload)
            {
                error!(graph = %id, locator = %locator, "cell payload restore failed: {e}");
            }
            cells.insert(locator, cell);
        }

        for (a, b) in &record.connections {
            if a == b || !cells.contains_key(a) || !cells.contains_key(b) {
                warn!(graph = %id, from = %a, to = %b, "persisted connection skipped");
                continue;
            }
            for (local, remote) in [(a, b), (b, a)] {
                if let Some(cell) = cells.get_mut(local)
                    && !cell.is_connected_to(remote)
                {
                    cell.connect(*remote)?;
                }
            }
        }

        if cells.is_empty() {
            warn!(graph = %id, "persisted graph has no restorable members; dropped");
            return Ok(Vec::new());
        }

        let mut restored = Vec::new();
        while let Some(seed) = cells.keys().next().copied() {
            let component = connections::flood_fill(&mut cells, seed);
            let target = if restored.is_empty() {
                self.graphs.insert(id, CellGraph::new(id, self.runtime.clone()));
                id
            } else {
                self.create_graph()
            };
            report.cells += component.len();
            for cell in component {
                self.attach(target, cell)?;
            }
            self.graph_entry(target)?.for_each_cell(|cell, pool| {
                cell.logic_mut().on_loaded_from_disk();
                cell.update(true, true, pool);
            })?;
            restored.push(target);
        }
        if restored.len() > 1 {
            warn!(
                graph = %id,
                components = restored.len(),
                "persisted graph was disconnected after skipped cells; split"
            );
        }
        Ok(restored)
    }

    fn each_cell(&mut self, id: GraphId, mut f: impl FnMut(&mut Cell)) -> Result<(), ManagerError> {
        self.graph_entry(id)?.for_each_cell(|cell, _| f(cell))?;
        Ok(())
    }

    // -- Container presence --------------------------------------------------

    /// The host made `container` present: bind presence-scoped subscriptions.
    pub fn container_loaded(
        &mut self,
        container: &Arc<dyn CellContainer>,
    ) -> Result<(), ManagerError> {
        self.each_present_cell(container, |cell, pool| cell.bind_presence(Some(pool)))
    }

    /// The host is about to unload `container`.
    pub fn container_unloading(
        &mut self,
        container: &Arc<dyn CellContainer>,
    ) -> Result<(), ManagerError> {
        self.each_present_cell(container, |cell, pool| cell.unbind_presence(Some(pool)))
    }

    pub fn container_unloaded(
        &mut self,
        container: &Arc<dyn CellContainer>,
    ) -> Result<(), ManagerError> {
        self.each_present_cell(container, |cell, _| cell.container_unloaded())
    }

    fn each_present_cell(
        &mut self,
        container: &Arc<dyn CellContainer>,
        mut f: impl FnMut(&mut Cell, &mut crate::subscriber::SubscriberPool),
    ) -> Result<(), ManagerError> {
        self.runtime.guard.check()?;
        for locator in container.cells() {
            let Some(id) = self.graph_of(&locator) else {
                continue;
            };
            let graph = self.graphs.get(&id).ok_or(ManagerError::GraphNotFound(id))?;
            graph.locked_cell_mut(&locator, &mut f)?;
        }
        Ok(())
    }

    // -- Shutdown ------------------------------------------------------------

    /// Stop every running graph. Graphs and cells stay registered.
    pub fn shutdown(&mut self) -> Result<(), ManagerError> {
        self.runtime.guard.check()?;
        let mut stopped = 0;
        for graph in self.graphs.values_mut() {
            if graph.is_running() {
                graph.stop_simulation()?;
                stopped += 1;
            }
        }
        info!(graphs = stopped, "domain shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{CellTypeId, SimulationKind};
    use crate::subscriber::SubscriptionScope;
    use crate::test_utils::*;
    use crate::validation::check_manager;

    fn loc(x: i32) -> Locator {
        Locator::at(x, 0, 0)
    }

    #[test]
    fn invalid_config_rejected() {
        let config = SimulationConfig {
            worker_threads: 0,
            ..SimulationConfig::default()
        };
        let result =
            CellGraphManager::new(config, test_pool(), test_solver_factory(), test_factory());
        assert!(matches!(result, Err(ManagerError::Config(ConfigError::ZeroWorkers))));
    }

    #[test]
    fn graph_ids_are_never_reused() {
        let mut manager = test_manager();
        let a = manager.create_graph();
        manager.destroy_graph(a).unwrap();
        let b = manager.create_graph();
        assert_ne!(a, b);
    }

    #[test]
    fn destroying_non_empty_graph_fails() {
        let mut manager = test_manager();
        let container = TestContainer::new();
        let id = manager.insert_cell(make_cell(&container, 0, Kinds::NONE)).unwrap();
        assert!(matches!(
            manager.destroy_graph(id),
            Err(ManagerError::GraphNotEmpty { members: 1, .. })
        ));
    }

    #[test]
    fn lookup_of_absent_cell_fails() {
        let manager = test_manager();
        assert!(matches!(
            manager.with_cell(&loc(3), |_| ()),
            Err(ManagerError::CellNotFound(_))
        ));
    }

    #[test]
    fn place_uses_factory() {
        let mut manager = test_manager();
        let container = TestContainer::new();
        let id = manager
            .place(create_info(&container, loc(0), Kinds::BOTH.type_id()))
            .unwrap();
        assert!(
            manager
                .with_cell(&loc(0), |c| c.supports(SimulationKind::Thermal))
                .unwrap()
        );
        assert_eq!(manager.graph_of(&loc(0)), Some(id));

        let err = manager
            .place(create_info(&container, loc(1), CellTypeId(999)))
            .unwrap_err();
        assert!(matches!(err, ManagerError::Cell(CellError::UnknownType(_))));
    }

    #[test]
    fn dirty_tracking() {
        let mut manager = test_manager();
        assert!(!manager.is_dirty());
        let container = TestContainer::new();
        manager.insert_cell(make_cell(&container, 0, Kinds::NONE)).unwrap();
        assert!(manager.is_dirty());
        let _ = manager.save();
        assert!(!manager.is_dirty());
        manager.remove_cell(&loc(0)).unwrap();
        assert!(manager.is_dirty());
    }

    #[test]
    fn save_and_load_round_trip() {
        let mut source = test_manager();
        let container = TestContainer::new();
        container.adjacent(loc(0), loc(1));
        container.adjacent(loc(1), loc(2));
        for x in 0..3 {
            source.insert_cell(make_cell(&container, x, Kinds::ELECTRICAL)).unwrap();
        }
        source.insert_cell(make_cell(&container, 9, Kinds::THERMAL)).unwrap();
        source
            .with_cell_mut(&loc(1), |c| {
                c.logic_as_mut::<TestLogic>().unwrap().payload = vec![7, 7];
            })
            .unwrap();
        let bytes = source.save_bytes().unwrap();

        let mut target = test_manager();
        let resolver = SingleContainer(container.clone());
        let report = target.load_bytes(&bytes, &resolver).unwrap();
        assert_eq!(report.graphs, 2);
        assert_eq!(report.cells, 4);
        assert_eq!(target.graph_ids(), source.graph_ids());
        assert!(target.graphs().all(CellGraph::is_running));
        target
            .with_cell(&loc(1), |c| {
                assert_eq!(c.neighbors(), &[loc(0), loc(2)]);
                let logic = c.logic_as::<TestLogic>().unwrap();
                assert_eq!(logic.payload, vec![7, 7]);
                assert_eq!(
                    logic.hooks,
                    vec![
                        "loaded_from_disk",
                        "graph_changed",
                        "pre_solver",
                        "post_solver",
                        "pre_sim",
                        "post_sim",
                    ]
                );
            })
            .unwrap();
        assert!(check_manager(&target).is_empty());

        // Fresh ids continue past restored ones.
        let next = target.create_graph();
        assert!(target.graph_ids().iter().all(|id| *id <= next));
    }

    #[test]
    fn load_rejects_existing_graph_id() {
        let mut manager = test_manager();
        let container = TestContainer::new();
        manager.insert_cell(make_cell(&container, 0, Kinds::NONE)).unwrap();
        let snapshot = manager.save();
        let resolver = SingleContainer(container.clone());
        assert!(matches!(
            manager.load(&snapshot, &resolver),
            Err(ManagerError::GraphExists(_))
        ));
    }

    #[test]
    fn presence_binding_follows_container() {
        let mut manager = test_manager();
        let container = TestContainer::new();
        let counter = TickCounter::new();
        manager.insert_cell(make_counting_cell(&container, 0, &counter)).unwrap();
        let dyn_container: Arc<dyn CellContainer> = container.clone();
        manager
            .with_cell(&loc(0), |c| assert!(!c.is_present()))
            .unwrap();

        manager.container_loaded(&dyn_container).unwrap();
        manager
            .with_cell(&loc(0), |c| {
                assert!(c.is_present());
                assert_eq!(c.subscription_count(SubscriptionScope::Presence), 1);
                let hooks = &c.logic_as::<TestLogic>().unwrap().hooks;
                assert_eq!(hooks.last(), Some(&"container_loaded"));
            })
            .unwrap();

        manager.container_unloading(&dyn_container).unwrap();
        manager.container_unloaded(&dyn_container).unwrap();
        manager
            .with_cell(&loc(0), |c| {
                assert!(!c.is_present());
                let hooks = &c.logic_as::<TestLogic>().unwrap().hooks;
                assert!(hooks.contains(&"container_unloading"));
                assert!(hooks.contains(&"container_unloaded"));
            })
            .unwrap();

        manager.container_loaded(&dyn_container).unwrap();
        manager
            .with_cell(&loc(0), |c| assert!(c.is_present()))
            .unwrap();
    }

    #[test]
    fn shutdown_stops_all_graphs() {
        let mut manager = test_manager();
        let container = TestContainer::new();
        manager.insert_cell(make_cell(&container, 0, Kinds::NONE)).unwrap();
        manager.insert_cell(make_cell(&container, 5, Kinds::NONE)).unwrap();
        manager.shutdown().unwrap();
        assert!(manager.graphs().all(|g| !g.is_running()));
    }
}
