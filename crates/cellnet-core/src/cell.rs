//! The cell: addressable node of a cell graph.
//!
//! A cell is identified by `(locator, type)`. It owns an explicit, ordered
//! set of simulation objects (at most one per [`SimulationKind`]) and
//! behaviors, both registered through [`CellBuilder`] when the concrete type
//! constructs it. Type-specific policy and lifecycle hooks live in a
//! [`CellLogic`] implementation.
//!
//! Connections are symmetric: whenever `a` lists `b` as a neighbor, `b`
//! lists `a`. Only the topology algorithms in
//! [`connections`](crate::connections) create or remove them.

use crate::behavior::{Behavior, BehaviorContainer, BehaviorContext, BehaviorError};
use crate::container::{CellContainer, CellEnvironment};
use crate::id::{CellTypeId, GraphId, Locator, SimulationKind, SubscriptionId};
use crate::object::{ObjectSlot, SimObject};
use crate::solver::{SolverInstance, SolverSlot};
use crate::subscriber::{Phase, SubscriberPool, SubscriptionScope};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CellError {
    #[error("{local} is already connected to {remote}")]
    AlreadyConnected { local: Locator, remote: Locator },
    #[error("{local} is not connected to {remote}")]
    NotConnected { local: Locator, remote: Locator },
    #[error("cell already has a {0:?} simulation object")]
    DuplicateObject(SimulationKind),
    #[error(transparent)]
    Behavior(#[from] BehaviorError),
    #[error("no constructor registered for cell type {0:?}")]
    UnknownType(CellTypeId),
    #[error("payload error: {0}")]
    Payload(String),
}

// ---------------------------------------------------------------------------
// Creation input and identity
// ---------------------------------------------------------------------------

/// Everything a cell constructor receives.
#[derive(Clone)]
pub struct CellCreateInfo {
    pub locator: Locator,
    pub type_id: CellTypeId,
    pub environment: CellEnvironment,
    pub container: Arc<dyn CellContainer>,
}

impl std::fmt::Debug for CellCreateInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellCreateInfo")
            .field("locator", &self.locator)
            .field("type_id", &self.type_id)
            .field("environment", &self.environment)
            .finish_non_exhaustive()
    }
}

/// Identity of a cell, as seen by connection policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellInfo {
    pub locator: Locator,
    pub type_id: CellTypeId,
}

// ---------------------------------------------------------------------------
// CellLogic
// ---------------------------------------------------------------------------

/// Type-specific policy and lifecycle hooks. Every method defaults to a no-op.
pub trait CellLogic: Send + std::fmt::Debug {
    /// Connection policy. Evaluated from both ends; a connection forms only
    /// if both cells accept each other.
    fn accepts_connection(&self, local: &CellInfo, remote: &CellInfo) -> bool {
        let _ = (local, remote);
        true
    }

    fn on_created(&mut self) {}
    fn on_removing(&mut self) {}

    /// Neighbors changed while the graph stayed the same.
    fn on_connections_changed(&mut self) {}
    /// The cell joined a different graph.
    fn on_graph_changed(&mut self) {}

    fn on_loaded_from_disk(&mut self) {}
    fn on_world_loaded_pre_solver(&mut self) {}
    fn on_world_loaded_post_solver(&mut self) {}
    fn on_world_loaded_pre_sim(&mut self) {}
    fn on_world_loaded_post_sim(&mut self) {}

    fn on_container_loaded(&mut self) {}
    fn on_container_unloading(&mut self) {}
    fn on_container_unloaded(&mut self) {}

    /// Opaque per-cell payload for persistence.
    fn save(&self) -> Result<Vec<u8>, CellError> {
        Ok(Vec::new())
    }

    fn load(&mut self, data: &[u8]) -> Result<(), CellError> {
        let _ = data;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Logic for cells with no custom policy or hooks.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassiveLogic;

impl CellLogic for PassiveLogic {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// Cell
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ScopeHandles {
    graph: Vec<SubscriptionId>,
    presence: Vec<SubscriptionId>,
}

pub struct Cell {
    locator: Locator,
    type_id: CellTypeId,
    environment: CellEnvironment,
    container: Arc<dyn CellContainer>,
    graph: Option<GraphId>,
    neighbors: Vec<Locator>,
    objects: Vec<ObjectSlot>,
    behaviors: BehaviorContainer,
    logic: Box<dyn CellLogic>,
    scopes: ScopeHandles,
    present: bool,
}

impl std::fmt::Debug for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell")
            .field("locator", &self.locator)
            .field("type_id", &self.type_id)
            .field("graph", &self.graph)
            .field("neighbors", &self.neighbors)
            .field("objects", &self.objects)
            .field("behaviors", &self.behaviors)
            .field("logic", &self.logic)
            .field("present", &self.present)
            .finish_non_exhaustive()
    }
}

impl Cell {
    pub fn builder(info: CellCreateInfo) -> CellBuilder {
        CellBuilder::new(info)
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    pub fn type_id(&self) -> CellTypeId {
        self.type_id
    }

    pub fn info(&self) -> CellInfo {
        CellInfo {
            locator: self.locator,
            type_id: self.type_id,
        }
    }

    pub fn environment(&self) -> &CellEnvironment {
        &self.environment
    }

    pub fn container(&self) -> &Arc<dyn CellContainer> {
        &self.container
    }

    /// The graph this cell belongs to; `None` until first attached.
    pub fn graph(&self) -> Option<GraphId> {
        self.graph
    }

    /// Connected neighbors in connection order.
    pub fn neighbors(&self) -> &[Locator] {
        &self.neighbors
    }

    pub fn is_connected_to(&self, remote: &Locator) -> bool {
        self.neighbors.contains(remote)
    }

    pub fn objects(&self) -> &[ObjectSlot] {
        &self.objects
    }

    pub fn object(&self, kind: SimulationKind) -> Option<&ObjectSlot> {
        self.objects.iter().find(|o| o.kind() == kind)
    }

    pub fn object_as<T: Any>(&self) -> Option<&T> {
        self.objects.iter().find_map(|o| o.downcast_ref::<T>())
    }

    pub fn object_as_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.objects.iter_mut().find_map(|o| o.downcast_mut::<T>())
    }

    pub fn supports(&self, kind: SimulationKind) -> bool {
        self.object(kind).is_some()
    }

    pub fn behaviors(&self) -> &BehaviorContainer {
        &self.behaviors
    }

    pub fn behaviors_mut(&mut self) -> &mut BehaviorContainer {
        &mut self.behaviors
    }

    pub fn logic(&self) -> &dyn CellLogic {
        self.logic.as_ref()
    }

    pub fn logic_as<T: Any>(&self) -> Option<&T> {
        self.logic.as_any().downcast_ref::<T>()
    }

    pub fn logic_as_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.logic.as_any_mut().downcast_mut::<T>()
    }

    /// Whether the host currently has this cell's container loaded. Starts
    /// `false` until the host's first `container_loaded`.
    pub fn is_present(&self) -> bool {
        self.present
    }

    /// Live subscription handles in `scope`.
    pub fn subscription_count(&self, scope: SubscriptionScope) -> usize {
        match scope {
            SubscriptionScope::Graph => self.scopes.graph.len(),
            SubscriptionScope::Presence => self.scopes.presence.len(),
        }
    }

    /// This cell's half of the mutual connection policy.
    pub fn accepts_connection(&self, remote: &Cell) -> bool {
        self.logic.accepts_connection(&self.info(), &remote.info())
    }

    /// Both halves of the policy.
    pub fn mutually_accepts(&self, remote: &Cell) -> bool {
        self.accepts_connection(remote) && remote.accepts_connection(self)
    }

    // -- Connections ---------------------------------------------------------

    pub(crate) fn connect(&mut self, remote: Locator) -> Result<(), CellError> {
        if self.neighbors.contains(&remote) {
            return Err(CellError::AlreadyConnected {
                local: self.locator,
                remote,
            });
        }
        self.neighbors.push(remote);
        Ok(())
    }

    pub(crate) fn disconnect(&mut self, remote: &Locator) -> Result<(), CellError> {
        match self.neighbors.iter().position(|n| n == remote) {
            Some(index) => {
                self.neighbors.remove(index);
                Ok(())
            }
            None => Err(CellError::NotConnected {
                local: self.locator,
                remote: *remote,
            }),
        }
    }

    // -- Graph membership ----------------------------------------------------

    pub(crate) fn set_graph(&mut self, graph: Option<GraphId>) {
        self.graph = graph;
    }

    /// React to a topology mutation.
    ///
    /// On a graph change every behavior is re-subscribed into `pool` (the new
    /// graph's scheduler) before the hook fires.
    pub(crate) fn update(
        &mut self,
        connections_changed: bool,
        graph_changed: bool,
        pool: &mut SubscriberPool,
    ) {
        if graph_changed {
            pool.remove_owner(&self.locator);
            self.scopes.graph.clear();
            self.scopes.presence.clear();
            self.subscribe_scope(pool, SubscriptionScope::Graph);
            if self.present {
                self.subscribe_scope(pool, SubscriptionScope::Presence);
            }
            self.logic.on_graph_changed();
        } else if connections_changed {
            self.logic.on_connections_changed();
        }
    }

    fn subscribe_scope(&mut self, pool: &mut SubscriberPool, scope: SubscriptionScope) {
        let mut handles = Vec::new();
        for (index, behavior) in self.behaviors.iter().enumerate() {
            let specs = match scope {
                SubscriptionScope::Graph => behavior.subscriptions(),
                SubscriptionScope::Presence => behavior.presence_subscriptions(),
            };
            for spec in specs {
                handles.push(pool.subscribe(self.locator, index, spec, scope));
            }
        }
        match scope {
            SubscriptionScope::Graph => self.scopes.graph = handles,
            SubscriptionScope::Presence => self.scopes.presence = handles,
        }
    }

    /// Leave the current graph: its scheduler forgets this cell and the old
    /// solver attachment is dropped.
    pub(crate) fn detach_from_graph(&mut self, pool: &mut SubscriberPool) {
        pool.remove_owner(&self.locator);
        self.scopes.graph.clear();
        self.scopes.presence.clear();
        for slot in &mut self.objects {
            slot.detach();
        }
        self.graph = None;
    }

    pub(crate) fn bind_presence(&mut self, pool: Option<&mut SubscriberPool>) {
        if self.present {
            return;
        }
        self.present = true;
        if let Some(pool) = pool {
            self.subscribe_scope(pool, SubscriptionScope::Presence);
        }
        self.logic.on_container_loaded();
    }

    pub(crate) fn unbind_presence(&mut self, pool: Option<&mut SubscriberPool>) {
        if !self.present {
            return;
        }
        self.logic.on_container_unloading();
        if let Some(pool) = pool {
            for id in self.scopes.presence.drain(..) {
                pool.unsubscribe(id);
            }
        }
        self.scopes.presence.clear();
        self.present = false;
    }

    pub(crate) fn container_unloaded(&mut self) {
        self.logic.on_container_unloaded();
    }

    // -- Solver rebuild ------------------------------------------------------

    pub(crate) fn clear_object_connections(&mut self) {
        for slot in &mut self.objects {
            slot.clear();
        }
    }

    /// Kinds for which this cell and `remote` should form a placement link:
    /// both have the object and both objects accept the relationship.
    pub fn placement_links(&self, remote: &Cell) -> Vec<SimulationKind> {
        self.objects
            .iter()
            .filter_map(|local| {
                let other = remote.object(local.kind())?;
                let accepted = local.object().accepts_connection(&self.locator, &remote.locator)
                    && other.object().accepts_connection(&remote.locator, &self.locator);
                accepted.then_some(local.kind())
            })
            .collect()
    }

    pub(crate) fn link_object(&mut self, kind: SimulationKind, remote: Locator) {
        if let Some(slot) = self.objects.iter_mut().find(|o| o.kind() == kind) {
            slot.link(remote);
        }
    }

    pub(crate) fn attach_object(&mut self, kind: SimulationKind, solver: SolverSlot) {
        if let Some(slot) = self.objects.iter_mut().find(|o| o.kind() == kind) {
            slot.attach(solver);
        }
    }

    /// Place every attached object into its solver instance.
    pub(crate) fn build(&mut self, solvers: &mut [SolverInstance]) {
        for slot in &mut self.objects {
            let Some(index) = slot.solver() else {
                continue;
            };
            if let Some(instance) = solvers.get_mut(index.0) {
                slot.build(&self.locator, instance.solver.as_mut());
            }
        }
    }

    // -- Ticking -------------------------------------------------------------

    /// Run one behavior callback. A subscription pointing at a behavior index
    /// that no longer exists is ignored.
    pub(crate) fn run_behavior(
        &mut self,
        behavior: usize,
        hook: u32,
        phase: Phase,
        dt: f64,
        tick: u64,
        solvers: &mut [SolverInstance],
    ) -> Result<(), BehaviorError> {
        let Some((target, siblings)) = self.behaviors.split_mut(behavior) else {
            return Ok(());
        };
        let mut ctx = BehaviorContext::new(
            dt,
            phase,
            hook,
            tick,
            self.locator,
            &self.environment,
            &mut self.objects,
            solvers,
            siblings,
        );
        target.on_tick(&mut ctx)
    }

    // -- Lifecycle -----------------------------------------------------------

    pub(crate) fn logic_mut(&mut self) -> &mut dyn CellLogic {
        self.logic.as_mut()
    }

    /// Release every simulation object and behavior. The cell must already
    /// have left its graph.
    pub(crate) fn destroy(&mut self) {
        for slot in &mut self.objects {
            slot.destroy();
        }
        self.behaviors.destroy_all();
        self.scopes.graph.clear();
        self.scopes.presence.clear();
        self.present = false;
    }
}

// ---------------------------------------------------------------------------
// CellBuilder
// ---------------------------------------------------------------------------

/// Explicit registration of a cell's simulation objects and behaviors.
pub struct CellBuilder {
    info: CellCreateInfo,
    objects: Vec<Box<dyn SimObject>>,
    behaviors: BehaviorContainer,
    logic: Box<dyn CellLogic>,
    error: Option<CellError>,
}

impl CellBuilder {
    fn new(info: CellCreateInfo) -> Self {
        Self {
            info,
            objects: Vec::new(),
            behaviors: BehaviorContainer::new(),
            logic: Box::new(PassiveLogic),
            error: None,
        }
    }

    pub fn object(mut self, object: impl SimObject + 'static) -> Self {
        self.objects.push(Box::new(object));
        self
    }

    pub fn behavior<B: Behavior + 'static>(mut self, behavior: B) -> Self {
        if self.error.is_none()
            && let Err(e) = self.behaviors.insert(behavior)
        {
            self.error = Some(e.into());
        }
        self
    }

    pub fn logic(mut self, logic: impl CellLogic + 'static) -> Self {
        self.logic = Box::new(logic);
        self
    }

    pub fn build(self) -> Result<Cell, CellError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        let mut objects: Vec<ObjectSlot> = Vec::with_capacity(self.objects.len());
        for object in self.objects {
            let kind = object.kind();
            if objects.iter().any(|o| o.kind() == kind) {
                return Err(CellError::DuplicateObject(kind));
            }
            objects.push(ObjectSlot::new(object));
        }
        Ok(Cell {
            locator: self.info.locator,
            type_id: self.info.type_id,
            environment: self.info.environment,
            container: self.info.container,
            graph: None,
            neighbors: Vec::new(),
            objects,
            behaviors: self.behaviors,
            logic: self.logic,
            scopes: ScopeHandles::default(),
            present: false,
        })
    }
}

// ---------------------------------------------------------------------------
// CellFactory
// ---------------------------------------------------------------------------

pub type CellConstructor = Box<dyn Fn(CellCreateInfo) -> Result<Cell, CellError> + Send + Sync>;

/// Typed constructor table keyed by [`CellTypeId`].
#[derive(Default)]
pub struct CellFactory {
    constructors: HashMap<CellTypeId, CellConstructor>,
}

impl std::fmt::Debug for CellFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.constructors.keys().collect();
        types.sort();
        f.debug_struct("CellFactory").field("types", &types).finish()
    }
}

impl CellFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the constructor for `type_id`.
    pub fn register<F>(&mut self, type_id: CellTypeId, constructor: F)
    where
        F: Fn(CellCreateInfo) -> Result<Cell, CellError> + Send + Sync + 'static,
    {
        self.constructors.insert(type_id, Box::new(constructor));
    }

    pub fn contains(&self, type_id: CellTypeId) -> bool {
        self.constructors.contains_key(&type_id)
    }

    pub fn create(&self, info: CellCreateInfo) -> Result<Cell, CellError> {
        let constructor = self
            .constructors
            .get(&info.type_id)
            .ok_or(CellError::UnknownType(info.type_id))?;
        constructor(info)
    }
}
