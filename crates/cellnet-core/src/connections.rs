//! Topology maintenance: inserting and removing cells.
//!
//! Insertion can only merge networks; removal can only shrink or split
//! them. Insertion therefore only looks at which graphs its neighbors belong
//! to, while removal with two or more former neighbors re-discovers the
//! connected components of what is left by flood fill.
//!
//! Every touched graph is stopped before anything is mutated, and every
//! resulting graph is rebuilt and started before the operation returns.

use crate::cell::{Cell, CellError};
use crate::container::{container_key, CellContainer};
use crate::graph::GraphError;
use crate::id::{GraphId, Locator};
use crate::manager::CellGraphManager;
use crate::thread::WrongThread;
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConnectionError {
    #[error(transparent)]
    WrongThread(#[from] WrongThread),
    #[error("a cell already exists at {0}")]
    DuplicateLocator(Locator),
    #[error("no cell at {0}")]
    CellNotFound(Locator),
    #[error("{0} is not registered")]
    GraphNotFound(GraphId),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Cell(#[from] CellError),
}

/// A connected (or about to be connected) neighbor and where it lives.
struct Neighbor {
    locator: Locator,
    graph: GraphId,
    container: Arc<dyn CellContainer>,
}

// ---------------------------------------------------------------------------
// Insertion
// ---------------------------------------------------------------------------

/// Insert `cell` into the domain, connecting it to every accepted neighbor
/// reported by its container. Returns the graph it ended up in.
pub fn insert(manager: &mut CellGraphManager, mut cell: Cell) -> Result<GraphId, ConnectionError> {
    manager.guard().check()?;
    let locator = *cell.locator();
    if manager.contains(&locator) {
        return Err(ConnectionError::DuplicateLocator(locator));
    }

    let neighbors = discover(manager, &cell);
    let mut touched: Vec<GraphId> = Vec::new();
    for neighbor in &neighbors {
        if !touched.contains(&neighbor.graph) {
            touched.push(neighbor.graph);
        }
    }

    for id in &touched {
        let graph = manager.graph_entry(*id)?;
        if graph.is_running() {
            graph.stop_simulation()?;
        }
    }

    let container = Arc::clone(cell.container());
    for neighbor in &neighbors {
        cell.connect(neighbor.locator)?;
        manager
            .graph_entry(neighbor.graph)?
            .with_cell_mut(&neighbor.locator, |other, _| other.connect(locator))??;
        container.on_cell_connected(&locator, &neighbor.locator);
        neighbor.container.on_cell_connected(&neighbor.locator, &locator);
    }

    let target = match touched.as_slice() {
        [] => {
            let id = manager.create_graph();
            manager.attach(id, cell)?;
            id
        }
        [only] => {
            let id = *only;
            manager.attach(id, cell)?;
            let graph = manager.graph_entry(id)?;
            for neighbor in &neighbors {
                graph.update_cell(&neighbor.locator, true, false)?;
            }
            id
        }
        merged => {
            let id = manager.create_graph();
            manager.attach(id, cell)?;
            for old in merged {
                for member in manager.drain_graph(*old)? {
                    let member_locator = *member.locator();
                    let was_neighbor = neighbors.iter().any(|n| n.locator == member_locator);
                    manager.attach(id, member)?;
                    manager
                        .graph_entry(id)?
                        .update_cell(&member_locator, was_neighbor, true)?;
                }
            }
            debug!(graph = %id, merged = merged.len(), "graphs merged");
            id
        }
    };

    let graph = manager.graph_entry(target)?;
    graph.build_solver()?;
    graph.update_cell(&locator, true, true)?;
    graph.with_cell_mut(&locator, |cell, _| cell.logic_mut().on_created())?;
    graph.start_simulation()?;

    notify_topology(
        std::iter::once(container).chain(neighbors.into_iter().map(|n| n.container)),
    );
    debug!(locator = %locator, graph = %target, "cell inserted");
    Ok(target)
}

/// Neighbor candidates from the container, filtered to existing cells that
/// mutually accept the new one. Pure query.
fn discover(manager: &CellGraphManager, cell: &Cell) -> Vec<Neighbor> {
    let locator = *cell.locator();
    let mut found: Vec<Neighbor> = Vec::new();
    for remote in cell.container().neighbor_scan(&locator) {
        if remote == locator || found.iter().any(|n| n.locator == remote) {
            continue;
        }
        let Some(graph_id) = manager.graph_of(&remote) else {
            continue;
        };
        let Some(graph) = manager.graph(graph_id) else {
            continue;
        };
        let accepted = graph
            .with_cell(&remote, |other| {
                cell.mutually_accepts(other)
                    .then(|| Arc::clone(other.container()))
            })
            .ok()
            .flatten();
        if let Some(container) = accepted {
            found.push(Neighbor {
                locator: remote,
                graph: graph_id,
                container,
            });
        }
    }
    found
}

// ---------------------------------------------------------------------------
// Removal
// ---------------------------------------------------------------------------

/// Remove the cell at `locator`, splitting its graph if it was a cut vertex.
/// Returns the destroyed cell.
pub fn remove(manager: &mut CellGraphManager, locator: &Locator) -> Result<Cell, ConnectionError> {
    manager.guard().check()?;
    let graph_id = manager
        .graph_of(locator)
        .ok_or(ConnectionError::CellNotFound(*locator))?;

    let graph = manager.graph_entry(graph_id)?;
    let (former, container) =
        graph.with_cell(locator, |c| (c.neighbors().to_vec(), Arc::clone(c.container())))?;
    let mut neighbors = Vec::with_capacity(former.len());
    for remote in &former {
        let remote_container = graph.with_cell(remote, |c| Arc::clone(c.container()))?;
        neighbors.push(Neighbor {
            locator: *remote,
            graph: graph_id,
            container: remote_container,
        });
    }

    if graph.is_running() {
        graph.stop_simulation()?;
    }
    graph.with_cell_mut(locator, |cell, _| cell.logic_mut().on_removing())?;

    for neighbor in &neighbors {
        graph.with_cell_mut(locator, |cell, _| cell.disconnect(&neighbor.locator))??;
        graph.with_cell_mut(&neighbor.locator, |cell, _| cell.disconnect(locator))??;
        container.on_cell_disconnected(locator, &neighbor.locator);
        neighbor.container.on_cell_disconnected(&neighbor.locator, locator);
    }

    let mut removed = manager.detach(graph_id, locator)?;
    match neighbors.as_slice() {
        [] => manager.remove_graph(graph_id)?,
        [only] => {
            let graph = manager.graph_entry(graph_id)?;
            graph.update_cell(&only.locator, true, false)?;
            graph.build_solver()?;
            graph.start_simulation()?;
        }
        _ => {
            let rest = manager.drain_graph(graph_id)?;
            let created = split(manager, rest, &former)?;
            debug!(graph = %graph_id, fragments = created.len(), "graph split");
        }
    }

    removed.destroy();
    notify_topology(
        std::iter::once(container).chain(neighbors.into_iter().map(|n| n.container)),
    );
    debug!(locator = %locator, "cell removed");
    Ok(removed)
}

/// Re-home `cells` into one fresh graph per connected component, seeding
/// the flood fill from the removed cell's former neighbors.
fn split(
    manager: &mut CellGraphManager,
    cells: Vec<Cell>,
    former: &[Locator],
) -> Result<Vec<GraphId>, ConnectionError> {
    let mut remaining: BTreeMap<Locator, Cell> =
        cells.into_iter().map(|c| (*c.locator(), c)).collect();
    let mut pending: BTreeSet<Locator> = former.iter().copied().collect();
    let mut created = Vec::new();

    loop {
        let seed = match pending.pop_first() {
            Some(seed) => seed,
            None => match remaining.keys().next() {
                Some(orphan) => {
                    warn!(locator = %orphan, "cell unreachable from removed cell's neighbors");
                    *orphan
                }
                None => break,
            },
        };
        if !remaining.contains_key(&seed) {
            continue;
        }

        let component = flood_fill(&mut remaining, seed);
        let id = manager.create_graph();
        for cell in component {
            let member = *cell.locator();
            pending.remove(&member);
            manager.attach(id, cell)?;
            manager
                .graph_entry(id)?
                .update_cell(&member, former.contains(&member), true)?;
        }
        let graph = manager.graph_entry(id)?;
        graph.build_solver()?;
        graph.start_simulation()?;
        created.push(id);
    }
    Ok(created)
}

/// Take the component containing `seed` out of `remaining`.
pub(crate) fn flood_fill(remaining: &mut BTreeMap<Locator, Cell>, seed: Locator) -> Vec<Cell> {
    let mut component = Vec::new();
    let mut queue = VecDeque::from([seed]);
    while let Some(current) = queue.pop_front() {
        let Some(cell) = remaining.remove(&current) else {
            continue;
        };
        queue.extend(
            cell.neighbors()
                .iter()
                .filter(|n| remaining.contains_key(n))
                .copied(),
        );
        component.push(cell);
    }
    component
}

fn notify_topology(containers: impl IntoIterator<Item = Arc<dyn CellContainer>>) {
    let mut seen = HashSet::new();
    for container in containers {
        if seen.insert(container_key(&container)) {
            container.on_topology_changed();
        }
    }
}
