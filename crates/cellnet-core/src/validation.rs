//! Topology invariant checks over a whole domain.
//!
//! Used by tests after every mutation. Each graph is inspected under its
//! tick lock, one at a time.

use crate::id::{GraphId, Locator};
use crate::manager::CellGraphManager;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    #[error("{from} lists {to} but not the reverse")]
    Asymmetric { from: Locator, to: Locator },
    #[error("{from} lists {to}, which is not a registered cell")]
    DanglingEdge { from: Locator, to: Locator },
    #[error("edge {from} - {to} crosses graphs")]
    CrossGraphEdge { from: Locator, to: Locator },
    #[error("{locator} is a member of both {first} and {second}")]
    MultipleOwners {
        locator: Locator,
        first: GraphId,
        second: GraphId,
    },
    #[error("index maps {locator} to {indexed:?} but it lives in {actual}")]
    IndexMismatch {
        locator: Locator,
        indexed: Option<GraphId>,
        actual: GraphId,
    },
    #[error("index maps {locator} to {graph}, which does not hold it")]
    StaleIndex { locator: Locator, graph: GraphId },
    #[error("{locator} in {expected} points back to {actual:?}")]
    BackReference {
        locator: Locator,
        expected: GraphId,
        actual: Option<GraphId>,
    },
    #[error("{graph} has {components} disconnected components")]
    Disconnected { graph: GraphId, components: usize },
}

struct Member {
    graph: GraphId,
    back_reference: Option<GraphId>,
    neighbors: Vec<Locator>,
}

/// Every invariant violation in `manager`; empty when consistent.
pub fn check_manager(manager: &CellGraphManager) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut members: BTreeMap<Locator, Member> = BTreeMap::new();
    let mut by_graph: BTreeMap<GraphId, Vec<Locator>> = BTreeMap::new();

    for graph in manager.graphs() {
        let id = graph.id();
        graph.with_state(|state| {
            for cell in state.cells() {
                let locator = *cell.locator();
                if let Some(existing) = members.get(&locator) {
                    violations.push(Violation::MultipleOwners {
                        locator,
                        first: existing.graph,
                        second: id,
                    });
                    continue;
                }
                members.insert(
                    locator,
                    Member {
                        graph: id,
                        back_reference: cell.graph(),
                        neighbors: cell.neighbors().to_vec(),
                    },
                );
                by_graph.entry(id).or_default().push(locator);
            }
        });
    }

    for (locator, member) in &members {
        if member.back_reference != Some(member.graph) {
            violations.push(Violation::BackReference {
                locator: *locator,
                expected: member.graph,
                actual: member.back_reference,
            });
        }
        let indexed = manager.graph_of(locator);
        if indexed != Some(member.graph) {
            violations.push(Violation::IndexMismatch {
                locator: *locator,
                indexed,
                actual: member.graph,
            });
        }
        for remote in &member.neighbors {
            let Some(other) = members.get(remote) else {
                violations.push(Violation::DanglingEdge {
                    from: *locator,
                    to: *remote,
                });
                continue;
            };
            if !other.neighbors.contains(locator) {
                violations.push(Violation::Asymmetric {
                    from: *locator,
                    to: *remote,
                });
            }
            if other.graph != member.graph {
                violations.push(Violation::CrossGraphEdge {
                    from: *locator,
                    to: *remote,
                });
            }
        }
    }

    for (locator, graph) in manager.index() {
        if members.get(locator).map(|m| m.graph) != Some(*graph) {
            violations.push(Violation::StaleIndex {
                locator: *locator,
                graph: *graph,
            });
        }
    }

    for (graph, locators) in &by_graph {
        let components = count_components(locators, &members);
        if components > 1 {
            violations.push(Violation::Disconnected {
                graph: *graph,
                components,
            });
        }
    }

    violations
}

fn count_components(locators: &[Locator], members: &BTreeMap<Locator, Member>) -> usize {
    let inside: BTreeSet<Locator> = locators.iter().copied().collect();
    let mut seen = BTreeSet::new();
    let mut components = 0;
    for seed in locators {
        if !seen.insert(*seed) {
            continue;
        }
        components += 1;
        let mut queue = VecDeque::from([*seed]);
        while let Some(current) = queue.pop_front() {
            let Some(member) = members.get(&current) else {
                continue;
            };
            for next in &member.neighbors {
                if inside.contains(next) && seen.insert(*next) {
                    queue.push_back(*next);
                }
            }
        }
    }
    components
}
