//! Host contracts: containers and creation-time environment.
//!
//! A container is whatever the host groups cells by (a block entity, a
//! multipart, a chunk section). The core only needs it for neighbor
//! discovery and for change notifications.

use crate::id::Locator;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Read-only data a cell is created with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellEnvironment {
    /// Ambient temperature in kelvin at the cell's position.
    pub ambient_temperature: f64,
    /// Free-form numeric host properties (biome factors, altitude, ...).
    #[serde(default)]
    pub properties: BTreeMap<String, f64>,
}

impl Default for CellEnvironment {
    fn default() -> Self {
        Self {
            ambient_temperature: 293.15,
            properties: BTreeMap::new(),
        }
    }
}

impl CellEnvironment {
    pub fn property(&self, key: &str) -> Option<f64> {
        self.properties.get(key).copied()
    }
}

/// Host-side owner of one or more cells.
///
/// All methods are invoked on the mutation thread.
pub trait CellContainer: Send + Sync {
    /// Cells currently held by this container.
    fn cells(&self) -> Vec<Locator>;

    /// Locators spatially adjacent to `locator` under the host's rules.
    /// Pure query; called before any mutation.
    fn neighbor_scan(&self, locator: &Locator) -> Vec<Locator>;

    fn on_cell_connected(&self, local: &Locator, remote: &Locator) {
        let _ = (local, remote);
    }

    fn on_cell_disconnected(&self, local: &Locator, remote: &Locator) {
        let _ = (local, remote);
    }

    /// Called once per topology operation that touched this container.
    fn on_topology_changed(&self) {}
}

/// Resolves the container for a persisted cell during a load.
pub trait ContainerResolver {
    fn container(&self, locator: &Locator) -> Option<Arc<dyn CellContainer>>;

    fn environment(&self, locator: &Locator) -> CellEnvironment {
        let _ = locator;
        CellEnvironment::default()
    }
}

/// Identity of a container `Arc`, for deduplicating notifications.
pub(crate) fn container_key(container: &Arc<dyn CellContainer>) -> usize {
    Arc::as_ptr(container) as *const () as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Lonely;

    impl CellContainer for Lonely {
        fn cells(&self) -> Vec<Locator> {
            vec![Locator::at(0, 0, 0)]
        }
        fn neighbor_scan(&self, _locator: &Locator) -> Vec<Locator> {
            Vec::new()
        }
    }

    #[test]
    fn environment_defaults_to_room_temperature() {
        let env = CellEnvironment::default();
        assert!((env.ambient_temperature - 293.15).abs() < 1e-9);
        assert_eq!(env.property("altitude"), None);
    }

    #[test]
    fn container_key_distinguishes_instances() {
        let a: Arc<dyn CellContainer> = Arc::new(Lonely);
        let b: Arc<dyn CellContainer> = Arc::new(Lonely);
        let a2 = Arc::clone(&a);
        assert_eq!(container_key(&a), container_key(&a2));
        assert_ne!(container_key(&a), container_key(&b));
    }

    #[test]
    fn default_hooks_are_noops() {
        let c = Lonely;
        c.on_cell_connected(&Locator::at(0, 0, 0), &Locator::at(1, 0, 0));
        c.on_topology_changed();
        assert_eq!(c.cells().len(), 1);
    }
}
