use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Locator
// ---------------------------------------------------------------------------

/// Which face of a block position a cell occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Face {
    Down,
    Up,
    North,
    South,
    West,
    East,
}

impl Face {
    pub const ALL: [Face; 6] = [
        Face::Down,
        Face::Up,
        Face::North,
        Face::South,
        Face::West,
        Face::East,
    ];

    /// Unit offset pointing out of this face.
    pub fn offset(self) -> (i32, i32, i32) {
        match self {
            Face::Down => (0, -1, 0),
            Face::Up => (0, 1, 0),
            Face::North => (0, 0, -1),
            Face::South => (0, 0, 1),
            Face::West => (-1, 0, 0),
            Face::East => (1, 0, 0),
        }
    }
}

/// Position and orientation of a cell in the host's addressing space.
///
/// Equality defines node identity: two cells with the same locator can never
/// coexist in one domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Locator {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub face: Face,
}

impl Locator {
    pub fn new(x: i32, y: i32, z: i32, face: Face) -> Self {
        Self { x, y, z, face }
    }

    /// A locator on the `Down` face, the common case for floor-mounted cells.
    pub fn at(x: i32, y: i32, z: i32) -> Self {
        Self::new(x, y, z, Face::Down)
    }

    /// The locator one step away along `face`, keeping this locator's face.
    pub fn offset(self, face: Face) -> Self {
        let (dx, dy, dz) = face.offset();
        Self {
            x: self.x + dx,
            y: self.y + dy,
            z: self.z + dz,
            face: self.face,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})/{:?}", self.x, self.y, self.z, self.face)
    }
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Process-unique identifier of a cell graph. Never reused within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GraphId(pub u64);

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph#{}", self.0)
    }
}

/// Identifies a concrete cell type in the [`CellFactory`](crate::cell::CellFactory).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellTypeId(pub u32);

/// Handle to one entry of a [`SubscriberPool`](crate::subscriber::SubscriberPool).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

/// The physical domains a cell can take part in. Each kind gets its own
/// independently partitioned solver instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SimulationKind {
    Electrical,
    Thermal,
}

impl SimulationKind {
    pub const ALL: [SimulationKind; 2] = [SimulationKind::Electrical, SimulationKind::Thermal];
}
