//! Persisted form of a simulation domain.
//!
//! Provides binary serialization via `bitcode` with a versioned header. The
//! records carry only topology: graph ids, member type ids and locators, an
//! opaque per-cell payload produced by [`CellLogic::save`], and the edge
//! list as locator pairs. Solver state is rebuilt on load.
//!
//! [`CellLogic::save`]: crate::cell::CellLogic::save

use crate::graph::GraphState;
use crate::id::{CellTypeId, GraphId, Locator};
use serde::{Deserialize, Serialize};
use tracing::error;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic number identifying a cell domain snapshot.
pub const SNAPSHOT_MAGIC: u32 = 0xCE11_0001;

/// Current format version. Increment when breaking the wire format.
pub const FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("bitcode encoding failed: {0}")]
    Encode(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DeserializeError {
    #[error("invalid magic number: expected 0x{:08X}, got 0x{:08X}", SNAPSHOT_MAGIC, .0)]
    InvalidMagic(u32),
    #[error("unsupported format version: expected {}, got {}", FORMAT_VERSION, .0)]
    UnsupportedVersion(u32),
    #[error("snapshot from future version {0} (this build supports up to {FORMAT_VERSION})")]
    FutureVersion(u32),
    #[error("bitcode decoding failed: {0}")]
    Decode(String),
}

// ---------------------------------------------------------------------------
// Snapshot header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub magic: u32,
    pub version: u32,
}

impl Default for SnapshotHeader {
    fn default() -> Self {
        Self {
            magic: SNAPSHOT_MAGIC,
            version: FORMAT_VERSION,
        }
    }
}

impl SnapshotHeader {
    pub fn validate(&self) -> Result<(), DeserializeError> {
        if self.magic != SNAPSHOT_MAGIC {
            return Err(DeserializeError::InvalidMagic(self.magic));
        }
        if self.version > FORMAT_VERSION {
            return Err(DeserializeError::FutureVersion(self.version));
        }
        if self.version < FORMAT_VERSION {
            return Err(DeserializeError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One persisted cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    pub type_id: CellTypeId,
    pub locator: Locator,
    /// Absent when the cell had nothing to save or its save failed.
    #[serde(default)]
    pub payload: Option<Vec<u8>>,
}

/// One persisted graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphRecord {
    pub id: GraphId,
    /// A missing member list restores as an empty graph.
    #[serde(default)]
    pub members: Option<Vec<CellRecord>>,
    /// Each undirected edge once, as `(lower, higher)` locator pairs.
    #[serde(default)]
    pub connections: Vec<(Locator, Locator)>,
}

impl GraphRecord {
    /// Capture a graph's members and edges. A failing payload save is
    /// logged and recorded as an absent payload.
    pub(crate) fn capture(state: &GraphState) -> Self {
        let mut members = Vec::with_capacity(state.len());
        let mut connections = Vec::new();
        for cell in state.cells() {
            let locator = *cell.locator();
            let payload = match cell.logic().save() {
                Ok(data) if data.is_empty() => None,
                Ok(data) => Some(data),
                Err(e) => {
                    error!(
                        graph = %state.id(),
                        locator = %locator,
                        "cell payload save failed: {e}"
                    );
                    None
                }
            };
            members.push(CellRecord {
                type_id: cell.type_id(),
                locator,
                payload,
            });
            connections.extend(
                cell.neighbors()
                    .iter()
                    .filter(|remote| locator < **remote)
                    .map(|remote| (locator, *remote)),
            );
        }
        Self {
            id: state.id(),
            members: Some(members),
            connections,
        }
    }

    pub fn member_count(&self) -> usize {
        self.members.as_ref().map_or(0, Vec::len)
    }
}

/// Every graph of a domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainSnapshot {
    pub header: SnapshotHeader,
    pub graphs: Vec<GraphRecord>,
}

impl DomainSnapshot {
    pub fn new(graphs: Vec<GraphRecord>) -> Self {
        Self {
            header: SnapshotHeader::default(),
            graphs,
        }
    }

    pub fn cell_count(&self) -> usize {
        self.graphs.iter().map(GraphRecord::member_count).sum()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SerializeError> {
        bitcode::serialize(self).map_err(|e| SerializeError::Encode(e.to_string()))
    }

    /// Decode and validate the header. Returns an error (not a panic) on
    /// garbage input or a version mismatch.
    pub fn from_bytes(data: &[u8]) -> Result<Self, DeserializeError> {
        let snapshot: Self =
            bitcode::deserialize(data).map_err(|e| DeserializeError::Decode(e.to_string()))?;
        snapshot.header.validate()?;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DomainSnapshot {
        DomainSnapshot::new(vec![GraphRecord {
            id: GraphId(4),
            members: Some(vec![
                CellRecord {
                    type_id: CellTypeId(1),
                    locator: Locator::at(0, 0, 0),
                    payload: Some(vec![1, 2, 3]),
                },
                CellRecord {
                    type_id: CellTypeId(1),
                    locator: Locator::at(1, 0, 0),
                    payload: None,
                },
            ]),
            connections: vec![(Locator::at(0, 0, 0), Locator::at(1, 0, 0))],
        }])
    }

    #[test]
    fn bytes_round_trip() {
        let snapshot = sample();
        let bytes = snapshot.to_bytes().unwrap();
        assert_eq!(DomainSnapshot::from_bytes(&bytes).unwrap(), snapshot);
        assert_eq!(snapshot.cell_count(), 2);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        match DomainSnapshot::from_bytes(&[0u8; 10]) {
            Err(DeserializeError::Decode(_)) => {}
            other => panic!("expected Decode error, got {other:?}"),
        }
    }

    #[test]
    fn header_checks() {
        let mut header = SnapshotHeader::default();
        assert!(header.validate().is_ok());
        header.version = FORMAT_VERSION + 1;
        assert!(matches!(header.validate(), Err(DeserializeError::FutureVersion(_))));
        header.version = 0;
        assert!(matches!(header.validate(), Err(DeserializeError::UnsupportedVersion(0))));
        header.magic = 0xDEAD_BEEF;
        assert!(matches!(header.validate(), Err(DeserializeError::InvalidMagic(0xDEAD_BEEF))));
    }

    #[test]
    fn foreign_magic_rejected_after_decode() {
        let mut snapshot = sample();
        snapshot.header.magic = 0x1234_5678;
        let bytes = snapshot.to_bytes().unwrap();
        assert!(matches!(
            DomainSnapshot::from_bytes(&bytes),
            Err(DeserializeError::InvalidMagic(0x1234_5678))
        ));
    }

    #[test]
    fn missing_members_field_means_empty_graph() {
        let record: GraphRecord = serde_json::from_str(r#"{ "id": 7 }"#).unwrap();
        assert_eq!(record.id, GraphId(7));
        assert_eq!(record.members, None);
        assert_eq!(record.member_count(), 0);
        assert!(record.connections.is_empty());
    }

    #[test]
    fn missing_payload_field_is_none() {
        let record: CellRecord = serde_json::from_str(
            r#"{ "type_id": 3, "locator": { "x": 1, "y": 2, "z": 3, "face": "Up" } }"#,
        )
        .unwrap();
        assert_eq!(record.payload, None);
        assert_eq!(record.locator, Locator::new(1, 2, 3, crate::id::Face::Up));
    }
}
