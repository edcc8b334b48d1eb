//! Save and load of whole domains: bitcode round trips, partial restores,
//! and the ordering of world-load hooks across graphs.

use cellnet_core::cell::{Cell, CellError, CellFactory, CellLogic};
use cellnet_core::config::SimulationConfig;
use cellnet_core::id::{CellTypeId, GraphId, Locator, SimulationKind};
use cellnet_core::manager::{CellGraphManager, LoadReport, ManagerError};
use cellnet_core::serialize::{CellRecord, DomainSnapshot, GraphRecord};
use cellnet_core::solver::{Solver, SolverFactory};
use cellnet_core::test_utils::*;
use cellnet_core::validation::check_manager;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;

fn loc(x: i32) -> Locator {
    Locator::at(x, 0, 0)
}

fn record(x: i32, type_id: CellTypeId) -> CellRecord {
    CellRecord {
        type_id,
        locator: loc(x),
        payload: None,
    }
}

fn payload_of(manager: &CellGraphManager, locator: &Locator) -> Vec<u8> {
    manager
        .with_cell(locator, |c| c.logic_as::<TestLogic>().unwrap().payload.clone())
        .unwrap()
}

/// Two networks: a three-cell chain and a lone source.
fn populated() -> (CellGraphManager, Arc<TestContainer>) {
    let mut manager = test_manager();
    let container = TestContainer::spatial();
    for x in 0..3 {
        manager.insert_cell(make_cell(&container, x, Kinds::BOTH)).unwrap();
    }
    manager.insert_cell(make_source_cell(&container, 10)).unwrap();
    (manager, container)
}

// ===========================================================================
// Round trips
// ===========================================================================

#[test]
fn bitcode_round_trip_restores_domain() {
    let (mut source, _) = populated();
    source
        .with_cell_mut(&loc(1), |c| {
            c.logic_as_mut::<TestLogic>().unwrap().payload = vec![1, 2, 3];
        })
        .unwrap();
    let ids = source.graph_ids();
    assert!(source.is_dirty());
    let bytes = source.save_bytes().unwrap();
    assert!(!source.is_dirty());

    let mut restored = test_manager();
    let report = restored
        .load_bytes(&bytes, &SingleContainer(TestContainer::spatial()))
        .unwrap();
    assert_eq!(
        report,
        LoadReport {
            graphs: 2,
            cells: 4,
            skipped_cells: 0,
            dropped_graphs: 0,
        }
    );
    assert!(check_manager(&restored).is_empty());
    assert_eq!(restored.graph_ids(), ids);
    assert!(!restored.is_dirty());
    assert!(restored.graphs().all(|g| g.is_running()));
    assert_eq!(payload_of(&restored, &loc(1)), vec![1, 2, 3]);
    assert!(payload_of(&restored, &loc(0)).is_empty());

    let middle = restored
        .with_cell(&loc(1), |c| c.neighbors().to_vec())
        .unwrap();
    assert_eq!(middle, vec![loc(0), loc(2)]);
    let chain = restored.graph(restored.graph_of(&loc(0)).unwrap()).unwrap();
    assert_eq!(chain.partitions(SimulationKind::Electrical).len(), 1);
    assert_eq!(chain.partitions(SimulationKind::Thermal).len(), 1);
}

#[test]
fn restored_ids_are_never_handed_out_again() {
    let mut manager = test_manager();
    let snapshot = DomainSnapshot::new(vec![GraphRecord {
        id: GraphId(40),
        members: Some(vec![record(0, Kinds::ELECTRICAL.type_id())]),
        connections: Vec::new(),
    }]);
    manager
        .load(&snapshot, &SingleContainer(TestContainer::new()))
        .unwrap();

    let fresh = manager.create_graph();
    assert!(fresh > GraphId(40));
}

#[test]
fn failing_payload_save_is_stored_as_absent() {
    let (mut source, _) = populated();
    source
        .with_cell_mut(&loc(2), |c| {
            let logic = c.logic_as_mut::<TestLogic>().unwrap();
            logic.payload = vec![9];
            logic.fail_save = true;
        })
        .unwrap();
    source
        .with_cell_mut(&loc(0), |c| {
            c.logic_as_mut::<TestLogic>().unwrap().payload = vec![4];
        })
        .unwrap();

    let snapshot = source.save();
    let members: Vec<&CellRecord> = snapshot
        .graphs
        .iter()
        .flat_map(|g| g.members.iter().flatten())
        .collect();
    let failed = members.iter().find(|m| m.locator == loc(2)).unwrap();
    assert_eq!(failed.payload, None);
    let saved = members.iter().find(|m| m.locator == loc(0)).unwrap();
    assert_eq!(saved.payload, Some(vec![4]));

    let mut restored = test_manager();
    restored
        .load(&snapshot, &SingleContainer(TestContainer::spatial()))
        .unwrap();
    assert!(payload_of(&restored, &loc(2)).is_empty());
    assert_eq!(payload_of(&restored, &loc(0)), vec![4]);
}

// ===========================================================================
// Partial restores
// ===========================================================================

#[test]
fn unknown_type_is_skipped_with_its_edges() {
    let snapshot = DomainSnapshot::new(vec![GraphRecord {
        id: GraphId(3),
        members: Some(vec![
            record(0, Kinds::ELECTRICAL.type_id()),
            record(1, Kinds::ELECTRICAL.type_id()),
            record(2, CellTypeId(999)),
        ]),
        connections: vec![(loc(0), loc(1)), (loc(1), loc(2))],
    }]);

    let mut manager = test_manager();
    let report = manager
        .load(&snapshot, &SingleContainer(TestContainer::new()))
        .unwrap();
    assert_eq!(report.cells, 2);
    assert_eq!(report.skipped_cells, 1);
    assert!(check_manager(&manager).is_empty());
    assert!(!manager.contains(&loc(2)));
    let neighbors = manager.with_cell(&loc(1), |c| c.neighbors().to_vec()).unwrap();
    assert_eq!(neighbors, vec![loc(0)]);
}

#[test]
fn skipped_cut_cell_splits_restored_graph() {
    let snapshot = DomainSnapshot::new(vec![
        GraphRecord {
            id: GraphId(3),
            members: Some(vec![
                record(0, Kinds::ELECTRICAL.type_id()),
                record(1, CellTypeId(999)),
                record(2, Kinds::ELECTRICAL.type_id()),
                record(3, Kinds::ELECTRICAL.type_id()),
            ]),
            connections: vec![(loc(0), loc(1)), (loc(1), loc(2)), (loc(2), loc(3))],
        },
        GraphRecord {
            id: GraphId(4),
            members: Some(vec![record(20, Kinds::THERMAL.type_id())]),
            connections: Vec::new(),
        },
    ]);

    let mut manager = test_manager();
    let report = manager
        .load(&snapshot, &SingleContainer(TestContainer::new()))
        .unwrap();
    assert_eq!(report.graphs, 3);
    assert_eq!(report.cells, 3);
    assert_eq!(report.skipped_cells, 1);
    assert!(check_manager(&manager).is_empty());
    assert_eq!(manager.graph_count(), 3);
    assert!(manager.graphs().all(|g| g.is_running()));

    assert_eq!(manager.graph_of(&loc(0)), Some(GraphId(3)));
    assert_eq!(manager.graph_of(&loc(20)), Some(GraphId(4)));
    let tail = manager.graph_of(&loc(2)).unwrap();
    assert!(tail > GraphId(4));
    assert_eq!(manager.graph_of(&loc(3)), Some(tail));
    assert_eq!(
        manager.graph(tail).unwrap().partitions(SimulationKind::Electrical).len(),
        1
    );
}

#[test]
fn graphs_without_members_are_dropped() {
    let snapshot = DomainSnapshot::new(vec![
        GraphRecord {
            id: GraphId(1),
            members: None,
            connections: Vec::new(),
        },
        GraphRecord {
            id: GraphId(2),
            members: Some(vec![record(5, CellTypeId(999))]),
            connections: Vec::new(),
        },
        GraphRecord {
            id: GraphId(3),
            members: Some(vec![record(0, Kinds::THERMAL.type_id())]),
            connections: Vec::new(),
        },
    ]);

    let mut manager = test_manager();
    let report = manager
        .load(&snapshot, &SingleContainer(TestContainer::new()))
        .unwrap();
    assert_eq!(report.graphs, 1);
    assert_eq!(report.dropped_graphs, 2);
    assert_eq!(manager.graph_ids(), vec![GraphId(3)]);
}

#[test]
fn corrupt_bytes_leave_domain_untouched() {
    let (mut manager, _) = populated();
    let before = manager.graph_ids();
    let err = manager
        .load_bytes(&[0xFF, 0x00, 0x13], &SingleContainer(TestContainer::new()))
        .unwrap_err();
    assert!(matches!(err, ManagerError::Deserialize(_)));
    assert_eq!(manager.graph_ids(), before);
}

#[test]
fn occupied_locator_rejects_whole_load() {
    let (mut manager, _) = populated();
    let before = manager.graph_ids();
    let snapshot = DomainSnapshot::new(vec![
        GraphRecord {
            id: GraphId(100),
            members: Some(vec![record(50, Kinds::NONE.type_id())]),
            connections: Vec::new(),
        },
        GraphRecord {
            id: GraphId(101),
            members: Some(vec![record(1, Kinds::NONE.type_id())]),
            connections: Vec::new(),
        },
    ]);
    let err = manager
        .load(&snapshot, &SingleContainer(TestContainer::spatial()))
        .unwrap_err();
    assert!(matches!(err, ManagerError::DuplicateLocator(l) if l == loc(1)));
    assert_eq!(manager.graph_ids(), before);
    assert!(!manager.contains(&loc(50)));
}

// ===========================================================================
// World-load ordering
// ===========================================================================

const LOGGED_TYPE: CellTypeId = CellTypeId(60);

type Log = Arc<Mutex<Vec<String>>>;

#[derive(Debug)]
struct LoggingLogic {
    name: String,
    log: Log,
}

impl LoggingLogic {
    fn record(&self, event: &str) {
        self.log.lock().push(format!("{event} {}", self.name));
    }
}

impl CellLogic for LoggingLogic {
    fn on_loaded_from_disk(&mut self) {
        self.record("loaded");
    }
    fn on_world_loaded_pre_solver(&mut self) {
        self.record("pre_solver");
    }
    fn on_world_loaded_post_solver(&mut self) {
        self.record("post_solver");
    }
    fn on_world_loaded_pre_sim(&mut self) {
        self.record("pre_sim");
    }
    fn on_world_loaded_post_sim(&mut self) {
        self.record("post_sim");
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn logging_manager(log: &Log) -> CellGraphManager {
    let mut cells = CellFactory::new();
    let cell_log = Arc::clone(log);
    cells.register(LOGGED_TYPE, move |info| {
        let name = info.locator.x.to_string();
        Cell::builder(info)
            .object(TestObject::wire(SimulationKind::Electrical))
            .logic(LoggingLogic {
                name,
                log: Arc::clone(&cell_log),
            })
            .build()
    });
    let solver_log = Arc::clone(log);
    let solvers: Arc<dyn SolverFactory> = Arc::new(move |kind| {
        solver_log.lock().push(format!("solver {kind:?}"));
        Box::new(TestSolver::new(kind)) as Box<dyn Solver>
    });
    let config = SimulationConfig {
        tick_interval_ms: SLOW_TICK_MS,
        ..SimulationConfig::default()
    };
    CellGraphManager::new(config, test_pool(), solvers, cells).unwrap()
}

#[test]
fn world_hooks_run_per_stage_across_all_graphs() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let mut manager = logging_manager(&log);
    let snapshot = DomainSnapshot::new(vec![
        GraphRecord {
            id: GraphId(1),
            members: Some(vec![record(0, LOGGED_TYPE)]),
            connections: Vec::new(),
        },
        GraphRecord {
            id: GraphId(2),
            members: Some(vec![record(5, LOGGED_TYPE)]),
            connections: Vec::new(),
        },
    ]);
    manager
        .load(&snapshot, &SingleContainer(TestContainer::new()))
        .unwrap();

    let expected = [
        "loaded 0",
        "loaded 5",
        "pre_solver 0",
        "pre_solver 5",
        "solver Electrical",
        "solver Electrical",
        "post_solver 0",
        "post_solver 5",
        "pre_sim 0",
        "pre_sim 5",
        "post_sim 0",
        "post_sim 5",
    ];
    assert_eq!(*log.lock(), expected);
}

#[test]
fn payload_load_failure_keeps_the_cell() {
    #[derive(Debug)]
    struct Picky;

    impl CellLogic for Picky {
        fn load(&mut self, _data: &[u8]) -> Result<(), CellError> {
            Err(CellError::Payload("unreadable".into()))
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    let mut manager = test_manager();
    manager
        .cell_factory_mut()
        .register(CellTypeId(70), |info| Cell::builder(info).logic(Picky).build());
    let snapshot = DomainSnapshot::new(vec![GraphRecord {
        id: GraphId(1),
        members: Some(vec![CellRecord {
            type_id: CellTypeId(70),
            locator: loc(0),
            payload: Some(vec![1]),
        }]),
        connections: Vec::new(),
    }]);
    let report = manager
        .load(&snapshot, &SingleContainer(TestContainer::new()))
        .unwrap();
    assert_eq!(report.cells, 1);
    assert!(manager.contains(&loc(0)));
}
