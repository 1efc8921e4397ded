use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fanout_core::analyzer::{AnalysisError, Analyzer, DeclarationScanner};
use fanout_core::config::IndexerConfig;
use fanout_core::indexing::{DiscoveryOptions, collect_work_items};
use fanout_core::model::{EdgeKind, GraphTables, NodeKind, PartialGraph, StoreId, WorkItem};
use fanout_core::runtime::{
    Coordinator, IndexTask, IndexerChannels, LocalIndexTask, ThreadLauncher,
};
use fanout_core::store::{CanonicalStore, StoreSet};
use fanout_ingest::{InterruptSignal, Task, TaskContext, TaskRunner, TaskStatus};
use fanout_ipc::InstanceId;

const SHAPES: &str = r#"
pub trait Shape {
    fn area(&self) -> f64;
}

pub struct Circle {
    radius: f64,
}

impl Shape for Circle {
    fn area(&self) -> f64 {
        let r = self.radius;
        3.14 * r * r
    }
}
"#;

const GEOMETRY: &str = r#"
pub struct Square {
    side: f64,
}

impl Shape for Square {
    fn area(&self) -> f64 {
        self.side * self.side
    }
}

fn total(shapes: &[Box<dyn Shape>]) -> f64 {
    let mut sum = 0.0;
    sum
}
"#;

fn write_tree(root: &Path) {
    fs::create_dir_all(root.join("src")).expect("mkdir should work");
    fs::write(root.join("src/shapes.rs"), SHAPES).expect("write should work");
    fs::write(root.join("src/geometry.rs"), GEOMETRY).expect("write should work");
    fs::write(root.join("src/empty.rs"), "").expect("write should work");
}

type StoreShape = (
    BTreeSet<(String, NodeKind)>,
    BTreeSet<(EdgeKind, String, String)>,
    usize,
);

fn shape_of(tables: &GraphTables) -> StoreShape {
    let name = |id| {
        tables
            .node(id)
            .map(|n| n.name.clone())
            .unwrap_or_default()
    };
    (
        tables
            .nodes()
            .iter()
            .map(|n| (n.name.clone(), n.kind))
            .collect(),
        tables
            .edges()
            .iter()
            .map(|e| (e.kind, name(e.source), name(e.target)))
            .collect(),
        tables.occurrences().len(),
    )
}

#[test]
fn local_and_worker_runs_build_the_same_store() {
    let dir = tempfile::tempdir().expect("tempdir should work");
    let root = dir.path().join("project");
    write_tree(&root);
    let work = collect_work_items(&root, &DiscoveryOptions::default())
        .expect("discovery should work");
    assert_eq!(work.len(), 3);

    let analyzer: Arc<dyn Analyzer> = Arc::new(DeclarationScanner);
    let config = IndexerConfig {
        worker_count: 2,
        runtime_dir: dir.path().join("runtime"),
        idle_sleep_ms: 1,
        backpressure_sleep_ms: 5,
        ..IndexerConfig::default()
    };
    let runner = TaskRunner::new(&config.flow_control());
    let ctx = TaskContext::default();

    let mut local = LocalIndexTask::new(
        analyzer.clone(),
        2,
        StoreSet::single(CanonicalStore::in_memory()),
        work.clone(),
    );
    assert_eq!(
        runner.run(&mut local, &ctx).expect("local run should work"),
        TaskStatus::Success
    );

    let instance = InstanceId::generate();
    let channels =
        IndexerChannels::open(&config.runtime_dir, &instance, &config).expect("open should work");
    let mut ipc = IndexTask::new(
        Coordinator::new(channels),
        Box::new(ThreadLauncher::new(analyzer.clone())),
        analyzer,
        config.clone(),
        StoreSet::single(CanonicalStore::in_memory()),
        work,
    );
    assert_eq!(
        runner.run(&mut ipc, &ctx).expect("ipc run should work"),
        TaskStatus::Success
    );

    let local_shape = shape_of(local.stores().primary().tables());
    let ipc_shape = shape_of(ipc.stores().primary().tables());
    assert_eq!(local_shape, ipc_shape);
    assert!(
        local_shape
            .0
            .contains(&("Circle".to_string(), NodeKind::Struct))
    );
    assert_eq!(local.report().files_merged, 3);
    assert_eq!(ipc.report().files_merged, 3);
}

/// Panics on `boom.rs`.
struct FragileAnalyzer;

impl Analyzer for FragileAnalyzer {
    fn analyze(&self, item: &WorkItem) -> Result<PartialGraph, AnalysisError> {
        if item.path.ends_with("boom.rs") {
            panic!("analyzer bug");
        }
        let mut graph = PartialGraph::new();
        graph.add_file_node(&item.path, "rust", 1, true);
        Ok(graph)
    }
}

#[test]
fn analyzer_panic_is_recorded_as_a_crashed_file() {
    let items: Vec<WorkItem> = ["a.rs", "boom.rs", "b.rs", "c.rs"]
        .into_iter()
        .map(|name| WorkItem::new(name))
        .collect();
    let mut task = LocalIndexTask::new(
        Arc::new(FragileAnalyzer),
        3,
        StoreSet::single(CanonicalStore::in_memory()),
        items.clone(),
    );

    let status = TaskRunner::default()
        .run(&mut task, &TaskContext::default())
        .expect("run should work");
    assert_eq!(status, TaskStatus::Success);

    let report = task.report();
    assert_eq!(report.crashed_files, vec![PathBuf::from("boom.rs")]);
    assert_eq!(report.files_merged, 4);
    let retry: Vec<PathBuf> = report
        .crashed_items(&items)
        .into_iter()
        .map(|item| item.path)
        .collect();
    assert_eq!(retry, vec![PathBuf::from("boom.rs")]);

    let store = task.stores().primary();
    assert!(store.is_file_complete(Path::new("a.rs")));
    assert!(!store.is_file_complete(Path::new("boom.rs")));
}

#[test]
fn items_follow_their_target_store() {
    let items = vec![
        WorkItem::new("main.rs"),
        WorkItem::new("vendored.rs").for_store(StoreId(1)),
        WorkItem::new("isolated.rs")
            .for_store(StoreId(1))
            .isolated("isolated"),
    ];
    let mut stores = StoreSet::single(CanonicalStore::in_memory());
    stores.insert(StoreId(1), CanonicalStore::in_memory());
    let mut task = LocalIndexTask::new(Arc::new(FragileAnalyzer), 2, stores, items);

    TaskRunner::default()
        .run(&mut task, &TaskContext::default())
        .expect("run should work");

    let (stores, report) = task.into_parts();
    assert_eq!(report.serial_files, 1);
    let primary = stores.primary().tables();
    let vendor = stores.get(StoreId(1)).expect("store 1 exists").tables();
    assert!(primary.node_by_name("main.rs").is_some());
    assert!(primary.node_by_name("vendored.rs").is_none());
    assert!(vendor.node_by_name("vendored.rs").is_some());
    assert!(vendor.node_by_name("isolated.rs").is_some());
}

#[test]
fn reset_allows_a_second_pass() {
    let mut task = LocalIndexTask::new(
        Arc::new(FragileAnalyzer),
        2,
        StoreSet::single(CanonicalStore::in_memory()),
        vec![WorkItem::new("first.rs")],
    );
    let runner = TaskRunner::default();
    let ctx = TaskContext::default();
    runner.run(&mut task, &ctx).expect("first pass should work");

    task.reset(&ctx).expect("reset should work");
    task.set_items(vec![WorkItem::new("second.rs")]);
    runner.run(&mut task, &ctx).expect("second pass should work");

    assert_eq!(task.report().files_queued, 1);
    let tables = task.stores().primary().tables();
    assert!(tables.node_by_name("first.rs").is_some());
    assert!(tables.node_by_name("second.rs").is_some());
}

/// Raises the caller's interrupt while indexing.
struct InterruptOnAnalyze(InterruptSignal);

impl Analyzer for InterruptOnAnalyze {
    fn analyze(&self, item: &WorkItem) -> Result<PartialGraph, AnalysisError> {
        self.0.raise();
        let mut graph = PartialGraph::new();
        graph.add_file_node(&item.path, "rust", 1, true);
        Ok(graph)
    }
}

#[test]
fn interrupt_during_the_last_serial_file_is_reported() {
    let signal = InterruptSignal::new();
    let mut task = LocalIndexTask::new(
        Arc::new(InterruptOnAnalyze(signal.clone())),
        2,
        StoreSet::single(CanonicalStore::in_memory()),
        vec![WorkItem::new("only.rs").isolated("only")],
    );

    let status = TaskRunner::default()
        .run(&mut task, &TaskContext::new(signal))
        .expect("run should work");

    assert_eq!(status, TaskStatus::Success);
    assert_eq!(task.report().files_merged, 1);
    assert!(task.report().interrupted);
}
