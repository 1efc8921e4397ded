use std::collections::BTreeSet;
use std::path::Path;

use fanout_core::merge::{self, GraphSink};
use fanout_core::model::{
    AccessKind, ComponentKind, DefinitionKind, EdgeKind, ErrorRecord, GraphTables, Id,
    LocationKind, NodeKind, PartialGraph, Span,
};
use fanout_core::store::CanonicalStore;
use fanout_core::{FanoutError, Result};

/// Store contents with ids replaced by the names they point at.
#[derive(Debug, PartialEq, Eq)]
struct Normalized {
    nodes: BTreeSet<(String, NodeKind)>,
    files: BTreeSet<(String, String, bool)>,
    symbols: BTreeSet<(String, DefinitionKind)>,
    edges: BTreeSet<(EdgeKind, String, String)>,
    locals: BTreeSet<String>,
    occurrences: BTreeSet<(String, String)>,
    accesses: BTreeSet<(String, AccessKind)>,
    components: BTreeSet<(String, String, String)>,
    errors: BTreeSet<(String, bool)>,
}

fn element_name(tables: &GraphTables, id: Id) -> String {
    if let Some(node) = tables.node(id) {
        return node.name.clone();
    }
    if let Some(edge) = tables.edge(id) {
        return format!(
            "{:?}:{}->{}",
            edge.kind,
            element_name(tables, edge.source),
            element_name(tables, edge.target)
        );
    }
    tables
        .local_symbols()
        .iter()
        .find(|local| local.id == id)
        .map(|local| local.name.clone())
        .unwrap_or_else(|| format!("?{id}"))
}

fn location_name(tables: &GraphTables, id: Id) -> String {
    tables
        .locations()
        .iter()
        .find(|location| location.id == id)
        .map(|location| {
            format!(
                "{}@{}:{}-{}:{} {:?}",
                element_name(tables, location.file),
                location.span.start_line,
                location.span.start_column,
                location.span.end_line,
                location.span.end_column,
                location.kind
            )
        })
        .unwrap_or_else(|| format!("?{id}"))
}

fn normalize(tables: &GraphTables) -> Normalized {
    Normalized {
        nodes: tables
            .nodes()
            .iter()
            .map(|n| (n.name.clone(), n.kind))
            .collect(),
        files: tables
            .files()
            .iter()
            .map(|f| (element_name(tables, f.id), f.language.clone(), f.indexed))
            .collect(),
        symbols: tables
            .symbols()
            .iter()
            .map(|s| (element_name(tables, s.id), s.definition))
            .collect(),
        edges: tables
            .edges()
            .iter()
            .map(|e| {
                (
                    e.kind,
                    element_name(tables, e.source),
                    element_name(tables, e.target),
                )
            })
            .collect(),
        locals: tables
            .local_symbols()
            .iter()
            .map(|l| l.name.clone())
            .collect(),
        occurrences: tables
            .occurrences()
            .iter()
            .map(|o| {
                (
                    element_name(tables, o.element),
                    location_name(tables, o.location),
                )
            })
            .collect(),
        accesses: tables
            .component_accesses()
            .iter()
            .map(|a| (element_name(tables, a.node), a.access))
            .collect(),
        components: tables
            .element_components()
            .iter()
            .map(|c| {
                (
                    element_name(tables, c.element),
                    format!("{:?}", c.kind),
                    c.data.clone(),
                )
            })
            .collect(),
        errors: tables
            .errors()
            .iter()
            .map(|e| (e.message.clone(), e.fatal))
            .collect(),
    }
}

/// `a.cpp` declares `Shape` and references `Circle` before seeing it.
fn graph_a() -> PartialGraph {
    let mut graph = PartialGraph::new();
    let file = graph.add_file_node(Path::new("a.cpp"), "cpp", 10, true);
    let shape = graph.add_node(NodeKind::Class, "Shape");
    let circle = graph.add_node(NodeKind::Unknown, "Circle");
    let area = graph.add_node(NodeKind::Method, "Shape::area");
    graph.add_symbol(shape, DefinitionKind::Explicit);
    graph.add_symbol(circle, DefinitionKind::Implicit);
    graph.add_symbol(area, DefinitionKind::Explicit);
    let member = graph.add_edge(EdgeKind::Member, shape, area);
    graph.add_edge(EdgeKind::Usage, area, circle);
    let local = graph.add_local_symbol("a.cpp:3:r");
    let token = graph.add_location(file, Span::on_line(2, 7, 12), LocationKind::Token);
    let local_at = graph.add_location(file, Span::on_line(3, 5, 6), LocationKind::LocalSymbol);
    graph.add_occurrence(shape, token);
    graph.add_occurrence(member, token);
    graph.add_occurrence(local, local_at);
    graph.add_component_access(area, AccessKind::Private);
    graph.add_element_component(circle, ComponentKind::Ambiguous, "1,4");
    graph
}

/// `b.cpp` defines `Circle` as a subclass of `Shape` and makes `area` public.
fn graph_b() -> PartialGraph {
    let mut graph = PartialGraph::new();
    let file = graph.add_file_node(Path::new("b.cpp"), "cpp", 20, true);
    let circle = graph.add_node(NodeKind::Class, "Circle");
    let shape = graph.add_node(NodeKind::Unknown, "Shape");
    let area = graph.add_node(NodeKind::Method, "Shape::area");
    graph.add_symbol(circle, DefinitionKind::Explicit);
    graph.add_symbol(shape, DefinitionKind::Implicit);
    graph.add_edge(EdgeKind::Inheritance, circle, shape);
    let token = graph.add_location(file, Span::on_line(1, 7, 13), LocationKind::Token);
    graph.add_occurrence(circle, token);
    graph.add_component_access(area, AccessKind::Public);
    graph.add_error(&ErrorRecord {
        id: 0,
        message: "unbalanced braces".to_string(),
        file: "b.cpp".into(),
        line: 9,
        column: 1,
        translation_unit: "b.cpp".into(),
        fatal: false,
        indexed: true,
    });
    graph
}

#[test]
fn merge_order_does_not_change_the_store() {
    let mut ab = CanonicalStore::in_memory();
    ab.inject(&graph_a()).expect("inject a should work");
    ab.inject(&graph_b()).expect("inject b should work");

    let mut ba = CanonicalStore::in_memory();
    ba.inject(&graph_b()).expect("inject b should work");
    ba.inject(&graph_a()).expect("inject a should work");

    assert_eq!(normalize(ab.tables()), normalize(ba.tables()));

    let tables = ab.tables();
    assert_eq!(
        tables.node_by_name("Circle").map(|n| n.kind),
        Some(NodeKind::Class)
    );
    let area = tables
        .node_by_name("Shape::area")
        .expect("area should exist")
        .id;
    assert_eq!(tables.access(area), Some(AccessKind::Public));
    let shape = tables.node_by_name("Shape").expect("shape should exist").id;
    assert_eq!(
        tables.symbol(shape).map(|s| s.definition),
        Some(DefinitionKind::Explicit)
    );
}

#[test]
fn merging_the_same_graph_twice_is_idempotent() {
    let mut store = CanonicalStore::in_memory();
    store.inject(&graph_a()).expect("first inject should work");
    let count = store.tables().entity_count();
    let last_id = store.tables().last_id();

    store.inject(&graph_a()).expect("second inject should work");

    assert_eq!(store.tables().entity_count(), count);
    assert_eq!(store.tables().last_id(), last_id);
}

#[test]
fn dangling_edge_is_dropped_with_a_warning() {
    let mut graph = graph_b();
    // Endpoint 999 was never declared in this graph.
    let circle = graph
        .node_by_name("Circle")
        .expect("circle should exist")
        .id;
    graph.add_edge(EdgeKind::Call, circle, 999);

    let mut store = CanonicalStore::in_memory();
    let report = store.inject(&graph).expect("inject should work");

    assert_eq!(report.dropped, 1);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("1 of 2 endpoints mapped"));
    assert_eq!(report.edges, 1);
    assert!(
        store
            .tables()
            .edges()
            .iter()
            .all(|edge| edge.kind != EdgeKind::Call)
    );
    assert!(store.tables().node_by_name("Circle").is_some());
}

/// Delegates to a store but refuses the first edge.
struct FailingSink<'a> {
    store: &'a mut CanonicalStore,
}

impl GraphSink for FailingSink<'_> {
    fn insert_node(&mut self, kind: NodeKind, name: &str) -> Result<Id> {
        self.store.insert_node(kind, name)
    }

    fn insert_file(
        &mut self,
        id: Id,
        path: &Path,
        language: &str,
        modification_time: u64,
        indexed: bool,
    ) -> Result<Id> {
        self.store
            .insert_file(id, path, language, modification_time, indexed)
    }

    fn insert_symbol(&mut self, id: Id, definition: DefinitionKind) -> Result<Id> {
        self.store.insert_symbol(id, definition)
    }

    fn insert_edge(&mut self, _kind: EdgeKind, _source: Id, _target: Id) -> Result<Id> {
        Err(FanoutError::Store("disk full".into()))
    }

    fn insert_local_symbol(&mut self, name: &str) -> Result<Id> {
        self.store.insert_local_symbol(name)
    }

    fn insert_location(&mut self, file: Id, span: Span, kind: LocationKind) -> Result<Id> {
        self.store.insert_location(file, span, kind)
    }

    fn insert_occurrence(&mut self, element: Id, location: Id) -> Result<()> {
        self.store.insert_occurrence(element, location)
    }

    fn insert_component_access(&mut self, node: Id, access: AccessKind) -> Result<()> {
        self.store.insert_component_access(node, access)
    }

    fn insert_element_component(
        &mut self,
        element: Id,
        kind: ComponentKind,
        data: &str,
    ) -> Result<()> {
        self.store.insert_element_component(element, kind, data)
    }

    fn insert_error(&mut self, error: &ErrorRecord) -> Result<Id> {
        self.store.insert_error(error)
    }
}

#[test]
fn failed_merge_rolls_back_completely() {
    let mut store = CanonicalStore::in_memory();
    store.inject(&graph_a()).expect("inject a should work");
    let before = normalize(store.tables());
    let last_id = store.tables().last_id();

    store.begin_transaction().expect("begin should work");
    let outcome = merge::inject(&graph_b(), &mut FailingSink { store: &mut store });
    assert!(outcome.is_err());
    store.rollback().expect("rollback should work");

    assert!(!store.in_transaction());
    assert_eq!(normalize(store.tables()), before);
    assert_eq!(store.tables().last_id(), last_id);
    assert_eq!(
        store.tables().node_by_name("Shape").map(|n| n.kind),
        Some(NodeKind::Class)
    );
}

#[test]
fn nested_transactions_are_rejected() {
    let mut store = CanonicalStore::in_memory();
    store.begin_transaction().expect("begin should work");
    assert!(store.begin_transaction().is_err());
    assert!(store.save().is_err());
    store.commit().expect("commit should work");
    assert!(store.commit().is_err());
}
