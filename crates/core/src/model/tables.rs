//! Entity tables shared by partial graphs and the canonical store.
//!
//! Rows are append-only vectors. Each table has a content index so adding an
//! entity that already exists returns the existing id instead of a new row.
//! The indexes are never serialized; they are rebuilt on load.
//!
//! An optional undo journal makes a batch of additions revocable: rows added
//! since the journal opened are truncated and in-place upgrades are reverted.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize, Serializer};

use super::entity::{
    AccessKind, ComponentAccess, ComponentKind, DefinitionKind, Edge, EdgeKind, ElementComponent,
    ErrorRecord, FileRecord, LocalSymbol, LocationKind, Node, NodeKind, Occurrence,
    SourceLocation, Span, Symbol,
};
use super::Id;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TableRows {
    last_id: Id,
    nodes: Vec<Node>,
    files: Vec<FileRecord>,
    symbols: Vec<Symbol>,
    edges: Vec<Edge>,
    local_symbols: Vec<LocalSymbol>,
    locations: Vec<SourceLocation>,
    occurrences: Vec<Occurrence>,
    component_accesses: Vec<ComponentAccess>,
    element_components: Vec<ElementComponent>,
    errors: Vec<ErrorRecord>,
}

type EdgeKey = (EdgeKind, Id, Id);
type LocationKey = (Id, Span, LocationKind);
type ErrorKey = (String, PathBuf, u32, u32, PathBuf, bool, bool);

fn error_key(error: &ErrorRecord) -> ErrorKey {
    (
        error.message.clone(),
        error.file.clone(),
        error.line,
        error.column,
        error.translation_unit.clone(),
        error.fatal,
        error.indexed,
    )
}

#[derive(Debug, Clone, Default)]
struct TableIndex {
    node_by_name: HashMap<String, usize>,
    node_by_id: HashMap<Id, usize>,
    file_by_id: HashMap<Id, usize>,
    symbol_by_id: HashMap<Id, usize>,
    edge_by_key: HashMap<EdgeKey, usize>,
    edge_by_id: HashMap<Id, usize>,
    local_by_name: HashMap<String, usize>,
    location_by_key: HashMap<LocationKey, usize>,
    occurrences: HashSet<Occurrence>,
    access_by_node: HashMap<Id, usize>,
    components: HashSet<ElementComponent>,
    error_by_key: HashMap<ErrorKey, usize>,
}

impl TableIndex {
    fn build(rows: &TableRows) -> Self {
        let mut index = Self::default();
        for (row, node) in rows.nodes.iter().enumerate() {
            index.node_by_name.insert(node.name.clone(), row);
            index.node_by_id.insert(node.id, row);
        }
        for (row, file) in rows.files.iter().enumerate() {
            index.file_by_id.insert(file.id, row);
        }
        for (row, symbol) in rows.symbols.iter().enumerate() {
            index.symbol_by_id.insert(symbol.id, row);
        }
        for (row, edge) in rows.edges.iter().enumerate() {
            index
                .edge_by_key
                .insert((edge.kind, edge.source, edge.target), row);
            index.edge_by_id.insert(edge.id, row);
        }
        for (row, local) in rows.local_symbols.iter().enumerate() {
            index.local_by_name.insert(local.name.clone(), row);
        }
        for (row, location) in rows.locations.iter().enumerate() {
            index
                .location_by_key
                .insert((location.file, location.span, location.kind), row);
        }
        index.occurrences.extend(rows.occurrences.iter().copied());
        for (row, access) in rows.component_accesses.iter().enumerate() {
            index.access_by_node.insert(access.node, row);
        }
        index
            .components
            .extend(rows.element_components.iter().cloned());
        for (row, error) in rows.errors.iter().enumerate() {
            index.error_by_key.insert(error_key(error), row);
        }
        index
    }
}

#[derive(Debug, Clone, Copy)]
struct Marks {
    nodes: usize,
    files: usize,
    symbols: usize,
    edges: usize,
    local_symbols: usize,
    locations: usize,
    occurrences: usize,
    component_accesses: usize,
    element_components: usize,
    errors: usize,
}

#[derive(Debug, Clone)]
enum Undo {
    NodeKind { row: usize, kind: NodeKind },
    File { row: usize, previous: FileRecord },
    Definition { row: usize, definition: DefinitionKind },
    Access { row: usize, access: AccessKind },
}

#[derive(Debug, Clone)]
struct Journal {
    marks: Marks,
    undo: Vec<Undo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "TableRows")]
pub struct GraphTables {
    rows: TableRows,
    index: TableIndex,
    journal: Option<Journal>,
}

impl From<TableRows> for GraphTables {
    fn from(rows: TableRows) -> Self {
        let index = TableIndex::build(&rows);
        Self {
            rows,
            index,
            journal: None,
        }
    }
}

impl Serialize for GraphTables {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.rows.serialize(serializer)
    }
}

impl GraphTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest id handed out so far; `NO_ID` for an empty graph.
    pub fn last_id(&self) -> Id {
        self.rows.last_id
    }

    fn next_id(&mut self) -> Id {
        self.rows.last_id += 1;
        self.rows.last_id
    }

    fn record(&mut self, undo: impl FnOnce() -> Undo) {
        if let Some(journal) = self.journal.as_mut() {
            journal.undo.push(undo());
        }
    }

    // ---- Additions (content-deduplicated) ----

    pub fn add_node(&mut self, kind: NodeKind, name: &str) -> Id {
        if let Some(&row) = self.index.node_by_name.get(name) {
            let existing = self.rows.nodes[row].kind;
            if kind > existing {
                self.record(|| Undo::NodeKind {
                    row,
                    kind: existing,
                });
                self.rows.nodes[row].kind = kind;
            }
            return self.rows.nodes[row].id;
        }

        let id = self.next_id();
        let row = self.rows.nodes.len();
        self.rows.nodes.push(Node {
            id,
            kind,
            name: name.to_string(),
        });
        self.index.node_by_name.insert(name.to_string(), row);
        self.index.node_by_id.insert(id, row);
        id
    }

    /// Register `id` (a node id) as a file. Re-adding merges the records:
    /// `indexed` is OR-ed, and the newer modification time and the greater
    /// language name win.
    pub fn add_file(
        &mut self,
        id: Id,
        path: &Path,
        language: &str,
        modification_time: u64,
        indexed: bool,
    ) -> Id {
        if let Some(&row) = self.index.file_by_id.get(&id) {
            let current = &self.rows.files[row];
            let upgrade = (indexed && !current.indexed)
                || modification_time > current.modification_time
                || language > current.language.as_str();
            if upgrade {
                let previous = current.clone();
                self.record(|| Undo::File { row, previous });
                let file = &mut self.rows.files[row];
                file.indexed |= indexed;
                file.modification_time = file.modification_time.max(modification_time);
                // Greatest name wins, so the result does not depend on merge order.
                if language > file.language.as_str() {
                    file.language = language.to_string();
                }
            }
            return id;
        }

        let row = self.rows.files.len();
        self.rows.files.push(FileRecord {
            id,
            path: path.to_path_buf(),
            language: language.to_string(),
            modification_time,
            indexed,
            complete: false,
        });
        self.index.file_by_id.insert(id, row);
        id
    }

    pub fn add_symbol(&mut self, id: Id, definition: DefinitionKind) -> Id {
        if let Some(&row) = self.index.symbol_by_id.get(&id) {
            let existing = self.rows.symbols[row].definition;
            if definition > existing {
                self.record(|| Undo::Definition {
                    row,
                    definition: existing,
                });
                self.rows.symbols[row].definition = definition;
            }
            return id;
        }

        let row = self.rows.symbols.len();
        self.rows.symbols.push(Symbol { id, definition });
        self.index.symbol_by_id.insert(id, row);
        id
    }

    pub fn add_edge(&mut self, kind: EdgeKind, source: Id, target: Id) -> Id {
        let key = (kind, source, target);
        if let Some(&row) = self.index.edge_by_key.get(&key) {
            return self.rows.edges[row].id;
        }

        let id = self.next_id();
        let row = self.rows.edges.len();
        self.rows.edges.push(Edge {
            id,
            kind,
            source,
            target,
        });
        self.index.edge_by_key.insert(key, row);
        self.index.edge_by_id.insert(id, row);
        id
    }

    pub fn add_local_symbol(&mut self, name: &str) -> Id {
        if let Some(&row) = self.index.local_by_name.get(name) {
            return self.rows.local_symbols[row].id;
        }

        let id = self.next_id();
        let row = self.rows.local_symbols.len();
        self.rows.local_symbols.push(LocalSymbol {
            id,
            name: name.to_string(),
        });
        self.index.local_by_name.insert(name.to_string(), row);
        id
    }

    pub fn add_location(&mut self, file: Id, span: Span, kind: LocationKind) -> Id {
        let key = (file, span, kind);
        if let Some(&row) = self.index.location_by_key.get(&key) {
            return self.rows.locations[row].id;
        }

        let id = self.next_id();
        let row = self.rows.locations.len();
        self.rows.locations.push(SourceLocation {
            id,
            file,
            span,
            kind,
        });
        self.index.location_by_key.insert(key, row);
        id
    }

    /// Returns false if the occurrence was already present.
    pub fn add_occurrence(&mut self, element: Id, location: Id) -> bool {
        let occurrence = Occurrence { element, location };
        if !self.index.occurrences.insert(occurrence) {
            return false;
        }
        self.rows.occurrences.push(occurrence);
        true
    }

    pub fn add_component_access(&mut self, node: Id, access: AccessKind) {
        if let Some(&row) = self.index.access_by_node.get(&node) {
            let existing = self.rows.component_accesses[row].access;
            if access > existing {
                self.record(|| Undo::Access {
                    row,
                    access: existing,
                });
                self.rows.component_accesses[row].access = access;
            }
            return;
        }

        let row = self.rows.component_accesses.len();
        self.rows
            .component_accesses
            .push(ComponentAccess { node, access });
        self.index.access_by_node.insert(node, row);
    }

    /// Returns false if the component was already present.
    pub fn add_element_component(&mut self, element: Id, kind: ComponentKind, data: &str) -> bool {
        let component = ElementComponent {
            element,
            kind,
            data: data.to_string(),
        };
        if self.index.components.contains(&component) {
            return false;
        }
        self.index.components.insert(component.clone());
        self.rows.element_components.push(component);
        true
    }

    /// Adds `error` under a fresh id unless an identical error exists.
    /// The incoming `id` field is ignored.
    pub fn add_error(&mut self, error: &ErrorRecord) -> Id {
        let key = error_key(error);
        if let Some(&row) = self.index.error_by_key.get(&key) {
            return self.rows.errors[row].id;
        }

        let id = self.next_id();
        let row = self.rows.errors.len();
        self.rows.errors.push(ErrorRecord {
            id,
            ..error.clone()
        });
        self.index.error_by_key.insert(key, row);
        id
    }

    /// Memo update outside the journal; recomputed wholesale on demand.
    pub(crate) fn set_file_complete(&mut self, id: Id, complete: bool) -> bool {
        let Some(&row) = self.index.file_by_id.get(&id) else {
            return false;
        };
        let file = &mut self.rows.files[row];
        if file.complete == complete {
            return false;
        }
        file.complete = complete;
        true
    }

    // ---- Journal ----

    pub fn has_journal(&self) -> bool {
        self.journal.is_some()
    }

    /// Returns false if a journal is already open.
    pub fn begin_journal(&mut self) -> bool {
        if self.journal.is_some() {
            return false;
        }
        let rows = &self.rows;
        self.journal = Some(Journal {
            marks: Marks {
                nodes: rows.nodes.len(),
                files: rows.files.len(),
                symbols: rows.symbols.len(),
                edges: rows.edges.len(),
                local_symbols: rows.local_symbols.len(),
                locations: rows.locations.len(),
                occurrences: rows.occurrences.len(),
                component_accesses: rows.component_accesses.len(),
                element_components: rows.element_components.len(),
                errors: rows.errors.len(),
            },
            undo: Vec::new(),
        });
        true
    }

    /// Keep everything added since `begin_journal`.
    pub fn commit_journal(&mut self) -> bool {
        self.journal.take().is_some()
    }

    /// Discard everything added since `begin_journal`.
    pub fn rollback_journal(&mut self) -> bool {
        let Some(journal) = self.journal.take() else {
            return false;
        };

        for undo in journal.undo.into_iter().rev() {
            match undo {
                Undo::NodeKind { row, kind } => self.rows.nodes[row].kind = kind,
                Undo::File { row, previous } => self.rows.files[row] = previous,
                Undo::Definition { row, definition } => {
                    self.rows.symbols[row].definition = definition
                }
                Undo::Access { row, access } => self.rows.component_accesses[row].access = access,
            }
        }

        // The id counter is not rewound; ids handed out stay unique for the run.
        let marks = journal.marks;
        let rows = &mut self.rows;
        rows.nodes.truncate(marks.nodes);
        rows.files.truncate(marks.files);
        rows.symbols.truncate(marks.symbols);
        rows.edges.truncate(marks.edges);
        rows.local_symbols.truncate(marks.local_symbols);
        rows.locations.truncate(marks.locations);
        rows.occurrences.truncate(marks.occurrences);
        rows.component_accesses.truncate(marks.component_accesses);
        rows.element_components.truncate(marks.element_components);
        rows.errors.truncate(marks.errors);

        self.index = TableIndex::build(&self.rows);
        true
    }

    // ---- Read access ----

    pub fn nodes(&self) -> &[Node] {
        &self.rows.nodes
    }

    pub fn files(&self) -> &[FileRecord] {
        &self.rows.files
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.rows.symbols
    }

    pub fn edges(&self) -> &[Edge] {
        &self.rows.edges
    }

    pub fn local_symbols(&self) -> &[LocalSymbol] {
        &self.rows.local_symbols
    }

    pub fn locations(&self) -> &[SourceLocation] {
        &self.rows.locations
    }

    pub fn occurrences(&self) -> &[Occurrence] {
        &self.rows.occurrences
    }

    pub fn component_accesses(&self) -> &[ComponentAccess] {
        &self.rows.component_accesses
    }

    pub fn element_components(&self) -> &[ElementComponent] {
        &self.rows.element_components
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        &self.rows.errors
    }

    pub fn node(&self, id: Id) -> Option<&Node> {
        let row = *self.index.node_by_id.get(&id)?;
        self.rows.nodes.get(row)
    }

    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        let row = *self.index.node_by_name.get(name)?;
        self.rows.nodes.get(row)
    }

    pub fn file(&self, id: Id) -> Option<&FileRecord> {
        let row = *self.index.file_by_id.get(&id)?;
        self.rows.files.get(row)
    }

    pub fn edge(&self, id: Id) -> Option<&Edge> {
        let row = *self.index.edge_by_id.get(&id)?;
        self.rows.edges.get(row)
    }

    pub fn symbol(&self, id: Id) -> Option<&Symbol> {
        let row = *self.index.symbol_by_id.get(&id)?;
        self.rows.symbols.get(row)
    }

    pub fn access(&self, node: Id) -> Option<AccessKind> {
        let row = *self.index.access_by_node.get(&node)?;
        self.rows.component_accesses.get(row).map(|a| a.access)
    }

    /// Total rows over every table.
    pub fn entity_count(&self) -> usize {
        let rows = &self.rows;
        rows.nodes.len()
            + rows.files.len()
            + rows.symbols.len()
            + rows.edges.len()
            + rows.local_symbols.len()
            + rows.locations.len()
            + rows.occurrences.len()
            + rows.component_accesses.len()
            + rows.element_components.len()
            + rows.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entity_count() == 0
    }
}
