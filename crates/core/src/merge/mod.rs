//! Injection of a [`PartialGraph`] into another graph.
//!
//! Ids are renumbered stage by stage. Each stage records `source id -> sink id`
//! for what it inserted, and later stages translate their references through
//! those maps:
//!
//! 1. errors
//! 2. nodes
//! 3. files (through the node map)
//! 4. symbols (through the node map)
//! 5. edges (both endpoints through the node map)
//! 6. local symbols
//! 7. source locations (file through the node map)
//! 8. occurrences (element through the node, edge, then local symbol map;
//!    location through the location map)
//! 9. component accesses and element components
//!
//! A reference that does not translate drops that one entity with a warning.
//! The rest of the graph is still injected.

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;
use tracing::warn;

use crate::error::Result;
use crate::model::{
    AccessKind, ComponentKind, DefinitionKind, EdgeKind, ErrorRecord, Id, LocationKind, NodeKind,
    PartialGraph, Span,
};

/// Keeps aggregated reports bounded on large runs.
const MAX_RETAINED_WARNINGS: usize = 256;

/// Anything a partial graph can be injected into.
///
/// Insertions deduplicate by content and return the sink's id for the entity.
pub trait GraphSink {
    fn insert_node(&mut self, kind: NodeKind, name: &str) -> Result<Id>;
    fn insert_file(
        &mut self,
        id: Id,
        path: &Path,
        language: &str,
        modification_time: u64,
        indexed: bool,
    ) -> Result<Id>;
    fn insert_symbol(&mut self, id: Id, definition: DefinitionKind) -> Result<Id>;
    fn insert_edge(&mut self, kind: EdgeKind, source: Id, target: Id) -> Result<Id>;
    fn insert_local_symbol(&mut self, name: &str) -> Result<Id>;
    fn insert_location(&mut self, file: Id, span: Span, kind: LocationKind) -> Result<Id>;
    fn insert_occurrence(&mut self, element: Id, location: Id) -> Result<()>;
    fn insert_component_access(&mut self, node: Id, access: AccessKind) -> Result<()>;
    fn insert_element_component(
        &mut self,
        element: Id,
        kind: ComponentKind,
        data: &str,
    ) -> Result<()>;
    fn insert_error(&mut self, error: &ErrorRecord) -> Result<Id>;
}

impl GraphSink for PartialGraph {
    fn insert_node(&mut self, kind: NodeKind, name: &str) -> Result<Id> {
        Ok(self.add_node(kind, name))
    }

    fn insert_file(
        &mut self,
        id: Id,
        path: &Path,
        language: &str,
        modification_time: u64,
        indexed: bool,
    ) -> Result<Id> {
        Ok(self.add_file(id, path, language, modification_time, indexed))
    }

    fn insert_symbol(&mut self, id: Id, definition: DefinitionKind) -> Result<Id> {
        Ok(self.add_symbol(id, definition))
    }

    fn insert_edge(&mut self, kind: EdgeKind, source: Id, target: Id) -> Result<Id> {
        Ok(self.add_edge(kind, source, target))
    }

    fn insert_local_symbol(&mut self, name: &str) -> Result<Id> {
        Ok(self.add_local_symbol(name))
    }

    fn insert_location(&mut self, file: Id, span: Span, kind: LocationKind) -> Result<Id> {
        Ok(self.add_location(file, span, kind))
    }

    fn insert_occurrence(&mut self, element: Id, location: Id) -> Result<()> {
        self.add_occurrence(element, location);
        Ok(())
    }

    fn insert_component_access(&mut self, node: Id, access: AccessKind) -> Result<()> {
        self.add_component_access(node, access);
        Ok(())
    }

    fn insert_element_component(
        &mut self,
        element: Id,
        kind: ComponentKind,
        data: &str,
    ) -> Result<()> {
        self.add_element_component(element, kind, data);
        Ok(())
    }

    fn insert_error(&mut self, error: &ErrorRecord) -> Result<Id> {
        Ok(self.add_error(error))
    }
}

/// What one or more injections applied and dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub errors: usize,
    pub nodes: usize,
    pub files: usize,
    pub symbols: usize,
    pub edges: usize,
    pub local_symbols: usize,
    pub locations: usize,
    pub occurrences: usize,
    pub component_accesses: usize,
    pub element_components: usize,
    pub dropped: usize,
    pub warnings: Vec<String>,
}

impl MergeReport {
    /// Source entities that made it into the sink (deduplicated or not).
    pub fn applied(&self) -> usize {
        self.errors
            + self.nodes
            + self.files
            + self.symbols
            + self.edges
            + self.local_symbols
            + self.locations
            + self.occurrences
            + self.component_accesses
            + self.element_components
    }

    pub fn absorb(&mut self, other: MergeReport) {
        self.errors += other.errors;
        self.nodes += other.nodes;
        self.files += other.files;
        self.symbols += other.symbols;
        self.edges += other.edges;
        self.local_symbols += other.local_symbols;
        self.locations += other.locations;
        self.occurrences += other.occurrences;
        self.component_accesses += other.component_accesses;
        self.element_components += other.element_components;
        self.dropped += other.dropped;
        let room = MAX_RETAINED_WARNINGS.saturating_sub(self.warnings.len());
        self.warnings.extend(other.warnings.into_iter().take(room));
    }

    fn drop_entity(&mut self, message: String) {
        warn!("{}", message);
        self.dropped += 1;
        if self.warnings.len() < MAX_RETAINED_WARNINGS {
            self.warnings.push(message);
        }
    }
}

#[derive(Default)]
struct IdMaps {
    nodes: HashMap<Id, Id>,
    edges: HashMap<Id, Id>,
    local_symbols: HashMap<Id, Id>,
    locations: HashMap<Id, Id>,
}

impl IdMaps {
    fn node(&self, id: Id) -> Option<Id> {
        self.nodes.get(&id).copied()
    }

    /// Occurrences and components may point at any element kind.
    fn element(&self, id: Id) -> Option<Id> {
        self.nodes
            .get(&id)
            .or_else(|| self.edges.get(&id))
            .or_else(|| self.local_symbols.get(&id))
            .copied()
    }
}

/// Inject `source` into `sink`, renumbering every id.
///
/// Not atomic by itself: a sink error leaves whatever was inserted so far.
/// `CanonicalStore::inject` wraps this in a transaction.
pub fn inject<S>(source: &PartialGraph, sink: &mut S) -> Result<MergeReport>
where
    S: GraphSink + ?Sized,
{
    let mut report = MergeReport::default();
    let mut maps = IdMaps::default();

    for error in source.errors() {
        sink.insert_error(error)?;
        report.errors += 1;
    }

    for node in source.nodes() {
        let id = sink.insert_node(node.kind, &node.name)?;
        maps.nodes.insert(node.id, id);
        report.nodes += 1;
    }

    for file in source.files() {
        let Some(id) = maps.node(file.id) else {
            report.drop_entity(format!(
                "Dropping file {}: node {} was not injected",
                file.path.display(),
                file.id
            ));
            continue;
        };
        sink.insert_file(
            id,
            &file.path,
            &file.language,
            file.modification_time,
            file.indexed,
        )?;
        report.files += 1;
    }

    for symbol in source.symbols() {
        let Some(id) = maps.node(symbol.id) else {
            report.drop_entity(format!(
                "Dropping symbol {}: node was not injected",
                symbol.id
            ));
            continue;
        };
        sink.insert_symbol(id, symbol.definition)?;
        report.symbols += 1;
    }

    for edge in source.edges() {
        let endpoints = (maps.node(edge.source), maps.node(edge.target));
        let (Some(source_id), Some(target_id)) = endpoints else {
            let mapped = usize::from(endpoints.0.is_some()) + usize::from(endpoints.1.is_some());
            report.drop_entity(format!(
                "Dropping {:?} edge {} ({} -> {}): {} of 2 endpoints mapped",
                edge.kind, edge.id, edge.source, edge.target, mapped
            ));
            continue;
        };
        let id = sink.insert_edge(edge.kind, source_id, target_id)?;
        maps.edges.insert(edge.id, id);
        report.edges += 1;
    }

    for local in source.local_symbols() {
        let id = sink.insert_local_symbol(&local.name)?;
        maps.local_symbols.insert(local.id, id);
        report.local_symbols += 1;
    }

    for location in source.locations() {
        let Some(file) = maps.node(location.file) else {
            report.drop_entity(format!(
                "Dropping location {}: file node {} was not injected",
                location.id, location.file
            ));
            continue;
        };
        let id = sink.insert_location(file, location.span, location.kind)?;
        maps.locations.insert(location.id, id);
        report.locations += 1;
    }

    for occurrence in source.occurrences() {
        let element = maps.element(occurrence.element);
        let location = maps.locations.get(&occurrence.location).copied();
        let (Some(element), Some(location)) = (element, location) else {
            report.drop_entity(format!(
                "Dropping occurrence of element {} at location {}: unresolved reference",
                occurrence.element, occurrence.location
            ));
            continue;
        };
        sink.insert_occurrence(element, location)?;
        report.occurrences += 1;
    }

    for access in source.component_accesses() {
        let Some(node) = maps.node(access.node) else {
            report.drop_entity(format!(
                "Dropping access of node {}: node was not injected",
                access.node
            ));
            continue;
        };
        sink.insert_component_access(node, access.access)?;
        report.component_accesses += 1;
    }

    for component in source.element_components() {
        let Some(element) = maps.element(component.element) else {
            report.drop_entity(format!(
                "Dropping {:?} component of element {}: element was not injected",
                component.kind, component.element
            ));
            continue;
        };
        sink.insert_element_component(element, component.kind, &component.data)?;
        report.element_components += 1;
    }

    Ok(report)
}
