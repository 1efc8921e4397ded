mod set;
mod snapshot;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{FanoutError, Result};
use crate::merge::{self, GraphSink, MergeReport};
use crate::model::{
    AccessKind, ComponentKind, DefinitionKind, EdgeKind, ErrorRecord, GraphTables, Id,
    LocationKind, NodeKind, PartialGraph, Span,
};

pub use set::StoreSet;
pub use snapshot::CURRENT_VERSION;

/// The persistent, globally numbered graph every partial graph is merged into.
///
/// Ids come from one counter over all entity kinds and are never reused.
/// Changes can be grouped in a transaction; [`CanonicalStore::inject`] runs
/// inside one.
#[derive(Debug, Default)]
pub struct CanonicalStore {
    path: Option<PathBuf>,
    tables: GraphTables,
}

impl CanonicalStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the store persisted at `path`, or start empty if there is none
    /// (or it was written by an incompatible version).
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let tables = snapshot::load(&path)?.unwrap_or_default();
        Ok(Self {
            path: Some(path),
            tables,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn tables(&self) -> &GraphTables {
        &self.tables
    }

    pub fn save(&self) -> Result<()> {
        if self.tables.has_journal() {
            return Err(FanoutError::Transaction(
                "cannot save with an open transaction".into(),
            ));
        }
        let path = self
            .path
            .as_deref()
            .ok_or_else(|| FanoutError::Store("in-memory store has no path".into()))?;
        snapshot::save(&self.tables, path)
    }

    pub fn in_transaction(&self) -> bool {
        self.tables.has_journal()
    }

    pub fn begin_transaction(&mut self) -> Result<()> {
        if !self.tables.begin_journal() {
            return Err(FanoutError::Transaction(
                "a transaction is already open".into(),
            ));
        }
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        if !self.tables.commit_journal() {
            return Err(FanoutError::Transaction("no open transaction".into()));
        }
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<()> {
        if !self.tables.rollback_journal() {
            return Err(FanoutError::Transaction("no open transaction".into()));
        }
        Ok(())
    }

    /// Merge `graph` atomically: on error nothing of it remains.
    pub fn inject(&mut self, graph: &PartialGraph) -> Result<MergeReport> {
        self.begin_transaction()?;
        match merge::inject(graph, self) {
            Ok(report) => {
                self.commit()?;
                debug!(
                    "Injected {} entities ({} dropped)",
                    report.applied(),
                    report.dropped
                );
                Ok(report)
            }
            Err(err) => {
                self.rollback()?;
                Err(err)
            }
        }
    }

    /// Recompute every file's `complete` memo: indexed and without a fatal
    /// error recorded against its path. Returns how many files changed.
    pub fn refresh_file_status(&mut self) -> usize {
        let fatal: HashSet<&Path> = self
            .tables
            .errors()
            .iter()
            .filter(|e| e.fatal)
            .map(|e| e.file.as_path())
            .collect();
        let verdicts: Vec<(Id, bool)> = self
            .tables
            .files()
            .iter()
            .map(|f| (f.id, f.indexed && !fatal.contains(f.path.as_path())))
            .collect();

        let mut changed = 0;
        for (id, complete) in verdicts {
            if self.tables.set_file_complete(id, complete) {
                changed += 1;
            }
        }
        changed
    }

    pub fn is_file_complete(&self, path: &Path) -> bool {
        self.tables
            .node_by_name(&path.to_string_lossy())
            .and_then(|node| self.tables.file(node.id))
            .is_some_and(|file| file.complete)
    }
}

impl GraphSink for CanonicalStore {
    fn insert_node(&mut self, kind: NodeKind, name: &str) -> Result<Id> {
        Ok(self.tables.add_node(kind, name))
    }

    fn insert_file(
        &mut self,
        id: Id,
        path: &Path,
        language: &str,
        modification_time: u64,
        indexed: bool,
    ) -> Result<Id> {
        Ok(self
            .tables
            .add_file(id, path, language, modification_time, indexed))
    }

    fn insert_symbol(&mut self, id: Id, definition: DefinitionKind) -> Result<Id> {
        Ok(self.tables.add_symbol(id, definition))
    }

    fn insert_edge(&mut self, kind: EdgeKind, source: Id, target: Id) -> Result<Id> {
        Ok(self.tables.add_edge(kind, source, target))
    }

    fn insert_local_symbol(&mut self, name: &str) -> Result<Id> {
        Ok(self.tables.add_local_symbol(name))
    }

    fn insert_location(&mut self, file: Id, span: Span, kind: LocationKind) -> Result<Id> {
        Ok(self.tables.add_location(file, span, kind))
    }

    fn insert_occurrence(&mut self, element: Id, location: Id) -> Result<()> {
        self.tables.add_occurrence(element, location);
        Ok(())
    }

    fn insert_component_access(&mut self, node: Id, access: AccessKind) -> Result<()> {
        self.tables.add_component_access(node, access);
        Ok(())
    }

    fn insert_element_component(
        &mut self,
        element: Id,
        kind: ComponentKind,
        data: &str,
    ) -> Result<()> {
        self.tables.add_element_component(element, kind, data);
        Ok(())
    }

    fn insert_error(&mut self, error: &ErrorRecord) -> Result<Id> {
        Ok(self.tables.add_error(error))
    }
}
