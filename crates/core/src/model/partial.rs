use std::ops::{Deref, DerefMut};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::entity::{ErrorRecord, NodeKind};
use super::tables::GraphTables;
use super::work::WorkItem;
use super::{Id, NO_ID};

/// Self-contained result of analyzing one file (or of one worker thread).
///
/// Ids start at 1 and are only meaningful inside this graph; merging
/// renumbers everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartialGraph {
    tables: GraphTables,
}

impl PartialGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// File node plus its file record. The node is named by the path.
    pub fn add_file_node(
        &mut self,
        path: &Path,
        language: &str,
        modification_time: u64,
        indexed: bool,
    ) -> Id {
        let id = self
            .tables
            .add_node(NodeKind::File, &path.to_string_lossy());
        self.tables
            .add_file(id, path, language, modification_time, indexed)
    }

    /// Graph for a file the analyzer could not process: an unindexed file
    /// record and one fatal error.
    pub fn from_failure(item: &WorkItem, message: &str) -> Self {
        let mut graph = Self::new();
        graph.add_file_node(&item.path, "", 0, false);
        graph.tables.add_error(&ErrorRecord {
            id: NO_ID,
            message: message.to_string(),
            file: item.path.clone(),
            line: 0,
            column: 0,
            translation_unit: item.path.clone(),
            fatal: true,
            indexed: false,
        });
        graph
    }
}

impl Deref for PartialGraph {
    type Target = GraphTables;

    fn deref(&self) -> &GraphTables {
        &self.tables
    }
}

impl DerefMut for PartialGraph {
    fn deref_mut(&mut self) -> &mut GraphTables {
        &mut self.tables
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn failure_graph_carries_one_fatal_error() {
        let item = WorkItem::new("src/broken.cpp");
        let graph = PartialGraph::from_failure(&item, "parser crashed");

        assert_eq!(graph.files().len(), 1);
        assert!(!graph.files()[0].indexed);
        assert_eq!(graph.errors().len(), 1);
        assert!(graph.errors()[0].fatal);
        assert_eq!(graph.errors()[0].file, PathBuf::from("src/broken.cpp"));
    }
}
