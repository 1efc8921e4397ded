use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::PartialGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StoreId(pub u32);

impl StoreId {
    pub const PRIMARY: StoreId = StoreId(0);
}

impl Default for StoreId {
    fn default() -> Self {
        StoreId::PRIMARY
    }
}

impl std::fmt::Display for StoreId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "store#{}", self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisParams {
    pub flags: Vec<String>,
    pub isolation_target: Option<String>,
}

/// One file to index. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub path: PathBuf,
    pub params: AnalysisParams,
    pub target_store: StoreId,
    /// Must not share a worker-private store with other items; such items run
    /// on the coordinator thread.
    pub run_in_isolation: bool,
}

impl WorkItem {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            params: AnalysisParams::default(),
            target_store: StoreId::PRIMARY,
            run_in_isolation: false,
        }
    }

    pub fn with_flags(mut self, flags: Vec<String>) -> Self {
        self.params.flags = flags;
        self
    }

    pub fn isolated(mut self, target: impl Into<String>) -> Self {
        self.params.isolation_target = Some(target.into());
        self.run_in_isolation = true;
        self
    }

    pub fn for_store(mut self, store: StoreId) -> Self {
        self.target_store = store;
        self
    }
}

/// What a worker publishes on the result channel for one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedFile {
    pub path: PathBuf,
    pub target_store: StoreId,
    pub graph: PartialGraph,
}
