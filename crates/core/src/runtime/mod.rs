mod channels;
mod coordinator;
mod launcher;
mod local;
mod worker;

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::merge::MergeReport;
use crate::model::WorkItem;

pub use channels::{Coordinator, IndexerChannels};
pub use coordinator::IndexTask;
pub use launcher::{
    ProcessLauncher, ThreadLauncher, WorkerExit, WorkerHandle, WorkerLauncher, WorkerSpec,
};
pub use local::LocalIndexTask;
pub use worker::{WorkerLoop, WorkerSummary, run_worker};

/// Split items into the coordinator-thread list and the worker list,
/// keeping the relative order of each.
pub fn partition(items: Vec<WorkItem>) -> (Vec<WorkItem>, Vec<WorkItem>) {
    items.into_iter().partition(|item| item.run_in_isolation)
}

/// Outcome of one indexing run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexingReport {
    pub files_queued: usize,
    pub files_merged: usize,
    pub serial_files: usize,
    /// Files whose worker died (or never finished) while indexing them.
    pub crashed_files: Vec<PathBuf>,
    pub in_flight_files: Vec<PathBuf>,
    /// Items still queued when the run ended.
    pub remaining: usize,
    /// Workers launched again after exiting abnormally.
    pub worker_restarts: usize,
    pub merge: MergeReport,
    pub elapsed: Duration,
    pub interrupted: bool,
}

impl IndexingReport {
    /// Items of `items` whose file is in the crash list, for a follow-up pass.
    pub fn crashed_items(&self, items: &[WorkItem]) -> Vec<WorkItem> {
        let crashed: HashSet<&PathBuf> = self.crashed_files.iter().collect();
        items
            .iter()
            .filter(|item| crashed.contains(&item.path))
            .cloned()
            .collect()
    }

    pub fn log_summary(&self) {
        info!(
            "Indexed {} of {} files ({} serial) in {:.2?}: {} entities applied, {} dropped",
            self.files_merged,
            self.files_queued,
            self.serial_files,
            self.elapsed,
            self.merge.applied(),
            self.merge.dropped
        );
        if self.interrupted {
            warn!(
                "Run was interrupted with {} items left in the queue",
                self.remaining
            );
        }
        if self.worker_restarts > 0 {
            warn!("Relaunched {} workers that died", self.worker_restarts);
        }
        for path in &self.crashed_files {
            warn!("Crashed while indexing {}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crashed_items_keep_item_order() {
        let items = vec![
            WorkItem::new("a.rs"),
            WorkItem::new("b.rs"),
            WorkItem::new("c.rs"),
        ];
        let report = IndexingReport {
            crashed_files: vec![PathBuf::from("c.rs"), PathBuf::from("a.rs")],
            ..IndexingReport::default()
        };

        let retry: Vec<PathBuf> = report
            .crashed_items(&items)
            .into_iter()
            .map(|item| item.path)
            .collect();
        assert_eq!(retry, vec![PathBuf::from("a.rs"), PathBuf::from("c.rs")]);
    }

    #[test]
    fn partition_keeps_relative_order() {
        let items = vec![
            WorkItem::new("a.rs"),
            WorkItem::new("big.cpp").isolated("big"),
            WorkItem::new("b.rs"),
        ];
        let (serial, parallel) = partition(items);
        assert_eq!(serial.len(), 1);
        assert_eq!(parallel[0].path, PathBuf::from("a.rs"));
        assert_eq!(parallel[1].path, PathBuf::from("b.rs"));
    }
}
