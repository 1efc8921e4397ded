use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fanout_ingest::{IngestError, Task, TaskContext, TaskStatus};
use fanout_ipc::WorkerId;
use tracing::{debug, error, info, warn};

use super::channels::Coordinator;
use super::launcher::{WorkerExit, WorkerHandle, WorkerLauncher, WorkerSpec};
use super::{IndexingReport, partition};

/// Relaunches allowed for workers that die before taking any item.
const MAX_IDLE_FAILURES: usize = 3;
use crate::analyzer::{Analyzer, analyze_or_record};
use crate::config::IndexerConfig;
use crate::error::Result;
use crate::model::{PartialGraph, StoreId, WorkItem};
use crate::store::StoreSet;

/// Indexes a list of work items with worker processes (or threads) fed
/// through the shared command queue.
///
/// * `enter` enqueues the parallel items and launches the workers.
/// * Each `update` merges at most one worker result and indexes at most one
///   isolated item on the calling thread.
/// * `exit` merges whatever is still pending and fills in the report.
pub struct IndexTask {
    coordinator: Coordinator,
    launcher: Box<dyn WorkerLauncher>,
    analyzer: Arc<dyn Analyzer>,
    config: IndexerConfig,
    stores: StoreSet,
    pending: Vec<WorkItem>,
    serial: VecDeque<WorkItem>,
    workers: Vec<Box<dyn WorkerHandle>>,
    report: IndexingReport,
    started: Option<Instant>,
    interrupted_at: Option<Instant>,
    idle_failures: usize,
}

impl IndexTask {
    pub fn new(
        coordinator: Coordinator,
        launcher: Box<dyn WorkerLauncher>,
        analyzer: Arc<dyn Analyzer>,
        config: IndexerConfig,
        stores: StoreSet,
        items: Vec<WorkItem>,
    ) -> Self {
        Self {
            coordinator,
            launcher,
            analyzer,
            config,
            stores,
            pending: items,
            serial: VecDeque::new(),
            workers: Vec::new(),
            report: IndexingReport::default(),
            started: None,
            interrupted_at: None,
            idle_failures: 0,
        }
    }

    /// Items for the next `enter`, typically after a `reset`.
    pub fn set_items(&mut self, items: Vec<WorkItem>) {
        self.pending = items;
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn stores(&self) -> &StoreSet {
        &self.stores
    }

    pub fn report(&self) -> &IndexingReport {
        &self.report
    }

    pub fn into_parts(self) -> (StoreSet, IndexingReport, Coordinator) {
        (self.stores, self.report, self.coordinator)
    }

    fn launch_workers(&mut self, parallel: usize) -> Result<()> {
        let count = self.config.worker_count.min(parallel);
        if count == 0 {
            return Ok(());
        }
        let config_path = self.coordinator.channels().config_path();
        self.config.write_to(&config_path)?;

        for worker in 1..=count {
            let spec = self.worker_spec(worker as WorkerId);
            match self.launcher.launch(&spec) {
                Ok(handle) => self.workers.push(handle),
                Err(err) => error!("Failed to launch worker {}: {}", worker, err),
            }
        }
        if self.workers.is_empty() {
            warn!("No worker could be launched, {} items stay queued", parallel);
        }
        Ok(())
    }

    fn worker_spec(&self, worker: WorkerId) -> WorkerSpec {
        let channels = self.coordinator.channels();
        WorkerSpec {
            instance: channels.instance().clone(),
            worker,
            runtime_dir: channels.runtime_dir().to_path_buf(),
            config: self.config.clone(),
            config_path: channels.config_path(),
        }
    }

    /// Start `worker` again under the same id after an abnormal exit, as long
    /// as there is queued work and the run goes on. The new worker's first
    /// `start_file` moves the abandoned file into the crash log.
    fn relaunch(&mut self, worker: WorkerId) -> Result<()> {
        if self.interrupted_at.is_some() || self.coordinator.remaining()? == 0 {
            return Ok(());
        }
        let abandoned = self
            .coordinator
            .channels()
            .status()
            .file_in_progress(worker)?;
        match &abandoned {
            Some(path) => info!(
                "Worker {} died while indexing {}, relaunching it",
                worker,
                path.display()
            ),
            None => {
                self.idle_failures += 1;
                if self.idle_failures > MAX_IDLE_FAILURES {
                    error!(
                        "Worker {} died before taking any work, not relaunching it",
                        worker
                    );
                    return Ok(());
                }
                warn!("Worker {} died before taking any work, relaunching it", worker);
            }
        }

        match self.launcher.launch(&self.worker_spec(worker)) {
            Ok(handle) => {
                self.workers.push(handle);
                self.report.worker_restarts += 1;
            }
            Err(err) => error!("Failed to relaunch worker {}: {}", worker, err),
        }
        Ok(())
    }

    fn merge(&mut self, path: &Path, target: StoreId, graph: &PartialGraph) {
        match self.stores.route(target).inject(graph) {
            Ok(report) => {
                self.report.files_merged += 1;
                self.report.merge.absorb(report);
            }
            Err(err) => error!("Failed to merge {}: {}", path.display(), err),
        }
    }

    fn drain_one(&mut self) -> bool {
        let Some(result) = self.coordinator.drain_once() else {
            return false;
        };
        debug!("Merging result for {}", result.path.display());
        self.merge(&result.path, result.target_store, &result.graph);
        true
    }

    fn index_serial(&mut self) -> bool {
        let Some(item) = self.serial.pop_front() else {
            return false;
        };
        debug!("Indexing {} on the coordinator thread", item.path.display());
        let graph = analyze_or_record(self.analyzer.as_ref(), &item);
        self.merge(&item.path, item.target_store, &graph);
        true
    }

    /// Mirror the caller's interrupt into the shared flag, and notice an
    /// interrupt raised by anyone else.
    fn check_interrupt(&mut self, ctx: &TaskContext) -> Result<bool> {
        if self.interrupted_at.is_some() {
            return Ok(true);
        }
        let shared = self.coordinator.is_interrupted()?;
        if ctx.is_interrupted() && !shared {
            self.coordinator.request_interrupt()?;
        }
        if ctx.is_interrupted() || shared {
            self.interrupted_at = Some(Instant::now());
            self.report.interrupted = true;
            info!(
                "Interrupted, waiting for {} workers to finish their current file",
                self.workers.len()
            );
            return Ok(true);
        }
        Ok(false)
    }

    fn reap_workers(&mut self) -> Result<()> {
        let status = self.coordinator.channels().status();
        while let Some(worker) = status.next_finished_worker_id()? {
            debug!("Worker {} finished a file", worker);
        }

        let mut failed = Vec::new();
        self.workers.retain_mut(|handle| match handle.try_wait() {
            Ok(None) => true,
            Ok(Some(WorkerExit::Success)) => {
                debug!("Worker {} exited", handle.id());
                false
            }
            Ok(Some(WorkerExit::Failed(reason))) => {
                warn!("Worker {} failed: {}", handle.id(), reason);
                failed.push(handle.id());
                false
            }
            Err(err) => {
                warn!("Lost track of worker {}: {}", handle.id(), err);
                false
            }
        });

        for worker in failed {
            self.relaunch(worker)?;
        }
        Ok(())
    }

    fn kill_workers(&mut self) {
        for mut handle in self.workers.drain(..) {
            if let Err(err) = handle.kill() {
                warn!("Failed to stop worker {}: {}", handle.id(), err);
            }
        }
    }

    fn exit_timeout_expired(&self) -> bool {
        let timeout = Duration::from_secs(self.config.worker_exit_timeout_secs);
        self.interrupted_at
            .is_some_and(|since| since.elapsed() >= timeout)
    }
}

impl Task for IndexTask {
    fn enter(&mut self, _ctx: &TaskContext) -> std::result::Result<(), IngestError> {
        self.started = Some(Instant::now());
        self.interrupted_at = None;
        self.idle_failures = 0;
        self.coordinator.channels().reset()?;

        let items = std::mem::take(&mut self.pending);
        self.report = IndexingReport {
            files_queued: items.len(),
            ..IndexingReport::default()
        };
        let (serial, parallel) = partition(items);
        self.report.serial_files = serial.len();
        self.serial = serial.into();

        let parallel_count = parallel.len();
        if parallel_count > 0 {
            self.coordinator.enqueue(parallel)?;
        }
        self.launch_workers(parallel_count)?;

        info!(
            "Indexing {} files: {} on {} workers, {} on the coordinator thread",
            self.report.files_queued,
            parallel_count,
            self.workers.len(),
            self.report.serial_files
        );
        Ok(())
    }

    fn update(&mut self, ctx: &TaskContext) -> std::result::Result<TaskStatus, IngestError> {
        let interrupted = self.check_interrupt(ctx)?;

        let mut progressed = self.drain_one();
        if !interrupted {
            progressed |= self.index_serial();
        }
        self.reap_workers()?;

        if interrupted && !self.workers.is_empty() && self.exit_timeout_expired() {
            warn!(
                "{} workers did not stop within {}s of the interrupt, killing them",
                self.workers.len(),
                self.config.worker_exit_timeout_secs
            );
            self.kill_workers();
        }

        let serial_done = interrupted || self.serial.is_empty();
        if serial_done && self.workers.is_empty() && self.coordinator.pending_results()? == 0 {
            // An interrupt raised while this update merged still counts.
            self.check_interrupt(ctx)?;
            return Ok(TaskStatus::Success);
        }
        Ok(if progressed {
            TaskStatus::Running
        } else {
            TaskStatus::Idle
        })
    }

    fn exit(&mut self, ctx: &TaskContext) -> std::result::Result<(), IngestError> {
        self.check_interrupt(ctx)?;
        if !self.workers.is_empty() {
            if let Err(err) = self.coordinator.request_interrupt() {
                warn!("Could not signal workers to stop: {}", err);
            }
            self.kill_workers();
        }
        while self.drain_one() {}

        self.report.crashed_files = self.coordinator.crashed_files()?;
        self.report.in_flight_files = self.coordinator.currently_indexed_files()?;
        self.report.remaining = self.coordinator.remaining()? + self.serial.len();
        let refreshed = self.stores.refresh_file_status();
        debug!("Refreshed completeness of {} files", refreshed);

        if let Some(started) = self.started {
            self.report.elapsed = started.elapsed();
        }
        self.report.log_summary();
        Ok(())
    }

    fn reset(&mut self, _ctx: &TaskContext) -> std::result::Result<(), IngestError> {
        self.kill_workers();
        self.serial.clear();
        self.started = None;
        self.interrupted_at = None;
        self.coordinator.channels().reset()?;
        Ok(())
    }
}
