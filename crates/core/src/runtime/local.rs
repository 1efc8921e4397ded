use std::collections::{BTreeMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use fanout_ingest::{IngestError, InterruptSignal, Task, TaskContext, TaskStatus};
use tracing::{debug, error, info, warn};

use super::{IndexingReport, partition};
use crate::analyzer::{Analyzer, analyze_or_record};
use crate::error::FanoutError;
use crate::merge;
use crate::model::{PartialGraph, StoreId, WorkItem};
use crate::store::StoreSet;

type SharedQueue = Arc<Mutex<VecDeque<WorkItem>>>;

/// What one thread hands back when its share of the queue is done.
struct LocalWorkerOutput {
    index: usize,
    stores: BTreeMap<StoreId, PartialGraph>,
    processed: usize,
    crashed: Vec<PathBuf>,
}

/// Indexes a list of work items on a thread pool of this process.
///
/// Every thread merges into its own private graph per target store; `exit`
/// folds those into the real stores one after another, in thread order, with
/// the same merge the process-based [`super::IndexTask`] uses.
pub struct LocalIndexTask {
    analyzer: Arc<dyn Analyzer>,
    worker_count: usize,
    stores: StoreSet,
    pending: Vec<WorkItem>,
    serial: VecDeque<WorkItem>,
    queue: SharedQueue,
    stop: InterruptSignal,
    results: Option<Receiver<LocalWorkerOutput>>,
    launched: usize,
    outputs: Vec<LocalWorkerOutput>,
    pool: Option<rayon::ThreadPool>,
    report: IndexingReport,
    started: Option<Instant>,
}

impl LocalIndexTask {
    pub fn new(
        analyzer: Arc<dyn Analyzer>,
        worker_count: usize,
        stores: StoreSet,
        items: Vec<WorkItem>,
    ) -> Self {
        Self {
            analyzer,
            worker_count: worker_count.max(1),
            stores,
            pending: items,
            serial: VecDeque::new(),
            queue: Arc::new(Mutex::new(VecDeque::new())),
            stop: InterruptSignal::new(),
            results: None,
            launched: 0,
            outputs: Vec::new(),
            pool: None,
            report: IndexingReport::default(),
            started: None,
        }
    }

    pub fn set_items(&mut self, items: Vec<WorkItem>) {
        self.pending = items;
    }

    pub fn stores(&self) -> &StoreSet {
        &self.stores
    }

    pub fn report(&self) -> &IndexingReport {
        &self.report
    }

    pub fn into_parts(self) -> (StoreSet, IndexingReport) {
        (self.stores, self.report)
    }

    fn start_workers(&mut self, count: usize) -> Result<(), FanoutError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(count)
            .thread_name(|index| format!("fanout-local-{index}"))
            .build()
            .map_err(|e| FanoutError::Worker(format!("Failed to build thread pool: {}", e)))?;

        let (tx, rx) = mpsc::channel();
        for index in 0..count {
            let tx = tx.clone();
            let queue = Arc::clone(&self.queue);
            let analyzer = Arc::clone(&self.analyzer);
            let stop = self.stop.clone();
            pool.spawn(move || {
                let output = run_local_worker(index, &queue, analyzer.as_ref(), &stop);
                if tx.send(output).is_err() {
                    warn!("Local worker {} finished after the task went away", index);
                }
            });
        }

        self.launched = count;
        self.results = Some(rx);
        self.pool = Some(pool);
        Ok(())
    }

    fn collect_finished(&mut self, block: bool) {
        let Some(rx) = self.results.as_ref() else {
            return;
        };
        while self.outputs.len() < self.launched {
            let next = if block {
                rx.recv().map_err(|_| TryRecvError::Disconnected)
            } else {
                rx.try_recv()
            };
            match next {
                Ok(output) => self.outputs.push(output),
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    error!(
                        "{} local workers vanished without reporting back",
                        self.launched - self.outputs.len()
                    );
                    self.launched = self.outputs.len();
                    return;
                }
            }
        }
    }

    fn observe_interrupt(&mut self, ctx: &TaskContext) {
        if ctx.is_interrupted() && !self.report.interrupted {
            info!("Interrupted, local workers stop after their current file");
            self.stop.raise();
            self.report.interrupted = true;
        }
    }

    fn index_serial(&mut self) -> bool {
        let Some(item) = self.serial.pop_front() else {
            return false;
        };
        let graph = analyze_or_record(self.analyzer.as_ref(), &item);
        match self.stores.route(item.target_store).inject(&graph) {
            Ok(report) => {
                self.report.files_merged += 1;
                self.report.merge.absorb(report);
            }
            Err(err) => error!("Failed to merge {}: {}", item.path.display(), err),
        }
        true
    }

    fn fold_private_stores(&mut self) {
        let mut outputs = std::mem::take(&mut self.outputs);
        outputs.sort_by_key(|output| output.index);
        for output in outputs {
            for (target, graph) in output.stores {
                match self.stores.route(target).inject(&graph) {
                    Ok(report) => self.report.merge.absorb(report),
                    Err(err) => error!(
                        "Failed to fold worker {} results into {}: {}",
                        output.index, target, err
                    ),
                }
            }
            self.report.files_merged += output.processed;
            self.report.crashed_files.extend(output.crashed);
        }
    }
}

fn run_local_worker(
    index: usize,
    queue: &Mutex<VecDeque<WorkItem>>,
    analyzer: &dyn Analyzer,
    stop: &InterruptSignal,
) -> LocalWorkerOutput {
    let mut output = LocalWorkerOutput {
        index,
        stores: BTreeMap::new(),
        processed: 0,
        crashed: Vec::new(),
    };

    while !stop.is_raised() {
        let next = match queue.lock() {
            Ok(mut queue) => queue.pop_front(),
            Err(_) => {
                error!("Local work queue poisoned, worker {} stops", index);
                break;
            }
        };
        let Some(item) = next else {
            break;
        };

        let graph = match panic::catch_unwind(AssertUnwindSafe(|| {
            analyze_or_record(analyzer, &item)
        })) {
            Ok(graph) => graph,
            Err(_) => {
                warn!("Analyzer panicked on {}", item.path.display());
                output.crashed.push(item.path.clone());
                PartialGraph::from_failure(&item, "analyzer panicked")
            }
        };

        let private = output.stores.entry(item.target_store).or_default();
        if let Err(err) = merge::inject(&graph, private) {
            error!("Failed to merge {} into worker {}: {}", item.path.display(), index, err);
            continue;
        }
        output.processed += 1;
    }

    debug!("Local worker {} processed {} files", index, output.processed);
    output
}

impl Task for LocalIndexTask {
    fn enter(&mut self, _ctx: &TaskContext) -> Result<(), IngestError> {
        self.started = Some(Instant::now());
        self.stop.clear();
        self.outputs.clear();

        let items = std::mem::take(&mut self.pending);
        self.report = IndexingReport {
            files_queued: items.len(),
            ..IndexingReport::default()
        };
        let (serial, parallel) = partition(items);
        self.report.serial_files = serial.len();
        self.serial = serial.into();

        let count = self.worker_count.min(parallel.len());
        match self.queue.lock() {
            Ok(mut queue) => queue.extend(parallel),
            Err(_) => {
                return Err(IngestError::Enter("local work queue poisoned".to_string()));
            }
        }
        if count > 0 {
            self.start_workers(count)?;
        }
        info!(
            "Indexing {} files locally on {} threads ({} serial)",
            self.report.files_queued, count, self.report.serial_files
        );
        Ok(())
    }

    fn update(&mut self, ctx: &TaskContext) -> Result<TaskStatus, IngestError> {
        self.observe_interrupt(ctx);

        let progressed = !self.stop.is_raised() && self.index_serial();
        self.collect_finished(false);

        let serial_done = self.stop.is_raised() || self.serial.is_empty();
        if serial_done && self.outputs.len() >= self.launched {
            self.observe_interrupt(ctx);
            return Ok(TaskStatus::Success);
        }
        Ok(if progressed {
            TaskStatus::Running
        } else {
            TaskStatus::Idle
        })
    }

    fn exit(&mut self, ctx: &TaskContext) -> Result<(), IngestError> {
        self.observe_interrupt(ctx);
        if self.outputs.len() < self.launched {
            self.stop.raise();
            self.collect_finished(true);
        }
        self.results = None;
        self.pool = None;
        self.fold_private_stores();

        let queued = match self.queue.lock() {
            Ok(mut queue) => queue.drain(..).count(),
            Err(_) => 0,
        };
        self.report.remaining = queued + self.serial.len();
        let refreshed = self.stores.refresh_file_status();
        debug!("Refreshed completeness of {} files", refreshed);

        if let Some(started) = self.started {
            self.report.elapsed = started.elapsed();
        }
        self.report.log_summary();
        Ok(())
    }

    fn reset(&mut self, _ctx: &TaskContext) -> Result<(), IngestError> {
        self.stop.raise();
        self.collect_finished(true);
        self.results = None;
        self.pool = None;
        self.outputs.clear();
        self.launched = 0;
        self.serial.clear();
        self.started = None;
        Ok(())
    }
}
