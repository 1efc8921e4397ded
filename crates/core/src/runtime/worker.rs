use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use fanout_ingest::{Backpressure, FlowControlConfig, InterruptSignal};
use fanout_ipc::{InstanceId, StatusManager, WorkerId};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::channels::IndexerChannels;
use crate::analyzer::{Analyzer, analyze_or_record};
use crate::config::IndexerConfig;
use crate::error::Result;
use crate::model::IndexedFile;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerSummary {
    pub worker: WorkerId,
    pub processed: usize,
    pub interrupted: bool,
}

/// One worker: pops items, analyzes them and hands the graphs back.
pub struct WorkerLoop {
    id: WorkerId,
    channels: IndexerChannels,
    analyzer: Arc<dyn Analyzer>,
    flow: FlowControlConfig,
}

impl WorkerLoop {
    pub fn new(
        id: WorkerId,
        channels: IndexerChannels,
        analyzer: Arc<dyn Analyzer>,
        flow: FlowControlConfig,
    ) -> Self {
        Self {
            id,
            channels,
            analyzer,
            flow,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Process items until the queue is drained or the run is interrupted.
    ///
    /// A poller thread mirrors the shared interrupt flag into a local signal
    /// so that backpressure waits can be cut short.
    pub fn run(&self) -> Result<WorkerSummary> {
        let interrupt = InterruptSignal::new();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let status = self.channels.status();
        let poll = self.flow.interrupt_poll();

        thread::scope(|scope| {
            scope.spawn(|| poll_interrupt(status, &interrupt, poll, stop_rx));
            let outcome = self.process(&interrupt);
            drop(stop_tx);
            outcome
        })
    }

    fn process(&self, interrupt: &InterruptSignal) -> Result<WorkerSummary> {
        let backpressure = Backpressure::new(&self.flow);
        let status = self.channels.status();
        let mut summary = WorkerSummary {
            worker: self.id,
            ..WorkerSummary::default()
        };

        loop {
            if interrupt.is_raised() || status.is_interrupted()? {
                summary.interrupted = true;
                break;
            }
            if !backpressure.wait(|| self.channels.results().count(), interrupt)? {
                summary.interrupted = true;
                break;
            }
            let Some(item) = self.channels.queue().pop_one()? else {
                break;
            };

            status.start_file(self.id, &item.path)?;
            debug!("Worker {} indexing {}", self.id, item.path.display());
            let graph = analyze_or_record(self.analyzer.as_ref(), &item);
            self.channels.results().push(IndexedFile {
                path: item.path,
                target_store: item.target_store,
                graph,
            })?;
            status.finish_file(self.id)?;
            summary.processed += 1;
        }

        info!(
            "Worker {} stopping after {} files{}",
            self.id,
            summary.processed,
            if summary.interrupted { " (interrupted)" } else { "" }
        );
        Ok(summary)
    }
}

fn poll_interrupt(
    status: &StatusManager,
    interrupt: &InterruptSignal,
    interval: Duration,
    stop: mpsc::Receiver<()>,
) {
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }
        match status.is_interrupted() {
            Ok(true) => {
                interrupt.raise();
                return;
            }
            Ok(false) => {}
            Err(err) => {
                warn!("Interrupt poller cannot read the status segment: {}", err);
                return;
            }
        }
    }
}

/// Entry point of a worker process (or thread): open the run's channels and
/// work until done.
pub fn run_worker(
    instance: &InstanceId,
    id: WorkerId,
    runtime_dir: &Path,
    config: &IndexerConfig,
    analyzer: Arc<dyn Analyzer>,
) -> Result<WorkerSummary> {
    let channels = IndexerChannels::open(runtime_dir, instance, config)?;
    WorkerLoop::new(id, channels, analyzer, config.flow_control()).run()
}
