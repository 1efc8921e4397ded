use std::path::{Path, PathBuf};

use fanout_ipc::{
    COMMAND_QUEUE_PREFIX, CommandQueue, INTERRUPT_PREFIX, InstanceId, RESULT_PREFIX,
    ResultChannel, STATUS_PREFIX, SharedSegment, StatusManager,
};
use tracing::{debug, error, info};

use crate::config::IndexerConfig;
use crate::error::Result;
use crate::model::{IndexedFile, WorkItem};

/// Handles to the shared segments of one indexing run.
///
/// The coordinator and every worker open their own copy with the same
/// instance id; nothing about a run lives in process-global state.
pub struct IndexerChannels {
    instance: InstanceId,
    runtime_dir: PathBuf,
    queue: CommandQueue<WorkItem>,
    status: StatusManager,
    results: ResultChannel<IndexedFile>,
}

impl IndexerChannels {
    pub fn open(runtime_dir: &Path, instance: &InstanceId, config: &IndexerConfig) -> Result<Self> {
        let options = config.segment_options();
        let queue = CommandQueue::open(
            runtime_dir,
            &instance.segment_name(COMMAND_QUEUE_PREFIX),
            options.clone(),
        )?;
        let status = StatusManager::open(
            runtime_dir,
            &instance.segment_name(STATUS_PREFIX),
            &instance.segment_name(INTERRUPT_PREFIX),
            options.clone(),
            config.crash_log_limit,
        )?;
        let results =
            ResultChannel::open(runtime_dir, &instance.segment_name(RESULT_PREFIX), options)?;
        debug!(
            "Opened channels of run {} under {}",
            instance,
            runtime_dir.display()
        );

        Ok(Self {
            instance: instance.clone(),
            runtime_dir: runtime_dir.to_path_buf(),
            queue,
            status,
            results,
        })
    }

    pub fn instance(&self) -> &InstanceId {
        &self.instance
    }

    pub fn runtime_dir(&self) -> &Path {
        &self.runtime_dir
    }

    pub fn queue(&self) -> &CommandQueue<WorkItem> {
        &self.queue
    }

    pub fn status(&self) -> &StatusManager {
        &self.status
    }

    pub fn results(&self) -> &ResultChannel<IndexedFile> {
        &self.results
    }

    /// Where the coordinator writes the resolved config for worker processes.
    pub fn config_path(&self) -> PathBuf {
        config_file(&self.runtime_dir, &self.instance)
    }

    /// Empty every channel and clear the interrupt flag.
    pub fn reset(&self) -> Result<()> {
        self.queue.clear()?;
        self.status.clear()?;
        self.results.clear()?;
        Ok(())
    }

    /// Unmap the segments and delete their backing files.
    pub fn remove_segments(self) -> Result<()> {
        let Self {
            instance,
            runtime_dir,
            queue,
            status,
            results,
        } = self;
        let config_path = config_file(&runtime_dir, &instance);
        drop((queue, status, results));

        for name in instance.segment_names() {
            SharedSegment::remove_backing(&runtime_dir, &name)?;
        }
        match std::fs::remove_file(&config_path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        debug!("Removed segments of run {}", instance);
        Ok(())
    }
}

fn config_file(runtime_dir: &Path, instance: &InstanceId) -> PathBuf {
    runtime_dir.join(format!("config_{instance}.json"))
}

/// The coordinator's side of the channels.
pub struct Coordinator {
    channels: IndexerChannels,
}

impl Coordinator {
    pub fn new(channels: IndexerChannels) -> Self {
        Self { channels }
    }

    pub fn channels(&self) -> &IndexerChannels {
        &self.channels
    }

    pub fn into_channels(self) -> IndexerChannels {
        self.channels
    }

    pub fn enqueue(&self, items: Vec<WorkItem>) -> Result<()> {
        let count = items.len();
        self.channels.queue.push_all(items)?;
        info!("Enqueued {} work items for run {}", count, self.channels.instance);
        Ok(())
    }

    /// Take the oldest pending result, if any.
    ///
    /// Channel faults are logged and reported as "nothing pending".
    pub fn drain_once(&self) -> Option<IndexedFile> {
        match self.channels.results.pop_front() {
            Ok(result) => result,
            Err(err) => {
                error!("Failed to read the result channel: {}", err);
                None
            }
        }
    }

    pub fn request_interrupt(&self) -> Result<()> {
        self.channels.status.set_interrupted(true)?;
        info!("Interrupt requested for run {}", self.channels.instance);
        Ok(())
    }

    pub fn is_interrupted(&self) -> Result<bool> {
        Ok(self.channels.status.is_interrupted()?)
    }

    pub fn crashed_files(&self) -> Result<Vec<PathBuf>> {
        Ok(self.channels.status.crashed_files()?)
    }

    pub fn currently_indexed_files(&self) -> Result<Vec<PathBuf>> {
        Ok(self.channels.status.currently_indexed_files()?)
    }

    /// Items still waiting in the command queue.
    pub fn remaining(&self) -> Result<usize> {
        Ok(self.channels.queue.size()?)
    }

    pub fn pending_results(&self) -> Result<usize> {
        Ok(self.channels.results.count()?)
    }
}
