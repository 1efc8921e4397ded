//! Per-worker liveness and crash bookkeeping.
//!
//! Crashes are detected lazily: a worker that dies between `start_file` and
//! `finish_file` leaves its slot occupied. The next `start_file` under the
//! same worker id moves the orphaned path into the crash log, and
//! `crashed_files` also reports every slot that is still occupied.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::segment::{SegmentOptions, SharedSegment};

pub type WorkerId = u32;

const STATUS_KEY: &str = "status";
const INTERRUPT_KEY: &str = "interrupted";

pub const DEFAULT_CRASH_LOG_LIMIT: usize = 1024;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StatusBoard {
    current: BTreeMap<WorkerId, PathBuf>,
    crashed: VecDeque<PathBuf>,
    finished: VecDeque<WorkerId>,
}

/// Status of every worker of one run, plus the run-wide interrupt flag.
///
/// The flag lives in its own segment so the interrupt poller never waits on
/// the lock guarding the status board.
pub struct StatusManager {
    status: SharedSegment,
    interrupt: SharedSegment,
    crash_log_limit: usize,
}

impl StatusManager {
    pub fn open(
        dir: &Path,
        status_name: &str,
        interrupt_name: &str,
        options: SegmentOptions,
        crash_log_limit: usize,
    ) -> Result<Self> {
        Ok(Self {
            status: SharedSegment::open(dir, status_name, options.clone())?,
            interrupt: SharedSegment::open(dir, interrupt_name, options)?,
            crash_log_limit: crash_log_limit.max(1),
        })
    }

    pub fn start_file(&self, worker: WorkerId, path: &Path) -> Result<()> {
        let limit = self.crash_log_limit;
        let mut guard = self.status.scoped_access()?;
        let orphaned = guard.update(STATUS_KEY, |board: &mut StatusBoard| {
            let previous = board.current.insert(worker, path.to_path_buf())?;
            if previous == path {
                return None;
            }
            if board.crashed.len() == limit {
                board.crashed.pop_front();
            }
            board.crashed.push_back(previous.clone());
            Some(previous)
        })?;
        drop(guard);

        if let Some(previous) = orphaned {
            warn!(
                "Worker {} abandoned {} without finishing it, recorded as crashed",
                worker,
                previous.display()
            );
        }
        Ok(())
    }

    pub fn finish_file(&self, worker: WorkerId) -> Result<()> {
        let mut guard = self.status.scoped_access()?;
        guard.update(STATUS_KEY, |board: &mut StatusBoard| {
            board.current.remove(&worker);
            board.finished.push_back(worker);
        })
    }

    pub fn set_interrupted(&self, interrupted: bool) -> Result<()> {
        let mut guard = self.interrupt.scoped_access()?;
        guard.store(INTERRUPT_KEY, &interrupted)
    }

    pub fn is_interrupted(&self) -> Result<bool> {
        let guard = self.interrupt.scoped_access()?;
        Ok(guard.lookup::<bool>(INTERRUPT_KEY)?.unwrap_or(false))
    }

    pub fn next_finished_worker_id(&self) -> Result<Option<WorkerId>> {
        let mut guard = self.status.scoped_access()?;
        let Some(mut board) = guard.lookup::<StatusBoard>(STATUS_KEY)? else {
            return Ok(None);
        };
        let next = board.finished.pop_front();
        if next.is_some() {
            guard.store(STATUS_KEY, &board)?;
        }
        Ok(next)
    }

    /// The file `worker` started and has not finished, if any.
    pub fn file_in_progress(&self, worker: WorkerId) -> Result<Option<PathBuf>> {
        Ok(self.board()?.current.remove(&worker))
    }

    pub fn currently_indexed_files(&self) -> Result<Vec<PathBuf>> {
        Ok(self.board()?.current.into_values().collect())
    }

    /// The crash log plus every file a worker started but has not finished.
    pub fn crashed_files(&self) -> Result<Vec<PathBuf>> {
        let board = self.board()?;
        let mut out: Vec<PathBuf> = Vec::with_capacity(board.crashed.len() + board.current.len());
        for path in board.crashed.into_iter().chain(board.current.into_values()) {
            if !out.contains(&path) {
                out.push(path);
            }
        }
        Ok(out)
    }

    /// Forget all bookkeeping, including the interrupt flag.
    pub fn clear(&self) -> Result<()> {
        self.status.scoped_access()?.remove(STATUS_KEY)?;
        self.set_interrupted(false)
    }

    fn board(&self) -> Result<StatusBoard> {
        let guard = self.status.scoped_access()?;
        Ok(guard.lookup(STATUS_KEY)?.unwrap_or_default())
    }
}
