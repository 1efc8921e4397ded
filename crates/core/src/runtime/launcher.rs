//! Starting workers and watching them exit.
//!
//! Production runs launch one OS process per worker (the current executable in
//! its hidden `worker` mode). Tests and embedders can launch threads instead;
//! both talk to the coordinator only through the shared segments.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;

use fanout_ipc::{InstanceId, WorkerId};
use tracing::{debug, warn};

use super::worker::{WorkerSummary, run_worker};
use crate::analyzer::Analyzer;
use crate::config::IndexerConfig;
use crate::error::{FanoutError, Result};

/// Everything a worker needs to join a run.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    pub instance: InstanceId,
    pub worker: WorkerId,
    pub runtime_dir: PathBuf,
    /// Resolved config, also written to `config_path` for worker processes.
    pub config: IndexerConfig,
    pub config_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    Success,
    Failed(String),
}

pub trait WorkerHandle: Send {
    fn id(&self) -> WorkerId;

    /// `None` while the worker is still running.
    fn try_wait(&mut self) -> Result<Option<WorkerExit>>;

    fn kill(&mut self) -> Result<()>;
}

pub trait WorkerLauncher: Send {
    fn launch(&self, spec: &WorkerSpec) -> Result<Box<dyn WorkerHandle>>;
}

/// Launches workers as child processes of `program`.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn current_exe() -> Result<Self> {
        let program = std::env::current_exe().map_err(|e| {
            FanoutError::Worker(format!("Failed to get current executable: {}", e))
        })?;
        Ok(Self::new(program))
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, spec: &WorkerSpec) -> Result<Box<dyn WorkerHandle>> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("worker");
        cmd.arg("--instance").arg(spec.instance.as_str());
        cmd.arg("--worker-id").arg(spec.worker.to_string());
        cmd.arg("--runtime-dir").arg(&spec.runtime_dir);
        cmd.arg("--config").arg(&spec.config_path);

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::inherit());
        detach_from_terminal_signals(&mut cmd);

        let child = cmd.spawn().map_err(|e| {
            FanoutError::Worker(format!("Failed to spawn worker {}: {}", spec.worker, e))
        })?;
        debug!("Spawned worker {} as pid {}", spec.worker, child.id());
        Ok(Box::new(ProcessHandle {
            id: spec.worker,
            child,
        }))
    }
}

/// Run the worker in a process group of its own, so a terminal Ctrl-C only
/// reaches the coordinator. Workers stop through the shared interrupt flag,
/// after finishing the file they are on.
#[cfg(unix)]
fn detach_from_terminal_signals(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(windows)]
fn detach_from_terminal_signals(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn detach_from_terminal_signals(_cmd: &mut Command) {}

struct ProcessHandle {
    id: WorkerId,
    child: Child,
}

impl WorkerHandle for ProcessHandle {
    fn id(&self) -> WorkerId {
        self.id
    }

    fn try_wait(&mut self) -> Result<Option<WorkerExit>> {
        let Some(status) = self.child.try_wait()? else {
            return Ok(None);
        };
        if status.success() {
            Ok(Some(WorkerExit::Success))
        } else {
            Ok(Some(WorkerExit::Failed(format!("exited with {status}"))))
        }
    }

    fn kill(&mut self) -> Result<()> {
        match self.child.kill() {
            Ok(()) => {}
            // Already exited.
            Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => {}
            Err(err) => return Err(err.into()),
        }
        self.child.wait()?;
        Ok(())
    }
}

/// Launches workers as threads of the current process.
///
/// Each thread opens its own handles on the run's segments, exactly like a
/// worker process would.
#[derive(Clone)]
pub struct ThreadLauncher {
    analyzer: Arc<dyn Analyzer>,
}

impl ThreadLauncher {
    pub fn new(analyzer: Arc<dyn Analyzer>) -> Self {
        Self { analyzer }
    }
}

impl WorkerLauncher for ThreadLauncher {
    fn launch(&self, spec: &WorkerSpec) -> Result<Box<dyn WorkerHandle>> {
        let spec = spec.clone();
        let id = spec.worker;
        let analyzer = Arc::clone(&self.analyzer);
        let join = std::thread::Builder::new()
            .name(format!("fanout-worker-{id}"))
            .spawn(move || {
                run_worker(
                    &spec.instance,
                    spec.worker,
                    &spec.runtime_dir,
                    &spec.config,
                    analyzer,
                )
            })
            .map_err(|e| FanoutError::Worker(format!("Failed to spawn worker thread: {}", e)))?;
        Ok(Box::new(ThreadHandle {
            id,
            join: Some(join),
        }))
    }
}

struct ThreadHandle {
    id: WorkerId,
    join: Option<JoinHandle<Result<WorkerSummary>>>,
}

impl WorkerHandle for ThreadHandle {
    fn id(&self) -> WorkerId {
        self.id
    }

    fn try_wait(&mut self) -> Result<Option<WorkerExit>> {
        let finished = self.join.as_ref().is_none_or(JoinHandle::is_finished);
        if !finished {
            return Ok(None);
        }
        let Some(join) = self.join.take() else {
            return Ok(Some(WorkerExit::Success));
        };
        let exit = match join.join() {
            Ok(Ok(summary)) => {
                debug!("Worker thread {} processed {} files", self.id, summary.processed);
                WorkerExit::Success
            }
            Ok(Err(err)) => WorkerExit::Failed(err.to_string()),
            Err(_) => WorkerExit::Failed("worker thread panicked".to_string()),
        };
        Ok(Some(exit))
    }

    fn kill(&mut self) -> Result<()> {
        // Threads cannot be killed; the worker stops at its next interrupt check.
        warn!("Worker thread {} cannot be killed, detaching it", self.id);
        self.join = None;
        Ok(())
    }
}
