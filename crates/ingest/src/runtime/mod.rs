use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::IngestError;
use crate::traits::Task;
use crate::types::TaskStatus;

pub mod flow_control;

pub use flow_control::{Backpressure, FlowControlConfig};

/// Cooperative cancellation flag shared by a task and whoever drives it.
#[derive(Debug, Clone, Default)]
pub struct InterruptSignal(Arc<AtomicBool>);

impl InterruptSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    interrupt: InterruptSignal,
}

impl TaskContext {
    pub fn new(interrupt: InterruptSignal) -> Self {
        Self { interrupt }
    }

    pub fn interrupt(&self) -> &InterruptSignal {
        &self.interrupt
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_raised()
    }
}

/// Drives a [`Task`] from `enter` to `exit` on the calling thread.
#[derive(Debug, Clone)]
pub struct TaskRunner {
    idle_sleep: Duration,
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new(&FlowControlConfig::default())
    }
}

impl TaskRunner {
    pub fn new(config: &FlowControlConfig) -> Self {
        Self {
            idle_sleep: config.idle_sleep(),
        }
    }

    /// `exit` runs even when `update` fails, so the task can release what it
    /// acquired in `enter`. The `update` error wins over an `exit` error.
    pub fn run<T>(&self, task: &mut T, ctx: &TaskContext) -> Result<TaskStatus, IngestError>
    where
        T: Task + ?Sized,
    {
        task.enter(ctx)?;

        let mut updates = 0usize;
        let outcome = loop {
            match task.update(ctx) {
                Ok(TaskStatus::Running) => updates += 1,
                Ok(TaskStatus::Idle) => {
                    updates += 1;
                    thread::sleep(self.idle_sleep);
                }
                Ok(status) => break Ok(status),
                Err(err) => break Err(err),
            }
        };
        debug!("Task left update after {} steps", updates);

        let exited = task.exit(ctx);
        let status = outcome?;
        exited?;
        Ok(status)
    }
}

/// Run `task` to completion on tokio's blocking pool and hand it back.
pub async fn run_blocking<T>(
    runner: TaskRunner,
    mut task: T,
    ctx: TaskContext,
) -> Result<(T, TaskStatus), IngestError>
where
    T: Task + 'static,
{
    tokio::task::spawn_blocking(move || {
        let status = runner.run(&mut task, &ctx)?;
        Ok((task, status))
    })
    .await
    .map_err(|e| IngestError::Execution(format!("task join failure: {e}")))?
}

/// Raise `signal` once `trigger` completes.
pub fn interrupt_on<F>(signal: InterruptSignal, trigger: F) -> JoinHandle<()>
where
    F: Future + Send + 'static,
{
    tokio::spawn(async move {
        trigger.await;
        signal.raise();
    })
}

/// Raise `signal` on the first Ctrl-C.
pub fn forward_ctrl_c(signal: InterruptSignal) -> JoinHandle<()> {
    interrupt_on(signal, async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, finishing in-flight files");
        } else {
            // No handler could be installed, so there is nothing to forward.
            std::future::pending::<()>().await;
        }
    })
}
