use std::sync::{Arc, Mutex};

use fanout_ingest::{
    FlowControlConfig, IngestError, InterruptSignal, Task, TaskContext, TaskRunner, TaskStatus,
    interrupt_on, run_blocking,
};

#[derive(Default)]
struct Countdown {
    remaining: usize,
    start: usize,
    fail_at: Option<usize>,
    trace: Arc<Mutex<Vec<String>>>,
}

impl Countdown {
    fn new(start: usize) -> Self {
        Self {
            start,
            ..Self::default()
        }
    }

    fn log(&self, event: impl Into<String>) {
        self.trace.lock().expect("lock poisoned").push(event.into());
    }
}

impl Task for Countdown {
    fn enter(&mut self, _ctx: &TaskContext) -> Result<(), IngestError> {
        self.remaining = self.start;
        self.log("enter");
        Ok(())
    }

    fn update(&mut self, ctx: &TaskContext) -> Result<TaskStatus, IngestError> {
        if ctx.is_interrupted() || self.remaining == 0 {
            return Ok(TaskStatus::Success);
        }
        if self.fail_at == Some(self.remaining) {
            return Err(IngestError::Update(format!("boom at {}", self.remaining)));
        }
        self.remaining -= 1;
        self.log(format!("update {}", self.remaining));
        Ok(if self.remaining % 2 == 0 {
            TaskStatus::Idle
        } else {
            TaskStatus::Running
        })
    }

    fn exit(&mut self, _ctx: &TaskContext) -> Result<(), IngestError> {
        self.log("exit");
        Ok(())
    }

    fn reset(&mut self, _ctx: &TaskContext) -> Result<(), IngestError> {
        self.trace.lock().expect("lock poisoned").clear();
        Ok(())
    }
}

fn fast_runner() -> TaskRunner {
    TaskRunner::new(&FlowControlConfig {
        idle_sleep_ms: 1,
        ..FlowControlConfig::default()
    })
}

#[test]
fn runner_walks_enter_update_exit() {
    let mut task = Countdown::new(3);
    let trace = Arc::clone(&task.trace);

    let status = fast_runner()
        .run(&mut task, &TaskContext::default())
        .expect("run should work");

    assert_eq!(status, TaskStatus::Success);
    assert_eq!(
        *trace.lock().expect("lock poisoned"),
        vec!["enter", "update 2", "update 1", "update 0", "exit"]
    );
}

#[test]
fn exit_runs_after_failed_update() {
    let mut task = Countdown::new(3);
    task.fail_at = Some(2);
    let trace = Arc::clone(&task.trace);

    let err = fast_runner()
        .run(&mut task, &TaskContext::default())
        .expect_err("update failure should surface");

    assert!(matches!(err, IngestError::Update(_)));
    assert_eq!(
        trace.lock().expect("lock poisoned").last().map(String::as_str),
        Some("exit")
    );
}

#[test]
fn interrupted_task_stops_before_work() {
    let mut task = Countdown::new(5);
    let interrupt = InterruptSignal::new();
    interrupt.raise();

    let status = fast_runner()
        .run(&mut task, &TaskContext::new(interrupt))
        .expect("run should work");

    assert_eq!(status, TaskStatus::Success);
    assert_eq!(task.remaining, 5);
}

#[test]
fn reset_task_can_be_entered_again() {
    let runner = fast_runner();
    let ctx = TaskContext::default();
    let mut task = Countdown::new(2);

    runner.run(&mut task, &ctx).expect("first run should work");
    task.reset(&ctx).expect("reset should work");
    runner.run(&mut task, &ctx).expect("second run should work");

    assert_eq!(
        *task.trace.lock().expect("lock poisoned"),
        vec!["enter", "update 1", "update 0", "exit"]
    );
}

#[tokio::test]
async fn blocking_run_hands_the_task_back() {
    let (task, status) = run_blocking(fast_runner(), Countdown::new(4), TaskContext::default())
        .await
        .expect("run should work");

    assert_eq!(status, TaskStatus::Success);
    assert_eq!(task.remaining, 0);
}

#[tokio::test]
async fn trigger_future_raises_the_interrupt() {
    let signal = InterruptSignal::new();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let forwarder = interrupt_on(signal.clone(), async move {
        let _ = rx.await;
    });

    assert!(!signal.is_raised());
    tx.send(()).expect("receiver should be alive");
    forwarder.await.expect("forwarder should finish");
    assert!(signal.is_raised());
}
