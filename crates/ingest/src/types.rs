/// Outcome of one `Task::update` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Made progress; call `update` again right away.
    Running,
    /// Nothing to do right now; the runner sleeps before the next `update`.
    Idle,
    Success,
    Failure,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failure)
    }
}
