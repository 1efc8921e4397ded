use crate::error::IngestError;
use crate::runtime::TaskContext;
use crate::types::TaskStatus;

/// A unit of work driven through `enter -> update* -> exit`.
///
/// `reset` returns the task to a state where it can be entered again.
pub trait Task: Send {
    fn enter(&mut self, ctx: &TaskContext) -> Result<(), IngestError>;
    fn update(&mut self, ctx: &TaskContext) -> Result<TaskStatus, IngestError>;
    fn exit(&mut self, ctx: &TaskContext) -> Result<(), IngestError>;

    fn reset(&mut self, _ctx: &TaskContext) -> Result<(), IngestError> {
        Ok(())
    }
}
