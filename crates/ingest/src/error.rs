use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("task enter failed: {0}")]
    Enter(String),
    #[error("task update failed: {0}")]
    Update(String),
    #[error("task exit failed: {0}")]
    Exit(String),
    #[error("execution failed: {0}")]
    Execution(String),
}
