use thiserror::Error;

#[derive(Error, Debug)]
pub enum FanoutError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Shared segment error: {0}")]
    Ipc(#[from] fanout_ipc::IpcError),
    #[error("Task error: {0}")]
    Ingest(#[from] fanout_ingest::IngestError),
    #[error("Store error: {0}")]
    Store(String),
    #[error("Transaction error: {0}")]
    Transaction(String),
    #[error("Worker error: {0}")]
    Worker(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<FanoutError> for fanout_ingest::IngestError {
    fn from(err: FanoutError) -> Self {
        match err {
            FanoutError::Ingest(inner) => inner,
            other => fanout_ingest::IngestError::Execution(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, FanoutError>;
