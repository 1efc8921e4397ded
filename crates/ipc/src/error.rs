use thiserror::Error;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("segment I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("segment value encoding failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("segment value decoding failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("segment '{segment}' out of space: {needed} contiguous bytes required")]
    OutOfSpace { segment: String, needed: u64 },
    #[error("segment '{segment}' cannot grow beyond {limit} bytes (requested {requested})")]
    Exhausted {
        segment: String,
        limit: u64,
        requested: u64,
    },
    #[error("segment '{segment}' is corrupt: {reason}")]
    Corrupt { segment: String, reason: String },
    #[error("segment '{0}' lock poisoned")]
    Poisoned(String),
}

impl IpcError {
    /// Transport faults that growing the segment can resolve.
    pub fn is_out_of_space(&self) -> bool {
        matches!(self, IpcError::OutOfSpace { .. })
    }
}

pub type Result<T> = std::result::Result<T, IpcError>;
