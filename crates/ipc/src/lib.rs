pub mod channel;
pub mod error;
pub mod names;
pub mod queue;
pub mod segment;
pub mod status;

pub use channel::ResultChannel;
pub use error::IpcError;
pub use names::{
    COMMAND_QUEUE_PREFIX, INTERRUPT_PREFIX, InstanceId, RESULT_PREFIX, STATUS_PREFIX,
};
pub use queue::CommandQueue;
pub use segment::{SegmentGuard, SegmentOptions, SharedSegment};
pub use status::{DEFAULT_CRASH_LOG_LIMIT, StatusManager, WorkerId};
