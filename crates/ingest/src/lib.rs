pub mod error;
pub mod runtime;
pub mod traits;
pub mod types;

pub use error::IngestError;
pub use runtime::{
    Backpressure, FlowControlConfig, InterruptSignal, TaskContext, TaskRunner, forward_ctrl_c,
    interrupt_on, run_blocking,
};
pub use traits::Task;
pub use types::TaskStatus;
