pub mod analyzer;
pub mod config;
pub mod error;
pub mod indexing;
pub mod logging;
pub mod merge;
pub mod model;
pub mod runtime;
pub mod store;

pub use error::{FanoutError, Result};
