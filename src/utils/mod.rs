//! Shared helpers

mod logger;

pub use logger::{init_logger, FatalLog, LogLevel};
