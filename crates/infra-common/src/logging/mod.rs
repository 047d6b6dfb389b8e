//! Logging setup and context helpers built on `tracing`

pub mod context;
pub mod setup;

pub use context::{with_context, LogContext};
pub use setup::{log_welcome, parse_log_level, setup_logging, LoggingConfig};
