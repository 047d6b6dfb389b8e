//! Common infrastructure for the confmix media engine.
//!
//! This crate holds the pieces every other crate in the workspace leans on:
//!
//! - [`errors`]: a shared error type plus helpers for attaching component and
//!   operation context to an error.
//! - [`logging`]: `tracing` subscriber setup and span helpers.
//! - [`config`]: loading typed configuration from a TOML file with
//!   environment variable overrides.

pub mod config;
pub mod errors;
pub mod logging;

pub use errors::{Error, ErrorContext, ErrorExt, Result};
pub use logging::{setup_logging, LogContext, LoggingConfig};
