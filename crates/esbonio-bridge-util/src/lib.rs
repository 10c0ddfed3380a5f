//! Shared utilities for esbonio-bridge.
//!
//! - Logging setup with tracing
//! - Well-known directories (config, storage, logs)

pub mod log;
pub mod path;

pub use log::{LogConfig, LogLevel, LogTarget};
