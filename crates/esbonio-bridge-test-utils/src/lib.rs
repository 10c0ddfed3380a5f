//! Testing utilities, fixtures, and mocks for esbonio-bridge.
//!
//! - **Fixtures**: temporary storage roots and project directories
//! - **Mocks**: a scripted [`ProcessRunner`](esbonio_bridge_env::ProcessRunner)
//!   and a recording [`Notifier`](esbonio_bridge_core::Notifier)
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use esbonio_bridge_test_utils::mocks::MockRunner;
//!
//! let runner = MockRunner::new().with_server("/usr/bin/python3", "0.16.5");
//! ```

pub mod fixtures;
pub mod mocks;

pub use fixtures::TestProject;
pub use mocks::{command_line, Invocation, MockOutcome, MockRunner, Notification, RecordingNotifier};
