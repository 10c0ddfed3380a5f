//! Language Server Protocol relay for esbonio-bridge.
//!
//! The bridge sits between an editor and the esbonio language server. It
//! activates the server's environment when the editor initializes, relays
//! all traffic, and adds editor features of its own: section underline and
//! link insertion code actions, a directive completion fix, and commands
//! to restart or reinstall the server.

pub mod actions;
pub mod completion;
pub mod documents;
pub mod editor;
pub mod error;
pub mod event;
pub mod message;
pub mod notify;
pub mod server;
pub mod session;
pub mod transport;

pub use error::{BridgeError, BridgeResult};
pub use message::{Message, RequestId};
pub use notify::LspNotifier;
pub use server::{ProcessLauncher, ServerConnection, ServerLauncher};
pub use session::{Bridge, SessionEnd, SettingsLayers, Timeouts, BRIDGE_COMMANDS};
