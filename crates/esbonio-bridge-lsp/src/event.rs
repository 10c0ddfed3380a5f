//! Events consumed by the session's dispatch loop.

use crate::message::Message;

#[derive(Debug)]
pub enum Event {
    /// A message from the editor that the bridge has to handle.
    Editor(Message),
    /// The editor's input stream ended.
    EditorClosed,
    /// A message from the server started as `generation`.
    Server { generation: u64, message: Message },
    /// The server started as `generation` closed its output.
    ServerExited { generation: u64 },
}
