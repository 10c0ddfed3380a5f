//! The connection to the editor.
//!
//! A reader task parses framed messages from the editor. Responses to
//! requests the bridge sent are delivered to their waiters directly, so a
//! dispatch loop that is blocked on such a request still makes progress.
//! Everything else is forwarded as an [`Event`]. A writer task owns the
//! output stream.

use crate::error::{BridgeError, BridgeResult};
use crate::event::Event;
use crate::message::{Message, RequestId, Response, ResponseError};
use crate::transport::{read_message, route, write_message, PendingRequests};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Handle for sending to the editor. Cheap to clone.
#[derive(Clone)]
pub struct EditorConnection {
    outgoing_tx: mpsc::Sender<String>,
    pending: PendingRequests,
}

impl EditorConnection {
    /// Start the reader and writer tasks over the given streams.
    pub fn start<R, W>(reader: R, writer: W, events: mpsc::UnboundedSender<Event>) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outgoing_tx, outgoing_rx) = mpsc::channel::<String>(100);
        let pending = PendingRequests::new();

        let pending_clone = pending.clone();
        tokio::spawn(async move {
            Self::reader_loop(reader, events, pending_clone).await;
        });

        tokio::spawn(async move {
            Self::writer_loop(writer, outgoing_rx).await;
        });

        Self {
            outgoing_tx,
            pending,
        }
    }

    async fn reader_loop<R>(
        mut reader: R,
        events: mpsc::UnboundedSender<Event>,
        pending: PendingRequests,
    ) where
        R: AsyncBufRead + Unpin,
    {
        loop {
            let content = match read_message(&mut reader).await {
                Ok(Some(content)) => content,
                Ok(None) => {
                    info!("Editor closed input");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Error reading from editor");
                    break;
                }
            };

            let message = match Message::parse(&content) {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "Failed to parse editor message");
                    continue;
                }
            };

            if let Some(message) = route(&pending, message).await {
                if events.send(Event::Editor(message)).is_err() {
                    break;
                }
            }
        }

        pending.clear().await;
        let _ = events.send(Event::EditorClosed);
    }

    async fn writer_loop<W>(mut writer: W, mut rx: mpsc::Receiver<String>)
    where
        W: AsyncWrite + Unpin,
    {
        while let Some(message) = rx.recv().await {
            if let Err(e) = write_message(&mut writer, &message).await {
                error!(error = %e, "Error writing to editor");
                break;
            }
        }
        debug!("Editor writer finished");
    }

    pub async fn send(&self, message: &Message) -> BridgeResult<()> {
        self.outgoing_tx
            .send(message.to_json())
            .await
            .map_err(|_| BridgeError::connection_closed("editor output closed"))
    }

    pub async fn notify(&self, method: &str, params: Value) -> BridgeResult<()> {
        self.send(&Message::notification(method, Some(params))).await
    }

    pub async fn respond(&self, id: RequestId, result: Value) -> BridgeResult<()> {
        self.send(&Message::Response(Response::ok(id, result))).await
    }

    pub async fn respond_error(&self, id: RequestId, error: ResponseError) -> BridgeResult<()> {
        self.send(&Message::Response(Response::error(id, error))).await
    }

    /// Send a request and wait for the editor's answer.
    pub async fn request(&self, method: &str, params: Value) -> BridgeResult<Value> {
        let (id, rx) = self.pending.register().await;
        self.send(&Message::request(id, method, Some(params))).await?;

        let response = rx
            .await
            .map_err(|_| BridgeError::connection_closed("editor closed before responding"))?;
        response
            .result
            .map_err(|e| BridgeError::RequestFailed(format!("{method}: {}", e.message)))
    }
}
