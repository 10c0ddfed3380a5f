//! LSP base protocol framing (JSON-RPC over byte streams).
//!
//! Each message is a header block terminated by an empty line, followed by
//! a body of exactly `Content-Length` bytes. Headers other than
//! `Content-Length` are accepted and ignored.

use crate::error::{BridgeError, BridgeResult};
use crate::message::{Message, RequestId, Response};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, Mutex};
use tracing::trace;

/// Largest message body accepted from a peer.
pub const MAX_CONTENT_LENGTH: usize = 64 * 1024 * 1024;

/// Read one message body, or `None` on a clean end of stream.
pub async fn read_message<R>(reader: &mut R) -> BridgeResult<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut saw_header = false;
    loop {
        let mut line = String::new();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            if saw_header {
                return Err(BridgeError::connection_closed("Stream ended inside headers"));
            }
            return Ok(None);
        }

        let line = line.trim();
        if line.is_empty() {
            if saw_header {
                break;
            }
            continue;
        }
        saw_header = true;

        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = Some(
                    value
                        .trim()
                        .parse()
                        .map_err(|_| BridgeError::protocol_error("Invalid Content-Length"))?,
                );
            }
        }
    }

    let content_length = content_length
        .ok_or_else(|| BridgeError::protocol_error("Missing Content-Length header"))?;
    if content_length > MAX_CONTENT_LENGTH {
        return Err(BridgeError::protocol_error(format!(
            "Content-Length {content_length} exceeds the {MAX_CONTENT_LENGTH} byte limit"
        )));
    }

    let mut content = vec![0u8; content_length];
    reader.read_exact(&mut content).await?;

    let content = String::from_utf8(content)
        .map_err(|e| BridgeError::protocol_error(format!("Invalid UTF-8: {e}")))?;

    trace!(content = %content, "Received LSP message");
    Ok(Some(content))
}

/// Write one message body with its `Content-Length` header.
pub async fn write_message<W>(writer: &mut W, content: &str) -> BridgeResult<()>
where
    W: AsyncWrite + Unpin,
{
    let message = format!("Content-Length: {}\r\n\r\n{}", content.len(), content);
    trace!(message = %content, "Sending LSP message");

    writer.write_all(message.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Requests the bridge sent on one connection, awaiting responses.
#[derive(Clone, Default)]
pub struct PendingRequests {
    next_id: Arc<AtomicU64>,
    waiting: Arc<Mutex<HashMap<RequestId, oneshot::Sender<Response>>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a bridge id and a receiver for its response.
    pub async fn register(&self) -> (RequestId, oneshot::Receiver<Response>) {
        let id = RequestId::bridge(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = oneshot::channel();
        self.waiting.lock().await.insert(id.clone(), tx);
        (id, rx)
    }

    /// Hand `response` to its waiter, or give it back if it is not ours.
    pub async fn resolve(&self, response: Response) -> Option<Response> {
        let Some(id) = response.id.as_ref().filter(|id| id.is_bridge()) else {
            return Some(response);
        };

        match self.waiting.lock().await.remove(id) {
            Some(tx) => {
                // The waiter may have given up already.
                let _ = tx.send(response);
                None
            }
            None => {
                tracing::debug!(%id, "Dropping response to unknown bridge request");
                None
            }
        }
    }

    /// Forget a request whose waiter gave up.
    pub async fn cancel(&self, id: &RequestId) {
        self.waiting.lock().await.remove(id);
    }

    /// Drop every waiter so pending requests fail with a closed channel.
    pub async fn clear(&self) {
        self.waiting.lock().await.clear();
    }
}

/// Route a parsed message: responses to bridge requests are consumed.
pub async fn route(pending: &PendingRequests, message: Message) -> Option<Message> {
    match message {
        Message::Response(response) => pending.resolve(response).await.map(Message::Response),
        other => Some(other),
    }
}
