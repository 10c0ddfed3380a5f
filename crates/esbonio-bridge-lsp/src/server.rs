//! The connection to the language server process.

use crate::error::{BridgeError, BridgeResult};
use crate::event::Event;
use crate::message::Message;
use crate::transport::{read_message, route, write_message, PendingRequests};
use esbonio_bridge_core::LaunchPlan;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Starts server connections from launch plans.
pub trait ServerLauncher: Send + Sync {
    fn launch(
        &self,
        plan: &LaunchPlan,
        generation: u64,
        events: mpsc::UnboundedSender<Event>,
    ) -> BridgeResult<ServerConnection>;
}

/// Launches the server as a child process speaking LSP on stdio.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    cwd: Option<PathBuf>,
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

impl ServerLauncher for ProcessLauncher {
    fn launch(
        &self,
        plan: &LaunchPlan,
        generation: u64,
        events: mpsc::UnboundedSender<Event>,
    ) -> BridgeResult<ServerConnection> {
        let mut cmd = Command::new(&plan.command);
        cmd.args(&plan.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }

        info!(
            command = %plan.command.display(),
            args = ?plan.args,
            generation,
            "Starting language server"
        );

        let mut child = cmd
            .spawn()
            .map_err(|e| BridgeError::ProcessError(format!("Failed to start server: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::ProcessError("Failed to get stdin".to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::ProcessError("Failed to get stdout".to_string()))?;

        Ok(
            ServerConnection::from_streams(BufReader::new(stdout), stdin, generation, events)
                .with_child(child),
        )
    }
}

/// One running server. Owned by the session's dispatch loop.
pub struct ServerConnection {
    generation: u64,
    writer: Box<dyn AsyncWrite + Send + Sync + Unpin>,
    pending: PendingRequests,
    child: Option<Child>,
}

impl ServerConnection {
    /// Wrap already-connected streams and start the reader task.
    pub fn from_streams<R, W>(
        reader: R,
        writer: W,
        generation: u64,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + Sync + 'static,
    {
        let pending = PendingRequests::new();
        let pending_clone = pending.clone();
        tokio::spawn(async move {
            Self::reader_loop(reader, generation, events, pending_clone).await;
        });

        Self {
            generation,
            writer: Box::new(writer),
            pending,
            child: None,
        }
    }

    pub fn with_child(mut self, child: Child) -> Self {
        self.child = Some(child);
        self
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    async fn reader_loop<R>(
        mut reader: R,
        generation: u64,
        events: mpsc::UnboundedSender<Event>,
        pending: PendingRequests,
    ) where
        R: AsyncBufRead + Unpin,
    {
        loop {
            let content = match read_message(&mut reader).await {
                Ok(Some(content)) => content,
                Ok(None) => break,
                Err(e) => {
                    warn!(generation, error = %e, "Error reading from server");
                    break;
                }
            };

            let message = match Message::parse(&content) {
                Ok(message) => message,
                Err(e) => {
                    warn!(generation, error = %e, "Failed to parse server message");
                    continue;
                }
            };

            if let Some(message) = route(&pending, message).await {
                if events.send(Event::Server { generation, message }).is_err() {
                    break;
                }
            }
        }

        debug!(generation, "Server output closed");
        pending.clear().await;
        let _ = events.send(Event::ServerExited { generation });
    }

    pub async fn send(&mut self, message: &Message) -> BridgeResult<()> {
        write_message(&mut self.writer, &message.to_json()).await
    }

    pub async fn notify(&mut self, method: &str, params: Option<Value>) -> BridgeResult<()> {
        self.send(&Message::notification(method, params)).await
    }

    /// Send a request with a bridge id and wait for its result.
    pub async fn request(
        &mut self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> BridgeResult<Value> {
        let (id, rx) = self.pending.register().await;
        self.send(&Message::request(id.clone(), method, params)).await?;

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(BridgeError::connection_closed(format!(
                    "server closed before answering {method}"
                )))
            }
            Err(_) => {
                self.pending.cancel(&id).await;
                return Err(BridgeError::Timeout(method.to_string()));
            }
        };

        response
            .result
            .map_err(|e| BridgeError::RequestFailed(format!("{method}: {}", e.message)))
    }

    /// Ask the server to shut down and exit, killing it if it lingers.
    pub async fn stop(mut self, timeout: Duration) {
        if let Err(e) = self.request("shutdown", None, timeout).await {
            warn!(generation = self.generation, error = %e, "Server did not acknowledge shutdown");
        }
        self.exit(timeout).await;
    }

    /// Send `exit` and wait for the process, killing it after `timeout`.
    pub async fn exit(mut self, timeout: Duration) {
        if let Err(e) = self.notify("exit", None).await {
            debug!(generation = self.generation, error = %e, "Failed to send exit");
        }

        let Some(mut child) = self.child.take() else {
            return;
        };
        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => info!(generation = self.generation, %status, "Server exited"),
            Ok(Err(e)) => warn!(generation = self.generation, error = %e, "Failed to wait for server"),
            Err(_) => {
                warn!(generation = self.generation, "Server did not exit, killing it");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill server");
                }
            }
        }
    }
}
