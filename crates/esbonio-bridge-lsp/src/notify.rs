//! [`Notifier`] that talks to the editor over LSP.

use crate::editor::EditorConnection;
use async_trait::async_trait;
use esbonio_bridge_core::Notifier;
use lsp_types::{LogMessageParams, MessageType, ShowMessageParams};
use serde_json::{json, Value};

const YES: &str = "Yes";
const NO: &str = "No";

/// Progress goes to the editor's log, info and errors are shown, and
/// questions become `window/showMessageRequest` with Yes/No actions.
#[derive(Clone)]
pub struct LspNotifier {
    editor: EditorConnection,
}

impl LspNotifier {
    pub fn new(editor: EditorConnection) -> Self {
        Self { editor }
    }

    async fn show(&self, typ: MessageType, message: &str) {
        let params = ShowMessageParams {
            typ,
            message: message.to_string(),
        };
        if let Err(e) = self.editor.notify("window/showMessage", json!(params)).await {
            tracing::warn!(error = %e, "Failed to show message");
        }
    }
}

#[async_trait]
impl Notifier for LspNotifier {
    async fn progress(&self, message: &str) {
        tracing::info!(message, "Progress");
        let params = LogMessageParams {
            typ: MessageType::INFO,
            message: message.to_string(),
        };
        if let Err(e) = self.editor.notify("window/logMessage", json!(params)).await {
            tracing::warn!(error = %e, "Failed to log message");
        }
    }

    async fn info(&self, message: &str) {
        self.show(MessageType::INFO, message).await;
    }

    async fn error(&self, message: &str) {
        tracing::error!(message, "Reported to editor");
        self.show(MessageType::ERROR, message).await;
    }

    async fn confirm(&self, message: &str) -> bool {
        let params = json!({
            "type": MessageType::INFO,
            "message": message,
            "actions": [{"title": YES}, {"title": NO}],
        });
        match self.editor.request("window/showMessageRequest", params).await {
            Ok(choice) => choice.get("title").and_then(Value::as_str) == Some(YES),
            Err(e) => {
                tracing::warn!(error = %e, "Question was not answered");
                false
            }
        }
    }
}
