//! User-visible notifications.
//!
//! Activation and installation report to the user through a [`Notifier`].
//! The CLI prints to the terminal; the bridge forwards to the editor.

use async_trait::async_trait;

/// Sink for progress, errors and yes/no questions.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Transient progress or status information.
    async fn progress(&self, message: &str);

    /// Informational message.
    async fn info(&self, message: &str);

    /// Blocking error the user has to see.
    async fn error(&self, message: &str);

    /// Ask a yes/no question. Unanswered or dismissed counts as no.
    async fn confirm(&self, message: &str) -> bool;
}

/// Notifier that drops everything and answers every question with `answer`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier {
    pub answer: bool,
}

#[async_trait]
impl Notifier for NullNotifier {
    async fn progress(&self, _message: &str) {}

    async fn info(&self, _message: &str) {}

    async fn error(&self, message: &str) {
        tracing::debug!(message, "Dropped error notification");
    }

    async fn confirm(&self, _message: &str) -> bool {
        self.answer
    }
}
