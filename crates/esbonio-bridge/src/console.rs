//! Notifications for the command-line subcommands.

use async_trait::async_trait;
use esbonio_bridge_core::Notifier;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Writes to stderr and asks questions on the terminal.
pub struct ConsoleNotifier {
    assume_yes: bool,
}

impl ConsoleNotifier {
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn progress(&self, message: &str) {
        eprintln!("{message}");
    }

    async fn info(&self, message: &str) {
        eprintln!("{message}");
    }

    async fn error(&self, message: &str) {
        eprintln!("Error: {message}");
    }

    async fn confirm(&self, message: &str) -> bool {
        if self.assume_yes {
            return true;
        }

        eprint!("{message} [y/N] ");
        let _ = std::io::stderr().flush();

        let mut input = String::new();
        match BufReader::new(tokio::io::stdin()).read_line(&mut input).await {
            Ok(_) => is_yes(&input),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read answer");
                false
            }
        }
    }
}

fn is_yes(input: &str) -> bool {
    let answer = input.trim();
    answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")
}
