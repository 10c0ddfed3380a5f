//! Mock implementations for testing.

use async_trait::async_trait;
use esbonio_bridge_core::{managed_venv_dir, Notifier};
use esbonio_bridge_env::{Platform, ProcessOutput, ProcessRunner, RunError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Canonical string form of an invocation, used as the response key.
pub fn command_line(program: &Path, args: &[String]) -> String {
    let mut line = program.display().to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// What a scripted command does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOutcome {
    Exit {
        code: i32,
        stdout: String,
        stderr: String,
    },
    /// The program does not exist.
    SpawnError,
    Timeout,
}

impl MockOutcome {
    pub fn success(stdout: impl Into<String>) -> Self {
        MockOutcome::Exit {
            code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        MockOutcome::Exit {
            code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// A recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl Invocation {
    pub fn command_line(&self) -> String {
        command_line(&self.program, &self.args)
    }
}

type Hook = Arc<dyn Fn(&Path, &[String]) + Send + Sync>;

/// A scripted [`ProcessRunner`].
///
/// Responses are matched on the full command line first, then on the
/// longest configured prefix. Unmatched commands fail to spawn, as a
/// missing interpreter would.
#[derive(Clone)]
pub struct MockRunner {
    invocations: Arc<Mutex<Vec<Invocation>>>,
    responses: Arc<Mutex<HashMap<String, MockOutcome>>>,
    hooks: Arc<Mutex<Vec<(String, Hook)>>>,
    delay: Option<Duration>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self {
            invocations: Arc::new(Mutex::new(Vec::new())),
            responses: Arc::new(Mutex::new(HashMap::new())),
            hooks: Arc::new(Mutex::new(Vec::new())),
            delay: None,
        }
    }

    /// Configure the outcome for a command line or command-line prefix.
    pub fn with_response(self, command: impl Into<String>, outcome: MockOutcome) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(command.into(), outcome);
        self
    }

    /// Run `hook` before answering commands starting with `prefix`.
    pub fn with_hook(
        self,
        prefix: impl Into<String>,
        hook: impl Fn(&Path, &[String]) + Send + Sync + 'static,
    ) -> Self {
        self.hooks
            .lock()
            .unwrap()
            .push((prefix.into(), Arc::new(hook)));
        self
    }

    /// Make every command take `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make `interpreter` report the server at `version`.
    pub fn with_server(self, interpreter: impl AsRef<Path>, version: &str) -> Self {
        let interpreter = interpreter.as_ref().display().to_string();
        self.with_response(format!("{interpreter} -m esbonio -h"), MockOutcome::success("usage: esbonio"))
            .with_response(
                format!("{interpreter} -m esbonio --version"),
                MockOutcome::success(format!("{version}\n")),
            )
    }

    /// Make `interpreter` exist without the server module.
    pub fn with_bare_interpreter(self, interpreter: impl AsRef<Path>) -> Self {
        let interpreter = interpreter.as_ref().display().to_string();
        self.with_response(
            format!("{interpreter} -m esbonio"),
            MockOutcome::failure(1, "No module named esbonio"),
        )
    }

    /// Simulate a working install from `base` into the managed environment.
    ///
    /// Creating the venv writes its interpreter file; afterwards the venv
    /// interpreter reports the server at `version`.
    pub fn with_working_install(
        self,
        base: impl AsRef<Path>,
        storage_root: &Path,
        version: &str,
    ) -> Self {
        let venv = managed_venv_dir(storage_root);
        let venv_python = Platform::current().venv_interpreter(&venv);
        let create = format!("{} -m venv", base.as_ref().display());
        let hook_python = venv_python.clone();

        self.with_response(create.clone(), MockOutcome::success(""))
            .with_hook(create, move |_, _| {
                crate::fixtures::touch(&hook_python);
            })
            .with_response(
                format!("{} -m pip install", venv_python.display()),
                MockOutcome::success("Successfully installed esbonio"),
            )
            .with_server(&venv_python, version)
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    /// All recorded command lines, in order.
    pub fn command_lines(&self) -> Vec<String> {
        self.invocations()
            .iter()
            .map(Invocation::command_line)
            .collect()
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }

    /// Whether any command line contains `fragment`.
    pub fn was_run(&self, fragment: &str) -> bool {
        self.command_lines().iter().any(|line| line.contains(fragment))
    }

    fn outcome_for(&self, line: &str) -> MockOutcome {
        let responses = self.responses.lock().unwrap();
        if let Some(outcome) = responses.get(line) {
            return outcome.clone();
        }
        responses
            .iter()
            .filter(|(prefix, _)| line.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, outcome)| outcome.clone())
            .unwrap_or(MockOutcome::SpawnError)
    }
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessRunner for MockRunner {
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        timeout: Duration,
    ) -> Result<ProcessOutput, RunError> {
        self.invocations.lock().unwrap().push(Invocation {
            program: program.to_path_buf(),
            args: args.to_vec(),
            timeout,
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let line = command_line(program, args);
        let hooks: Vec<Hook> = self
            .hooks
            .lock()
            .unwrap()
            .iter()
            .filter(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, hook)| hook.clone())
            .collect();
        for hook in hooks {
            hook(program, args);
        }

        match self.outcome_for(&line) {
            MockOutcome::Exit {
                code,
                stdout,
                stderr,
            } => Ok(ProcessOutput {
                exit_code: Some(code),
                stdout,
                stderr,
            }),
            MockOutcome::SpawnError => Err(RunError::Spawn {
                program: program.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "mock: not found"),
            }),
            MockOutcome::Timeout => Err(RunError::Timeout {
                program: program.to_path_buf(),
                timeout,
            }),
        }
    }
}

/// A notification received by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Progress(String),
    Info(String),
    Error(String),
    Confirm(String),
}

/// A [`Notifier`] that records everything and answers questions with a
/// fixed answer.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    answer: bool,
    received: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    /// A notifier that accepts every question.
    pub fn accepting() -> Self {
        Self {
            answer: true,
            ..Default::default()
        }
    }

    /// A notifier that declines every question.
    pub fn declining() -> Self {
        Self::default()
    }

    pub fn received(&self) -> Vec<Notification> {
        self.received.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.received()
            .into_iter()
            .filter_map(|n| match n {
                Notification::Error(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn questions(&self) -> Vec<String> {
        self.received()
            .into_iter()
            .filter_map(|n| match n {
                Notification::Confirm(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    fn push(&self, notification: Notification) {
        self.received.lock().unwrap().push(notification);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn progress(&self, message: &str) {
        self.push(Notification::Progress(message.to_string()));
    }

    async fn info(&self, message: &str) {
        self.push(Notification::Info(message.to_string()));
    }

    async fn error(&self, message: &str) {
        self.push(Notification::Error(message.to_string()));
    }

    async fn confirm(&self, message: &str) -> bool {
        self.push(Notification::Confirm(message.to_string()));
        self.answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(args: &[&str]) -> Vec<String> {
        args.iter().map(|a| a.to_string()).collect()
    }

    #[tokio::test]
    async fn test_prefix_and_exact_matching() {
        let runner = MockRunner::new()
            .with_response("/py -m esbonio", MockOutcome::failure(1, "nope"))
            .with_response("/py -m esbonio --version", MockOutcome::success("0.16.5\n"));

        let version = runner
            .run(
                Path::new("/py"),
                &args(&["-m", "esbonio", "--version"]),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(version.stdout, "0.16.5\n");

        let help = runner
            .run(
                Path::new("/py"),
                &args(&["-m", "esbonio", "-h"]),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(help.exit_code, Some(1));

        let missing = runner
            .run(Path::new("/other"), &[], Duration::from_secs(1))
            .await;
        assert!(matches!(missing, Err(RunError::Spawn { .. })));
        assert_eq!(runner.invocation_count(), 3);
    }

    #[tokio::test]
    async fn test_recording_notifier() {
        let notifier = RecordingNotifier::accepting();
        assert!(notifier.confirm("Install?").await);
        notifier.error("boom").await;
        assert_eq!(notifier.questions(), vec!["Install?"]);
        assert_eq!(notifier.errors(), vec!["boom"]);
        assert!(!RecordingNotifier::declining().confirm("Install?").await);
    }
}
