//! End-to-end tests of the bridge with a scripted editor and fake servers.

use esbonio_bridge_core::{LaunchPlan, SettingsFile};
use esbonio_bridge_env::{Activation, SystemDiscovery};
use esbonio_bridge_lsp::event::Event;
use esbonio_bridge_lsp::transport::{read_message, write_message};
use esbonio_bridge_lsp::{
    Bridge, BridgeResult, ServerConnection, ServerLauncher, SessionEnd, SettingsLayers, Timeouts,
};
use esbonio_bridge_test_utils::MockRunner;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{duplex, split, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const SYSTEM: &str = "/usr/bin/python3";

/// One end of an LSP stream, driven by the test.
struct Peer {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl Peer {
    fn new(stream: DuplexStream) -> Self {
        let (reader, writer) = split(stream);
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn send(&mut self, value: Value) {
        write_message(&mut self.writer, &value.to_string())
            .await
            .expect("Failed to write message");
    }

    async fn recv(&mut self) -> Value {
        let content = tokio::time::timeout(Duration::from_secs(5), read_message(&mut self.reader))
            .await
            .expect("Timed out waiting for a message")
            .expect("Failed to read message")
            .expect("Stream closed");
        serde_json::from_str(&content).expect("Invalid JSON")
    }

    /// Receive until a response with `id` arrives, skipping notifications.
    async fn recv_response(&mut self, id: Value) -> Value {
        loop {
            let message = self.recv().await;
            if message.get("method").is_none() && message["id"] == id {
                return message;
            }
            assert!(message.get("id").is_none(), "unexpected message: {message}");
        }
    }

    /// Receive until a response with `id` arrives, keeping the notifications.
    async fn collect_until_response(&mut self, id: Value) -> (Vec<Value>, Value) {
        let mut notifications = Vec::new();
        loop {
            let message = self.recv().await;
            if message.get("method").is_none() && message["id"] == id {
                return (notifications, message);
            }
            assert!(message.get("id").is_none(), "unexpected message: {message}");
            notifications.push(message);
        }
    }

    /// Receive until a message with `method` arrives, skipping notifications.
    async fn recv_method(&mut self, method: &str) -> Value {
        loop {
            let message = self.recv().await;
            if message["method"] == json!(method) {
                return message;
            }
            assert!(message.get("id").is_none(), "unexpected message: {message}");
        }
    }
}

/// Launcher handing the server end of each connection to the test.
struct FakeLauncher {
    launches: mpsc::UnboundedSender<(Peer, LaunchPlan)>,
}

impl ServerLauncher for FakeLauncher {
    fn launch(
        &self,
        plan: &LaunchPlan,
        generation: u64,
        events: mpsc::UnboundedSender<Event>,
    ) -> BridgeResult<ServerConnection> {
        let (bridge_side, server_side) = duplex(1 << 16);
        let (reader, writer) = split(bridge_side);
        let _ = self.launches.send((Peer::new(server_side), plan.clone()));
        Ok(ServerConnection::from_streams(
            BufReader::new(reader),
            writer,
            generation,
            events,
        ))
    }
}

struct Harness {
    editor: Peer,
    launches: mpsc::UnboundedReceiver<(Peer, LaunchPlan)>,
    session: JoinHandle<BridgeResult<SessionEnd>>,
    storage: TempDir,
}

impl Harness {
    fn start(runner: MockRunner) -> Self {
        let storage = TempDir::new().expect("Failed to create temp dir");
        Self::start_in(storage, runner)
    }

    /// Start with a storage directory the runner was scripted against.
    fn start_in(storage: TempDir, runner: MockRunner) -> Self {
        let activation = Activation::new(Arc::new(runner))
            .with_system_discovery(SystemDiscovery::Fixed(Some(PathBuf::from(SYSTEM))));
        let layers = SettingsLayers {
            files: SettingsFile {
                storage_dir: Some(storage.path().display().to_string()),
                ..Default::default()
            },
            overrides: SettingsFile::default(),
        };

        let (launches_tx, launches) = mpsc::unbounded_channel();
        let bridge = Bridge::new(activation, layers)
            .with_launcher(FakeLauncher {
                launches: launches_tx,
            })
            .with_timeouts(Timeouts {
                request: Duration::from_secs(5),
                shutdown: Duration::from_secs(1),
            });

        let (editor_side, bridge_side) = duplex(1 << 16);
        let (reader, writer) = split(bridge_side);
        let session = tokio::spawn(bridge.serve(BufReader::new(reader), writer));

        Self {
            editor: Peer::new(editor_side),
            launches,
            session,
            storage,
        }
    }

    async fn next_server(&mut self) -> (Peer, LaunchPlan) {
        tokio::time::timeout(Duration::from_secs(5), self.launches.recv())
            .await
            .expect("Timed out waiting for a server launch")
            .expect("Launcher dropped")
    }

    /// Run `initialize` against a server reporting `version`.
    async fn initialize(&mut self) -> (Peer, Value) {
        self.editor
            .send(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "initialize",
                "params": {
                    "rootUri": "file:///project",
                    "initializationOptions": {"esbonio": {"sphinx": {"numJobs": 0}}}
                }
            }))
            .await;

        let (mut server, _) = self.next_server().await;
        let request = server.recv().await;
        assert_eq!(request["method"], json!("initialize"));
        assert_eq!(request["id"], json!(1));
        server
            .send(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {"capabilities": {"completionProvider": {}}, "serverInfo": {"name": "esbonio"}}
            }))
            .await;

        let response = self.editor.recv_response(json!(1)).await;
        (server, response)
    }

    async fn open(&mut self, server: Option<&mut Peer>, uri: &str, text: &str) {
        self.editor
            .send(json!({
                "jsonrpc": "2.0",
                "method": "textDocument/didOpen",
                "params": {"textDocument": {"uri": uri, "languageId": "rst", "version": 1, "text": text}}
            }))
            .await;
        if let Some(server) = server {
            let open = server.recv_method("textDocument/didOpen").await;
            assert_eq!(open["params"]["textDocument"]["uri"], json!(uri));
        }
    }

    async fn shutdown(mut self, server: Option<&mut Peer>) -> SessionEnd {
        self.editor
            .send(json!({"jsonrpc": "2.0", "id": 99, "method": "shutdown"}))
            .await;
        if let Some(server) = server {
            let request = server.recv_method("shutdown").await;
            server
                .send(json!({"jsonrpc": "2.0", "id": request["id"], "result": null}))
                .await;
        }
        let response = self.editor.recv_response(json!(99)).await;
        assert_eq!(response["result"], Value::Null);

        self.editor
            .send(json!({"jsonrpc": "2.0", "method": "exit"}))
            .await;
        self.session
            .await
            .expect("Session panicked")
            .expect("Session failed")
    }
}

#[tokio::test]
async fn test_initialize_forwards_payload_and_adds_capabilities() {
    let runner = MockRunner::new().with_server(SYSTEM, "0.16.5");
    let mut harness = Harness::start(runner);

    harness
        .editor
        .send(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {"initializationOptions": {"esbonio": {"sphinx": {"numJobs": 0}}}}
        }))
        .await;

    let (mut server, plan) = harness.next_server().await;
    assert_eq!(plan.command, PathBuf::from(SYSTEM));
    assert_eq!(plan.args, vec!["-m", "esbonio"]);

    let request = server.recv().await;
    let options = &request["params"]["initializationOptions"];
    assert_eq!(options["sphinx"]["numJobs"], json!("auto"));
    assert_eq!(
        options["sphinx"]["buildDir"],
        json!(harness.storage.path().join("sphinx").display().to_string())
    );
    assert!(options.get("esbonio").is_none());

    server
        .send(json!({"jsonrpc": "2.0", "id": 1, "result": {"capabilities": {"hoverProvider": true}}}))
        .await;
    let response = harness.editor.recv_response(json!(1)).await;
    let capabilities = &response["result"]["capabilities"];
    assert_eq!(capabilities["hoverProvider"], json!(true));
    assert_eq!(capabilities["codeActionProvider"], json!(true));
    let commands = capabilities["executeCommandProvider"]["commands"]
        .as_array()
        .unwrap();
    assert!(commands.contains(&json!("esbonio.languageServer.restart")));
    assert!(commands.contains(&json!("esbonio.insert.link")));

    let end = harness.shutdown(Some(&mut server)).await;
    assert_eq!(end, SessionEnd::Exit { clean: true });
    let exit = server.recv_method("exit").await;
    assert_eq!(exit["method"], json!("exit"));
}

#[tokio::test]
async fn test_legacy_server_gets_flags_instead_of_payload() {
    let runner = MockRunner::new().with_server(SYSTEM, "0.5.0");
    let mut harness = Harness::start(runner);

    harness
        .editor
        .send(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {"initializationOptions": {"esbonio": {"server": {"logLevel": "debug"}}}}
        }))
        .await;

    let (mut server, plan) = harness.next_server().await;
    assert!(plan.args.contains(&"--cache-dir".to_string()));
    assert!(plan.args.contains(&"debug".to_string()));
    let request = server.recv().await;
    assert!(request["params"].get("initializationOptions").is_none());
}

#[tokio::test]
async fn test_without_server_bridge_answers_itself() {
    let runner = MockRunner::new().with_bare_interpreter(SYSTEM);
    let mut harness = Harness::start(runner);

    harness
        .editor
        .send(json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}))
        .await;

    // Activation asks before installing; decline.
    let question = harness.editor.recv_method("window/showMessageRequest").await;
    assert_eq!(question["params"]["message"], json!("Install/Upgrade \"esbonio\"?"));
    harness
        .editor
        .send(json!({"jsonrpc": "2.0", "id": question["id"], "result": {"title": "No"}}))
        .await;

    let error = harness.editor.recv_method("window/showMessage").await;
    assert_eq!(error["params"]["type"], json!(1));
    assert_eq!(
        error["params"]["message"],
        json!("Exit, because \"esbonio\" does not exist.")
    );

    let response = harness.editor.recv_response(json!(1)).await;
    assert_eq!(response["result"]["serverInfo"]["name"], json!("esbonio-bridge"));
    assert_eq!(response["result"]["capabilities"]["codeActionProvider"], json!(true));

    harness
        .editor
        .send(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "textDocument/hover",
            "params": {"textDocument": {"uri": "file:///a.rst"}, "position": {"line": 0, "character": 0}}
        }))
        .await;
    let hover = harness.editor.recv_response(json!(2)).await;
    assert_eq!(hover["result"], Value::Null);

    let end = harness.shutdown(None).await;
    assert_eq!(end, SessionEnd::Exit { clean: true });
}

#[tokio::test]
async fn test_insert_inline_link_command() {
    let runner = MockRunner::new().with_bare_interpreter(SYSTEM);
    let mut harness = Harness::start(runner);

    harness
        .editor
        .send(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {"initializationOptions": {"esbonio": {"server": {"enabled": false}}}}
        }))
        .await;
    harness.editor.recv_response(json!(1)).await;
    harness.open(None, "file:///docs/index.rst", "Read the docs.\n").await;

    harness
        .editor
        .send(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "workspace/executeCommand",
            "params": {
                "command": "esbonio.insert.inlineLink",
                "arguments": [{
                    "uri": "file:///docs/index.rst",
                    "url": "https://esbonio.dev",
                    "range": {"start": {"line": 0, "character": 9}, "end": {"line": 0, "character": 13}}
                }]
            }
        }))
        .await;

    let apply = harness.editor.recv_method("workspace/applyEdit").await;
    let edits = &apply["params"]["edit"]["changes"]["file:///docs/index.rst"];
    assert_eq!(edits[0]["newText"], json!("`docs <https://esbonio.dev>`__"));
    harness
        .editor
        .send(json!({"jsonrpc": "2.0", "id": apply["id"], "result": {"applied": true}}))
        .await;

    let response = harness.editor.recv_response(json!(2)).await;
    assert_eq!(response["result"], Value::Null);
    assert!(harness.launches.try_recv().is_err());
}

#[tokio::test]
async fn test_code_actions_are_merged() {
    let runner = MockRunner::new().with_server(SYSTEM, "0.16.5");
    let mut harness = Harness::start(runner);
    let (mut server, _) = harness.initialize().await;
    harness
        .open(Some(&mut server), "file:///docs/index.rst", "Title\n")
        .await;

    harness
        .editor
        .send(json!({
            "jsonrpc": "2.0",
            "id": 5,
            "method": "textDocument/codeAction",
            "params": {
                "textDocument": {"uri": "file:///docs/index.rst"},
                "range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 0}},
                "context": {"diagnostics": []}
            }
        }))
        .await;

    let request = server.recv_method("textDocument/codeAction").await;
    assert_eq!(request["id"], json!(5));
    server
        .send(json!({"jsonrpc": "2.0", "id": 5, "result": [{"title": "From server"}]}))
        .await;

    let response = harness.editor.recv_response(json!(5)).await;
    let titles: Vec<_> = response["result"]
        .as_array()
        .unwrap()
        .iter()
        .map(|action| action["title"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        titles,
        vec![
            "From server",
            "Section builder (level1)",
            "Section builder (level2)",
            "Section builder (level3)",
            "Insert Link (cursor)",
            "Insert Inline Link (cursor)",
        ]
    );
    let underline = &response["result"][1]["edit"]["changes"]["file:///docs/index.rst"][0];
    assert_eq!(underline["newText"], json!("=====\n"));
}

#[tokio::test]
async fn test_directive_completion_patch() {
    let runner = MockRunner::new().with_server(SYSTEM, "0.16.5");
    let mut harness = Harness::start(runner);
    let (mut server, _) = harness.initialize().await;

    harness
        .editor
        .send(json!({
            "jsonrpc": "2.0",
            "id": 4,
            "method": "textDocument/completion",
            "params": {"textDocument": {"uri": "file:///a.rst"}, "position": {"line": 0, "character": 3}}
        }))
        .await;
    server.recv_method("textDocument/completion").await;
    server
        .send(json!({
            "jsonrpc": "2.0",
            "id": 4,
            "result": [{
                "label": "note",
                "detail": "directive",
                "textEdit": {
                    "range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 3}},
                    "newText": ".. note::"
                }
            }]
        }))
        .await;

    let response = harness.editor.recv_response(json!(4)).await;
    assert_eq!(
        response["result"][0]["textEdit"]["range"]["end"]["character"],
        json!(4)
    );
}

#[tokio::test]
async fn test_restart_replays_state() {
    let runner = MockRunner::new().with_server(SYSTEM, "0.16.5");
    let mut harness = Harness::start(runner);
    let (mut old_server, _) = harness.initialize().await;
    harness
        .editor
        .send(json!({"jsonrpc": "2.0", "method": "initialized", "params": {}}))
        .await;
    old_server.recv_method("initialized").await;
    harness
        .open(Some(&mut old_server), "file:///docs/index.rst", "Title\n")
        .await;

    harness
        .editor
        .send(json!({
            "jsonrpc": "2.0",
            "id": 9,
            "method": "workspace/executeCommand",
            "params": {"command": "esbonio.languageServer.restart"}
        }))
        .await;

    let shutdown = old_server.recv_method("shutdown").await;
    assert!(shutdown["id"].as_str().unwrap().starts_with("esbonio-bridge/"));
    old_server
        .send(json!({"jsonrpc": "2.0", "id": shutdown["id"], "result": null}))
        .await;
    old_server.recv_method("exit").await;

    let (mut new_server, _) = harness.next_server().await;
    let initialize = new_server.recv_method("initialize").await;
    assert!(initialize["id"].as_str().unwrap().starts_with("esbonio-bridge/"));
    assert_eq!(initialize["params"]["rootUri"], json!("file:///project"));
    assert_eq!(
        initialize["params"]["initializationOptions"]["sphinx"]["numJobs"],
        json!("auto")
    );
    new_server
        .send(json!({"jsonrpc": "2.0", "id": initialize["id"], "result": {"capabilities": {}}}))
        .await;

    new_server.recv_method("initialized").await;
    let reopened = new_server.recv_method("textDocument/didOpen").await;
    assert_eq!(reopened["params"]["textDocument"]["text"], json!("Title\n"));

    let response = harness.editor.recv_response(json!(9)).await;
    assert_eq!(response["result"], Value::Null);
}

#[tokio::test]
async fn test_server_exit_answers_pending_requests() {
    let runner = MockRunner::new().with_server(SYSTEM, "0.16.5");
    let mut harness = Harness::start(runner);
    let (mut server, _) = harness.initialize().await;

    harness
        .editor
        .send(json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "textDocument/hover",
            "params": {"textDocument": {"uri": "file:///a.rst"}, "position": {"line": 0, "character": 0}}
        }))
        .await;
    server.recv_method("textDocument/hover").await;
    drop(server);

    let response = harness.editor.recv_response(json!(3)).await;
    assert_eq!(response["result"], Value::Null);
    let error = harness.editor.recv_method("window/showMessage").await;
    assert!(error["params"]["message"]
        .as_str()
        .unwrap()
        .contains("esbonio.languageServer.restart"));
}

#[tokio::test]
async fn test_server_notifications_pass_through() {
    let runner = MockRunner::new().with_server(SYSTEM, "0.16.5");
    let mut harness = Harness::start(runner);
    let (mut server, _) = harness.initialize().await;

    server
        .send(json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": {"uri": "file:///a.rst", "diagnostics": []}
        }))
        .await;
    let notification = harness
        .editor
        .recv_method("textDocument/publishDiagnostics")
        .await;
    assert_eq!(notification["params"]["uri"], json!("file:///a.rst"));

    server
        .send(json!({"jsonrpc": "2.0", "id": "s-1", "method": "workspace/configuration", "params": {"items": []}}))
        .await;
    let request = harness.editor.recv_method("workspace/configuration").await;
    assert_eq!(request["id"], json!("s-1"));
    harness
        .editor
        .send(json!({"jsonrpc": "2.0", "id": "s-1", "result": [null]}))
        .await;
    let answer = server.recv().await;
    assert_eq!(answer["id"], json!("s-1"));
    assert_eq!(answer["result"], json!([null]));
}

/// Run the install command against an initialized session with one open
/// document, and return the replacement server once it has been restored.
async fn run_install(harness: &mut Harness, old_server: &mut Peer) -> (Peer, Vec<Value>) {
    harness
        .editor
        .send(json!({"jsonrpc": "2.0", "method": "initialized", "params": {}}))
        .await;
    old_server.recv_method("initialized").await;
    harness
        .open(Some(old_server), "file:///docs/index.rst", "Title\n")
        .await;

    harness
        .editor
        .send(json!({
            "jsonrpc": "2.0",
            "id": 9,
            "method": "workspace/executeCommand",
            "params": {"command": "esbonio.languageServer.install"}
        }))
        .await;

    let question = harness.editor.recv_method("window/showMessageRequest").await;
    assert_eq!(question["params"]["message"], json!("Install/Upgrade \"esbonio\"?"));
    harness
        .editor
        .send(json!({"jsonrpc": "2.0", "id": question["id"], "result": {"title": "Yes"}}))
        .await;

    let shutdown = old_server.recv_method("shutdown").await;
    assert!(shutdown["id"].as_str().unwrap().starts_with("esbonio-bridge/"));
    old_server
        .send(json!({"jsonrpc": "2.0", "id": shutdown["id"], "result": null}))
        .await;
    old_server.recv_method("exit").await;

    let (mut new_server, _) = harness.next_server().await;
    let initialize = new_server.recv_method("initialize").await;
    assert!(initialize["id"].as_str().unwrap().starts_with("esbonio-bridge/"));
    assert_eq!(initialize["params"]["rootUri"], json!("file:///project"));
    new_server
        .send(json!({"jsonrpc": "2.0", "id": initialize["id"], "result": {"capabilities": {}}}))
        .await;
    new_server.recv_method("initialized").await;
    let reopened = new_server.recv_method("textDocument/didOpen").await;
    assert_eq!(reopened["params"]["textDocument"]["text"], json!("Title\n"));

    let (notifications, response) = harness.editor.collect_until_response(json!(9)).await;
    assert_eq!(response["result"], Value::Null);
    (new_server, notifications)
}

fn shown_messages(notifications: &[Value]) -> Vec<(i64, String)> {
    notifications
        .iter()
        .filter(|message| message["method"] == json!("window/showMessage"))
        .map(|message| {
            (
                message["params"]["type"].as_i64().unwrap(),
                message["params"]["message"].as_str().unwrap().to_string(),
            )
        })
        .collect()
}

#[tokio::test]
async fn test_install_command_reinstalls_and_restores_server() {
    let storage = TempDir::new().expect("Failed to create temp dir");
    let runner = MockRunner::new()
        .with_server(SYSTEM, "0.16.5")
        .with_working_install(SYSTEM, storage.path(), "0.16.5");
    let mut harness = Harness::start_in(storage, runner.clone());
    let (mut old_server, _) = harness.initialize().await;

    let (_new_server, notifications) = run_install(&mut harness, &mut old_server).await;

    let shown = shown_messages(&notifications);
    assert!(shown.contains(&(3, "esbonio[lsp]: installed!".to_string())), "{shown:?}");
    assert!(runner.was_run(&format!("{SYSTEM} -m venv")));
    assert!(runner.was_run("-m pip install -U pip esbonio[lsp]==0.16.5"));
}

#[tokio::test]
async fn test_failed_install_still_restarts_server() {
    let runner = MockRunner::new().with_server(SYSTEM, "0.16.5");
    let mut harness = Harness::start(runner.clone());
    let (mut old_server, _) = harness.initialize().await;

    let (_new_server, notifications) = run_install(&mut harness, &mut old_server).await;

    let shown = shown_messages(&notifications);
    assert!(
        shown
            .iter()
            .any(|(kind, message)| *kind == 1 && message.starts_with("esbonio[lsp]: install failed.")),
        "{shown:?}"
    );
    assert!(runner.was_run(&format!("{SYSTEM} -m venv")));
    assert!(!runner.was_run("-m pip install"));
}
