//! The bridge session: one editor, at most one server at a time.
//!
//! A single dispatch loop owns all session state. The editor and server
//! reader tasks feed it [`Event`]s; it forwards traffic between the two,
//! answers the requests the bridge handles itself, and drives the server
//! lifecycle (activation, restart, reinstall).

use crate::actions::{code_actions, inline_link_edit, link_edit, LinkArguments, INSERT_INLINE_LINK, INSERT_LINK};
use crate::completion::patch_directive_completions;
use crate::documents::{DocumentSelector, DocumentStore};
use crate::editor::EditorConnection;
use crate::error::BridgeResult;
use crate::event::Event;
use crate::message::{codes, Message, Notification, Request, RequestId, Response, ResponseError};
use crate::notify::LspNotifier;
use crate::server::{ProcessLauncher, ServerConnection, ServerLauncher};
use esbonio_bridge_core::config::DEFAULT_SECTION_CHARACTERS;
use esbonio_bridge_core::{ConfigResult, LaunchPlan, Notifier, Settings, SettingsFile};
use esbonio_bridge_env::activation::INSTALL_PROMPT;
use esbonio_bridge_env::{Activation, InstallError};
use lsp_types::Range;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Reinstall the server into the managed environment.
pub const INSTALL_COMMAND: &str = "esbonio.languageServer.install";

/// Restart the server with freshly resolved settings.
pub const RESTART_COMMAND: &str = "esbonio.languageServer.restart";

/// Commands executed by the bridge rather than the server.
pub const BRIDGE_COMMANDS: &[&str] = &[INSERT_LINK, INSERT_INLINE_LINK, INSTALL_COMMAND, RESTART_COMMAND];

/// Settings layers known before the editor connects.
#[derive(Debug, Clone, Default)]
pub struct SettingsLayers {
    /// Global, environment and project files, already merged.
    pub files: SettingsFile,
    /// Command-line flags, applied last.
    pub overrides: SettingsFile,
}

impl SettingsLayers {
    /// Resolve with the editor's layer between files and flags.
    pub fn resolve(&self, editor: Option<SettingsFile>) -> ConfigResult<Settings> {
        let mut merged = self.files.clone();
        if let Some(editor) = editor {
            merged = merged.merge(editor);
        }
        Settings::resolve(merged.merge(self.overrides.clone()))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Requests the bridge sends to the server itself.
    pub request: Duration,
    /// Shutdown acknowledgement, and again for the process to exit.
    pub shutdown: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(60),
            shutdown: Duration::from_secs(5),
        }
    }
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The editor sent `exit`; clean when `shutdown` came first.
    Exit { clean: bool },
    /// The editor went away without `exit`.
    EditorClosed,
}

impl SessionEnd {
    pub fn exit_code(self) -> i32 {
        match self {
            SessionEnd::Exit { clean: true } => 0,
            _ => 1,
        }
    }
}

/// Relay between an editor and the esbonio language server.
pub struct Bridge {
    activation: Activation,
    launcher: Box<dyn ServerLauncher>,
    layers: SettingsLayers,
    timeouts: Timeouts,
}

impl Bridge {
    pub fn new(activation: Activation, layers: SettingsLayers) -> Self {
        Self {
            activation,
            launcher: Box::new(ProcessLauncher::new()),
            layers,
            timeouts: Timeouts::default(),
        }
    }

    pub fn with_launcher(mut self, launcher: impl ServerLauncher + 'static) -> Self {
        self.launcher = Box::new(launcher);
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Serve one editor over the given streams until it exits.
    pub async fn serve<R, W>(self, reader: R, writer: W) -> BridgeResult<SessionEnd>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let editor = EditorConnection::start(reader, writer, events_tx.clone());

        let session = Session {
            notifier: LspNotifier::new(editor.clone()),
            editor,
            bridge: self,
            events_tx,
            settings: None,
            initialize_params: None,
            editor_initialized: false,
            shutdown_requested: false,
            server: None,
            generation: 0,
            documents: DocumentStore::default(),
            forwarded: HashMap::new(),
        };
        session.run(events_rx).await
    }
}

/// What to do with the server's response to a forwarded editor request.
#[derive(Debug)]
enum Forwarded {
    Plain,
    Initialize,
    /// Local actions to merge into the server's.
    CodeAction(Vec<Value>),
    Completion,
}

struct Session {
    bridge: Bridge,
    editor: EditorConnection,
    notifier: LspNotifier,
    events_tx: mpsc::UnboundedSender<Event>,
    settings: Option<Settings>,
    /// The editor's `initialize` parameters, replayed on restart.
    initialize_params: Option<Value>,
    editor_initialized: bool,
    shutdown_requested: bool,
    server: Option<ServerConnection>,
    generation: u64,
    documents: DocumentStore,
    forwarded: HashMap<RequestId, Forwarded>,
}

impl Session {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<Event>) -> BridgeResult<SessionEnd> {
        let end = loop {
            let Some(event) = events.recv().await else {
                break SessionEnd::EditorClosed;
            };

            match event {
                Event::Editor(message) => {
                    if let Some(end) = self.on_editor(message).await? {
                        break end;
                    }
                }
                Event::EditorClosed => break SessionEnd::EditorClosed,
                Event::Server { generation, message } => {
                    if self.is_current(generation) {
                        self.on_server(message).await?;
                    } else {
                        debug!(generation, "Dropping message from stopped server");
                    }
                }
                Event::ServerExited { generation } => {
                    if self.is_current(generation) {
                        self.on_server_exited().await?;
                    }
                }
            }
        };

        info!(?end, "Session finished");
        self.stop_server().await?;
        Ok(end)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.server
            .as_ref()
            .is_some_and(|server| server.generation() == generation)
    }

    async fn on_editor(&mut self, message: Message) -> BridgeResult<Option<SessionEnd>> {
        match message {
            Message::Request(request) => {
                self.on_editor_request(request).await?;
                Ok(None)
            }
            Message::Notification(notification) => self.on_editor_notification(notification).await,
            Message::Response(response) => {
                // Answer to a request the server sent.
                self.send_to_server(&Message::Response(response)).await;
                Ok(None)
            }
        }
    }

    async fn on_editor_request(&mut self, request: Request) -> BridgeResult<()> {
        let Request { id, method, params } = request;
        debug!(%id, %method, "Editor request");

        match method.as_str() {
            "initialize" => self.on_initialize(id, params.unwrap_or(Value::Null)).await,
            "shutdown" => {
                self.shutdown_requested = true;
                self.forward(id, method, params, Forwarded::Plain).await
            }
            "workspace/executeCommand" => {
                let command = params
                    .as_ref()
                    .and_then(|p| p.get("command"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if BRIDGE_COMMANDS.contains(&command.as_str()) {
                    let arguments = params
                        .as_ref()
                        .and_then(|p| p.get("arguments"))
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default();
                    self.execute_command(&command, &arguments).await;
                    self.editor.respond(id, Value::Null).await
                } else {
                    self.forward(id, method, params, Forwarded::Plain).await
                }
            }
            "textDocument/codeAction" => {
                let local = self.local_code_actions(params.as_ref());
                self.forward(id, method, params, Forwarded::CodeAction(local)).await
            }
            "textDocument/completion" if self.fix_directive_completion() => {
                self.forward(id, method, params, Forwarded::Completion).await
            }
            _ => self.forward(id, method, params, Forwarded::Plain).await,
        }
    }

    async fn on_editor_notification(
        &mut self,
        notification: Notification,
    ) -> BridgeResult<Option<SessionEnd>> {
        let params = notification.params.clone().unwrap_or(Value::Null);
        let forward = match notification.method.as_str() {
            "initialized" => {
                self.editor_initialized = true;
                true
            }
            "exit" => {
                if let Some(server) = self.server.take() {
                    self.answer_forwarded().await?;
                    server.exit(self.bridge.timeouts.shutdown).await;
                }
                return Ok(Some(SessionEnd::Exit {
                    clean: self.shutdown_requested,
                }));
            }
            "textDocument/didOpen" => self.documents.open(&params),
            "textDocument/didChange" => self.documents.change(&params),
            "textDocument/didClose" => self.documents.close(&params),
            "textDocument/didSave" | "textDocument/willSave" => DocumentStore::uri_of(&params)
                .is_some_and(|uri| self.documents.is_tracked(&uri)),
            _ => true,
        };

        if forward {
            self.send_to_server(&Message::Notification(notification)).await;
        }
        Ok(None)
    }

    async fn on_server(&mut self, message: Message) -> BridgeResult<()> {
        match message {
            Message::Response(response) => {
                let kind = response
                    .id
                    .as_ref()
                    .and_then(|id| self.forwarded.remove(id))
                    .unwrap_or(Forwarded::Plain);
                let response = post_process(kind, response);
                self.editor.send(&Message::Response(response)).await
            }
            other => self.editor.send(&other).await,
        }
    }

    async fn on_server_exited(&mut self) -> BridgeResult<()> {
        warn!(generation = self.generation, "Language server exited");
        self.server = None;
        self.answer_forwarded().await?;
        if !self.shutdown_requested {
            self.notifier
                .error(&format!(
                    "The esbonio language server exited. Run \"{RESTART_COMMAND}\" to start it again."
                ))
                .await;
        }
        Ok(())
    }

    async fn on_initialize(&mut self, id: RequestId, params: Value) -> BridgeResult<()> {
        if self.initialize_params.is_some() {
            return self
                .editor
                .respond_error(id, ResponseError::new(codes::INVALID_REQUEST, "initialize was already received"))
                .await;
        }
        self.initialize_params = Some(params.clone());

        let editor_layer = params
            .get("initializationOptions")
            .and_then(|options| match SettingsFile::from_initialization_options(options) {
                Ok(layer) => Some(layer),
                Err(e) => {
                    warn!(error = %e, "Ignoring invalid initializationOptions");
                    None
                }
            });

        let settings = match self.bridge.layers.resolve(editor_layer) {
            Ok(settings) => settings,
            Err(e) => {
                self.notifier.error(&format!("Invalid esbonio settings: {e}")).await;
                return self.editor.respond(id, local_initialize_result()).await;
            }
        };
        self.documents
            .set_selector(DocumentSelector::new(settings.server.enabled_in_py_files));
        self.settings = Some(settings.clone());

        if !settings.enable || !settings.server.enabled {
            info!("Language server disabled by settings");
            return self.editor.respond(id, local_initialize_result()).await;
        }

        match self.start_server(&settings).await {
            Some(plan) => {
                let params = with_initialization_options(params, &plan);
                self.forward(id, "initialize".to_string(), Some(params), Forwarded::Initialize)
                    .await
            }
            None => self.editor.respond(id, local_initialize_result()).await,
        }
    }

    /// Forward to the server, or answer locally when none is running.
    async fn forward(
        &mut self,
        id: RequestId,
        method: String,
        params: Option<Value>,
        kind: Forwarded,
    ) -> BridgeResult<()> {
        if self.server.is_some() {
            let message = Message::request(id.clone(), method, params);
            if self.send_to_server(&message).await {
                self.forwarded.insert(id, kind);
                return Ok(());
            }
        }
        self.answer_locally(id, kind).await
    }

    async fn answer_locally(&self, id: RequestId, kind: Forwarded) -> BridgeResult<()> {
        let result = match kind {
            Forwarded::Initialize => local_initialize_result(),
            Forwarded::CodeAction(actions) => Value::Array(actions),
            Forwarded::Plain | Forwarded::Completion => Value::Null,
        };
        self.editor.respond(id, result).await
    }

    /// Answer every request still waiting on a server that is gone.
    async fn answer_forwarded(&mut self) -> BridgeResult<()> {
        let forwarded: Vec<_> = self.forwarded.drain().collect();
        for (id, kind) in forwarded {
            self.answer_locally(id, kind).await?;
        }
        Ok(())
    }

    async fn send_to_server(&mut self, message: &Message) -> bool {
        let Some(server) = self.server.as_mut() else {
            return false;
        };
        match server.send(message).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to write to server");
                false
            }
        }
    }

    /// Activate and launch a server; errors are reported to the user.
    async fn start_server(&mut self, settings: &Settings) -> Option<LaunchPlan> {
        let activated = match self.bridge.activation.activate(settings, &self.notifier).await {
            Ok(activated) => activated,
            Err(e) => {
                warn!(error = %e, "Activation failed");
                return None;
            }
        };

        self.generation += 1;
        match self
            .bridge
            .launcher
            .launch(&activated.plan, self.generation, self.events_tx.clone())
        {
            Ok(server) => {
                self.server = Some(server);
                Some(activated.plan)
            }
            Err(e) => {
                self.notifier
                    .error(&format!("Failed to start the esbonio language server: {e}"))
                    .await;
                None
            }
        }
    }

    async fn stop_server(&mut self) -> BridgeResult<()> {
        if let Some(server) = self.server.take() {
            self.answer_forwarded().await?;
            server.stop(self.bridge.timeouts.shutdown).await;
        }
        Ok(())
    }

    /// Bring a freshly started server to the state the editor expects.
    async fn replay_initialize(&mut self, plan: &LaunchPlan) -> BridgeResult<()> {
        let Some(params) = self.initialize_params.clone() else {
            return Ok(());
        };
        let params = with_initialization_options(params, plan);
        let Some(server) = self.server.as_mut() else {
            return Ok(());
        };

        if let Err(e) = server
            .request("initialize", Some(params), self.bridge.timeouts.request)
            .await
        {
            self.notifier
                .error(&format!("Failed to initialize the esbonio language server: {e}"))
                .await;
            return self.stop_server().await;
        }

        if self.editor_initialized {
            if let Err(e) = server.notify("initialized", Some(json!({}))).await {
                warn!(error = %e, "Failed to send initialized");
            }
        }
        for document in self.documents.documents() {
            if let Err(e) = server
                .notify("textDocument/didOpen", Some(document.did_open_params()))
                .await
            {
                warn!(uri = %document.uri, error = %e, "Failed to reopen document");
            }
        }
        info!(documents = self.documents.len(), "Server restored");
        Ok(())
    }

    async fn execute_command(&mut self, command: &str, arguments: &[Value]) {
        info!(command, "Executing bridge command");
        let result = match command {
            INSERT_LINK | INSERT_INLINE_LINK => self.insert_link(command, arguments.first()).await,
            RESTART_COMMAND => self.restart().await,
            INSTALL_COMMAND => self.install().await,
            _ => Ok(()),
        };
        if let Err(e) = result {
            warn!(command, error = %e, "Command failed");
        }
    }

    async fn insert_link(&mut self, command: &str, argument: Option<&Value>) -> BridgeResult<()> {
        let Some(args) = argument.and_then(|a| serde_json::from_value::<LinkArguments>(a.clone()).ok())
        else {
            warn!(command, "Missing or malformed link arguments");
            return Ok(());
        };
        let Some(document) = self.documents.get(&args.uri) else {
            warn!(uri = %args.uri, "Link requested for a document that is not open");
            return Ok(());
        };

        let edit = if command == INSERT_LINK {
            link_edit(document, &args)
        } else {
            inline_link_edit(document, &args)
        };
        let Some(edit) = edit else {
            debug!(command, "No url or label, nothing to insert");
            return Ok(());
        };

        let applied = self
            .editor
            .request("workspace/applyEdit", json!({ "label": "Insert link", "edit": edit }))
            .await?;
        if applied.get("applied").and_then(Value::as_bool) == Some(false) {
            warn!(reason = ?applied.get("failureReason"), "Editor rejected link edit");
        }
        Ok(())
    }

    async fn restart(&mut self) -> BridgeResult<()> {
        if self.initialize_params.is_none() {
            warn!("Restart requested before initialize");
            return Ok(());
        }
        let Some(settings) = self.settings.clone() else {
            self.notifier
                .error("Cannot restart: the esbonio settings are invalid.")
                .await;
            return Ok(());
        };
        if !settings.enable || !settings.server.enabled {
            self.notifier
                .info("The esbonio language server is disabled by settings.")
                .await;
            return Ok(());
        }

        self.stop_server().await?;
        self.notifier.progress("Restarting the esbonio language server...").await;
        if let Some(plan) = self.start_server(&settings).await {
            self.replay_initialize(&plan).await?;
        }
        Ok(())
    }

    async fn install(&mut self) -> BridgeResult<()> {
        let settings = match &self.settings {
            Some(settings) => settings.clone(),
            None => match self.bridge.layers.resolve(None) {
                Ok(settings) => settings,
                Err(e) => {
                    self.notifier.error(&format!("Invalid esbonio settings: {e}")).await;
                    return Ok(());
                }
            },
        };

        if !self.notifier.confirm(INSTALL_PROMPT).await {
            info!("Install declined");
            return Ok(());
        }

        self.stop_server().await?;
        match self
            .bridge
            .activation
            .install_confirmed(&settings, &self.notifier)
            .await
        {
            Ok(job) => info!(venv = %job.venv_dir.display(), "Install finished"),
            Err(InstallError::AlreadyRunning) => {
                self.notifier.error(&InstallError::AlreadyRunning.to_string()).await;
            }
            // Other failures are reported by the installer. The server is
            // relaunched below with whatever environment still resolves.
            Err(e) => warn!(error = %e, "Install failed"),
        }

        if settings.enable && settings.server.enabled && self.initialize_params.is_some() {
            if let Some(plan) = self.start_server(&settings).await {
                self.replay_initialize(&plan).await?;
            }
        }
        Ok(())
    }

    fn fix_directive_completion(&self) -> bool {
        self.settings
            .as_ref()
            .map_or(true, |settings| settings.client.fix_directive_completion)
    }

    fn local_code_actions(&self, params: Option<&Value>) -> Vec<Value> {
        let Some(params) = params else {
            return Vec::new();
        };
        let Some(document) = DocumentStore::uri_of(params).and_then(|uri| self.documents.get(&uri))
        else {
            return Vec::new();
        };
        let Some(range) = params
            .get("range")
            .and_then(|range| serde_json::from_value::<Range>(range.clone()).ok())
        else {
            return Vec::new();
        };

        match &self.settings {
            Some(settings) => code_actions(document, &range, &settings.client.section_characters),
            None => code_actions(document, &range, &DEFAULT_SECTION_CHARACTERS.map(String::from)),
        }
    }
}

/// Apply the bridge's adjustments to a server response.
fn post_process(kind: Forwarded, mut response: Response) -> Response {
    match kind {
        Forwarded::Plain => {}
        Forwarded::Initialize => {
            if let Ok(result) = &mut response.result {
                augment_initialize_result(result);
            }
        }
        Forwarded::CodeAction(local) => {
            let mut actions = match response.result {
                Ok(Value::Array(actions)) => actions,
                Ok(_) => Vec::new(),
                Err(e) => {
                    debug!(error = %e.message, "Server code actions failed");
                    Vec::new()
                }
            };
            actions.extend(local);
            response.result = Ok(Value::Array(actions));
        }
        Forwarded::Completion => {
            if let Ok(result) = &mut response.result {
                let patched = patch_directive_completions(result);
                if patched > 0 {
                    debug!(patched, "Patched directive completions");
                }
            }
        }
    }
    response
}

/// `initialize` parameters with the plan's payload, or none for legacy
/// servers.
fn with_initialization_options(mut params: Value, plan: &LaunchPlan) -> Value {
    if let Some(object) = params.as_object_mut() {
        match plan.initialization_options_value() {
            Some(options) => {
                object.insert("initializationOptions".to_string(), options);
            }
            None => {
                object.remove("initializationOptions");
            }
        }
    }
    params
}

fn bridge_capabilities() -> Value {
    json!({
        "codeActionProvider": true,
        "executeCommandProvider": { "commands": BRIDGE_COMMANDS },
    })
}

/// What the bridge answers `initialize` with when no server is running.
fn local_initialize_result() -> Value {
    let mut capabilities = bridge_capabilities();
    capabilities["textDocumentSync"] = json!({ "openClose": true, "change": 2 });
    json!({
        "capabilities": capabilities,
        "serverInfo": { "name": "esbonio-bridge", "version": env!("CARGO_PKG_VERSION") },
    })
}

/// Add the bridge's capabilities to the server's `initialize` result.
fn augment_initialize_result(result: &mut Value) {
    let Some(capabilities) = result
        .as_object_mut()
        .map(|r| r.entry("capabilities").or_insert_with(|| json!({})))
        .and_then(Value::as_object_mut)
    else {
        *result = local_initialize_result();
        return;
    };

    if !capabilities
        .get("codeActionProvider")
        .is_some_and(Value::is_object)
    {
        capabilities.insert("codeActionProvider".to_string(), json!(true));
    }

    let provider = capabilities
        .entry("executeCommandProvider")
        .or_insert_with(|| json!({}));
    if !provider.is_object() {
        *provider = json!({});
    }
    let commands = &mut provider["commands"];
    if !commands.is_array() {
        *commands = json!([]);
    }
    if let Some(commands) = commands.as_array_mut() {
        for command in BRIDGE_COMMANDS {
            if !commands.iter().any(|c| c.as_str() == Some(*command)) {
                commands.push(json!(command));
            }
        }
    }
}
