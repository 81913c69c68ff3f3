//! Dual-mode execution director.
//!
//! Decides per REPL session whether code runs on the backend (through the
//! command channel) or in the local runtime, and falls back to the local
//! runtime when the backend goes away.

use std::{fmt, sync::Arc};

use classroom_ide_channel::{CorrelationId, InboundMessage};
use classroom_ide_core::{Console, Identity, LocalRuntime};
use serde_json::json;
use uuid::Uuid;

use crate::{
    Backend, DEFAULT_PROJECT, DirectorConfig, ReplMode,
    normalize::{BackendEvent, is_prompt_only, split_trailing_prompt},
    session::{PRIMARY_PROMPT, Session},
};

const START_FAILED_NOTICE: &str = "Backend unavailable; switched to browser mode";
const SESSION_ENDED_NOTICE: &str = "Backend session ended; switched to browser mode";
const CONNECTION_LOST_NOTICE: &str = "Backend connection lost; switched to browser mode";
const NO_ENVIRONMENT: &str = "No Python environment available";

/// Director error.
#[derive(Debug, thiserror::Error)]
pub enum DirectorError {
    #[error("REPL session already active ({0})")]
    AlreadyActive(DirectorState),
    #[error("No active REPL session")]
    NotActive,
}

/// Lifecycle of the current REPL session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectorState {
    Idle,
    Starting,
    BackendActive,
    BrowserActive,
    Ended,
}

impl DirectorState {
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::BackendActive | Self::BrowserActive)
    }
}

impl fmt::Display for DirectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::BackendActive => "backend",
            Self::BrowserActive => "browser",
            Self::Ended => "ended",
        };
        f.write_str(name)
    }
}

/// Routes REPL input to the backend or the local runtime.
///
/// Driven by one owner; pushes, submissions and connectivity changes are
/// applied in the order they are handed in.
pub struct ExecutionDirector<B, R>
where
    B: Backend + ?Sized,
    R: LocalRuntime + ?Sized,
{
    backend: Arc<B>,
    runtime: Arc<R>,
    console: Arc<Console>,
    config: DirectorConfig,
    identity: Option<Identity>,
    state: DirectorState,
    session: Session,
}

impl<B, R> ExecutionDirector<B, R>
where
    B: Backend + ?Sized,
    R: LocalRuntime + ?Sized,
{
    #[must_use]
    pub fn new(backend: Arc<B>, runtime: Arc<R>, console: Arc<Console>, config: DirectorConfig) -> Self {
        let session = Session::new(config.continuation);
        Self {
            backend,
            runtime,
            console,
            config,
            identity: None,
            state: DirectorState::Idle,
            session,
        }
    }

    /// Use `identity` to pick the project of backend sessions.
    #[must_use]
    pub fn with_identity(mut self, identity: Option<Identity>) -> Self {
        self.identity = identity;
        self
    }

    pub fn set_identity(&mut self, identity: Option<Identity>) {
        self.identity = identity;
    }

    /// Project a backend session is started in.
    #[must_use]
    pub fn project_name(&self) -> String {
        if let Some(name) = &self.config.project_name {
            return name.clone();
        }
        self.identity
            .as_ref()
            .filter(|identity| identity.is_complete())
            .map_or_else(|| DEFAULT_PROJECT.to_string(), Identity::home_project)
    }

    #[must_use]
    pub const fn state(&self) -> DirectorState {
        self.state
    }

    #[must_use]
    pub fn prompt(&self) -> &str {
        self.session.prompt()
    }

    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Id of the active backend session.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session.backend_id.as_deref()
    }

    #[must_use]
    pub const fn config(&self) -> &DirectorConfig {
        &self.config
    }

    #[must_use]
    pub fn console(&self) -> &Arc<Console> {
        &self.console
    }

    pub fn history_previous(&mut self) -> Option<&str> {
        self.session.history.back()
    }

    pub fn history_next(&mut self) -> Option<&str> {
        self.session.history.forward()
    }

    /// Start a REPL session.
    ///
    /// The backend is used when the mode allows it and the backend reports
    /// connected; otherwise, or when the start command cannot be sent, the
    /// local runtime is loaded. A local load failure is reported on the
    /// console and ends the session.
    ///
    /// # Errors
    /// Returns error if a session is already active.
    pub async fn start(&mut self) -> Result<DirectorState, DirectorError> {
        if !matches!(self.state, DirectorState::Idle | DirectorState::Ended) {
            return Err(DirectorError::AlreadyActive(self.state));
        }
        self.state = DirectorState::Starting;
        self.session.reset();

        let prefer_backend = self.config.mode != ReplMode::Browser;
        if prefer_backend && self.backend.is_connected() {
            let session_id = Uuid::new_v4().to_string();
            let data = json!({ "projectName": self.project_name() });
            match self.backend.send(
                Some(CorrelationId::Named(session_id.clone())),
                "start_python_repl",
                data,
            ) {
                Ok(_) => {
                    tracing::info!(%session_id, "Backend REPL session started");
                    self.session.backend_id = Some(session_id);
                    self.state = DirectorState::BackendActive;
                    return Ok(self.state);
                }
                Err(e) => {
                    tracing::warn!("Backend REPL failed to start: {e}");
                    self.console.push_system(START_FAILED_NOTICE);
                }
            }
        } else {
            tracing::debug!(mode = ?self.config.mode, "Using local runtime");
        }

        if self.ensure_local().await {
            self.state = DirectorState::BrowserActive;
        } else {
            self.state = DirectorState::Ended;
        }
        Ok(self.state)
    }

    /// Submit one line of input.
    ///
    /// A blank line only leaves continuation. Under the colon policy a
    /// buffered block runs locally once a line leaves it.
    pub async fn submit(&mut self, line: &str) {
        if line.trim().is_empty() {
            self.session.reset_prompt();
            return;
        }

        if self.session.is_waiting_for_input() {
            if let Some(program_id) = self.session.backend_id.clone() {
                self.send_program_input(program_id, line).await;
                return;
            }
            self.session.take_input_request();
        }

        if let Some(block) = self.session.close_block_before(line) {
            self.execute_local(&block).await;
        }

        self.session.history.push(line);
        self.console.push_input(line, self.session.prompt());

        if self.state == DirectorState::BackendActive {
            if let Some(program_id) = self.session.backend_id.clone() {
                self.session.note_remote_line(line);
                let sent = self.backend.is_connected()
                    && self
                        .backend
                        .send(
                            None,
                            "send_program_input",
                            json!({ "program_id": program_id, "input": line }),
                        )
                        .inspect_err(|e| tracing::warn!("Backend send failed: {e}"))
                        .is_ok();
                if sent {
                    return;
                }
                if !self.fall_back(CONNECTION_LOST_NOTICE).await {
                    self.console.push_stderr(NO_ENVIRONMENT);
                    return;
                }
            }
        }

        if self.session.enter_line(line) {
            return;
        }
        self.execute_local(line).await;
    }

    /// Run on the local runtime, loading it just in time.
    async fn execute_local(&mut self, code: &str) {
        if self.runtime.is_ready() || self.ensure_local().await {
            self.state = DirectorState::BrowserActive;
            self.run_local(code).await;
        } else {
            self.console.push_stderr(NO_ENVIRONMENT);
        }
    }

    async fn send_program_input(&mut self, program_id: String, line: &str) {
        let prompt = self.session.take_input_request().unwrap_or_default();
        self.console.push_input(line, prompt);
        let data = json!({ "program_id": program_id, "input": line });
        if let Err(e) = self.backend.send(None, "send_program_input", data) {
            tracing::warn!("Failed to deliver program input: {e}");
            if !self.fall_back(CONNECTION_LOST_NOTICE).await {
                self.console.push_stderr(NO_ENVIRONMENT);
            }
        }
    }

    /// Apply a backend push. Pushes for other sessions are ignored.
    pub async fn handle_push(&mut self, message: &InboundMessage) {
        let Some(session_id) = self.session.backend_id.as_deref() else {
            return;
        };
        match message.id.as_ref() {
            Some(CorrelationId::Named(id)) if id == session_id => {}
            _ => return,
        }
        let Some(event) = BackendEvent::from_message(message) else {
            return;
        };
        tracing::debug!(?event, "Backend push");

        match event {
            BackendEvent::Output { stdout, stderr } => {
                if let Some(stdout) = stdout {
                    let (text, prompt) = split_trailing_prompt(&stdout);
                    if !is_prompt_only(text) {
                        self.console.push_stdout(text);
                    }
                    if prompt {
                        self.session.reset_prompt();
                    }
                }
                if let Some(stderr) = stderr {
                    self.console.push_stderr(stderr);
                }
            }
            BackendEvent::ProgramStarted => {}
            BackendEvent::ReplPrompt => self.session.reset_prompt(),
            BackendEvent::AwaitingInput { prompt } => self.session.await_input(prompt),
            BackendEvent::InputAck => {
                self.session.take_input_request();
            }
            BackendEvent::Figure { payload } => self.console.push_figure(payload),
            BackendEvent::Stopped { error } => {
                self.session.take_input_request();
                let notice = match error {
                    Some(error) => format!("Backend stopped execution: {error}"),
                    None => "Backend stopped execution".to_string(),
                };
                self.console.push_system(notice);
            }
            BackendEvent::ReplMode => {
                self.session.reset_prompt();
                self.console.push_prompt(PRIMARY_PROMPT);
            }
            BackendEvent::SessionEnded => {
                if !self.fall_back(SESSION_ENDED_NOTICE).await {
                    self.state = DirectorState::Ended;
                }
            }
            BackendEvent::Unknown(code) => tracing::debug!(code, "Ignoring backend push"),
        }
    }

    /// React to a connectivity change of the backend.
    pub async fn on_connectivity(&mut self, connected: bool) {
        if !connected && self.state == DirectorState::BackendActive {
            tracing::warn!("Backend disconnected during REPL session");
            if !self.fall_back(CONNECTION_LOST_NOTICE).await {
                self.state = DirectorState::Ended;
            }
        }
    }

    /// Stop the session.
    ///
    /// The backend program is asked to stop (best effort) and the local
    /// namespace is cleared; the local runtime stays loaded.
    ///
    /// # Errors
    /// Returns error if no session is active.
    pub async fn stop(&mut self) -> Result<(), DirectorError> {
        if !self.state.is_active() {
            return Err(DirectorError::NotActive);
        }
        if let Some(program_id) = self.session.backend_id.take() {
            if self.backend.is_connected() {
                let data = json!({ "program_id": program_id });
                if let Err(e) = self.backend.send(None, "stop_python_program", data) {
                    tracing::debug!("Stop request not delivered: {e}");
                }
            }
        }
        self.session.reset();
        if self.runtime.is_ready() {
            if let Err(e) = self.runtime.reset_namespace().await {
                tracing::warn!("Failed to reset local namespace: {e}");
            }
        }
        self.state = DirectorState::Ended;
        tracing::info!("REPL session stopped");
        Ok(())
    }

    /// Leave the backend path with one notice. Returns whether the local
    /// runtime is usable.
    async fn fall_back(&mut self, notice: &str) -> bool {
        tracing::warn!(session_id = ?self.session.backend_id, "{notice}");
        self.session.reset();
        self.console.push_system(notice);
        let ready = self.ensure_local().await;
        if ready {
            self.state = DirectorState::BrowserActive;
        }
        ready
    }

    async fn ensure_local(&self) -> bool {
        if self.runtime.is_ready() {
            return true;
        }
        match self.runtime.load().await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Local runtime failed to load: {e}");
                self.console
                    .push_stderr(format!("Failed to initialize local Python: {e}"));
                false
            }
        }
    }

    async fn run_local(&mut self, code: &str) {
        match self.runtime.run(code).await {
            Ok(eval) => {
                if !eval.stdout.is_empty() {
                    self.console.push_stdout(eval.stdout);
                }
                if !eval.stderr.is_empty() {
                    self.console.push_stderr(eval.stderr);
                }
                if let Some(error) = eval.error {
                    self.console.push_stderr(error);
                } else if let Some(result) = eval.result {
                    self.console.push_stdout(result);
                }
            }
            Err(e) => {
                tracing::error!("Local evaluation failed: {e}");
                self.console.push_stderr(format!("Error: {e}"));
            }
        }
        self.session.reset_prompt();
    }
}
