//! Interpreter subprocess supervision.

use std::{
    process::Stdio,
    sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use classroom_ide_core::{Evaluation, LocalRuntime, RuntimeError};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    process::{Child, ChildStdin, ChildStdout, Command},
    sync::Mutex,
};

use crate::{
    command::InterpreterCommand,
    driver::{DRIVER, DRIVER_FLAGS, Ready, Reply, Request},
};

/// How long the interpreter may take to announce readiness.
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(20);

struct PeerIo {
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    // Held so the process is killed when the runtime is dropped.
    _child: Child,
}

struct Peer {
    io: Mutex<PeerIo>,
    version: Option<String>,
}

impl Peer {
    /// Send one request and wait for its reply. Requests never overlap.
    async fn call(&self, request: &Request<'_>) -> Result<Reply, RuntimeError> {
        let line = serde_json::to_string(request).map_err(|e| RuntimeError::Protocol(e.to_string()))?;
        let mut io = self.io.lock().await;
        io.stdin.write_all(line.as_bytes()).await?;
        io.stdin.write_all(b"\n").await?;
        io.stdin.flush().await?;

        let reply = io.stdout.next_line().await?.ok_or(RuntimeError::Exited)?;
        serde_json::from_str(&reply).map_err(|e| RuntimeError::Protocol(format!("{e}: {reply}")))
    }
}

/// [`LocalRuntime`] backed by a Python subprocess running the driver.
///
/// A dead interpreter is dropped on the next failed request, after which
/// the runtime reports not ready and can be loaded again.
pub struct PythonRuntime {
    command: InterpreterCommand,
    load_timeout: Duration,
    peer: StdMutex<Option<Arc<Peer>>>,
    // Serializes loads so concurrent callers start one interpreter.
    loading: Mutex<()>,
}

impl Default for PythonRuntime {
    fn default() -> Self {
        Self::new(InterpreterCommand::default())
    }
}

impl PythonRuntime {
    #[must_use]
    pub fn new(command: InterpreterCommand) -> Self {
        Self {
            command,
            load_timeout: DEFAULT_LOAD_TIMEOUT,
            peer: StdMutex::new(None),
            loading: Mutex::new(()),
        }
    }

    #[must_use]
    pub const fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    /// Interpreter version reported at load time.
    #[must_use]
    pub fn version(&self) -> Option<String> {
        self.slot().as_ref().and_then(|peer| peer.version.clone())
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<Peer>>> {
        self.peer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn peer(&self) -> Result<Arc<Peer>, RuntimeError> {
        self.slot().clone().ok_or(RuntimeError::NotLoaded)
    }

    /// Send a request, dropping the interpreter if it is gone.
    async fn call(&self, request: &Request<'_>) -> Result<Reply, RuntimeError> {
        let peer = self.peer()?;
        let reply = peer.call(request).await;
        if matches!(reply, Err(RuntimeError::Exited | RuntimeError::Io(_))) {
            let mut slot = self.slot();
            if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, &peer)) {
                tracing::warn!("Local interpreter exited; it will be restarted on next load");
                *slot = None;
            }
        }
        reply
    }

    async fn spawn(&self) -> Result<Peer, RuntimeError> {
        let mut trailing: Vec<&str> = DRIVER_FLAGS.to_vec();
        trailing.push(DRIVER);
        let (program, args) = self.command.build(&trailing)?.into_resolved().await?;
        tracing::info!(program = %program.display(), "Starting local interpreter");

        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RuntimeError::LoadFailed(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RuntimeError::LoadFailed("stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RuntimeError::LoadFailed("stdout not captured".into()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "classroom_ide_runtime::interpreter", "{line}");
                }
            });
        }

        let mut stdout = BufReader::new(stdout).lines();
        let first = tokio::time::timeout(self.load_timeout, stdout.next_line())
            .await
            .map_err(|_| RuntimeError::LoadFailed("timed out waiting for interpreter".into()))??
            .ok_or(RuntimeError::Exited)?;
        let ready: Ready = serde_json::from_str(&first)
            .map_err(|e| RuntimeError::LoadFailed(format!("unexpected handshake {first:?}: {e}")))?;
        if !ready.ready {
            return Err(RuntimeError::LoadFailed("interpreter reported not ready".into()));
        }
        tracing::info!(version = ?ready.version, "Local interpreter ready");

        Ok(Peer {
            io: Mutex::new(PeerIo {
                stdin,
                stdout,
                _child: child,
            }),
            version: ready.version,
        })
    }
}

#[async_trait]
impl LocalRuntime for PythonRuntime {
    async fn load(&self) -> Result<(), RuntimeError> {
        let _loading = self.loading.lock().await;
        if self.is_ready() {
            return Ok(());
        }
        let peer = self.spawn().await?;
        *self.slot() = Some(Arc::new(peer));
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.slot().is_some()
    }

    async fn run(&self, code: &str) -> Result<Evaluation, RuntimeError> {
        self.call(&Request::Run { code }).await
    }

    async fn reset_namespace(&self) -> Result<(), RuntimeError> {
        let reply = self.call(&Request::Reset).await?;
        match reply.error {
            Some(error) => Err(RuntimeError::Protocol(error)),
            None => Ok(()),
        }
    }
}
