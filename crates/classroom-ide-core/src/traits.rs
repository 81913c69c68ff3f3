//! Local interpreter capability.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outcome of one local evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Text written to standard output while evaluating.
    #[serde(default)]
    pub stdout: String,
    /// Text written to standard error while evaluating.
    #[serde(default)]
    pub stderr: String,
    /// Representation of a non-`None` expression result.
    #[serde(default)]
    pub result: Option<String>,
    /// Rendered exception when evaluation failed.
    #[serde(default)]
    pub error: Option<String>,
}

impl Evaluation {
    /// Whether the evaluation raised.
    #[must_use]
    pub const fn failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Local runtime error.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Interpreter not found: {0}")]
    NotFound(String),
    #[error("Interpreter failed to start: {0}")]
    LoadFailed(String),
    #[error("Interpreter is not loaded")]
    NotLoaded,
    #[error("Interpreter exited")]
    Exited,
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An embeddable interpreter with a persistent global namespace.
///
/// The director depends only on this trait, so tests can swap in a double
/// and front ends can pick whichever local interpreter they ship.
#[async_trait]
pub trait LocalRuntime: Send + Sync {
    /// Load the interpreter. Repeated or concurrent calls initialize once.
    async fn load(&self) -> Result<(), RuntimeError>;

    /// Whether `load` has completed successfully.
    fn is_ready(&self) -> bool;

    /// Evaluate `code` with stdout/stderr captured for its duration.
    ///
    /// Exceptions raised by the code are reported in [`Evaluation::error`];
    /// `Err` means the runtime itself failed.
    async fn run(&self, code: &str) -> Result<Evaluation, RuntimeError>;

    /// Drop user bindings while keeping the interpreter loaded.
    async fn reset_namespace(&self) -> Result<(), RuntimeError>;
}
