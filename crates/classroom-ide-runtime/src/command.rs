//! Interpreter command building.

use std::path::PathBuf;

use classroom_ide_core::RuntimeError;
use thiserror::Error;

use crate::resolve::resolve_executable_path;

/// Interpreter launched when no override is configured.
pub const DEFAULT_INTERPRETER: &str = "python3";

/// Command build error.
#[derive(Debug, Error)]
pub enum CommandBuildError {
    #[error("Interpreter command cannot be parsed: {0}")]
    InvalidBase(String),
    #[error("Interpreter command is empty after parsing")]
    EmptyCommand,
    #[error("Executable not found: {0}")]
    NotFound(String),
}

impl From<CommandBuildError> for RuntimeError {
    fn from(err: CommandBuildError) -> Self {
        match err {
            CommandBuildError::NotFound(program) => Self::NotFound(program),
            other => Self::LoadFailed(other.to_string()),
        }
    }
}

/// Parsed command parts (program + args).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParts {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandParts {
    /// Resolve the program to an executable path.
    ///
    /// # Errors
    /// Returns error if the executable is not found.
    pub async fn into_resolved(self) -> Result<(PathBuf, Vec<String>), CommandBuildError> {
        let Self { program, args } = self;
        let executable = resolve_executable_path(&program)
            .await
            .ok_or(CommandBuildError::NotFound(program))?;
        Ok((executable, args))
    }
}

/// Shell-style interpreter command, e.g. `python3` or `uv run python`.
///
/// The driver flags are appended after the configured arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterCommand {
    pub base: String,
    pub params: Vec<String>,
}

impl Default for InterpreterCommand {
    fn default() -> Self {
        Self::new(DEFAULT_INTERPRETER)
    }
}

impl InterpreterCommand {
    #[must_use]
    pub fn new<S: Into<String>>(base: S) -> Self {
        Self {
            base: base.into(),
            params: Vec::new(),
        }
    }

    /// Append extra interpreter arguments.
    #[must_use]
    pub fn params<I>(mut self, params: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.params.extend(params.into_iter().map(Into::into));
        self
    }

    /// Split the command into program and arguments.
    ///
    /// # Errors
    /// Returns error if the base cannot be parsed or is empty.
    pub fn build(&self, trailing: &[&str]) -> Result<CommandParts, CommandBuildError> {
        let mut parts = shlex::split(&self.base)
            .ok_or_else(|| CommandBuildError::InvalidBase(self.base.clone()))?;
        parts.extend(self.params.iter().cloned());
        parts.extend(trailing.iter().map(ToString::to_string));

        if parts.is_empty() {
            return Err(CommandBuildError::EmptyCommand);
        }
        let program = parts.remove(0);
        Ok(CommandParts {
            program,
            args: parts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_quoted_base_and_appends_trailing() {
        let parts = InterpreterCommand::new("uv run --python '3.12' python")
            .params(["-X", "utf8"])
            .build(&["-u", "-c", "pass"])
            .unwrap();
        assert_eq!(parts.program, "uv");
        assert_eq!(
            parts.args,
            ["run", "--python", "3.12", "python", "-X", "utf8", "-u", "-c", "pass"]
        );
    }

    #[test]
    fn empty_and_unbalanced_commands_fail() {
        assert!(matches!(
            InterpreterCommand::new("   ").build(&[]),
            Err(CommandBuildError::EmptyCommand)
        ));
        assert!(matches!(
            InterpreterCommand::new("python3 'oops").build(&[]),
            Err(CommandBuildError::InvalidBase(_))
        ));
    }

    #[tokio::test]
    async fn unknown_program_maps_to_not_found() {
        let err = InterpreterCommand::new("no-such-python-for-tests")
            .build(&[])
            .unwrap()
            .into_resolved()
            .await
            .unwrap_err();
        assert!(matches!(RuntimeError::from(err), RuntimeError::NotFound(_)));
    }
}
