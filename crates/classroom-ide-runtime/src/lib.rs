//! Local Python runtime for browser mode.
//!
//! Provides:
//! - Interpreter command building and resolution
//! - The JSON-line driver protocol
//! - `PythonRuntime`, a `LocalRuntime` backed by a supervised subprocess

pub mod command;
pub mod driver;
pub mod process;
pub mod resolve;

pub use command::{CommandBuildError, CommandParts, InterpreterCommand};
pub use process::{DEFAULT_LOAD_TIMEOUT, PythonRuntime};
pub use resolve::resolve_executable_path;
