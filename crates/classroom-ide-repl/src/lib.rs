//! Dual-mode REPL for the classroom IDE.
//!
//! Provides:
//! - `ExecutionDirector` - Route submissions to the backend or the local runtime
//! - `Session` and `History` - Prompt, continuation and command history
//! - Backend push normalization
//! - `Backend` - Seam over the command channel

pub mod backend;
pub mod config;
pub mod director;
pub mod normalize;
pub mod session;

pub use backend::Backend;
pub use config::{ContinuationPolicy, DEFAULT_PROJECT, DirectorConfig, ReplMode};
pub use director::{DirectorError, DirectorState, ExecutionDirector};
pub use normalize::{BackendEvent, ResponseCode, is_prompt_only, split_trailing_prompt};
pub use session::{CONTINUATION_PROMPT, History, PRIMARY_PROMPT, Session};
