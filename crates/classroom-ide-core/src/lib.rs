//! Core building blocks for the classroom IDE client.
//!
//! This crate provides:
//! - `Console` - Bounded console buffer with live broadcast
//! - `ConsoleEntry` - Typed console records
//! - `Identity` - Explicit signed-in identity and edit permissions
//! - `EditorTabs` - Open-file tabs with a tab limit
//! - `LocalRuntime` - Capability trait for the local interpreter

pub mod console;
pub mod entry;
pub mod identity;
pub mod tabs;
pub mod traits;

pub use console::Console;
pub use entry::{ConsoleEntry, EntryKind};
pub use identity::{Identity, Role};
pub use tabs::{EditorTabs, OpenOutcome, Tab};
pub use traits::{Evaluation, LocalRuntime, RuntimeError};
