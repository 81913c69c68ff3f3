//! Typed console entries.

use serde::{Deserialize, Serialize};

/// Kind of a console record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Echo of a submitted command, shown after its prompt.
    Input,
    /// Standard output of the program or interpreter.
    Stdout,
    /// Standard error, tracebacks and client-side failures.
    Stderr,
    /// Notices from the client itself (mode switches, lost connections).
    System,
    /// A bare prompt marker.
    Prompt,
    /// A rich figure was displayed.
    Figure,
}

/// A single console record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleEntry {
    pub kind: EntryKind,
    pub text: String,
    /// Prompt shown in front of an `Input` record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Encoded image for a `Figure` record (usually a `data:` URL).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl ConsoleEntry {
    fn plain(kind: EntryKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            prompt: None,
            payload: None,
        }
    }

    /// Echo of a submitted command.
    #[must_use]
    pub fn input(text: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            ..Self::plain(EntryKind::Input, text)
        }
    }

    #[must_use]
    pub fn stdout(text: impl Into<String>) -> Self {
        Self::plain(EntryKind::Stdout, text)
    }

    #[must_use]
    pub fn stderr(text: impl Into<String>) -> Self {
        Self::plain(EntryKind::Stderr, text)
    }

    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self::plain(EntryKind::System, text)
    }

    #[must_use]
    pub fn prompt(text: impl Into<String>) -> Self {
        Self::plain(EntryKind::Prompt, text)
    }

    /// Figure marker, optionally carrying the encoded image.
    #[must_use]
    pub fn figure(payload: Option<String>) -> Self {
        Self {
            payload,
            ..Self::plain(EntryKind::Figure, "[Matplotlib Figure Displayed]")
        }
    }

    /// Whether this record reports a failure.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self.kind, EntryKind::Stderr)
    }
}
