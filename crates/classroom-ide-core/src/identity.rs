//! Authenticated identity and path permissions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Role of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Professor,
    #[serde(untagged)]
    Other(String),
}

impl From<&str> for Role {
    fn from(role: &str) -> Self {
        match role {
            "student" => Self::Student,
            "professor" => Self::Professor,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Student => f.write_str("student"),
            Self::Professor => f.write_str("professor"),
            Self::Other(role) => f.write_str(role),
        }
    }
}

/// Identity of the signed-in user.
///
/// Passed explicitly to the channel and the director instead of being read
/// from ambient storage, so permission checks are pure functions of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Session credential presented to the backend.
    pub session_id: String,
    pub username: String,
    pub role: Role,
}

impl Identity {
    #[must_use]
    pub fn new(session_id: impl Into<String>, username: impl Into<String>, role: Role) -> Self {
        Self {
            session_id: session_id.into(),
            username: username.into(),
            role,
        }
    }

    /// Whether the identity carries a usable credential.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.session_id.is_empty() && !self.username.is_empty()
    }

    /// Project loaded after authentication: `Local/<username>` for
    /// students, `Local` for everyone else or without a username.
    #[must_use]
    pub fn home_project(&self) -> String {
        match self.role {
            Role::Student if !self.username.is_empty() => format!("Local/{}", self.username),
            _ => "Local".to_string(),
        }
    }

    /// Whether this identity may edit the file at `path`.
    ///
    /// Professors edit everything, students only files inside
    /// `Local/<username>/`, any other role nothing.
    #[must_use]
    pub fn can_edit(&self, path: &str) -> bool {
        if !self.is_complete() {
            return false;
        }
        match &self.role {
            Role::Professor => true,
            Role::Student => path.starts_with(&format!("Local/{}/", self.username)),
            Role::Other(_) => false,
        }
    }
}

/// Edit check for an optional identity; nobody signed in means read-only.
#[must_use]
pub fn can_edit(identity: Option<&Identity>, path: &str) -> bool {
    identity.is_some_and(|id| id.can_edit(path))
}
