//! Wire protocol for the command channel.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};

/// Code carried by the synthetic message delivered to pending subscriptions
/// when their channel is closed.
pub const CHANNEL_CLOSED_CODE: i64 = 10086;

/// Correlation id of a command and its responses.
///
/// Channel-assigned ids are sequence numbers; callers may pin their own,
/// usually a session id string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CorrelationId {
    Seq(u64),
    Named(String),
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seq(n) => write!(f, "{n}"),
            Self::Named(s) => f.write_str(s),
        }
    }
}

impl From<u64> for CorrelationId {
    fn from(value: u64) -> Self {
        Self::Seq(value)
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self::Named(value)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self::Named(value.to_string())
    }
}

/// Outbound command frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMessage {
    pub id: CorrelationId,
    pub cmd: String,
    pub data: Value,
}

impl CommandMessage {
    #[must_use]
    pub fn new(id: CorrelationId, cmd: impl Into<String>, data: Value) -> Self {
        Self {
            id,
            cmd: cmd.into(),
            data: if data.is_null() { json!({}) } else { data },
        }
    }
}

/// Frame presenting the session credential right after connecting.
#[must_use]
pub fn authenticate_frame(session_id: &str) -> Value {
    json!({ "cmd": "authenticate", "session_id": session_id })
}

/// Frame requesting the initial project after authentication.
#[must_use]
pub fn get_project_frame(project: &str) -> Value {
    json!({ "cmd": "ide_get_project", "project": project })
}

/// Inbound frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub id: Option<CorrelationId>,
    /// Outcome code; numeric strings are accepted.
    #[serde(default, deserialize_with = "lenient_code")]
    pub code: Option<i64>,
    /// Handshake discriminator (`auth_required`, `auth_success`, `error`).
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Value,
    /// Any other top-level fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Authentication handshake frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    AuthRequired,
    AuthSuccess {
        username: Option<String>,
        role: Option<String>,
    },
    NotAuthenticated,
}

impl InboundMessage {
    /// Parse a text frame.
    ///
    /// # Errors
    /// Returns error if the frame is not a JSON object.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Synthetic message telling a pending subscription its channel closed.
    #[must_use]
    pub fn channel_closed(id: CorrelationId) -> Self {
        Self {
            id: Some(id),
            code: Some(CHANNEL_CLOSED_CODE),
            ..Self::default()
        }
    }

    /// Whether this is the synthetic close notification.
    #[must_use]
    pub fn is_channel_closed(&self) -> bool {
        self.code == Some(CHANNEL_CLOSED_CODE)
    }

    /// Classify authentication handshake frames.
    #[must_use]
    pub fn handshake(&self) -> Option<Handshake> {
        match self.kind.as_deref()? {
            "auth_required" => Some(Handshake::AuthRequired),
            "auth_success" => Some(Handshake::AuthSuccess {
                username: self.extra_str("username"),
                role: self.extra_str("role"),
            }),
            "error"
                if self
                    .message
                    .as_deref()
                    .is_some_and(|m| m.contains("Not authenticated")) =>
            {
                Some(Handshake::NotAuthenticated)
            }
            _ => None,
        }
    }

    /// String field of `data`.
    #[must_use]
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    fn extra_str(&self, key: &str) -> Option<String> {
        self.extra.get(key).and_then(Value::as_str).map(ToString::to_string)
    }
}

fn lenient_code<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}
