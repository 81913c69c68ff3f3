//! Channel errors.

use thiserror::Error;

/// Why a command could not be sent.
///
/// Sends never panic; callers check this (or `Channel::is_connected`) and
/// fall back as they see fit.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("Websocket is not init")]
    NotInitialized,
    #[error("Websocket readyState is not open")]
    NotOpen,
    #[error("Failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Transport rejected frame: {0}")]
    Transport(#[from] TransportError),
}

impl SendError {
    /// Numeric sentinel for front ends that report codes.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::NotInitialized => -1,
            Self::NotOpen => -2,
            Self::Encode(_) => -3,
            Self::Transport(_) => -4,
        }
    }
}

/// Transport-level failure.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection is not open")]
    NotOpen,
    #[error("Connection task has stopped")]
    Stopped,
}

/// Channel configuration or registry error.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Invalid location: {0}")]
    InvalidLocation(String),
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),
}
