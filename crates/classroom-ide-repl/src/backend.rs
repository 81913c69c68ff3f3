//! Backend seam.

use classroom_ide_channel::{Channel, CorrelationId, SendError};
use serde_json::Value;

/// What the director needs from the command channel.
pub trait Backend: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Send a command without a response subscription; pushes arrive through
    /// the channel's message handlers.
    ///
    /// # Errors
    /// Returns error if the channel cannot send right now.
    fn send(&self, id: Option<CorrelationId>, cmd: &str, data: Value) -> Result<CorrelationId, SendError>;
}

impl Backend for Channel {
    fn is_connected(&self) -> bool {
        Self::is_connected(self)
    }

    fn send(&self, id: Option<CorrelationId>, cmd: &str, data: Value) -> Result<CorrelationId, SendError> {
        self.send_command(id, cmd, data, None)
    }
}
