use crate::backup::BackupError;
use serde::{Serialize, Serializer};
use uuid::Uuid;

/// Errors surfaced to the UI by [`crate::commands`].
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Invalid session ID format: {0}")]
    InvalidId(String),
    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),
    #[error("System instruction not found: {0}")]
    InstructionNotFound(Uuid),
    #[error("A request is already in progress for session {0}")]
    RequestInFlight(Uuid),
    #[error("Failed to read attachment: {0:#}")]
    Attachment(anyhow::Error),
    #[error("Workspace storage is not initialized yet")]
    StorageUnavailable,
    #[error(transparent)]
    Backup(#[from] BackupError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// The UI only needs the message.
impl Serialize for CommandError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

pub fn parse_id(raw: &str) -> Result<Uuid, CommandError> {
    Uuid::parse_str(raw.trim()).map_err(|_| {
        log::error!("Invalid ID format: {}", raw);
        CommandError::InvalidId(raw.to_string())
    })
}
