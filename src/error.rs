// Error types for the board, the match controller, the sync engine and configuration

use std::path::PathBuf;

use crate::types::Move;

/// Errors raised by the board when asked to play a move
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BoardError {
    #[error("move {0} is not legal on this board")]
    IllegalMove(Move),
}

/// Errors reported by the match controller
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchError {
    #[error("cannot undo further")]
    UndoUnavailable,

    #[error("no match has been started")]
    NoMatch,
}

/// Errors raised by the peer sync engine. None of these are fatal: every one
/// ends in either a reset session or a match demoted to local play.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("peer board diverged: {0}")]
    ProtocolDesync(String),

    #[error("transport failure: {0}")]
    Transport(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("frame of {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("no peer is connected")]
    NotConnected,

    #[error("session closed")]
    Closed,
}

impl SyncError {
    /// Whether this error means the two boards can no longer be trusted to agree
    pub fn is_desync(&self) -> bool {
        matches!(self, SyncError::ProtocolDesync(_) | SyncError::Codec(_))
    }
}

/// Errors that can occur when loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_error_display() {
        assert_eq!(MatchError::UndoUnavailable.to_string(), "cannot undo further");
    }

    #[test]
    fn test_sync_error_classification() {
        assert!(SyncError::ProtocolDesync("mismatch".to_string()).is_desync());
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert!(!SyncError::Transport(io).is_desync());
        assert_eq!(
            SyncError::FrameTooLarge { size: 10, limit: 4 }.to_string(),
            "frame of 10 bytes exceeds limit of 4 bytes"
        );
    }
}
