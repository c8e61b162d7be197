use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = RewindError> = std::result::Result<T, E>;

/// Unified error type covering every failure the replay core can report.
#[derive(Debug, Error)]
pub enum RewindError {
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("replay buffer is empty")]
    EmptyBuffer,
    #[error("encode failed: {0}")]
    EncodeIo(String),
    #[error("catalog persistence failed: {0}")]
    Persistence(String),
    #[error("clip file is missing: {}", .0.display())]
    MissingFile(PathBuf),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("capture error: {0}")]
    Capture(String),
    #[error("playback error: {0}")]
    Playback(String),
    #[error("event bus error: {0}")]
    Bus(String),
    #[error("operational error: {0}")]
    Ops(String),
    #[error("orchestrator error: {0}")]
    Orchestrator(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RewindError {
    /// Text shown to the user when an operation is rejected or fails.
    pub fn user_message(&self) -> String {
        match self {
            RewindError::DeviceUnavailable(_) => "Camera not found.".to_string(),
            RewindError::EmptyBuffer => {
                "Replay buffer is empty. Wait a few seconds and try again.".to_string()
            }
            RewindError::EncodeIo(detail) => format!("Could not write the replay video: {detail}"),
            RewindError::Persistence(detail) => format!("Could not save the replay: {detail}"),
            RewindError::MissingFile(path) => {
                format!("Replay file no longer exists: {}", path.display())
            }
            RewindError::InvalidInput(detail) => detail.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_messages_are_specific() {
        assert!(RewindError::EmptyBuffer.user_message().contains("empty"));
        let missing = RewindError::MissingFile(PathBuf::from("/tmp/gone.mp4"));
        assert!(missing.user_message().contains("/tmp/gone.mp4"));
        let invalid = RewindError::InvalidInput("name must not be empty".into());
        assert_eq!(invalid.user_message(), "name must not be empty");
    }
}
