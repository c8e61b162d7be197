use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clip::ClipId;

/// Mutually exclusive modes of the playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackMode {
    Live,
    Loading,
    Playing,
    Paused,
    Seeking,
    Ended,
}

impl PlaybackMode {
    pub fn is_live(self) -> bool {
        matches!(self, PlaybackMode::Live)
    }
}

impl Default for PlaybackMode {
    fn default() -> Self {
        PlaybackMode::Live
    }
}

/// Read-only view of the session reported to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PlaybackStatus {
    pub mode: PlaybackMode,
    pub clip: Option<ClipId>,
    pub position: Duration,
    pub duration: Duration,
}

impl PlaybackStatus {
    /// Fraction of the clip already played, in `[0, 1]`.
    pub fn progress_ratio(&self) -> f64 {
        if self.duration.is_zero() {
            0.0
        } else {
            (self.position.as_secs_f64() / self.duration.as_secs_f64()).clamp(0.0, 1.0)
        }
    }
}
