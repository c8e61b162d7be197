use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    clip::{Clip, ClipId},
    playback::PlaybackStatus,
    telemetry::SaveTiming,
};

/// High-level kinds of messages moving across execution contexts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Lifecycle,
    Notice,
    Save,
    Library,
    Playback,
}

/// Immutable event envelope handed from background work to the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemEvent {
    pub id: Uuid,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Lifecycle(LifecyclePhase),
    Notice(String),
    SaveStarted { frames: usize },
    SaveCompleted { clip: Clip, timing: SaveTiming },
    SaveFailed(String),
    ClipRenamed { id: ClipId, name: String },
    ClipDeleted(ClipId),
    ClipCopied { id: ClipId, destination: String },
    LibraryLoaded { clips: usize },
    Playback(PlaybackStatus),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LifecyclePhase {
    CaptureStarted,
    CaptureStopped,
    Shutdown,
}

impl SystemEvent {
    pub fn new(payload: EventPayload) -> Self {
        let kind = match &payload {
            EventPayload::Lifecycle(_) => EventKind::Lifecycle,
            EventPayload::Notice(_) => EventKind::Notice,
            EventPayload::SaveStarted { .. }
            | EventPayload::SaveCompleted { .. }
            | EventPayload::SaveFailed(_) => EventKind::Save,
            EventPayload::ClipRenamed { .. }
            | EventPayload::ClipDeleted(_)
            | EventPayload::ClipCopied { .. }
            | EventPayload::LibraryLoaded { .. } => EventKind::Library,
            EventPayload::Playback(_) => EventKind::Playback,
        };
        Self {
            id: Uuid::new_v4(),
            kind,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn notice(message: impl Into<String>) -> Self {
        Self::new(EventPayload::Notice(message.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_payload() {
        assert_eq!(SystemEvent::notice("hi").kind, EventKind::Notice);
        let saved = SystemEvent::new(EventPayload::SaveFailed("disk full".into()));
        assert_eq!(saved.kind, EventKind::Save);
        let deleted = SystemEvent::new(EventPayload::ClipDeleted(ClipId(1)));
        assert_eq!(deleted.kind, EventKind::Library);
    }
}
