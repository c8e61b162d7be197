use std::{
    fmt,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Identity assigned by the catalog on first persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClipId(pub i64);

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A persisted replay artifact: video file, optional thumbnail and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub id: Option<ClipId>,
    pub name: String,
    pub video_path: PathBuf,
    pub thumbnail_path: Option<PathBuf>,
    pub recorded_at: DateTime<Local>,
    pub duration_seconds: f64,
}

impl Clip {
    pub fn display_info(&self) -> String {
        format!(
            "{} - {}",
            self.name,
            self.recorded_at.format("%d/%m/%Y %H:%M:%S")
        )
    }

    pub fn video_exists(&self) -> bool {
        self.video_path.is_file()
    }

    /// Every file on disk that belongs to this clip.
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.video_path.as_path()).chain(self.thumbnail_path.as_deref())
    }
}

/// Insert parameters for a clip the catalog has not seen yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewClip {
    pub user_id: i64,
    pub name: String,
    pub video_path: PathBuf,
    pub thumbnail_path: Option<PathBuf>,
    pub recorded_at: DateTime<Local>,
    pub duration_seconds: f64,
}

impl NewClip {
    pub fn into_clip(self, id: ClipId) -> Clip {
        Clip {
            id: Some(id),
            name: self.name,
            video_path: self.video_path,
            thumbnail_path: self.thumbnail_path,
            recorded_at: self.recorded_at,
            duration_seconds: self.duration_seconds,
        }
    }
}
