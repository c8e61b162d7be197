use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};
use rewind_types::{RewindError, Result};
use tokio::fs::OpenOptions;

const INVALID_FILE_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Video and thumbnail locations for one saved clip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipPaths {
    pub video: PathBuf,
    pub thumbnail: PathBuf,
}

impl ClipPaths {
    /// Claim paths named after `now`, suffixed with `_<n>` when the name is taken.
    ///
    /// The video file is created empty as the claim, so concurrent saves within
    /// the same second never share a name. The caller owns the placeholder and
    /// must remove it if the save is abandoned.
    pub async fn reserve(dir: &Path, now: DateTime<Local>) -> Result<Self> {
        let stem = format!("replay_{}", now.format("%Y%m%d_%H%M%S"));
        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                stem.clone()
            } else {
                format!("{stem}_{attempt}")
            };
            attempt += 1;
            let paths = Self {
                video: dir.join(format!("{name}.mp4")),
                thumbnail: dir.join(format!("{name}.jpg")),
            };
            if paths.thumbnail.exists() {
                continue;
            }
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&paths.video)
                .await
            {
                Ok(_) => return Ok(paths),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(RewindError::EncodeIo(format!(
                        "cannot claim {}: {err}",
                        paths.video.display()
                    )))
                }
            }
        }
    }
}

pub fn default_clip_name(now: DateTime<Local>) -> String {
    format!("Replay {}", now.format("%d/%m/%Y %H:%M:%S"))
}

/// File name for an exported copy; falls back to `fallback` when nothing usable remains.
pub fn export_file_name(name: &str, fallback: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !INVALID_FILE_CHARS.contains(c) && !c.is_control())
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        format!("{fallback}.mp4")
    } else {
        format!("{cleaned}.mp4")
    }
}
