use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{frame::FrameSize, RewindError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub device_index: u32,
    pub frame_rate: u32,
    pub window_seconds: u32,
    pub frame_width: u32,
    pub frame_height: u32,
    pub read_timeout_ms: u64,
    #[serde(default = "default_input_format")]
    pub input_format: String,
    pub ffmpeg_path: Option<String>,
}

impl CaptureConfig {
    /// Number of frames the rolling window retains.
    pub fn capacity(&self) -> usize {
        self.frame_rate as usize * self.window_seconds as usize
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.frame_rate.max(1)))
    }

    pub fn frame_size(&self) -> FrameSize {
        FrameSize::new(self.frame_width, self.frame_height)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            frame_rate: 30,
            window_seconds: 30,
            frame_width: 640,
            frame_height: 480,
            read_timeout_ms: 2_000,
            input_format: default_input_format(),
            ffmpeg_path: None,
        }
    }
}

fn default_input_format() -> String {
    "v4l2".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Four character codec tag written into the container.
    pub codec: String,
    pub thumbnail_quality: u8,
    pub ffmpeg_path: Option<String>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            codec: "avc1".into(),
            thumbnail_quality: 85,
            ffmpeg_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub clip_dir: String,
    pub downloads_dir: String,
    pub catalog_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            clip_dir: "replays".into(),
            downloads_dir: "downloads".into(),
            catalog_path: "replays/catalog.json".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    pub progress_interval_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            progress_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpsConfig {
    pub log_level: String,
    pub journal_capacity: usize,
    /// Where the event journal is written as JSON lines on shutdown.
    pub journal_path: Option<String>,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            journal_capacity: 256,
            journal_path: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RewindConfig {
    pub user_id: i64,
    pub capture: CaptureConfig,
    pub encoder: EncoderConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    pub ops: OpsConfig,
}

impl RewindConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref).map_err(|err| {
            RewindError::Configuration(format!(
                "unable to read config file {}: {err}",
                path_ref.display()
            ))
        })?;
        toml::from_str(&contents).map_err(|err| {
            RewindError::Configuration(format!(
                "failed to parse config file {}: {err}",
                path_ref.display()
            ))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.capture.frame_rate == 0 {
            return Err(RewindError::Configuration(
                "capture.frame_rate must be greater than zero".into(),
            ));
        }
        if self.capture.window_seconds == 0 {
            return Err(RewindError::Configuration(
                "capture.window_seconds must be greater than zero".into(),
            ));
        }
        if self.capture.frame_width == 0 || self.capture.frame_height == 0 {
            return Err(RewindError::Configuration(
                "capture frame dimensions must be non-zero".into(),
            ));
        }
        // yuv420p subsamples chroma by two in both directions.
        if self.capture.frame_width % 2 != 0 || self.capture.frame_height % 2 != 0 {
            return Err(RewindError::Configuration(format!(
                "capture frame dimensions must be even, got {}",
                self.capture.frame_size()
            )));
        }
        if !(1..=100).contains(&self.encoder.thumbnail_quality) {
            return Err(RewindError::Configuration(
                "encoder.thumbnail_quality must be between 1 and 100".into(),
            ));
        }
        if self.encoder.codec.len() != 4 || !self.encoder.codec.is_ascii() {
            return Err(RewindError::Configuration(format!(
                "encoder.codec must be a four character code, got '{}'",
                self.encoder.codec
            )));
        }
        if self.playback.progress_interval_ms == 0 {
            return Err(RewindError::Configuration(
                "playback.progress_interval_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
