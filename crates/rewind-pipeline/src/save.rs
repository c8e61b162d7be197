use std::{path::PathBuf, sync::Arc, time::Instant};

use chrono::{DateTime, Local};
use rewind_capture::{RollingBuffer, Snapshot};
use rewind_catalog::CatalogStore;
use rewind_encoder::{write_jpeg_thumbnail, FourCc, VideoEncoder, WriterSpec};
use rewind_types::{
    clip::{Clip, NewClip},
    config::RewindConfig,
    frame::FrameSize,
    telemetry::SaveTiming,
    RewindError, Result,
};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::naming::{default_clip_name, ClipPaths};

/// Fixed parameters every save uses.
#[derive(Debug, Clone)]
pub struct SaveSettings {
    pub user_id: i64,
    pub clip_dir: PathBuf,
    pub frame_rate: u32,
    pub codec: FourCc,
    pub thumbnail_quality: u8,
}

impl SaveSettings {
    pub fn from_config(config: &RewindConfig) -> Result<Self> {
        Ok(Self {
            user_id: config.user_id,
            clip_dir: PathBuf::from(&config.storage.clip_dir),
            frame_rate: config.capture.frame_rate,
            codec: config.encoder.codec.parse()?,
            thumbnail_quality: config.encoder.thumbnail_quality,
        })
    }
}

/// Outcome of a successful save.
#[derive(Debug, Clone)]
pub struct SavedClip {
    pub clip: Clip,
    pub timing: SaveTiming,
}

/// Turns buffer snapshots into encoded clips registered in the catalog.
pub struct SavePipeline<E, C>
where
    E: VideoEncoder,
    C: CatalogStore,
{
    encoder: Arc<E>,
    catalog: Arc<C>,
    settings: SaveSettings,
}

impl<E, C> SavePipeline<E, C>
where
    E: VideoEncoder + 'static,
    C: CatalogStore + 'static,
{
    pub fn new(settings: SaveSettings, encoder: Arc<E>, catalog: Arc<C>) -> Self {
        Self {
            encoder,
            catalog,
            settings,
        }
    }

    pub fn settings(&self) -> &SaveSettings {
        &self.settings
    }

    /// Freeze the buffer now and encode it on a background task.
    ///
    /// An empty buffer is rejected before anything is spawned.
    pub fn spawn_save(
        self: &Arc<Self>,
        buffer: &RollingBuffer,
    ) -> Result<(usize, JoinHandle<Result<SavedClip>>)> {
        let snapshot = buffer.snapshot();
        if snapshot.is_empty() {
            return Err(RewindError::EmptyBuffer);
        }
        let frames = snapshot.len();
        let pipeline = Arc::clone(self);
        let handle = tokio::spawn(async move { pipeline.save_snapshot(snapshot, Local::now()).await });
        Ok((frames, handle))
    }

    /// Snapshot the buffer and save it on the calling task.
    pub async fn save(&self, buffer: &RollingBuffer) -> Result<SavedClip> {
        self.save_snapshot(buffer.snapshot(), Local::now()).await
    }

    pub async fn save_snapshot(&self, snapshot: Snapshot, now: DateTime<Local>) -> Result<SavedClip> {
        let Some(frame_size) = snapshot.frame_size() else {
            return Err(RewindError::EmptyBuffer);
        };
        let frame_count = snapshot.len();

        tokio::fs::create_dir_all(&self.settings.clip_dir)
            .await
            .map_err(|err| {
                RewindError::EncodeIo(format!(
                    "clip directory {} unavailable: {err}",
                    self.settings.clip_dir.display()
                ))
            })?;
        let paths = ClipPaths::reserve(&self.settings.clip_dir, now).await?;

        let started = Instant::now();
        if let Err(err) = self.encode(snapshot, frame_size, &paths).await {
            remove_quietly(&paths.video).await;
            return Err(err);
        }
        let encode_ms = started.elapsed().as_millis() as u64;

        let started = Instant::now();
        let thumbnail_path = match self.thumbnail(&paths, frame_size).await {
            Ok(()) => Some(paths.thumbnail.clone()),
            Err(err) => {
                warn!("Thumbnail for {} skipped: {err}", paths.video.display());
                remove_quietly(&paths.thumbnail).await;
                None
            }
        };
        let thumbnail_ms = started.elapsed().as_millis() as u64;

        let new_clip = NewClip {
            user_id: self.settings.user_id,
            name: default_clip_name(now),
            video_path: paths.video.clone(),
            thumbnail_path,
            recorded_at: now,
            duration_seconds: frame_count as f64 / f64::from(self.settings.frame_rate),
        };

        let started = Instant::now();
        let id = match self.catalog.create(new_clip.clone()).await {
            Ok(id) => id,
            Err(err) => {
                warn!(
                    "Catalog rejected {}, removing orphaned files: {err}",
                    paths.video.display()
                );
                remove_quietly(&paths.video).await;
                remove_quietly(&paths.thumbnail).await;
                return Err(match err {
                    RewindError::Persistence(detail) => RewindError::Persistence(detail),
                    other => RewindError::Persistence(other.to_string()),
                });
            }
        };
        let persist_ms = started.elapsed().as_millis() as u64;

        let clip = new_clip.into_clip(id);
        info!(
            "Saved clip {id} ({frame_count} frames, {:.1}s) to {}",
            clip.duration_seconds,
            clip.video_path.display()
        );
        Ok(SavedClip {
            clip,
            timing: SaveTiming {
                frames: frame_count,
                encode_ms,
                thumbnail_ms,
                persist_ms,
            },
        })
    }

    async fn encode(&self, snapshot: Snapshot, frame_size: FrameSize, paths: &ClipPaths) -> Result<()> {
        let pixel_format = snapshot
            .frames()
            .first()
            .map(|frame| frame.format())
            .ok_or(RewindError::EmptyBuffer)?;
        let spec = WriterSpec {
            codec: self.settings.codec,
            frame_rate: self.settings.frame_rate,
            frame_size,
            pixel_format,
        };
        let mut writer = self.encoder.create_writer(&paths.video, spec).await?;
        // Each frame is let go as soon as the encoder has consumed it.
        for frame in snapshot.into_frames() {
            writer.write(frame.as_ref()).await?;
        }
        writer.close().await
    }

    async fn thumbnail(&self, paths: &ClipPaths, frame_size: FrameSize) -> Result<()> {
        let first = self.encoder.read_first_frame(&paths.video, frame_size).await?;
        let path = paths.thumbnail.clone();
        let quality = self.settings.thumbnail_quality;
        tokio::task::spawn_blocking(move || write_jpeg_thumbnail(&first, &path, quality))
            .await
            .map_err(|err| RewindError::EncodeIo(format!("thumbnail task ended abnormally: {err}")))?
    }
}

async fn remove_quietly(path: &std::path::Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!("Failed to remove {}: {err}", path.display()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rewind_catalog::InMemoryCatalog;
    use rewind_encoder::MockEncoder;
    use rewind_types::frame::{Frame, FrameLedger, PixelFormat};

    pub(crate) fn settings(dir: &str) -> SaveSettings {
        SaveSettings {
            user_id: 1,
            clip_dir: std::env::temp_dir().join(format!("{dir}-{}", std::process::id())),
            frame_rate: 30,
            codec: FourCc::AVC1,
            thumbnail_quality: 85,
        }
    }

    pub(crate) fn filled_buffer(frames: u64, capacity: usize, ledger: &Arc<FrameLedger>) -> RollingBuffer {
        let size = FrameSize::new(4, 4);
        let buffer = RollingBuffer::new(capacity);
        for seq in 1..=frames {
            buffer.push(Frame::tracked(
                size,
                PixelFormat::Rgb24,
                vec![(seq % 250) as u8; size.byte_len(PixelFormat::Rgb24)],
                seq,
                ledger.clone(),
            ));
        }
        buffer
    }

    fn pipeline(
        settings: SaveSettings,
    ) -> (Arc<SavePipeline<MockEncoder, InMemoryCatalog>>, MockEncoder, InMemoryCatalog) {
        let encoder = MockEncoder::new();
        let catalog = InMemoryCatalog::new();
        let pipeline = Arc::new(SavePipeline::new(
            settings,
            Arc::new(encoder.clone()),
            Arc::new(catalog.clone()),
        ));
        (pipeline, encoder, catalog)
    }

    #[tokio::test]
    async fn empty_buffer_is_rejected_without_side_effects() {
        let settings = settings("rewind-save-empty");
        let dir = settings.clip_dir.clone();
        let (pipeline, encoder, catalog) = pipeline(settings);
        let buffer = RollingBuffer::new(10);

        let err = pipeline.spawn_save(&buffer).err().expect("rejected");
        assert!(matches!(err, RewindError::EmptyBuffer));
        let err = pipeline.save(&buffer).await.unwrap_err();
        assert!(matches!(err, RewindError::EmptyBuffer));
        assert_eq!(encoder.frames_written(), 0);
        assert!(catalog.list(1).await.unwrap().is_empty());
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn saves_ninety_frames_as_three_seconds() {
        let settings = settings("rewind-save-ok");
        let dir = settings.clip_dir.clone();
        let (pipeline, encoder, catalog) = pipeline(settings);
        let ledger = FrameLedger::new();
        let buffer = filled_buffer(90, 900, &ledger);

        let (frames, handle) = pipeline.spawn_save(&buffer).unwrap();
        assert_eq!(frames, 90);
        let saved = handle.await.unwrap().unwrap();
        assert_eq!(saved.clip.duration_seconds, 3.0);
        assert!(saved.clip.id.is_some());
        assert!(saved.clip.video_path.is_file());
        let thumb = saved.clip.thumbnail_path.clone().expect("thumbnail");
        assert!(thumb.is_file());
        assert_eq!(encoder.frames_written(), 90);
        assert_eq!(catalog.list(1).await.unwrap()[0], saved.clip);

        // Only the buffer's own frames remain alive once the save completes.
        assert_eq!(ledger.live(), 90);
        buffer.clear();
        assert_eq!(ledger.live(), 0);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn full_window_saves_thirty_seconds() {
        let settings = settings("rewind-save-window");
        let dir = settings.clip_dir.clone();
        let (pipeline, _, _) = pipeline(settings);
        let ledger = FrameLedger::new();
        let buffer = filled_buffer(901, 900, &ledger);
        assert_eq!(ledger.released(), 1);

        let saved = pipeline.save(&buffer).await.unwrap();
        assert_eq!(saved.clip.duration_seconds, 30.0);
        assert_eq!(saved.timing.frames, 900);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn snapshot_is_immune_to_later_pushes() {
        let settings = settings("rewind-save-frozen");
        let dir = settings.clip_dir.clone();
        let (pipeline, encoder, _) = pipeline(settings);
        let ledger = FrameLedger::new();
        let buffer = filled_buffer(30, 60, &ledger);

        let (_, handle) = pipeline.spawn_save(&buffer).unwrap();
        let size = FrameSize::new(4, 4);
        for seq in 31..=60 {
            buffer.push(Frame::new(size, PixelFormat::Rgb24, vec![0; 48], seq));
        }
        let saved = handle.await.unwrap().unwrap();
        assert_eq!(saved.clip.duration_seconds, 1.0);
        assert_eq!(encoder.frames_written(), 30);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn back_to_back_saves_get_their_own_files() {
        let settings = settings("rewind-save-concurrent");
        let dir = settings.clip_dir.clone();
        let (pipeline, _, catalog) = pipeline(settings);
        let ledger = FrameLedger::new();
        let buffer = filled_buffer(30, 30, &ledger);

        let (_, first) = pipeline.spawn_save(&buffer).unwrap();
        let (_, second) = pipeline.spawn_save(&buffer).unwrap();
        let first = first.await.unwrap().unwrap().clip;
        let second = second.await.unwrap().unwrap().clip;

        assert_ne!(first.video_path, second.video_path);
        assert_ne!(first.thumbnail_path, second.thumbnail_path);
        assert!(first.video_path.is_file());
        assert!(second.video_path.is_file());
        assert_eq!(catalog.list(1).await.unwrap().len(), 2);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn encode_failure_creates_no_clip() {
        let settings = settings("rewind-save-encode-fail");
        let dir = settings.clip_dir.clone();
        let (pipeline, encoder, catalog) = pipeline(settings);
        encoder.fail_after_frames(5);
        let ledger = FrameLedger::new();
        let buffer = filled_buffer(20, 20, &ledger);

        let err = pipeline.save(&buffer).await.unwrap_err();
        assert!(matches!(err, RewindError::EncodeIo(_)));
        assert!(catalog.list(1).await.unwrap().is_empty());
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
        assert_eq!(ledger.live(), 20);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn persistence_failure_removes_orphaned_files() {
        let settings = settings("rewind-save-persist-fail");
        let dir = settings.clip_dir.clone();
        let (pipeline, encoder, catalog) = pipeline(settings);
        catalog.fail_writes(true);
        let ledger = FrameLedger::new();
        let buffer = filled_buffer(15, 30, &ledger);

        let err = pipeline.save(&buffer).await.unwrap_err();
        assert!(matches!(err, RewindError::Persistence(_)));
        assert_eq!(encoder.frames_written(), 15);
        assert!(catalog.list(1).await.unwrap().is_empty());
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
