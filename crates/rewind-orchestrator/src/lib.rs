//! Coordinates capture, saving, the clip library and playback for one presentation layer.

use std::{sync::Arc, time::Duration};

use futures::{stream::BoxStream, StreamExt};
use rewind_bus::EventBus;
use rewind_capture::{CaptureLoop, FrameSource, RollingBuffer};
use rewind_catalog::CatalogStore;
use rewind_encoder::VideoEncoder;
use rewind_ops::EventJournal;
use rewind_pipeline::{ClipLibrary, SavePipeline, SaveSettings, SavedClip};
use rewind_playback::{MediaSurface, PlaybackSession};
use rewind_types::{
    clip::{Clip, ClipId},
    config::RewindConfig,
    events::{EventPayload, LifecyclePhase, SystemEvent},
    frame::Frame,
    playback::{PlaybackMode, PlaybackStatus},
    telemetry::{BufferStats, CaptureMetrics},
    RewindError, Result,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, warn};

/// Owner of every mutable piece of the replay system.
///
/// All commands run on the caller's task. Saves run on background tasks and
/// report back only through the event bus; [`ReplayOrchestrator::apply_event`]
/// folds their results into the library.
pub struct ReplayOrchestrator<S, E, C, M, B>
where
    S: FrameSource + 'static,
    E: VideoEncoder + 'static,
    C: CatalogStore + 'static,
    M: MediaSurface,
    B: EventBus + 'static,
{
    capture: CaptureLoop<S>,
    pipeline: Arc<SavePipeline<E, C>>,
    library: ClipLibrary<C>,
    playback: PlaybackSession<M>,
    playback_rx: mpsc::UnboundedReceiver<PlaybackStatus>,
    bus: Arc<B>,
    journal: EventJournal,
    saves: Vec<JoinHandle<()>>,
    progress_interval: Duration,
}

impl<S, E, C, M, B> ReplayOrchestrator<S, E, C, M, B>
where
    S: FrameSource + 'static,
    E: VideoEncoder + 'static,
    C: CatalogStore + 'static,
    M: MediaSurface,
    B: EventBus + 'static,
{
    pub fn new(
        config: &RewindConfig,
        source: S,
        encoder: Arc<E>,
        catalog: Arc<C>,
        surface: M,
        bus: Arc<B>,
        journal: EventJournal,
    ) -> Result<Self> {
        config.validate()?;
        let buffer = Arc::new(RollingBuffer::new(config.capture.capacity()));
        let capture = CaptureLoop::new(config.capture.clone(), source, buffer);
        let pipeline = Arc::new(SavePipeline::new(
            SaveSettings::from_config(config)?,
            encoder,
            catalog.clone(),
        ));
        let library = ClipLibrary::new(catalog, config.user_id, &config.storage.downloads_dir);

        let (playback_tx, playback_rx) = mpsc::unbounded_channel();
        let playback = PlaybackSession::new(surface).with_listener(move |status| {
            let _ = playback_tx.send(status.clone());
        });

        Ok(Self {
            capture,
            pipeline,
            library,
            playback,
            playback_rx,
            bus,
            journal,
            saves: Vec::new(),
            progress_interval: Duration::from_millis(config.playback.progress_interval_ms),
        })
    }

    pub fn subscribe(&self) -> BoxStream<'static, SystemEvent> {
        self.bus.subscribe()
    }

    pub fn journal(&self) -> &EventJournal {
        &self.journal
    }

    pub fn clips(&self) -> &[Clip] {
        self.library.clips()
    }

    pub fn buffer(&self) -> Arc<RollingBuffer> {
        self.capture.buffer()
    }

    pub fn buffer_stats(&self) -> BufferStats {
        self.capture.buffer().stats()
    }

    pub fn capture_metrics(&self) -> CaptureMetrics {
        self.capture.metrics()
    }

    /// Live feed for the presentation layer; it keeps flowing across capture restarts.
    pub fn preview(&self) -> BoxStream<'static, Arc<Frame>> {
        self.capture.preview_frames().boxed()
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_running()
    }

    pub fn playback_status(&self) -> PlaybackStatus {
        self.playback.status()
    }

    pub fn progress_interval(&self) -> Duration {
        self.progress_interval
    }

    pub fn pending_saves(&self) -> usize {
        self.saves.iter().filter(|save| !save.is_finished()).count()
    }

    async fn publish(&self, payload: EventPayload) {
        let event = SystemEvent::new(payload);
        self.journal.record(event.clone()).await;
        if let Err(err) = self.bus.publish(event).await {
            warn!("Event publication failed: {err}");
        }
    }

    /// Report a rejected command to the user and hand the error back.
    async fn reject<T>(&self, err: RewindError) -> Result<T> {
        warn!("Command rejected: {err}");
        self.publish(EventPayload::Notice(err.user_message())).await;
        Err(err)
    }

    /// Load the library and start capturing.
    pub async fn boot(&mut self) -> Result<()> {
        self.reload_library().await?;
        self.start_capture().await?;
        Ok(())
    }

    pub async fn reload_library(&mut self) -> Result<usize> {
        match self.library.reload().await {
            Ok(clips) => {
                self.publish(EventPayload::LibraryLoaded { clips }).await;
                Ok(clips)
            }
            Err(err) => self.reject(err).await,
        }
    }

    /// Start the capture loop. An unavailable camera is a notice, not a failure.
    pub async fn start_capture(&mut self) -> Result<bool> {
        if self.capture.is_running() {
            return Ok(true);
        }
        match self.capture.start().await {
            Ok(()) => {
                self.publish(EventPayload::Lifecycle(LifecyclePhase::CaptureStarted))
                    .await;
                Ok(true)
            }
            Err(err @ RewindError::DeviceUnavailable(_)) => {
                self.publish(EventPayload::Notice(err.user_message())).await;
                Ok(false)
            }
            Err(err) => self.reject(err).await,
        }
    }

    pub async fn stop_capture(&mut self) -> Result<()> {
        let was_running = self.capture.is_running();
        self.capture.stop().await?;
        if was_running {
            self.publish(EventPayload::Lifecycle(LifecyclePhase::CaptureStopped))
                .await;
        }
        Ok(())
    }

    /// Freeze the rolling window and encode it in the background.
    ///
    /// Returns the number of frames in the snapshot. Completion arrives as a
    /// `SaveCompleted` or `SaveFailed` event.
    pub async fn save(&mut self) -> Result<usize> {
        let buffer = self.capture.buffer();
        let (frames, handle) = match self.pipeline.spawn_save(&buffer) {
            Ok(started) => started,
            Err(err) => return self.reject(err).await,
        };
        self.publish(EventPayload::SaveStarted { frames }).await;

        let bus = self.bus.clone();
        let journal = self.journal.clone();
        let forward = tokio::spawn(async move {
            let payload = match handle.await {
                Ok(Ok(SavedClip { clip, timing })) => EventPayload::SaveCompleted { clip, timing },
                Ok(Err(err)) => EventPayload::SaveFailed(err.user_message()),
                Err(err) => EventPayload::SaveFailed(
                    orchestrator_error(format!("save task ended abnormally: {err}")).user_message(),
                ),
            };
            let event = SystemEvent::new(payload);
            journal.record(event.clone()).await;
            if let Err(err) = bus.publish(event).await {
                warn!("Save result could not be published: {err}");
            }
        });
        self.saves.retain(|save| !save.is_finished());
        self.saves.push(forward);
        Ok(frames)
    }

    /// Wait for every in-flight save to publish its result.
    pub async fn wait_for_saves(&mut self) {
        for save in self.saves.drain(..) {
            if let Err(err) = save.await {
                warn!("Save forwarder ended abnormally: {err}");
            }
        }
    }

    /// Fold a bus event into owned state. Returns true when something changed.
    pub fn apply_event(&mut self, event: &SystemEvent) -> bool {
        match &event.payload {
            EventPayload::SaveCompleted { clip, .. } => {
                if clip.id.is_some_and(|id| self.library.get(id).is_some()) {
                    return false;
                }
                info!("Clip {} added to library", clip.display_info());
                self.library.insert(clip.clone());
                true
            }
            _ => false,
        }
    }

    pub async fn rename(&mut self, id: ClipId, name: &str) -> Result<()> {
        if let Err(err) = self.library.rename(id, name).await {
            return self.reject(err).await;
        }
        let name = self
            .library
            .get(id)
            .map(|clip| clip.name.clone())
            .unwrap_or_default();
        self.publish(EventPayload::ClipRenamed { id, name }).await;
        Ok(())
    }

    pub async fn delete(&mut self, id: ClipId) -> Result<Clip> {
        if self.playback.status().clip == Some(id) {
            self.playback.return_to_live();
            self.flush_playback().await;
        }
        match self.library.delete(id).await {
            Ok(clip) => {
                self.publish(EventPayload::ClipDeleted(id)).await;
                Ok(clip)
            }
            Err(err) => self.reject(err).await,
        }
    }

    pub async fn copy_to_downloads(&mut self, id: ClipId) -> Result<std::path::PathBuf> {
        match self.library.copy_to_downloads(id).await {
            Ok(destination) => {
                self.publish(EventPayload::ClipCopied {
                    id,
                    destination: destination.display().to_string(),
                })
                .await;
                Ok(destination)
            }
            Err(err) => self.reject(err).await,
        }
    }

    /// Begin reviewing a clip. The surface reports back through [`Self::media_opened`].
    pub async fn select(&mut self, id: ClipId) -> Result<Clip> {
        let Some(clip) = self.library.get(id).cloned() else {
            return self
                .reject(RewindError::InvalidInput(format!("clip {id} is not in the library")))
                .await;
        };
        let selected = self.playback.select(&clip);
        self.flush_playback().await;
        match selected {
            Ok(()) => Ok(clip),
            Err(err) => self.reject(err).await,
        }
    }

    pub async fn media_opened(&mut self, duration: Duration) -> bool {
        let opened = self.playback.opened(duration);
        self.flush_playback().await;
        opened
    }

    pub async fn toggle(&mut self) -> bool {
        let toggled = self.playback.toggle();
        self.flush_playback().await;
        toggled
    }

    pub async fn seek_start(&mut self) -> bool {
        let started = self.playback.seek_start();
        self.flush_playback().await;
        started
    }

    pub async fn seek_commit(&mut self, position_secs: f64) -> Option<Duration> {
        let position = self.playback.seek_commit(position_secs);
        self.flush_playback().await;
        position
    }

    /// Seek relative to the current position, as a single start/commit pair.
    pub async fn seek_by(&mut self, delta_secs: f64) -> Option<Duration> {
        let current = self.playback.status().position.as_secs_f64();
        if !self.playback.seek_start() {
            return None;
        }
        let position = self.playback.seek_commit(current + delta_secs);
        self.flush_playback().await;
        position
    }

    pub async fn media_ended(&mut self) {
        self.playback.media_ended();
        self.flush_playback().await;
    }

    pub async fn return_to_live(&mut self) {
        self.playback.return_to_live();
        self.flush_playback().await;
    }

    /// Read the surface playhead; called every progress interval.
    pub async fn tick_playback(&mut self) {
        if self.playback.poll_progress() {
            let status = self.playback.status();
            if status.mode == PlaybackMode::Playing
                && !status.duration.is_zero()
                && status.position >= status.duration
            {
                self.playback.media_ended();
            }
        }
        self.flush_playback().await;
    }

    async fn flush_playback(&mut self) {
        while let Ok(status) = self.playback_rx.try_recv() {
            self.publish(EventPayload::Playback(status)).await;
        }
    }

    /// Stop capture, let in-flight saves finish and announce shutdown.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.playback.return_to_live();
        self.flush_playback().await;
        self.stop_capture().await?;
        self.wait_for_saves().await;
        self.publish(EventPayload::Lifecycle(LifecyclePhase::Shutdown))
            .await;
        Ok(())
    }
}

pub fn orchestrator_error(message: impl Into<String>) -> RewindError {
    RewindError::Orchestrator(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use rewind_bus::LocalBus;
    use rewind_capture::MockFrameSource;
    use rewind_catalog::InMemoryCatalog;
    use rewind_encoder::MockEncoder;
    use rewind_playback::{RecordingSurface, SurfaceCommand};
    use rewind_types::{
        config::StorageConfig,
        events::EventKind,
        frame::{Frame, FrameSize, PixelFormat},
    };
    use std::path::PathBuf;

    type TestOrchestrator =
        ReplayOrchestrator<MockFrameSource, MockEncoder, InMemoryCatalog, RecordingSurface, LocalBus>;

    const SIZE: FrameSize = FrameSize::new(8, 6);

    struct Fixture {
        orchestrator: TestOrchestrator,
        events: BoxStream<'static, SystemEvent>,
        catalog: InMemoryCatalog,
        encoder: MockEncoder,
        surface: RecordingSurface,
        root: PathBuf,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    fn fixture_with(name: &str, source: MockFrameSource) -> Fixture {
        let root = std::env::temp_dir().join(format!("rewind-orch-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        let mut config = RewindConfig::default();
        config.user_id = 3;
        config.capture.frame_width = SIZE.width;
        config.capture.frame_height = SIZE.height;
        config.storage = StorageConfig {
            clip_dir: root.join("replays").display().to_string(),
            downloads_dir: root.join("downloads").display().to_string(),
            catalog_path: root.join("catalog.json").display().to_string(),
        };
        let catalog = InMemoryCatalog::new();
        let encoder = MockEncoder::new();
        let surface = RecordingSurface::new();
        let bus = Arc::new(LocalBus::new(64).unwrap());
        let orchestrator = ReplayOrchestrator::new(
            &config,
            source,
            Arc::new(encoder.clone()),
            Arc::new(catalog.clone()),
            surface.clone(),
            bus,
            EventJournal::new(64),
        )
        .unwrap();
        let events = orchestrator.subscribe();
        Fixture {
            orchestrator,
            events,
            catalog,
            encoder,
            surface,
            root,
        }
    }

    fn fixture(name: &str) -> Fixture {
        fixture_with(name, MockFrameSource::new(SIZE))
    }

    fn fill(orchestrator: &TestOrchestrator, frames: u64) {
        let buffer = orchestrator.buffer();
        for sequence in 1..=frames {
            let data = vec![sequence as u8; SIZE.byte_len(PixelFormat::Rgb24)];
            buffer.push(Frame::new(SIZE, PixelFormat::Rgb24, data, sequence));
        }
    }

    async fn next_of(events: &mut BoxStream<'static, SystemEvent>, kind: EventKind) -> SystemEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = events.next().await.expect("bus closed");
                if event.kind == kind {
                    return event;
                }
            }
        })
        .await
        .expect("event not published in time")
    }

    async fn saved_clip(fx: &mut Fixture, frames: u64) -> Clip {
        fill(&fx.orchestrator, frames);
        assert_eq!(fx.orchestrator.save().await.unwrap(), frames as usize);
        fx.orchestrator.wait_for_saves().await;
        loop {
            let event = next_of(&mut fx.events, EventKind::Save).await;
            if let EventPayload::SaveCompleted { clip, .. } = &event.payload {
                assert!(fx.orchestrator.apply_event(&event));
                return clip.clone();
            }
        }
    }

    #[tokio::test]
    async fn unavailable_camera_is_a_notice() {
        let mut fx = fixture_with("nocam", MockFrameSource::unavailable(SIZE));
        fx.orchestrator.boot().await.unwrap();
        assert!(!fx.orchestrator.is_capturing());
        let notice = next_of(&mut fx.events, EventKind::Notice).await;
        assert!(matches!(notice.payload, EventPayload::Notice(ref m) if m == "Camera not found."));
    }

    #[tokio::test]
    async fn capture_fills_buffer_and_stop_drains_it() {
        let mut fx = fixture("capture");
        let mut preview = fx.orchestrator.preview();
        assert!(fx.orchestrator.start_capture().await.unwrap());
        let frame = tokio::time::timeout(Duration::from_secs(2), preview.next())
            .await
            .expect("preview frame in time")
            .expect("preview frame");
        assert_eq!(frame.size(), SIZE);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(fx.orchestrator.buffer_stats().len > 0);
        fx.orchestrator.stop_capture().await.unwrap();
        assert_eq!(fx.orchestrator.buffer_stats().len, 0);
        assert!(fx.orchestrator.capture_metrics().frames_captured > 0);
    }

    #[tokio::test]
    async fn empty_buffer_save_is_rejected_without_side_effects() {
        let mut fx = fixture("empty");
        let err = fx.orchestrator.save().await.unwrap_err();
        assert!(matches!(err, RewindError::EmptyBuffer));
        let notice = next_of(&mut fx.events, EventKind::Notice).await;
        assert!(matches!(notice.payload, EventPayload::Notice(ref m) if m.contains("empty")));
        assert_eq!(fx.encoder.frames_written(), 0);
        assert!(fx.catalog.list(3).await.unwrap().is_empty());
        assert!(!fx.root.join("replays").exists());
    }

    #[tokio::test]
    async fn completed_save_joins_the_library() {
        let mut fx = fixture("save");
        let clip = saved_clip(&mut fx, 90).await;
        assert_eq!(clip.duration_seconds, 3.0);
        assert!(clip.video_exists());
        assert_eq!(fx.orchestrator.clips().len(), 1);

        let duplicate = SystemEvent::new(EventPayload::SaveCompleted {
            clip: clip.clone(),
            timing: Default::default(),
        });
        assert!(!fx.orchestrator.apply_event(&duplicate));
        assert_eq!(fx.orchestrator.journal().len().await, 2);
    }

    #[tokio::test]
    async fn persistence_failure_is_reported_and_not_listed() {
        let mut fx = fixture("persist");
        fx.catalog.fail_writes(true);
        fill(&fx.orchestrator, 30);
        fx.orchestrator.save().await.unwrap();
        fx.orchestrator.wait_for_saves().await;
        let started = next_of(&mut fx.events, EventKind::Save).await;
        assert!(matches!(started.payload, EventPayload::SaveStarted { frames: 30 }));
        let failed = next_of(&mut fx.events, EventKind::Save).await;
        assert!(matches!(failed.payload, EventPayload::SaveFailed(_)));
        assert!(fx.orchestrator.clips().is_empty());
    }

    #[tokio::test]
    async fn playback_round_trip_publishes_status() {
        let mut fx = fixture("playback");
        let clip = saved_clip(&mut fx, 60).await;
        let id = clip.id.unwrap();

        fx.orchestrator.select(id).await.unwrap();
        assert!(fx.orchestrator.media_opened(Duration::from_secs(2)).await);
        assert_eq!(fx.orchestrator.playback_status().mode, PlaybackMode::Playing);

        assert_eq!(
            fx.orchestrator.seek_by(10.0).await,
            Some(Duration::from_secs(2))
        );
        fx.surface.advance_to(Duration::from_secs(2));
        fx.orchestrator.tick_playback().await;
        assert_eq!(fx.orchestrator.playback_status().mode, PlaybackMode::Live);
        assert!(fx.surface.commands().contains(&SurfaceCommand::Close));

        let mut modes = Vec::new();
        while modes.last() != Some(&PlaybackMode::Live) || modes.len() < 2 {
            let event = next_of(&mut fx.events, EventKind::Playback).await;
            if let EventPayload::Playback(status) = event.payload {
                modes.push(status.mode);
            }
        }
        assert_eq!(modes.first(), Some(&PlaybackMode::Loading));
        assert!(modes.contains(&PlaybackMode::Ended));
    }

    #[tokio::test]
    async fn selecting_a_clip_with_missing_video_stays_live() {
        let mut fx = fixture("missing");
        let clip = saved_clip(&mut fx, 10).await;
        std::fs::remove_file(&clip.video_path).unwrap();
        let err = fx.orchestrator.select(clip.id.unwrap()).await.unwrap_err();
        assert!(matches!(err, RewindError::MissingFile(_)));
        assert_eq!(fx.orchestrator.playback_status(), PlaybackStatus::default());
    }

    #[tokio::test]
    async fn deleting_the_playing_clip_returns_to_live() {
        let mut fx = fixture("delete");
        let clip = saved_clip(&mut fx, 10).await;
        let id = clip.id.unwrap();
        fx.orchestrator.select(id).await.unwrap();
        fx.orchestrator.delete(id).await.unwrap();
        assert_eq!(fx.orchestrator.playback_status().mode, PlaybackMode::Live);
        assert!(fx.orchestrator.clips().is_empty());
        assert!(!clip.video_path.exists());
        assert!(fx.catalog.list(3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rename_and_copy_publish_library_events() {
        let mut fx = fixture("library");
        let clip = saved_clip(&mut fx, 10).await;
        let id = clip.id.unwrap();

        assert!(fx.orchestrator.rename(id, "").await.is_err());
        fx.orchestrator.rename(id, " Save of the day ").await.unwrap();
        let renamed = next_of(&mut fx.events, EventKind::Library).await;
        assert!(matches!(renamed.payload, EventPayload::ClipRenamed { ref name, .. } if name == "Save of the day"));

        let destination = fx.orchestrator.copy_to_downloads(id).await.unwrap();
        assert_eq!(
            destination,
            fx.root.join("downloads").join("Save of the day.mp4")
        );
        let copied = next_of(&mut fx.events, EventKind::Library).await;
        assert!(matches!(copied.payload, EventPayload::ClipCopied { .. }));
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_saves() {
        let mut fx = fixture("shutdown");
        fill(&fx.orchestrator, 20);
        fx.orchestrator.save().await.unwrap();
        fx.orchestrator.shutdown().await.unwrap();
        assert_eq!(fx.orchestrator.pending_saves(), 0);
        assert_eq!(fx.catalog.list(3).await.unwrap().len(), 1);
    }
}
