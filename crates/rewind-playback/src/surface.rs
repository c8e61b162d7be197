use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use rewind_types::{RewindError, Result};
use tracing::info;

/// External element that renders a clip; the session only drives its transport.
pub trait MediaSurface: Send {
    /// Begin loading `path`. Completion is reported back as `opened(duration)`.
    fn open(&mut self, path: &Path) -> Result<()>;
    fn play(&mut self);
    fn pause(&mut self);
    fn seek(&mut self, position: Duration);
    /// Current transport position, when media is attached.
    fn position(&self) -> Option<Duration>;
    /// Detach from the media.
    fn close(&mut self);
}

/// Commands observed by [`RecordingSurface`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceCommand {
    Open(PathBuf),
    Play,
    Pause,
    Seek(Duration),
    Close,
}

#[derive(Debug, Default)]
struct SurfaceState {
    commands: Vec<SurfaceCommand>,
    attached: bool,
    position: Duration,
    fail_open: bool,
}

/// Headless surface that records every command it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingSurface {
    state: Arc<Mutex<SurfaceState>>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut SurfaceState) -> T) -> T {
        let mut guard = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn commands(&self) -> Vec<SurfaceCommand> {
        self.with_state(|state| state.commands.clone())
    }

    pub fn is_attached(&self) -> bool {
        self.with_state(|state| state.attached)
    }

    /// Move the simulated playhead, as a running media element would.
    pub fn advance_to(&self, position: Duration) {
        self.with_state(|state| state.position = position);
    }

    pub fn fail_next_open(&self, fail: bool) {
        self.with_state(|state| state.fail_open = fail);
    }
}

impl MediaSurface for RecordingSurface {
    fn open(&mut self, path: &Path) -> Result<()> {
        self.with_state(|state| {
            if state.fail_open {
                state.fail_open = false;
                return Err(RewindError::Playback(format!(
                    "surface could not open {}",
                    path.display()
                )));
            }
            state.commands.push(SurfaceCommand::Open(path.to_path_buf()));
            state.attached = true;
            state.position = Duration::ZERO;
            Ok(())
        })?;
        info!("Surface opened {}", path.display());
        Ok(())
    }

    fn play(&mut self) {
        self.with_state(|state| state.commands.push(SurfaceCommand::Play));
    }

    fn pause(&mut self) {
        self.with_state(|state| state.commands.push(SurfaceCommand::Pause));
    }

    fn seek(&mut self, position: Duration) {
        self.with_state(|state| {
            state.commands.push(SurfaceCommand::Seek(position));
            state.position = position;
        });
    }

    fn position(&self) -> Option<Duration> {
        self.with_state(|state| state.attached.then_some(state.position))
    }

    fn close(&mut self) {
        self.with_state(|state| {
            state.commands.push(SurfaceCommand::Close);
            state.attached = false;
        });
    }
}

/// Surface that advances its playhead by wall clock, for renderers without a decoder.
#[derive(Debug, Default)]
pub struct ClockSurface {
    media: Option<PathBuf>,
    offset: Duration,
    playing_since: Option<Instant>,
}

impl ClockSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn media(&self) -> Option<&Path> {
        self.media.as_deref()
    }
}

impl MediaSurface for ClockSurface {
    fn open(&mut self, path: &Path) -> Result<()> {
        if !path.is_file() {
            return Err(RewindError::MissingFile(path.to_path_buf()));
        }
        self.media = Some(path.to_path_buf());
        self.offset = Duration::ZERO;
        self.playing_since = None;
        Ok(())
    }

    fn play(&mut self) {
        if self.media.is_some() && self.playing_since.is_none() {
            self.playing_since = Some(Instant::now());
        }
    }

    fn pause(&mut self) {
        if let Some(since) = self.playing_since.take() {
            self.offset += since.elapsed();
        }
    }

    fn seek(&mut self, position: Duration) {
        self.offset = position;
        if self.playing_since.is_some() {
            self.playing_since = Some(Instant::now());
        }
    }

    fn position(&self) -> Option<Duration> {
        self.media.as_ref()?;
        let running = self
            .playing_since
            .map(|since| since.elapsed())
            .unwrap_or_default();
        Some(self.offset + running)
    }

    fn close(&mut self) {
        self.media = None;
        self.offset = Duration::ZERO;
        self.playing_since = None;
    }
}
