//! Playback session state machine: live view, clip review and transport.

mod surface;

use std::time::Duration;

use rewind_types::{
    clip::Clip,
    playback::{PlaybackMode, PlaybackStatus},
    RewindError, Result,
};
use tracing::{debug, info};

pub use surface::{ClockSurface, MediaSurface, RecordingSurface, SurfaceCommand};

type StatusListener = Box<dyn FnMut(&PlaybackStatus) + Send>;

/// Governs whether the live feed or a saved clip is shown.
///
/// The owning context is the only writer. Every mode change is reported to the
/// listener, including the transient `Ended` mode.
pub struct PlaybackSession<M: MediaSurface> {
    surface: M,
    mode: PlaybackMode,
    clip: Option<Clip>,
    position: Duration,
    duration: Duration,
    resume: PlaybackMode,
    listener: Option<StatusListener>,
}

impl<M: MediaSurface> PlaybackSession<M> {
    pub fn new(surface: M) -> Self {
        Self {
            surface,
            mode: PlaybackMode::Live,
            clip: None,
            position: Duration::ZERO,
            duration: Duration::ZERO,
            resume: PlaybackMode::Playing,
            listener: None,
        }
    }

    pub fn with_listener(mut self, listener: impl FnMut(&PlaybackStatus) + Send + 'static) -> Self {
        self.listener = Some(Box::new(listener));
        self
    }

    pub fn mode(&self) -> PlaybackMode {
        self.mode
    }

    pub fn clip(&self) -> Option<&Clip> {
        self.clip.as_ref()
    }

    pub fn surface(&self) -> &M {
        &self.surface
    }

    pub fn status(&self) -> PlaybackStatus {
        PlaybackStatus {
            mode: self.mode,
            clip: self.clip.as_ref().and_then(|clip| clip.id),
            position: self.position,
            duration: self.duration,
        }
    }

    fn notify(&mut self) {
        let status = self.status();
        if let Some(listener) = self.listener.as_mut() {
            listener(&status);
        }
    }

    fn enter(&mut self, mode: PlaybackMode) {
        debug!("Playback {:?} -> {:?}", self.mode, mode);
        self.mode = mode;
        self.notify();
    }

    fn detach(&mut self) {
        if self.clip.take().is_some() {
            self.surface.close();
        }
        self.position = Duration::ZERO;
        self.duration = Duration::ZERO;
    }

    /// Start loading `clip`. A clip whose video is gone is rejected and nothing changes.
    pub fn select(&mut self, clip: &Clip) -> Result<()> {
        if !clip.video_exists() {
            return Err(RewindError::MissingFile(clip.video_path.clone()));
        }
        self.detach();
        if let Err(err) = self.surface.open(&clip.video_path) {
            self.enter(PlaybackMode::Live);
            return Err(err);
        }
        info!("Loading clip {}", clip.display_info());
        self.clip = Some(clip.clone());
        self.enter(PlaybackMode::Loading);
        Ok(())
    }

    /// The surface finished opening the media; playback starts automatically.
    pub fn opened(&mut self, duration: Duration) -> bool {
        if self.mode != PlaybackMode::Loading {
            return false;
        }
        self.duration = duration;
        self.position = Duration::ZERO;
        self.surface.play();
        self.enter(PlaybackMode::Playing);
        true
    }

    pub fn toggle(&mut self) -> bool {
        match self.mode {
            PlaybackMode::Playing => {
                self.surface.pause();
                self.enter(PlaybackMode::Paused);
                true
            }
            PlaybackMode::Paused => {
                self.surface.play();
                self.enter(PlaybackMode::Playing);
                true
            }
            _ => false,
        }
    }

    /// The user grabbed the position control; progress readback is suspended.
    pub fn seek_start(&mut self) -> bool {
        match self.mode {
            PlaybackMode::Playing | PlaybackMode::Paused => {
                self.resume = self.mode;
                self.enter(PlaybackMode::Seeking);
                true
            }
            _ => false,
        }
    }

    /// Jump to `position_secs`, clamped into the clip, and restore the prior mode.
    pub fn seek_commit(&mut self, position_secs: f64) -> Option<Duration> {
        if self.mode != PlaybackMode::Seeking {
            return None;
        }
        let max = self.duration.as_secs_f64();
        let target = if position_secs.is_nan() {
            0.0
        } else {
            position_secs.clamp(0.0, max)
        };
        let position = Duration::from_secs_f64(target);
        self.surface.seek(position);
        self.position = position;
        self.enter(self.resume);
        Some(position)
    }

    /// Progress readback from the surface. Ignored unless a clip is playing or paused.
    pub fn report_progress(&mut self, position: Duration) -> bool {
        if !matches!(self.mode, PlaybackMode::Playing | PlaybackMode::Paused) {
            return false;
        }
        self.position = position.min(self.duration);
        self.notify();
        true
    }

    /// Poll the surface playhead while playing.
    pub fn poll_progress(&mut self) -> bool {
        if self.mode != PlaybackMode::Playing {
            return false;
        }
        match self.surface.position() {
            Some(position) => self.report_progress(position),
            None => false,
        }
    }

    /// The clip played to its end: pass through `Ended` and fall back to live.
    pub fn media_ended(&mut self) {
        if self.mode == PlaybackMode::Live {
            return;
        }
        self.enter(PlaybackMode::Ended);
        self.surface.seek(Duration::ZERO);
        self.return_to_live();
    }

    pub fn return_to_live(&mut self) {
        self.detach();
        self.resume = PlaybackMode::Playing;
        if self.mode != PlaybackMode::Live {
            self.enter(PlaybackMode::Live);
        }
    }
}
