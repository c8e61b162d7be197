use std::{path::PathBuf, process::Stdio};

use async_trait::async_trait;
use rewind_types::{
    config::CaptureConfig,
    frame::{Frame, FrameSize, PixelFormat},
    RewindError, Result,
};
use tokio::{
    io::AsyncReadExt,
    process::{Child, ChildStdout, Command},
    sync::mpsc,
    task::JoinHandle,
    time,
};
use tracing::{debug, info, warn};

use crate::FrameSource;

const DEFAULT_FFMPEG: &str = "ffmpeg";
const FRAME_QUEUE: usize = 2;

/// Camera source that lets an ffmpeg child process decode the device into raw RGB.
///
/// A reader task pulls whole frames off the pipe and queues them, so an
/// abandoned `read` never leaves the byte stream misaligned.
pub struct FfmpegCameraSource {
    config: CaptureConfig,
    ffmpeg_path: PathBuf,
    child: Option<Child>,
    reader: Option<JoinHandle<()>>,
    frames: Option<mpsc::Receiver<Frame>>,
}

impl FfmpegCameraSource {
    pub fn new(config: CaptureConfig) -> Self {
        let ffmpeg_path = config
            .ffmpeg_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_FFMPEG));
        Self {
            config,
            ffmpeg_path,
            child: None,
            reader: None,
            frames: None,
        }
    }

    fn device(&self) -> String {
        if self.config.input_format == "v4l2" {
            format!("/dev/video{}", self.config.device_index)
        } else {
            self.config.device_index.to_string()
        }
    }

    fn command(&self) -> Command {
        let size = self.config.frame_size().to_string();
        let rate = self.config.frame_rate.to_string();
        let device = self.device();
        let mut command = Command::new(&self.ffmpeg_path);
        command
            .args(["-hide_banner", "-loglevel", "error"])
            .args(["-f", self.config.input_format.as_str()])
            .args(["-framerate", rate.as_str()])
            .args(["-video_size", size.as_str()])
            .args(["-i", device.as_str()])
            .args(["-f", "rawvideo", "-pix_fmt", PixelFormat::Rgb24.ffmpeg_name()])
            .args(["-s", size.as_str()])
            .arg("pipe:1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

async fn pump_frames(mut stdout: ChildStdout, size: FrameSize, tx: mpsc::Sender<Frame>) {
    let format = PixelFormat::Rgb24;
    let frame_len = size.byte_len(format);
    let mut sequence = 0u64;
    loop {
        let mut data = vec![0u8; frame_len];
        if let Err(err) = stdout.read_exact(&mut data).await {
            debug!("Camera pipe closed: {err}");
            break;
        }
        sequence += 1;
        let frame = Frame::new(size, format, data, sequence);
        match tx.try_send(frame) {
            Ok(()) => {}
            // Consumer is behind; the stale frame is dropped.
            Err(mpsc::error::TrySendError::Full(_)) => {}
            Err(mpsc::error::TrySendError::Closed(_)) => break,
        }
    }
}

#[async_trait]
impl FrameSource for FfmpegCameraSource {
    async fn open(&mut self) -> Result<()> {
        if self.child.is_some() {
            return Ok(());
        }
        let device = self.device();
        info!("Opening camera {device} via {:?}", self.ffmpeg_path);
        let mut child = self.command().spawn().map_err(|err| {
            RewindError::DeviceUnavailable(format!("failed to launch ffmpeg for {device}: {err}"))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            RewindError::DeviceUnavailable(format!("no video pipe for {device}"))
        })?;

        let (tx, mut rx) = mpsc::channel(FRAME_QUEUE);
        let reader = tokio::spawn(pump_frames(stdout, self.config.frame_size(), tx));

        // The device counts as available once the first frame arrives in time.
        let first = time::timeout(self.config.read_timeout(), rx.recv()).await;
        match first {
            Ok(Some(frame)) => {
                debug!("Camera {device} delivered first frame {}", frame.size());
            }
            Ok(None) | Err(_) => {
                reader.abort();
                if let Err(err) = child.kill().await {
                    warn!("Failed to stop ffmpeg after open failure: {err}");
                }
                return Err(RewindError::DeviceUnavailable(format!(
                    "camera {device} produced no frames within {:?}",
                    self.config.read_timeout()
                )));
            }
        }

        self.child = Some(child);
        self.reader = Some(reader);
        self.frames = Some(rx);
        Ok(())
    }

    async fn read(&mut self) -> Result<Option<Frame>> {
        match self.frames.as_mut() {
            Some(rx) => Ok(rx.recv().await),
            None => Ok(None),
        }
    }

    async fn release(&mut self) {
        self.frames = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut child) = self.child.take() {
            if let Err(err) = child.kill().await {
                warn!("Failed to stop camera process: {err}");
            }
            info!("Camera {} released", self.device());
        }
    }

    fn is_open(&self) -> bool {
        self.child.is_some()
    }
}
