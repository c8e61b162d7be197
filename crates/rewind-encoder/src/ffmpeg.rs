use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use rewind_types::{
    config::EncoderConfig,
    frame::{Frame, FrameSize, PixelFormat},
    Result,
};
use tokio::{
    io::AsyncWriteExt,
    process::{Child, ChildStdin, Command},
};
use tracing::{debug, info};

use crate::{encode_error, FourCc, VideoEncoder, VideoWriter, WriterSpec};

const DEFAULT_FFMPEG: &str = "ffmpeg";

/// Encoder delegating compression and muxing to an ffmpeg child process.
pub struct FfmpegEncoder {
    ffmpeg_path: PathBuf,
}

impl FfmpegEncoder {
    pub fn new(config: &EncoderConfig) -> Self {
        let ffmpeg_path = config
            .ffmpeg_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_FFMPEG));
        Self { ffmpeg_path }
    }
}

/// ffmpeg encoder library for a container codec tag.
fn codec_library(codec: FourCc) -> Result<&'static str> {
    match codec.as_str() {
        "avc1" | "h264" | "H264" => Ok("libx264"),
        "mp4v" => Ok("mpeg4"),
        "hvc1" | "hev1" => Ok("libx265"),
        other => Err(encode_error(format!("unsupported codec '{other}'"))),
    }
}

#[async_trait]
impl VideoEncoder for FfmpegEncoder {
    async fn create_writer(&self, path: &Path, spec: WriterSpec) -> Result<Box<dyn VideoWriter>> {
        let library = codec_library(spec.codec)?;
        let size = spec.frame_size.to_string();
        let rate = spec.frame_rate.to_string();
        let mut child = Command::new(&self.ffmpeg_path)
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(["-f", "rawvideo", "-pix_fmt", spec.pixel_format.ffmpeg_name()])
            .args(["-s", size.as_str(), "-r", rate.as_str()])
            .args(["-i", "pipe:0"])
            .args(["-c:v", library, "-pix_fmt", "yuv420p"])
            .args(["-tag:v", spec.codec.as_str()])
            .args(["-movflags", "+faststart", "-f", "mp4"])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| encode_error(format!("failed to start ffmpeg: {err}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| encode_error("ffmpeg stdin unavailable"))?;

        info!(
            "Encoding {} at {} fps ({}) into {}",
            spec.frame_size,
            spec.frame_rate,
            spec.codec,
            path.display()
        );
        Ok(Box::new(FfmpegWriter {
            spec,
            path: path.to_path_buf(),
            child: Some(child),
            stdin: Some(stdin),
            frames: 0,
        }))
    }

    async fn read_first_frame(&self, path: &Path, size: FrameSize) -> Result<Frame> {
        let size_arg = size.to_string();
        let output = Command::new(&self.ffmpeg_path)
            .args(["-hide_banner", "-loglevel", "error"])
            .arg("-i")
            .arg(path)
            .args(["-frames:v", "1", "-f", "rawvideo"])
            .args(["-pix_fmt", PixelFormat::Rgb24.ffmpeg_name()])
            .args(["-s", size_arg.as_str(), "pipe:1"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| encode_error(format!("failed to start ffmpeg: {err}")))?;

        if !output.status.success() {
            return Err(encode_error(format!(
                "reading back {} failed: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let expected = size.byte_len(PixelFormat::Rgb24);
        if output.stdout.len() < expected {
            return Err(encode_error(format!(
                "first frame of {} truncated: {} of {expected} bytes",
                path.display(),
                output.stdout.len()
            )));
        }
        let mut data = output.stdout;
        data.truncate(expected);
        Ok(Frame::new(size, PixelFormat::Rgb24, data, 0))
    }
}

struct FfmpegWriter {
    spec: WriterSpec,
    path: PathBuf,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    frames: u64,
}

#[async_trait]
impl VideoWriter for FfmpegWriter {
    async fn write(&mut self, frame: &Frame) -> Result<()> {
        self.spec.check(frame)?;
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| encode_error("writer already closed"))?;
        stdin
            .write_all(frame.data())
            .await
            .map_err(|err| encode_error(format!("writing frame {} failed: {err}", self.frames)))?;
        self.frames += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin
                .shutdown()
                .await
                .map_err(|err| encode_error(format!("closing encoder input failed: {err}")))?;
        }
        let Some(child) = self.child.take() else {
            return Ok(());
        };
        let output = child
            .wait_with_output()
            .await
            .map_err(|err| encode_error(format!("waiting for ffmpeg failed: {err}")))?;
        if !output.status.success() {
            return Err(encode_error(format!(
                "ffmpeg exited with {} while writing {}: {}",
                output.status,
                self.path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        debug!("Wrote {} frames to {}", self.frames, self.path.display());
        Ok(())
    }
}
