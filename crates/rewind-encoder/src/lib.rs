//! Video container writing, first-frame readback and thumbnail output.

mod ffmpeg;
mod mock;
mod thumbnail;

use std::{fmt, path::Path, str::FromStr};

use async_trait::async_trait;
use rewind_types::{
    frame::{Frame, FrameSize, PixelFormat},
    RewindError, Result,
};

pub use ffmpeg::FfmpegEncoder;
pub use mock::MockEncoder;
pub use thumbnail::write_jpeg_thumbnail;

/// Four character codec identifier such as `avc1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourCc([u8; 4]);

impl FourCc {
    pub const AVC1: FourCc = FourCc(*b"avc1");

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl FromStr for FourCc {
    type Err = RewindError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes: [u8; 4] = s
            .as_bytes()
            .try_into()
            .map_err(|_| RewindError::Configuration(format!("invalid fourCC '{s}'")))?;
        if !bytes.iter().all(u8::is_ascii_graphic) {
            return Err(RewindError::Configuration(format!("invalid fourCC '{s}'")));
        }
        Ok(FourCc(bytes))
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters fixed for the lifetime of a writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterSpec {
    pub codec: FourCc,
    pub frame_rate: u32,
    pub frame_size: FrameSize,
    pub pixel_format: PixelFormat,
}

impl WriterSpec {
    fn check(&self, frame: &Frame) -> Result<()> {
        if frame.size() != self.frame_size || frame.format() != self.pixel_format {
            return Err(encode_error(format!(
                "frame {} {:?} does not match writer {} {:?}",
                frame.size(),
                frame.format(),
                self.frame_size,
                self.pixel_format
            )));
        }
        Ok(())
    }
}

/// Open output stream of one video file.
#[async_trait]
pub trait VideoWriter: Send {
    async fn write(&mut self, frame: &Frame) -> Result<()>;
    /// Finish the container. The file is only valid after this returns `Ok`.
    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait VideoEncoder: Send + Sync {
    async fn create_writer(&self, path: &Path, spec: WriterSpec) -> Result<Box<dyn VideoWriter>>;
    /// Decode the first frame of a finished file at the given size.
    async fn read_first_frame(&self, path: &Path, size: FrameSize) -> Result<Frame>;
}

pub fn encode_error(message: impl Into<String>) -> RewindError {
    RewindError::EncodeIo(message.into())
}
