use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use rewind_types::{
    frame::{Frame, FrameSize, PixelFormat},
    Result,
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt, BufWriter},
};
use tracing::info;

use crate::{encode_error, VideoEncoder, VideoWriter, WriterSpec};

const MAGIC: &[u8; 4] = b"RWND";
const HEADER_LEN: usize = 4 + 4 * 3;

/// Encoder writing uncompressed frames behind a small header.
///
/// Used for demos without ffmpeg and by tests. Failures can be injected.
#[derive(Clone, Default)]
pub struct MockEncoder {
    fail_create: Arc<AtomicBool>,
    fail_after: Arc<AtomicU64>,
    frames_written: Arc<AtomicU64>,
}

impl MockEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Fail the write following `frames` successful ones. Zero disables.
    pub fn fail_after_frames(&self, frames: u64) {
        self.fail_after.store(frames, Ordering::SeqCst);
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoEncoder for MockEncoder {
    async fn create_writer(&self, path: &Path, spec: WriterSpec) -> Result<Box<dyn VideoWriter>> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(encode_error(format!(
                "mock writer refused {}",
                path.display()
            )));
        }
        let file = File::create(path)
            .await
            .map_err(|err| encode_error(format!("create {} failed: {err}", path.display())))?;
        let mut out = BufWriter::new(file);
        let mut header = Vec::with_capacity(HEADER_LEN);
        header.extend_from_slice(MAGIC);
        header.extend_from_slice(&spec.frame_size.width.to_le_bytes());
        header.extend_from_slice(&spec.frame_size.height.to_le_bytes());
        header.extend_from_slice(&spec.frame_rate.to_le_bytes());
        out.write_all(&header)
            .await
            .map_err(|err| encode_error(format!("header write failed: {err}")))?;
        info!("Mock encoder writing {}", path.display());
        Ok(Box::new(MockWriter {
            spec,
            path: path.to_path_buf(),
            out: Some(out),
            written: 0,
            fail_after: self.fail_after.load(Ordering::SeqCst),
            total: self.frames_written.clone(),
        }))
    }

    async fn read_first_frame(&self, path: &Path, size: FrameSize) -> Result<Frame> {
        let mut file = File::open(path)
            .await
            .map_err(|err| encode_error(format!("open {} failed: {err}", path.display())))?;
        let mut header = [0u8; HEADER_LEN];
        file.read_exact(&mut header)
            .await
            .map_err(|err| encode_error(format!("{} has no header: {err}", path.display())))?;
        if &header[..4] != MAGIC {
            return Err(encode_error(format!("{} is not a mock video", path.display())));
        }
        let width = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        let height = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
        let stored = FrameSize::new(width, height);
        if stored != size {
            return Err(encode_error(format!(
                "{} holds {stored} frames, expected {size}",
                path.display()
            )));
        }
        let mut data = vec![0u8; size.byte_len(PixelFormat::Rgb24)];
        file.read_exact(&mut data)
            .await
            .map_err(|err| encode_error(format!("{} has no frames: {err}", path.display())))?;
        Ok(Frame::new(size, PixelFormat::Rgb24, data, 0))
    }
}

struct MockWriter {
    spec: WriterSpec,
    path: PathBuf,
    out: Option<BufWriter<File>>,
    written: u64,
    fail_after: u64,
    total: Arc<AtomicU64>,
}

#[async_trait]
impl VideoWriter for MockWriter {
    async fn write(&mut self, frame: &Frame) -> Result<()> {
        self.spec.check(frame)?;
        if self.fail_after > 0 && self.written >= self.fail_after {
            return Err(encode_error(format!(
                "mock write failure after {} frames",
                self.written
            )));
        }
        let out = self
            .out
            .as_mut()
            .ok_or_else(|| encode_error("writer already closed"))?;
        out.write_all(frame.data())
            .await
            .map_err(|err| encode_error(format!("frame write failed: {err}")))?;
        self.written += 1;
        self.total.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut out) = self.out.take() {
            out.flush()
                .await
                .map_err(|err| encode_error(format!("flush failed: {err}")))?;
        }
        let written = fs::metadata(&self.path)
            .await
            .map_err(|err| encode_error(format!("{} vanished: {err}", self.path.display())))?;
        info!(
            "Mock encoder closed {} ({} frames, {} bytes)",
            self.path.display(),
            self.written,
            written.len()
        );
        Ok(())
    }
}
