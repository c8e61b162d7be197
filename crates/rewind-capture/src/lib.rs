//! Camera frame sources, the rolling replay buffer and the capture loop.

mod buffer;
mod camera;
mod capture_loop;

use std::sync::Arc;

use async_trait::async_trait;
use rewind_types::{
    frame::{Frame, FrameLedger, FrameSize, PixelFormat},
    RewindError, Result,
};
use tokio::time::{sleep, Duration};
use tracing::info;

pub use buffer::{RollingBuffer, Snapshot};
pub use camera::FfmpegCameraSource;
pub use capture_loop::{CaptureLoop, PreviewReceiver};

/// A camera-like device producing one frame per read.
#[async_trait]
pub trait FrameSource: Send {
    /// Acquire the device. Fails with [`RewindError::DeviceUnavailable`].
    async fn open(&mut self) -> Result<()>;
    /// Read the next frame. `Ok(None)` means nothing usable was available.
    async fn read(&mut self) -> Result<Option<Frame>>;
    /// Give the device back. Safe to call when already released.
    async fn release(&mut self);
    fn is_open(&self) -> bool;
}

/// Synthetic source used for demos and integration tests.
pub struct MockFrameSource {
    size: FrameSize,
    available: bool,
    open: bool,
    sequence: u64,
    empty_every: Option<u64>,
    read_delay: Duration,
    ledger: Option<Arc<FrameLedger>>,
}

impl MockFrameSource {
    pub fn new(size: FrameSize) -> Self {
        Self {
            size,
            available: true,
            open: false,
            sequence: 0,
            empty_every: None,
            read_delay: Duration::ZERO,
            ledger: None,
        }
    }

    /// A source whose device can never be opened.
    pub fn unavailable(size: FrameSize) -> Self {
        Self {
            available: false,
            ..Self::new(size)
        }
    }

    /// Every `n`th read reports an empty frame.
    pub fn with_empty_every(mut self, n: u64) -> Self {
        self.empty_every = Some(n.max(1));
        self
    }

    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<FrameLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    fn render(&self, sequence: u64) -> Vec<u8> {
        let format = PixelFormat::Rgb24;
        let mut data = Vec::with_capacity(self.size.byte_len(format));
        let shade = (sequence % 256) as u8;
        for y in 0..self.size.height {
            for x in 0..self.size.width {
                data.push(shade);
                data.push((x % 256) as u8);
                data.push((y % 256) as u8);
            }
        }
        data
    }
}

#[async_trait]
impl FrameSource for MockFrameSource {
    async fn open(&mut self) -> Result<()> {
        if !self.available {
            return Err(RewindError::DeviceUnavailable(
                "mock camera is configured as unavailable".into(),
            ));
        }
        info!("Opening mock camera at {}", self.size);
        self.open = true;
        Ok(())
    }

    async fn read(&mut self) -> Result<Option<Frame>> {
        if !self.open {
            return Ok(None);
        }
        if !self.read_delay.is_zero() {
            sleep(self.read_delay).await;
        }
        self.sequence += 1;
        if let Some(n) = self.empty_every {
            if self.sequence % n == 0 {
                return Ok(None);
            }
        }
        let data = self.render(self.sequence);
        let frame = match &self.ledger {
            Some(ledger) => Frame::tracked(
                self.size,
                PixelFormat::Rgb24,
                data,
                self.sequence,
                ledger.clone(),
            ),
            None => Frame::new(self.size, PixelFormat::Rgb24, data, self.sequence),
        };
        Ok(Some(frame))
    }

    async fn release(&mut self) {
        if self.open {
            info!("Releasing mock camera");
        }
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Generate an error aligned with capture semantics.
pub fn capture_error(message: impl Into<String>) -> RewindError {
    RewindError::Capture(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_source_requires_open() {
        let mut source = MockFrameSource::new(FrameSize::new(4, 2));
        assert!(source.read().await.unwrap().is_none());
        source.open().await.unwrap();
        let frame = source.read().await.unwrap().expect("frame");
        assert_eq!(frame.sequence(), 1);
        assert!(!frame.is_empty());
        source.release().await;
        assert!(!source.is_open());
    }

    #[tokio::test]
    async fn unavailable_source_fails_to_open() {
        let mut source = MockFrameSource::unavailable(FrameSize::new(4, 2));
        let err = source.open().await.unwrap_err();
        assert!(matches!(err, RewindError::DeviceUnavailable(_)));
    }

    #[tokio::test]
    async fn empty_reads_are_reported() {
        let mut source = MockFrameSource::new(FrameSize::new(2, 2)).with_empty_every(2);
        source.open().await.unwrap();
        assert!(source.read().await.unwrap().is_some());
        assert!(source.read().await.unwrap().is_none());
        assert!(source.read().await.unwrap().is_some());
    }
}
