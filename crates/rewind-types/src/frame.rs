use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Rgba8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Rgba8 => 4,
        }
    }

    /// Name understood by ffmpeg's `-pix_fmt`.
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Rgba8 => "rgba",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn byte_len(&self, format: PixelFormat) -> usize {
        self.width as usize * self.height as usize * format.bytes_per_pixel()
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Counts how many frames were acquired and released through it.
///
/// Frames created with [`Frame::tracked`] report to the ledger when they are
/// built and when they are dropped, which makes leaks and double releases observable.
#[derive(Debug, Default)]
pub struct FrameLedger {
    acquired: AtomicU64,
    released: AtomicU64,
}

impl FrameLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }

    /// Frames acquired but not yet released.
    pub fn live(&self) -> u64 {
        self.acquired().saturating_sub(self.released())
    }
}

/// A single decoded video frame.
///
/// Frames are immutable once built. Containers share them behind an `Arc`, and
/// the pixel memory is released exactly once, when the last holder lets go.
pub struct Frame {
    size: FrameSize,
    format: PixelFormat,
    data: Vec<u8>,
    captured_at: DateTime<Utc>,
    sequence: u64,
    ledger: Option<Arc<FrameLedger>>,
}

impl Frame {
    pub fn new(size: FrameSize, format: PixelFormat, data: Vec<u8>, sequence: u64) -> Self {
        Self {
            size,
            format,
            data,
            captured_at: Utc::now(),
            sequence,
            ledger: None,
        }
    }

    /// Build a frame whose lifetime is reported to `ledger`.
    pub fn tracked(
        size: FrameSize,
        format: PixelFormat,
        data: Vec<u8>,
        sequence: u64,
        ledger: Arc<FrameLedger>,
    ) -> Self {
        ledger.acquired.fetch_add(1, Ordering::SeqCst);
        let mut frame = Self::new(size, format, data, sequence);
        frame.ledger = Some(ledger);
        frame
    }

    pub fn empty() -> Self {
        Self::new(FrameSize::new(0, 0), PixelFormat::Rgb24, Vec::new(), 0)
    }

    pub fn size(&self) -> FrameSize {
        self.size
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Monotonic capture counter assigned by the frame source.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// True when the frame carries no usable pixels.
    pub fn is_empty(&self) -> bool {
        self.size.width == 0
            || self.size.height == 0
            || self.data.len() < self.size.byte_len(self.format)
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(ledger) = &self.ledger {
            ledger.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("size", &self.size)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .field("captured_at", &self.captured_at)
            .field("sequence", &self.sequence)
            .finish()
    }
}
