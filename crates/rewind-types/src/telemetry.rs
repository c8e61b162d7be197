use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters maintained by the capture loop.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CaptureMetrics {
    pub ticks: u64,
    pub frames_captured: u64,
    pub empty_reads: u64,
    pub last_frame_at: Option<DateTime<Utc>>,
}

/// Point-in-time occupancy of the rolling buffer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub len: usize,
    pub capacity: usize,
    pub evicted: u64,
}

/// Wall-clock cost of each save stage.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SaveTiming {
    pub frames: usize,
    pub encode_ms: u64,
    pub thumbnail_ms: u64,
    pub persist_ms: u64,
}
