use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use rewind_types::{
    frame::{Frame, FrameSize},
    telemetry::BufferStats,
};
use tracing::debug;

struct BufferState {
    frames: VecDeque<Arc<Frame>>,
    evicted: u64,
}

/// Bounded FIFO holding the most recent frames, oldest first.
///
/// Every mutation happens under one lock, so a snapshot taken from another
/// execution context never observes a half-applied push or eviction. The lock
/// only ever guards pointer moves; pixel memory is never copied or freed while
/// it is held.
pub struct RollingBuffer {
    capacity: usize,
    state: Mutex<BufferState>,
}

impl RollingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(BufferState {
                frames: VecDeque::with_capacity(capacity),
                evicted: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().frames.is_empty()
    }

    /// Admit `frame`, evicting the oldest entry first when full.
    pub fn push(&self, frame: impl Into<Arc<Frame>>) {
        let frame = frame.into();
        let evicted = {
            let mut state = self.lock();
            let evicted = if state.frames.len() >= self.capacity {
                state.evicted += 1;
                state.frames.pop_front()
            } else {
                None
            };
            state.frames.push_back(frame);
            evicted
        };
        if let Some(old) = evicted {
            debug!(sequence = old.sequence(), "evicting frame from replay window");
            drop(old);
        }
    }

    /// Chronologically ordered view of the current contents.
    ///
    /// The snapshot shares the frames with the buffer, so later evictions
    /// cannot release anything it still holds.
    pub fn snapshot(&self) -> Snapshot {
        let frames: Vec<Arc<Frame>> = {
            let state = self.lock();
            state.frames.iter().cloned().collect()
        };
        Snapshot { frames }
    }

    /// Remove and release every buffered frame. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let drained: Vec<Arc<Frame>> = {
            let mut state = self.lock();
            state.frames.drain(..).collect()
        };
        let count = drained.len();
        drop(drained);
        count
    }

    pub fn stats(&self) -> BufferStats {
        let state = self.lock();
        BufferStats {
            len: state.frames.len(),
            capacity: self.capacity,
            evicted: state.evicted,
        }
    }
}

/// Frozen view of the buffer taken at one instant.
#[derive(Debug)]
pub struct Snapshot {
    frames: Vec<Arc<Frame>>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[Arc<Frame>] {
        &self.frames
    }

    /// Dimensions of the first frame; the encoder sizes its output from it.
    pub fn frame_size(&self) -> Option<FrameSize> {
        self.frames.first().map(|frame| frame.size())
    }

    /// Hand the frames over to a consumer, which lets go of each one as it goes.
    pub fn into_frames(self) -> Vec<Arc<Frame>> {
        self.frames
    }
}
