//! Shared domain types for the rewind replay recorder.

pub mod clip;
pub mod config;
pub mod events;
pub mod frame;
pub mod playback;
pub mod telemetry;

mod errors;

pub use errors::{RewindError, Result};
