//! Snapshot-and-encode save pipeline and the clip library commands.

mod library;
mod naming;
mod save;

pub use library::ClipLibrary;
pub use naming::{default_clip_name, export_file_name, ClipPaths};
pub use save::{SavePipeline, SaveSettings, SavedClip};
