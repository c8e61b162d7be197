//! Clip metadata persistence.

mod json;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use rewind_types::{
    clip::{Clip, ClipId, NewClip},
    RewindError, Result,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

pub use json::JsonCatalog;

/// Per-user store of clip metadata rows.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn create(&self, clip: NewClip) -> Result<ClipId>;
    /// Clips owned by `user_id`, newest first.
    async fn list(&self, user_id: i64) -> Result<Vec<Clip>>;
    async fn rename(&self, id: ClipId, name: &str) -> Result<()>;
    async fn delete(&self, id: ClipId) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CatalogRow {
    user_id: i64,
    clip: Clip,
}

/// Table of rows shared by the in-memory and file-backed stores.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogTable {
    next_id: i64,
    rows: Vec<CatalogRow>,
}

impl CatalogTable {
    fn insert(&mut self, clip: NewClip) -> ClipId {
        self.next_id += 1;
        let id = ClipId(self.next_id);
        let user_id = clip.user_id;
        self.rows.push(CatalogRow {
            user_id,
            clip: clip.into_clip(id),
        });
        id
    }

    fn list(&self, user_id: i64) -> Vec<Clip> {
        let mut clips: Vec<Clip> = self
            .rows
            .iter()
            .filter(|row| row.user_id == user_id)
            .map(|row| row.clip.clone())
            .collect();
        clips.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at).then(b.id.cmp(&a.id)));
        clips
    }

    fn rename(&mut self, id: ClipId, name: &str) -> Result<()> {
        let row = self
            .rows
            .iter_mut()
            .find(|row| row.clip.id == Some(id))
            .ok_or_else(|| catalog_error(format!("clip {id} not found")))?;
        row.clip.name = name.to_string();
        Ok(())
    }

    fn delete(&mut self, id: ClipId) -> Result<()> {
        let before = self.rows.len();
        self.rows.retain(|row| row.clip.id != Some(id));
        if self.rows.len() == before {
            return Err(catalog_error(format!("clip {id} not found")));
        }
        Ok(())
    }
}

/// Volatile catalog used by tests and demo runs.
#[derive(Clone, Default)]
pub struct InMemoryCatalog {
    table: Arc<Mutex<CatalogTable>>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with a persistence error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(catalog_error("catalog is not accepting writes"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalog {
    async fn create(&self, clip: NewClip) -> Result<ClipId> {
        self.check_writable()?;
        let id = self.table.lock().await.insert(clip);
        debug!("Catalog row {id} created");
        Ok(id)
    }

    async fn list(&self, user_id: i64) -> Result<Vec<Clip>> {
        Ok(self.table.lock().await.list(user_id))
    }

    async fn rename(&self, id: ClipId, name: &str) -> Result<()> {
        self.check_writable()?;
        self.table.lock().await.rename(id, name)
    }

    async fn delete(&self, id: ClipId) -> Result<()> {
        self.check_writable()?;
        self.table.lock().await.delete(id)
    }
}

pub fn catalog_error(message: impl Into<String>) -> RewindError {
    RewindError::Persistence(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Local};
    use std::path::PathBuf;

    pub(crate) fn new_clip(user_id: i64, name: &str, age_secs: i64) -> NewClip {
        NewClip {
            user_id,
            name: name.into(),
            video_path: PathBuf::from(format!("/clips/{name}.mp4")),
            thumbnail_path: None,
            recorded_at: Local::now() - Duration::seconds(age_secs),
            duration_seconds: 30.0,
        }
    }

    #[tokio::test]
    async fn list_is_per_user_and_newest_first() {
        let catalog = InMemoryCatalog::new();
        let old = catalog.create(new_clip(1, "old", 60)).await.unwrap();
        let new = catalog.create(new_clip(1, "new", 0)).await.unwrap();
        catalog.create(new_clip(2, "other", 10)).await.unwrap();

        let clips = catalog.list(1).await.unwrap();
        let ids: Vec<_> = clips.iter().filter_map(|c| c.id).collect();
        assert_eq!(ids, vec![new, old]);
    }

    #[tokio::test]
    async fn rename_and_delete_round_trip() {
        let catalog = InMemoryCatalog::new();
        let id = catalog.create(new_clip(1, "clip", 0)).await.unwrap();
        catalog.rename(id, "Highlight").await.unwrap();
        assert_eq!(catalog.list(1).await.unwrap()[0].name, "Highlight");

        catalog.delete(id).await.unwrap();
        assert!(catalog.list(1).await.unwrap().is_empty());
        assert!(catalog.delete(id).await.is_err());
    }

    #[tokio::test]
    async fn injected_write_failure() {
        let catalog = InMemoryCatalog::new();
        catalog.fail_writes(true);
        let err = catalog.create(new_clip(1, "clip", 0)).await.unwrap_err();
        assert!(matches!(err, RewindError::Persistence(_)));
        assert!(catalog.list(1).await.unwrap().is_empty());
    }
}
