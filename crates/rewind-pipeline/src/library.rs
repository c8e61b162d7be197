use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use rewind_catalog::CatalogStore;
use rewind_types::{
    clip::{Clip, ClipId},
    RewindError, Result,
};
use tracing::{info, warn};

use crate::naming::export_file_name;

/// The user-visible clip list, newest first, kept in step with the catalog.
///
/// Owned by the presentation context; background saves hand their results over
/// through events and the owner calls [`ClipLibrary::insert`].
pub struct ClipLibrary<C: CatalogStore> {
    catalog: Arc<C>,
    user_id: i64,
    downloads_dir: PathBuf,
    clips: Vec<Clip>,
}

impl<C: CatalogStore> ClipLibrary<C> {
    pub fn new(catalog: Arc<C>, user_id: i64, downloads_dir: impl Into<PathBuf>) -> Self {
        Self {
            catalog,
            user_id,
            downloads_dir: downloads_dir.into(),
            clips: Vec::new(),
        }
    }

    pub fn clips(&self) -> &[Clip] {
        &self.clips
    }

    pub fn get(&self, id: ClipId) -> Option<&Clip> {
        self.clips.iter().find(|clip| clip.id == Some(id))
    }

    fn require(&self, id: ClipId) -> Result<&Clip> {
        self.get(id)
            .ok_or_else(|| RewindError::InvalidInput(format!("clip {id} is not in the library")))
    }

    /// Replace the visible list with the catalog contents.
    pub async fn reload(&mut self) -> Result<usize> {
        self.clips.clear();
        let clips = self.catalog.list(self.user_id).await?;
        self.clips = clips;
        info!("Library loaded {} clips", self.clips.len());
        Ok(self.clips.len())
    }

    /// Add a freshly saved clip at its chronological position.
    pub fn insert(&mut self, clip: Clip) {
        let position = self
            .clips
            .iter()
            .position(|existing| existing.recorded_at <= clip.recorded_at)
            .unwrap_or(self.clips.len());
        self.clips.insert(position, clip);
    }

    pub async fn rename(&mut self, id: ClipId, new_name: &str) -> Result<()> {
        let name = new_name.trim();
        if name.is_empty() {
            return Err(RewindError::InvalidInput(
                "clip name must not be empty".into(),
            ));
        }
        self.require(id)?;
        self.catalog.rename(id, name).await?;
        if let Some(clip) = self.clips.iter_mut().find(|clip| clip.id == Some(id)) {
            clip.name = name.to_string();
        }
        Ok(())
    }

    /// Drop the catalog row, forget the clip and remove its files.
    ///
    /// Once the row is gone the delete has happened; files that cannot be
    /// removed afterwards are logged and left behind.
    pub async fn delete(&mut self, id: ClipId) -> Result<Clip> {
        self.require(id)?;
        self.catalog.delete(id).await?;
        let position = self
            .clips
            .iter()
            .position(|clip| clip.id == Some(id))
            .ok_or_else(|| RewindError::InvalidInput(format!("clip {id} vanished")))?;
        let clip = self.clips.remove(position);
        for file in clip.files() {
            remove_file(file).await;
        }
        info!("Deleted clip {id} ({})", clip.video_path.display());
        Ok(clip)
    }

    /// Copy the clip video into the downloads directory, overwriting.
    pub async fn copy_to_downloads(&self, id: ClipId) -> Result<PathBuf> {
        let clip = self.require(id)?;
        if !clip.video_exists() {
            return Err(RewindError::MissingFile(clip.video_path.clone()));
        }
        let fallback = clip
            .video_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("replay");
        let destination = self.downloads_dir.join(export_file_name(&clip.name, fallback));
        tokio::fs::create_dir_all(&self.downloads_dir)
            .await
            .map_err(|err| {
                RewindError::Other(anyhow::anyhow!(
                    "downloads directory {} unavailable: {err}",
                    self.downloads_dir.display()
                ))
            })?;
        tokio::fs::copy(&clip.video_path, &destination)
            .await
            .map_err(|err| {
                RewindError::Other(anyhow::anyhow!(
                    "copying {} failed: {err}",
                    clip.video_path.display()
                ))
            })?;
        info!("Copied clip {id} to {}", destination.display());
        Ok(destination)
    }
}

async fn remove_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!("{} was already gone", path.display());
        }
        Err(err) => warn!("{} left behind: {err}", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::save::tests::{filled_buffer, settings};
    use crate::SavePipeline;
    use rewind_catalog::InMemoryCatalog;
    use rewind_encoder::MockEncoder;
    use rewind_types::frame::FrameLedger;

    struct Fixture {
        library: ClipLibrary<InMemoryCatalog>,
        catalog: InMemoryCatalog,
        root: PathBuf,
        ids: Vec<ClipId>,
    }

    async fn fixture(name: &str, clips: usize) -> Fixture {
        let settings = settings(name);
        let root = settings.clip_dir.clone();
        let catalog = InMemoryCatalog::new();
        let pipeline = SavePipeline::new(
            settings,
            Arc::new(MockEncoder::new()),
            Arc::new(catalog.clone()),
        );
        let ledger = FrameLedger::new();
        let buffer = filled_buffer(6, 6, &ledger);
        let mut ids = Vec::new();
        for i in 0..clips {
            let now = chrono::Local::now() + chrono::Duration::seconds(i as i64);
            let saved = pipeline.save_snapshot(buffer.snapshot(), now).await.unwrap();
            ids.push(saved.clip.id.unwrap());
        }
        let mut library = ClipLibrary::new(Arc::new(catalog.clone()), 1, root.join("downloads"));
        library.reload().await.unwrap();
        Fixture {
            library,
            catalog,
            root,
            ids,
        }
    }

    #[tokio::test]
    async fn reload_lists_newest_first() {
        let fx = fixture("rewind-lib-reload", 3).await;
        let listed: Vec<_> = fx.library.clips().iter().filter_map(|c| c.id).collect();
        let mut expected = fx.ids.clone();
        expected.reverse();
        assert_eq!(listed, expected);
        std::fs::remove_dir_all(&fx.root).unwrap();
    }

    #[tokio::test]
    async fn rename_rejects_blank_names_locally() {
        let mut fx = fixture("rewind-lib-rename", 1).await;
        let id = fx.ids[0];
        fx.catalog.fail_writes(true);
        let err = fx.library.rename(id, "   ").await.unwrap_err();
        assert!(matches!(err, RewindError::InvalidInput(_)));

        let err = fx.library.rename(id, "Goal").await.unwrap_err();
        assert!(matches!(err, RewindError::Persistence(_)));
        fx.catalog.fail_writes(false);

        fx.library.rename(id, "  Goal ").await.unwrap();
        assert_eq!(fx.library.get(id).unwrap().name, "Goal");
        assert_eq!(fx.catalog.list(1).await.unwrap()[0].name, "Goal");
        std::fs::remove_dir_all(&fx.root).unwrap();
    }

    #[tokio::test]
    async fn delete_removes_row_and_files() {
        let mut fx = fixture("rewind-lib-delete", 2).await;
        let id = fx.ids[0];
        let clip = fx.library.get(id).cloned().unwrap();
        assert!(clip.video_exists());

        fx.library.delete(id).await.unwrap();
        assert!(!clip.video_path.exists());
        assert!(clip.thumbnail_path.iter().all(|p| !p.exists()));
        assert!(fx.library.get(id).is_none());
        let remaining = fx.catalog.list(1).await.unwrap();
        assert!(remaining.iter().all(|c| c.id != Some(id)));
        assert_eq!(remaining.len(), 1);
        std::fs::remove_dir_all(&fx.root).unwrap();
    }

    #[tokio::test]
    async fn delete_completes_when_a_file_cannot_be_removed() {
        let mut fx = fixture("rewind-lib-delete-stuck", 1).await;
        let id = fx.ids[0];
        let clip = fx.library.get(id).cloned().unwrap();
        std::fs::remove_file(&clip.video_path).unwrap();
        std::fs::create_dir(&clip.video_path).unwrap();

        let deleted = fx.library.delete(id).await.unwrap();
        assert_eq!(deleted.id, Some(id));
        assert!(fx.library.clips().is_empty());
        assert!(fx.catalog.list(1).await.unwrap().is_empty());
        assert!(clip.thumbnail_path.iter().all(|p| !p.exists()));
        std::fs::remove_dir_all(&fx.root).unwrap();
    }

    #[tokio::test]
    async fn catalog_failure_keeps_clip_and_files() {
        let mut fx = fixture("rewind-lib-delete-fail", 1).await;
        let id = fx.ids[0];
        fx.catalog.fail_writes(true);
        assert!(fx.library.delete(id).await.is_err());
        let clip = fx.library.get(id).cloned().expect("still listed");
        assert!(clip.video_exists());
        std::fs::remove_dir_all(&fx.root).unwrap();
    }

    #[tokio::test]
    async fn copy_to_downloads_uses_sanitised_name() {
        let mut fx = fixture("rewind-lib-copy", 1).await;
        let id = fx.ids[0];
        fx.library.rename(id, "Match: final/half").await.unwrap();
        let destination = fx.library.copy_to_downloads(id).await.unwrap();
        assert_eq!(destination, fx.root.join("downloads").join("Match finalhalf.mp4"));
        assert!(destination.is_file());

        let clip = fx.library.get(id).cloned().unwrap();
        std::fs::remove_file(&clip.video_path).unwrap();
        let err = fx.library.copy_to_downloads(id).await.unwrap_err();
        assert!(matches!(err, RewindError::MissingFile(_)));
        std::fs::remove_dir_all(&fx.root).unwrap();
    }

    #[tokio::test]
    async fn insert_keeps_chronological_order() {
        let mut fx = fixture("rewind-lib-insert", 2).await;
        let mut older = fx.library.clips()[1].clone();
        older.id = Some(ClipId(500));
        older.recorded_at = older.recorded_at - chrono::Duration::hours(1);
        fx.library.insert(older);
        assert_eq!(fx.library.clips().last().and_then(|c| c.id), Some(ClipId(500)));
        std::fs::remove_dir_all(&fx.root).unwrap();
    }
}
