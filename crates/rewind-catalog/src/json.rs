use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rewind_types::{
    clip::{Clip, ClipId, NewClip},
    Result,
};
use tokio::{fs, sync::Mutex};
use tracing::info;

use crate::{catalog_error, CatalogStore, CatalogTable};

/// Catalog persisted as a single JSON document, rewritten on every change.
pub struct JsonCatalog {
    path: PathBuf,
    table: Mutex<CatalogTable>,
}

impl JsonCatalog {
    /// Load the catalog at `path`, starting empty when the file does not exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let table = match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|err| {
                catalog_error(format!("corrupt catalog {}: {err}", path.display()))
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => CatalogTable::default(),
            Err(err) => {
                return Err(catalog_error(format!(
                    "unable to read catalog {}: {err}",
                    path.display()
                )))
            }
        };
        info!(
            "Catalog {} loaded with {} rows",
            path.display(),
            table.rows.len()
        );
        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    async fn persist(&self, table: &CatalogTable) -> Result<()> {
        let doc = serde_json::to_vec_pretty(table)
            .map_err(|err| catalog_error(format!("catalog serialisation failed: {err}")))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| catalog_error(format!("catalog dir unavailable: {err}")))?;
        }
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, doc)
            .await
            .map_err(|err| catalog_error(format!("catalog write failed: {err}")))?;
        fs::rename(&staging, &self.path)
            .await
            .map_err(|err| catalog_error(format!("catalog commit failed: {err}")))
    }

    /// Apply `change` to a copy of the table and keep it only once it is on disk.
    async fn commit<T>(
        &self,
        change: impl FnOnce(&mut CatalogTable) -> Result<T> + Send,
    ) -> Result<T> {
        let mut guard = self.table.lock().await;
        let mut next = guard.clone();
        let value = change(&mut next)?;
        self.persist(&next).await?;
        *guard = next;
        Ok(value)
    }
}

#[async_trait]
impl CatalogStore for JsonCatalog {
    async fn create(&self, clip: NewClip) -> Result<ClipId> {
        self.commit(move |table| Ok(table.insert(clip))).await
    }

    async fn list(&self, user_id: i64) -> Result<Vec<Clip>> {
        Ok(self.table.lock().await.list(user_id))
    }

    async fn rename(&self, id: ClipId, name: &str) -> Result<()> {
        let name = name.to_string();
        self.commit(move |table| table.rename(id, &name)).await
    }

    async fn delete(&self, id: ClipId) -> Result<()> {
        self.commit(move |table| table.delete(id)).await
    }
}
