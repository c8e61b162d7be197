//! Operational helpers: logging setup, storage directories and the event journal.

use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::Arc,
};

use rewind_types::{
    config::{OpsConfig, StorageConfig},
    events::SystemEvent,
    RewindError, Result,
};
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

pub fn init_tracing(config: &OpsConfig) -> Result<()> {
    let filter = EnvFilter::try_new(config.log_level.clone())
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|err| ops_error(format!("failed to create log filter: {err}")))?;

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| ops_error(format!("tracing init error: {err}")))?;
    Ok(())
}

pub fn ensure_dir(path: impl AsRef<Path>) -> Result<PathBuf> {
    let dir = path.as_ref().to_path_buf();
    std::fs::create_dir_all(&dir)
        .map_err(|err| ops_error(format!("failed to create {}: {err}", dir.display())))?;
    info!("Directory ready at {:?}", dir);
    Ok(dir)
}

/// Create the clip and downloads directories plus the catalog's parent.
pub fn prepare_storage(storage: &StorageConfig) -> Result<()> {
    ensure_dir(&storage.clip_dir)?;
    ensure_dir(&storage.downloads_dir)?;
    if let Some(parent) = Path::new(&storage.catalog_path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
    {
        ensure_dir(parent)?;
    }
    Ok(())
}

/// Bounded in-memory record of the most recent events.
#[derive(Clone)]
pub struct EventJournal {
    events: Arc<Mutex<VecDeque<SystemEvent>>>,
    capacity: usize,
}

impl EventJournal {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub async fn record(&self, event: SystemEvent) {
        let mut events = self.events.lock().await;
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    pub async fn snapshot(&self) -> Vec<SystemEvent> {
        self.events.lock().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }

    /// Write the journal as JSON lines, oldest first.
    pub async fn export(&self, path: impl AsRef<Path>) -> Result<usize> {
        let events = self.snapshot().await;
        let mut doc = String::new();
        for event in &events {
            let line = serde_json::to_string(event)
                .map_err(|err| ops_error(format!("journal serialisation failed: {err}")))?;
            doc.push_str(&line);
            doc.push('\n');
        }
        tokio::fs::write(path.as_ref(), doc)
            .await
            .map_err(|err| ops_error(format!("journal export failed: {err}")))?;
        Ok(events.len())
    }
}

impl Default for EventJournal {
    fn default() -> Self {
        Self::new(OpsConfig::default().journal_capacity)
    }
}

pub fn ops_error(message: impl Into<String>) -> RewindError {
    RewindError::Ops(message.into())
}
