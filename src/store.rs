use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::model::{Change, Chapter, Scan, Source};
use crate::reconcile::Reconciliation;

/// Persists sources, chapter lists and scan history.
///
/// `save_scan` must be atomic: after it returns, readers observe either the
/// whole commit (chapters, scan record, changes) or none of it.
#[async_trait]
pub trait ScanHistoryStore: Send + Sync {
    async fn list_sources(&self) -> Result<Vec<Source>, StoreError>;

    /// Returns the source with `last_scan` filled from history.
    async fn load_source(&self, source_id: &str) -> Result<Option<Source>, StoreError>;

    async fn put_source(&self, source: &Source) -> Result<(), StoreError>;

    async fn load_chapters(&self, source_id: &str) -> Result<Vec<Chapter>, StoreError>;

    async fn scan_history(&self, source_id: &str) -> Result<Vec<Scan>, StoreError>;

    async fn last_scan(&self, source_id: &str) -> Result<Option<Scan>, StoreError> {
        Ok(self.scan_history(source_id).await?.pop())
    }

    async fn changes(&self, source_id: &str) -> Result<Vec<Change>, StoreError>;

    async fn save_scan(&self, source_id: &str, commit: &Reconciliation) -> Result<(), StoreError>;

    /// Claims `source_id` for one scan. `Ok(None)` means another scanner holds it.
    ///
    /// Stores shared between processes must make this exclusive across them.
    async fn lock_source(&self, _source_id: &str) -> Result<Option<SourceLock>, StoreError> {
        Ok(Some(SourceLock::default()))
    }
}

/// Held for the duration of a scan; dropping it releases the claim.
#[derive(Debug, Default)]
pub struct SourceLock {
    _file: Option<std::fs::File>,
}

/// Everything a scan mutates for one source, stored as one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceState {
    pub chapters: Vec<Chapter>,
    pub scans: Vec<Scan>,
    pub changes: Vec<Change>,
}

impl SourceState {
    fn apply(&mut self, commit: &Reconciliation) {
        self.chapters = commit.chapters.clone();
        self.scans.push(commit.scan.clone());
        self.changes.extend(commit.changes.iter().cloned());
    }
}

/// JSON documents under `<base>/sources/<id>/`, replaced by atomic rename.
#[derive(Debug)]
pub struct LocalFsScanStore {
    base_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalFsScanStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn sources_dir(&self) -> PathBuf {
        self.base_dir.join("sources")
    }

    fn source_dir(&self, source_id: &str) -> Result<PathBuf, StoreError> {
        validate_source_id(source_id)?;
        Ok(self.sources_dir().join(source_id))
    }

    fn source_json_path(&self, source_id: &str) -> Result<PathBuf, StoreError> {
        Ok(self.source_dir(source_id)?.join("source.json"))
    }

    fn state_json_path(&self, source_id: &str) -> Result<PathBuf, StoreError> {
        Ok(self.source_dir(source_id)?.join("state.json"))
    }

    fn lock_path(&self, source_id: &str) -> Result<PathBuf, StoreError> {
        Ok(self.source_dir(source_id)?.join("scan.lock"))
    }

    async fn load_state(&self, source_id: &str) -> Result<SourceState, StoreError> {
        let path = self.state_json_path(source_id)?;
        Ok(read_json(&path).await?.unwrap_or_default())
    }
}

#[async_trait]
impl ScanHistoryStore for LocalFsScanStore {
    async fn list_sources(&self) -> Result<Vec<Source>, StoreError> {
        let dir = self.sources_dir();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::io(dir.display(), err)),
        };

        let mut sources = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| StoreError::io(dir.display(), err))?
        {
            let Some(source_id) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if validate_source_id(&source_id).is_err() {
                continue;
            }
            if let Some(source) = self.load_source(&source_id).await? {
                sources.push(source);
            }
        }
        sources.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sources)
    }

    async fn load_source(&self, source_id: &str) -> Result<Option<Source>, StoreError> {
        let path = self.source_json_path(source_id)?;
        let Some(mut source) = read_json::<Source>(&path).await? else {
            return Ok(None);
        };
        source.last_scan = self.load_state(source_id).await?.scans.pop();
        Ok(Some(source))
    }

    async fn put_source(&self, source: &Source) -> Result<(), StoreError> {
        let path = self.source_json_path(&source.id)?;
        let mut source = source.clone();
        source.last_scan = None;

        let _guard = self.write_lock.lock().await;
        write_json_atomic(&path, &source).await
    }

    async fn load_chapters(&self, source_id: &str) -> Result<Vec<Chapter>, StoreError> {
        Ok(self.load_state(source_id).await?.chapters)
    }

    async fn scan_history(&self, source_id: &str) -> Result<Vec<Scan>, StoreError> {
        Ok(self.load_state(source_id).await?.scans)
    }

    async fn changes(&self, source_id: &str) -> Result<Vec<Change>, StoreError> {
        Ok(self.load_state(source_id).await?.changes)
    }

    async fn save_scan(&self, source_id: &str, commit: &Reconciliation) -> Result<(), StoreError> {
        let path = self.state_json_path(source_id)?;

        let _guard = self.write_lock.lock().await;
        let mut state = self.load_state(source_id).await?;
        state.apply(commit);
        write_json_atomic(&path, &state).await?;

        tracing::debug!(
            source_id,
            path = %path.display(),
            chapters = state.chapters.len(),
            scans = state.scans.len(),
            "saved scan"
        );
        Ok(())
    }

    /// Advisory `scan.lock` next to the source's state; the OS drops it with the file.
    async fn lock_source(&self, source_id: &str) -> Result<Option<SourceLock>, StoreError> {
        let path = self.lock_path(source_id)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| StoreError::io(parent.display(), err))?;
        }

        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await
            .map_err(|err| StoreError::io(path.display(), err))?
            .into_std()
            .await;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                tracing::debug!(source_id, path = %path.display(), "acquired scan lock");
                Ok(Some(SourceLock { _file: Some(file) }))
            }
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.raw_os_error() == fs2::lock_contended_error().raw_os_error() =>
            {
                tracing::debug!(source_id, path = %path.display(), "scan lock is held elsewhere");
                Ok(None)
            }
            Err(err) => Err(StoreError::io(path.display(), err)),
        }
    }
}

/// In-process store; every commit swaps state under one lock.
#[derive(Debug, Default)]
pub struct MemoryScanStore {
    sources: RwLock<HashMap<String, Source>>,
    states: RwLock<HashMap<String, SourceState>>,
}

impl MemoryScanStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self, source_id: &str) -> Result<SourceState, StoreError> {
        let states = self.states.read().map_err(|_| poisoned())?;
        Ok(states.get(source_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl ScanHistoryStore for MemoryScanStore {
    async fn list_sources(&self) -> Result<Vec<Source>, StoreError> {
        let ids = {
            let sources = self.sources.read().map_err(|_| poisoned())?;
            let mut ids = sources.keys().cloned().collect::<Vec<_>>();
            ids.sort();
            ids
        };
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(source) = self.load_source(&id).await? {
                out.push(source);
            }
        }
        Ok(out)
    }

    async fn load_source(&self, source_id: &str) -> Result<Option<Source>, StoreError> {
        let source = {
            let sources = self.sources.read().map_err(|_| poisoned())?;
            sources.get(source_id).cloned()
        };
        let Some(mut source) = source else {
            return Ok(None);
        };
        source.last_scan = self.state(source_id)?.scans.pop();
        Ok(Some(source))
    }

    async fn put_source(&self, source: &Source) -> Result<(), StoreError> {
        let mut source = source.clone();
        source.last_scan = None;
        let mut sources = self.sources.write().map_err(|_| poisoned())?;
        sources.insert(source.id.clone(), source);
        Ok(())
    }

    async fn load_chapters(&self, source_id: &str) -> Result<Vec<Chapter>, StoreError> {
        Ok(self.state(source_id)?.chapters)
    }

    async fn scan_history(&self, source_id: &str) -> Result<Vec<Scan>, StoreError> {
        Ok(self.state(source_id)?.scans)
    }

    async fn changes(&self, source_id: &str) -> Result<Vec<Change>, StoreError> {
        Ok(self.state(source_id)?.changes)
    }

    async fn save_scan(&self, source_id: &str, commit: &Reconciliation) -> Result<(), StoreError> {
        let mut states = self.states.write().map_err(|_| poisoned())?;
        states
            .entry(source_id.to_owned())
            .or_default()
            .apply(commit);
        Ok(())
    }
}

fn poisoned() -> StoreError {
    StoreError::Other("memory store lock poisoned".to_owned())
}

fn validate_source_id(source_id: &str) -> Result<(), StoreError> {
    let valid = !source_id.is_empty()
        && source_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(StoreError::Other(format!(
            "source id must be non-empty ASCII letters, digits, '-' or '_': {source_id:?}"
        )));
    }
    Ok(())
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(StoreError::io(path.display(), err)),
    };
    let value = serde_json::from_slice(&bytes)?;
    Ok(Some(value))
}

async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let parent = path
        .parent()
        .ok_or_else(|| StoreError::Other(format!("path has no parent: {}", path.display())))?;
    fs::create_dir_all(parent)
        .await
        .map_err(|err| StoreError::io(parent.display(), err))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value)?;
    fs::write(&tmp_path, &data)
        .await
        .map_err(|err| StoreError::io(tmp_path.display(), err))?;
    if let Err(err) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(StoreError::io(path.display(), err));
    }
    Ok(())
}
