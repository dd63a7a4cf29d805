use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio::task::JoinSet;

use crate::diff::diff;
use crate::error::{ScanError, StoreError};
use crate::fetch::ListingFetcher;
use crate::model::{Change, Chapter, Scan, ScanStatus, Source};
use crate::reconcile::reconcile;
use crate::store::ScanHistoryStore;

type InFlight = Arc<Mutex<HashSet<String>>>;

/// Owns the per-source scan lifecycle: `Idle -> Scanning -> Idle`.
///
/// At most one scan runs per source id; a second `run_scan` for the same id
/// is rejected with [`ScanError::AlreadyInProgress`] rather than queued. The
/// store's [`ScanHistoryStore::lock_source`] extends this to other
/// orchestrators sharing the same store.
/// Scans for different sources are independent.
#[derive(Clone)]
pub struct ScanOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    fetcher: Arc<dyn ListingFetcher>,
    store: Arc<dyn ScanHistoryStore>,
    in_flight: InFlight,
}

impl ScanOrchestrator {
    pub fn new(fetcher: Arc<dyn ListingFetcher>, store: Arc<dyn ScanHistoryStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                store,
                in_flight: Arc::new(Mutex::new(HashSet::new())),
            }),
        }
    }

    /// Fetches, diffs, reconciles and persists one source.
    ///
    /// The work runs on its own task: dropping the returned future does not
    /// cancel a scan that has started, it still completes and persists.
    pub async fn run_scan(&self, source_id: &str) -> Result<Scan, ScanError> {
        let lease = ScanLease::acquire(&self.inner.in_flight, source_id)?;
        let inner = Arc::clone(&self.inner);

        let task = tokio::spawn(async move {
            let result = inner.scan(lease.source_id()).await;
            drop(lease);
            result
        });

        match task.await {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(source_id, ?err, "scan task failed");
                Err(ScanError::Interrupted(err.to_string()))
            }
        }
    }

    /// Scans every enabled source concurrently. Results are ordered by source id.
    pub async fn run_all(&self) -> Result<Vec<(String, Result<Scan, ScanError>)>, StoreError> {
        let sources = self.inner.store.list_sources().await?;

        let mut tasks = JoinSet::new();
        for source in sources.into_iter().filter(|s| !s.disabled) {
            let orchestrator = self.clone();
            tasks.spawn(async move {
                let result = orchestrator.run_scan(&source.id).await;
                (source.id, result)
            });
        }

        let mut results = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => results.push(outcome),
                Err(err) => tracing::error!(?err, "scan task failed to join"),
            }
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(results)
    }

    pub fn current_status(&self, source_id: &str) -> ScanStatus {
        let in_flight = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if in_flight.contains(source_id) {
            ScanStatus::Scanning
        } else {
            ScanStatus::Idle
        }
    }

    pub async fn register_source(&self, source: &Source) -> Result<(), StoreError> {
        self.inner.store.put_source(source).await
    }

    pub async fn sources(&self) -> Result<Vec<Source>, StoreError> {
        self.inner.store.list_sources().await
    }

    pub async fn source(&self, source_id: &str) -> Result<Option<Source>, StoreError> {
        self.inner.store.load_source(source_id).await
    }

    pub async fn chapters(&self, source_id: &str) -> Result<Vec<Chapter>, StoreError> {
        self.inner.store.load_chapters(source_id).await
    }

    pub async fn last_scan(&self, source_id: &str) -> Result<Option<Scan>, StoreError> {
        self.inner.store.last_scan(source_id).await
    }

    pub async fn scan_history(&self, source_id: &str) -> Result<Vec<Scan>, StoreError> {
        self.inner.store.scan_history(source_id).await
    }

    pub async fn changes(&self, source_id: &str) -> Result<Vec<Change>, StoreError> {
        self.inner.store.changes(source_id).await
    }
}

impl Inner {
    async fn scan(&self, source_id: &str) -> Result<Scan, ScanError> {
        let source = self
            .store
            .load_source(source_id)
            .await
            .map_err(ScanError::LoadFailed)?
            .ok_or_else(|| ScanError::SourceNotFound(source_id.to_owned()))?;
        if source.disabled {
            return Err(ScanError::SourceDisabled(source_id.to_owned()));
        }

        // Held until this scan returns, whatever the outcome.
        let Some(_source_lock) = self
            .store
            .lock_source(source_id)
            .await
            .map_err(ScanError::LoadFailed)?
        else {
            tracing::debug!(source_id, "source is being scanned by another process");
            return Err(ScanError::AlreadyInProgress(source_id.to_owned()));
        };

        let mut stored = self
            .store
            .load_chapters(source_id)
            .await
            .map_err(ScanError::LoadFailed)?;
        stored.sort_by_key(|c| c.position);

        tracing::info!(source_id, url = %source.url, stored = stored.len(), "scan started");
        let fetched = self.fetcher.fetch(&source).await.map_err(|err| {
            tracing::warn!(source_id, %err, "fetch failed; stored chapters left untouched");
            ScanError::FetchFailed(err)
        })?;

        let diff = diff(&stored, &fetched, &source.policy);
        if !diff.warnings.is_empty() {
            tracing::warn!(
                source_id,
                duplicates = diff.warnings.len(),
                "listing contained duplicate chapter keys"
            );
        }
        let outcome = reconcile(&source, diff, Utc::now());

        self.store
            .save_scan(source_id, &outcome)
            .await
            .map_err(|err| {
                tracing::error!(source_id, %err, "persist failed; scan discarded");
                ScanError::PersistFailed(err)
            })?;

        tracing::info!(
            source_id,
            total = outcome.scan.total,
            new = outcome.scan.new.len(),
            updated = outcome.scan.updated.len(),
            removed = outcome.scan.removed.len(),
            chapters = outcome.chapters.len(),
            "scan complete"
        );
        Ok(outcome.scan)
    }
}

/// Marks a source as scanning for as long as it lives.
struct ScanLease {
    in_flight: InFlight,
    source_id: String,
}

impl ScanLease {
    fn acquire(in_flight: &InFlight, source_id: &str) -> Result<Self, ScanError> {
        let mut guard = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !guard.insert(source_id.to_owned()) {
            tracing::debug!(source_id, "rejecting concurrent scan");
            return Err(ScanError::AlreadyInProgress(source_id.to_owned()));
        }
        Ok(Self {
            in_flight: Arc::clone(in_flight),
            source_id: source_id.to_owned(),
        })
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }
}

impl Drop for ScanLease {
    fn drop(&mut self) {
        let mut guard = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        guard.remove(&self.source_id);
    }
}
