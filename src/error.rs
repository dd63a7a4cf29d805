//! Error types for fetching, storing and scanning.

use thiserror::Error;

/// Failure to obtain a listing. Distinct from a successful empty listing.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Network(String),

    #[error("unexpected HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("could not parse listing: {0}")]
    Parse(String),

    #[error("invalid import settings: {0}")]
    Config(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub fn io(path: impl std::fmt::Display, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_string(),
            source,
        }
    }
}

/// Outcome of a failed `run_scan`. Stored chapters and the last scan are
/// untouched whenever one of these is returned.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("a scan is already in progress for source {0}")]
    AlreadyInProgress(String),

    #[error("source not found: {0}")]
    SourceNotFound(String),

    #[error("source is disabled: {0}")]
    SourceDisabled(String),

    #[error("fetch failed: {0}")]
    FetchFailed(#[source] FetchError),

    #[error("could not load stored state: {0}")]
    LoadFailed(#[source] StoreError),

    #[error("persist failed: {0}")]
    PersistFailed(#[source] StoreError),

    #[error("scan task ended abnormally: {0}")]
    Interrupted(String),
}

impl ScanError {
    /// Whether re-invoking the scan later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::AlreadyInProgress(_)
                | Self::FetchFailed(_)
                | Self::LoadFailed(_)
                | Self::PersistFailed(_)
        )
    }
}
