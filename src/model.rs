use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A configured remote content origin (a table-of-contents page).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub status: SourceStatus,
    #[serde(default)]
    pub hidden: bool,

    /// Table of contents URL.
    pub url: String,
    #[serde(default)]
    pub import_settings: ImportSettings,
    #[serde(default)]
    pub policy: ScanPolicy,
    #[serde(default)]
    pub disabled: bool,

    /// Filled from scan history on read; never written by source edits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scan: Option<Scan>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    #[default]
    Active,
    Complete,
    Abandoned,
}

/// How chapter entries are read off the table of contents page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum ImportSettings {
    /// Every link on the page is a candidate.
    Toc {
        /// Regex an absolute chapter URL must match.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        link_pattern: Option<String>,
        #[serde(default = "default_same_origin")]
        same_origin: bool,
    },
    /// Entries are the `<option>` elements of a chapter `<select>` menu.
    Menu,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self::Toc {
            link_pattern: None,
            same_origin: default_same_origin(),
        }
    }
}

fn default_same_origin() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanPolicy {
    #[serde(default)]
    pub removal: RemovalPolicy,
    #[serde(default)]
    pub ordering: OrderingPolicy,
    /// Key chapters by normalized title instead of URL.
    #[serde(default)]
    pub url_unstable: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPolicy {
    /// Keep chapters missing from the remote listing, marked `removed`.
    #[default]
    Retain,
    /// Drop chapters missing from the remote listing.
    Prune,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingPolicy {
    /// New chapters go after the last stored chapter.
    #[default]
    Append,
    /// The final list follows the remote listing's order.
    PreserveFetchOrder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    pub source_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub position: u32,
    pub fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub removed: bool,
}

/// One chapter candidate as returned by a fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEntry {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

impl RawEntry {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: Some(url.into()),
            published_at: None,
        }
    }

    pub fn title_only(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: None,
            published_at: None,
        }
    }
}

/// Immutable summary of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scan {
    pub source_id: String,
    pub date: DateTime<Utc>,
    pub total: usize,
    pub new: Vec<String>,
    pub updated: Vec<String>,
    #[serde(default)]
    pub removed: Vec<String>,
    /// Retained chapters that are back in the listing.
    #[serde(default)]
    pub restored: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    New,
    Updated,
    Removed,
    Restored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange<T> {
    pub old: T,
    pub new: T,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub kind: ChangeKind,
    pub source_id: String,
    pub chapter_id: String,
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<FieldChange<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<FieldChange<Option<String>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Idle,
    Scanning,
}
