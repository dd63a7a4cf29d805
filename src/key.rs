use std::fmt;

use sha2::{Digest as _, Sha256};
use url::Url;

use crate::model::{Chapter, RawEntry, ScanPolicy};

/// Query parameters that never identify content.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_cid", "mc_eid", "ref"];

/// Base used only to parse path-only links; never appears in a key.
const RELATIVE_BASE: &str = "http://relative.invalid/";

/// Stable identity used to match a fetched entry with a stored chapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChapterKey {
    Url(String),
    Title(String),
}

impl fmt::Display for ChapterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => write!(f, "url:{url}"),
            Self::Title(title) => write!(f, "title:{title}"),
        }
    }
}

/// Anything that can be keyed: stored chapters and fetched entries.
pub trait Keyed {
    fn title(&self) -> &str;
    fn url(&self) -> Option<&str>;
}

impl Keyed for Chapter {
    fn title(&self) -> &str {
        &self.title
    }

    fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }
}

impl Keyed for RawEntry {
    fn title(&self) -> &str {
        &self.title
    }

    fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }
}

pub fn key_of<T: Keyed + ?Sized>(item: &T, policy: &ScanPolicy) -> ChapterKey {
    if !policy.url_unstable
        && let Some(url) = item.url().and_then(normalize_url)
    {
        return ChapterKey::Url(url);
    }
    ChapterKey::Title(normalize_title(item.title()))
}

/// Canonical form of a chapter link.
///
/// Host and scheme are lower-cased by parsing, the path is lower-cased and
/// loses trailing slashes, the fragment and tracking parameters are dropped and
/// the remaining query pairs are sorted. Path-only links stay path-only.
/// Returns `None` for blank or unparseable input.
pub fn normalize_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let (mut url, relative) = match Url::parse(raw) {
        Ok(url) => (url, false),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = Url::parse(RELATIVE_BASE).ok()?;
            (base.join(raw).ok()?, true)
        }
        Err(_) => return None,
    };
    if url.cannot_be_a_base() {
        return None;
    }

    url.set_fragment(None);

    let mut kept = url
        .query_pairs()
        .filter(|(name, _)| !is_tracking_param(name))
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect::<Vec<_>>();
    kept.sort();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let mut path = url.path().to_ascii_lowercase();
    while path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    url.set_path(&path);

    if relative {
        return Some(match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_owned(),
        });
    }
    Some(url.to_string())
}

fn is_tracking_param(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name.starts_with("utm_") || TRACKING_PARAMS.contains(&name.as_str())
}

pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Hash of title and url, used to short-circuit change detection.
pub fn fingerprint(title: &str, url: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(b"\n");
    hasher.update(url.unwrap_or_default().as_bytes());
    hex::encode(hasher.finalize())
}

/// Deterministic identifier for a chapter first seen under `key`.
pub fn chapter_id(source_id: &str, key: &ChapterKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(key.to_string().as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("c_{}", &digest[..16])
}
