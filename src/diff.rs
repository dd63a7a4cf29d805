use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use crate::key::{ChapterKey, fingerprint, key_of};
use crate::model::{Chapter, FieldChange, RawEntry, ScanPolicy};

/// Where a key collision was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateOrigin {
    /// Two fetched entries in one listing. The later one is kept.
    Fetched,
    /// Two stored chapters. The earlier one is kept, the other is classified removed.
    Stored,
}

/// Non-fatal diagnostic for two entries resolving to the same key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateKeyWarning {
    pub origin: DuplicateOrigin,
    pub key: ChapterKey,
    pub kept_title: String,
    pub dropped_title: String,
}

/// Classification of one fetched entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    Unchanged {
        stored: Chapter,
        entry: RawEntry,
    },
    Updated {
        stored: Chapter,
        entry: RawEntry,
        title: Option<FieldChange<String>>,
        url: Option<FieldChange<Option<String>>>,
    },
    New {
        key: ChapterKey,
        entry: RawEntry,
    },
}

impl Classified {
    pub fn entry(&self) -> &RawEntry {
        match self {
            Self::Unchanged { entry, .. } => entry,
            Self::Updated { entry, .. } => entry,
            Self::New { entry, .. } => entry,
        }
    }

    pub fn stored(&self) -> Option<&Chapter> {
        match self {
            Self::Unchanged { stored, .. } | Self::Updated { stored, .. } => Some(stored),
            Self::New { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    /// Fetched entries in fetch order, after duplicate collapse.
    pub fetched: Vec<Classified>,
    /// Stored chapters not observed this pass, in stored order.
    pub removed: Vec<Chapter>,
    /// Number of entries the fetcher returned, duplicates included.
    pub observed: usize,
    pub warnings: Vec<DuplicateKeyWarning>,
}

impl DiffResult {
    pub fn unchanged(&self) -> impl Iterator<Item = &Chapter> {
        self.fetched.iter().filter_map(|c| match c {
            Classified::Unchanged { stored, .. } => Some(stored),
            _ => None,
        })
    }

    pub fn updated(&self) -> impl Iterator<Item = &Chapter> {
        self.fetched.iter().filter_map(|c| match c {
            Classified::Updated { stored, .. } => Some(stored),
            _ => None,
        })
    }

    pub fn new_entries(&self) -> impl Iterator<Item = &RawEntry> {
        self.fetched.iter().filter_map(|c| match c {
            Classified::New { entry, .. } => Some(entry),
            _ => None,
        })
    }

    /// Removed chapters that were still active before this pass.
    pub fn newly_removed(&self) -> impl Iterator<Item = &Chapter> {
        self.removed.iter().filter(|c| !c.removed)
    }
}

/// Aligns the stored chapter list with a fetched listing.
///
/// Every stored chapter ends up in exactly one of unchanged, updated or
/// removed; every kept fetched entry in exactly one of unchanged, updated or
/// new. The only fetch-order dependence is the duplicate tiebreak: when two
/// fetched entries share a key the later one wins.
pub fn diff(stored: &[Chapter], fetched: &[RawEntry], policy: &ScanPolicy) -> DiffResult {
    let mut warnings = Vec::new();

    let stored_keys = stored
        .iter()
        .map(|chapter| key_of(chapter, policy))
        .collect::<Vec<_>>();
    let mut by_key: HashMap<&ChapterKey, &Chapter> = HashMap::with_capacity(stored.len());
    let mut duplicate_ids: HashSet<&str> = HashSet::new();
    for (chapter, key) in stored.iter().zip(&stored_keys) {
        match by_key.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(chapter);
            }
            Entry::Occupied(slot) => {
                tracing::warn!(
                    key = %key,
                    kept = %slot.get().id,
                    dropped = %chapter.id,
                    "stored chapters share a key; classifying the later one as removed"
                );
                warnings.push(DuplicateKeyWarning {
                    origin: DuplicateOrigin::Stored,
                    key: key.clone(),
                    kept_title: slot.get().title.clone(),
                    dropped_title: chapter.title.clone(),
                });
                duplicate_ids.insert(chapter.id.as_str());
            }
        }
    }

    let fetched_keys = fetched
        .iter()
        .map(|entry| key_of(entry, policy))
        .collect::<Vec<_>>();
    let mut winner: HashMap<&ChapterKey, usize> = HashMap::with_capacity(fetched.len());
    for (idx, key) in fetched_keys.iter().enumerate() {
        if let Some(prev) = winner.insert(key, idx) {
            tracing::warn!(
                key = %key,
                dropped_title = %fetched[prev].title,
                kept_title = %fetched[idx].title,
                "fetched entries share a key; keeping the later one"
            );
            warnings.push(DuplicateKeyWarning {
                origin: DuplicateOrigin::Fetched,
                key: key.clone(),
                kept_title: fetched[idx].title.clone(),
                dropped_title: fetched[prev].title.clone(),
            });
        }
    }

    let mut classified = Vec::with_capacity(winner.len());
    for (idx, (entry, key)) in fetched.iter().zip(&fetched_keys).enumerate() {
        if winner.get(key) != Some(&idx) {
            continue;
        }
        let Some(stored) = by_key.remove(key) else {
            classified.push(Classified::New {
                key: key.clone(),
                entry: entry.clone(),
            });
            continue;
        };
        classified.push(classify_match(stored, entry));
    }

    let removed = stored
        .iter()
        .zip(&stored_keys)
        .filter(|(chapter, key)| {
            duplicate_ids.contains(chapter.id.as_str())
                || by_key.get(key).is_some_and(|kept| kept.id == chapter.id)
        })
        .map(|(chapter, _)| chapter.clone())
        .collect();

    DiffResult {
        fetched: classified,
        removed,
        observed: fetched.len(),
        warnings,
    }
}

fn classify_match(stored: &Chapter, entry: &RawEntry) -> Classified {
    if stored.fingerprint == fingerprint(&entry.title, entry.url.as_deref()) {
        return Classified::Unchanged {
            stored: stored.clone(),
            entry: entry.clone(),
        };
    }

    let title = (stored.title != entry.title).then(|| FieldChange {
        old: stored.title.clone(),
        new: entry.title.clone(),
    });
    let url = (stored.url != entry.url).then(|| FieldChange {
        old: stored.url.clone(),
        new: entry.url.clone(),
    });

    if title.is_none() && url.is_none() {
        // Stale fingerprint on the stored side; the fields themselves agree.
        return Classified::Unchanged {
            stored: stored.clone(),
            entry: entry.clone(),
        };
    }

    Classified::Updated {
        stored: stored.clone(),
        entry: entry.clone(),
        title,
        url,
    }
}
