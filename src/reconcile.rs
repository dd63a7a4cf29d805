use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::diff::{Classified, DiffResult};
use crate::key::{chapter_id, fingerprint};
use crate::model::{
    Change, ChangeKind, Chapter, OrderingPolicy, RemovalPolicy, Scan, Source,
};

/// Everything one scan writes, persisted as a single unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub chapters: Vec<Chapter>,
    pub scan: Scan,
    pub changes: Vec<Change>,
}

/// Applies a diff to produce the next chapter list and the scan record.
///
/// Pure: new chapter ids are derived from the source id and chapter key, and
/// the scan date is passed in.
pub fn reconcile(source: &Source, diff: DiffResult, scanned_at: DateTime<Utc>) -> Reconciliation {
    let policy = source.policy;
    let mut taken = diff
        .fetched
        .iter()
        .filter_map(Classified::stored)
        .chain(diff.removed.iter())
        .map(|c| c.id.clone())
        .collect::<HashSet<_>>();

    let mut scan = Scan {
        source_id: source.id.clone(),
        date: scanned_at,
        total: diff.observed,
        new: Vec::new(),
        updated: Vec::new(),
        removed: Vec::new(),
        restored: Vec::new(),
    };
    let mut changes = Vec::new();

    // Fetch order; the second field is the stored position for chapters that existed before.
    let mut seen: Vec<(Chapter, Option<u32>)> = Vec::with_capacity(diff.fetched.len());
    for classified in diff.fetched {
        match classified {
            Classified::Unchanged { stored, entry } => {
                let position = stored.position;
                let mut chapter = stored;
                if chapter.removed {
                    chapter.removed = false;
                    restore(&chapter, source, scanned_at, &mut scan, &mut changes);
                }
                if entry.published_at.is_some() {
                    chapter.published_at = entry.published_at;
                }
                chapter.fingerprint = fingerprint(&chapter.title, chapter.url.as_deref());
                seen.push((chapter, Some(position)));
            }
            Classified::Updated {
                stored,
                entry,
                title,
                url,
            } => {
                let position = stored.position;
                let was_removed = stored.removed;
                let mut chapter = stored;
                if let Some(title) = &title {
                    chapter.title = title.new.clone();
                }
                if let Some(url) = &url {
                    chapter.url = url.new.clone();
                }
                if entry.published_at.is_some() {
                    chapter.published_at = entry.published_at;
                }
                chapter.removed = false;
                chapter.fingerprint = fingerprint(&chapter.title, chapter.url.as_deref());
                if was_removed {
                    restore(&chapter, source, scanned_at, &mut scan, &mut changes);
                }

                scan.updated.push(chapter.id.clone());
                changes.push(Change {
                    kind: ChangeKind::Updated,
                    source_id: source.id.clone(),
                    chapter_id: chapter.id.clone(),
                    date: scanned_at,
                    title,
                    url,
                });
                seen.push((chapter, Some(position)));
            }
            Classified::New { key, entry } => {
                let id = unique_id(chapter_id(&source.id, &key), &mut taken);
                let chapter = Chapter {
                    id: id.clone(),
                    source_id: source.id.clone(),
                    fingerprint: fingerprint(&entry.title, entry.url.as_deref()),
                    title: entry.title,
                    url: entry.url,
                    position: 0,
                    published_at: entry.published_at,
                    removed: false,
                };

                scan.new.push(id.clone());
                changes.push(Change {
                    kind: ChangeKind::New,
                    source_id: source.id.clone(),
                    chapter_id: id,
                    date: scanned_at,
                    title: None,
                    url: None,
                });
                seen.push((chapter, None));
            }
        }
    }

    let mut retained = Vec::new();
    for chapter in diff.removed {
        if !chapter.removed {
            scan.removed.push(chapter.id.clone());
            changes.push(Change {
                kind: ChangeKind::Removed,
                source_id: source.id.clone(),
                chapter_id: chapter.id.clone(),
                date: scanned_at,
                title: None,
                url: None,
            });
        }
        match policy.removal {
            RemovalPolicy::Retain => {
                let position = chapter.position;
                let mut chapter = chapter;
                chapter.removed = true;
                retained.push((chapter, position));
            }
            RemovalPolicy::Prune => {
                tracing::debug!(chapter_id = %chapter.id, "pruning removed chapter");
            }
        }
    }
    retained.sort_by_key(|(_, position)| *position);

    let ordered = match policy.ordering {
        OrderingPolicy::Append => order_append(seen, retained),
        OrderingPolicy::PreserveFetchOrder => order_fetched(seen, retained),
    };

    let chapters = ordered
        .into_iter()
        .enumerate()
        .map(|(idx, mut chapter)| {
            chapter.position = u32::try_from(idx).unwrap_or(u32::MAX);
            chapter
        })
        .collect();

    Reconciliation {
        chapters,
        scan,
        changes,
    }
}

/// Records a retained chapter that is back in the listing.
fn restore(
    chapter: &Chapter,
    source: &Source,
    scanned_at: DateTime<Utc>,
    scan: &mut Scan,
    changes: &mut Vec<Change>,
) {
    tracing::info!(chapter_id = %chapter.id, "chapter reappeared in listing");
    scan.restored.push(chapter.id.clone());
    changes.push(Change {
        kind: ChangeKind::Restored,
        source_id: source.id.clone(),
        chapter_id: chapter.id.clone(),
        date: scanned_at,
        title: None,
        url: None,
    });
}

/// Stored chapters keep their relative order; new ones follow in fetch order.
fn order_append(seen: Vec<(Chapter, Option<u32>)>, retained: Vec<(Chapter, u32)>) -> Vec<Chapter> {
    let mut existing = Vec::with_capacity(seen.len() + retained.len());
    let mut fresh = Vec::new();
    for (chapter, position) in seen {
        match position {
            Some(position) => existing.push((chapter, position)),
            None => fresh.push(chapter),
        }
    }
    existing.extend(retained);
    existing.sort_by(|(a, pa), (b, pb)| pa.cmp(pb).then_with(|| a.id.cmp(&b.id)));

    existing
        .into_iter()
        .map(|(chapter, _)| chapter)
        .chain(fresh)
        .collect()
}

/// Fetch order wins; retained chapters sit right after their nearest earlier stored neighbour.
fn order_fetched(
    mut seen: Vec<(Chapter, Option<u32>)>,
    retained: Vec<(Chapter, u32)>,
) -> Vec<Chapter> {
    for (chapter, position) in retained {
        let anchor = seen
            .iter()
            .enumerate()
            .filter_map(|(idx, (_, stored))| stored.filter(|p| *p < position).map(|p| (p, idx)))
            .max()
            .map(|(_, idx)| idx + 1)
            .unwrap_or(0);
        seen.insert(anchor, (chapter, Some(position)));
    }
    seen.into_iter().map(|(chapter, _)| chapter).collect()
}

fn unique_id(base: String, taken: &mut HashSet<String>) -> String {
    if taken.insert(base.clone()) {
        return base;
    }
    let mut n = 2_u32;
    loop {
        let candidate = format!("{base}-{n}");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}
