mod support;

use std::sync::Arc;
use std::time::Duration;

use tocscan::error::{FetchError, ScanError};
use tocscan::model::{RawEntry, RemovalPolicy, ScanPolicy, ScanStatus};
use tocscan::orchestrator::ScanOrchestrator;
use tocscan::store::{LocalFsScanStore, MemoryScanStore, ScanHistoryStore};

use support::{FlakyStore, ScriptedFetcher, source, wait_for_status};

#[tokio::test]
async fn scan_reports_updates_and_new_chapters() -> anyhow::Result<()> {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let store = Arc::new(MemoryScanStore::new());
    store.put_source(&source("worm")).await?;
    let orchestrator = ScanOrchestrator::new(fetcher.clone(), store.clone());

    fetcher.push_ok(vec![RawEntry::new("Chapter 1", "/c1")]);
    let first = orchestrator.run_scan("worm").await?;
    assert_eq!(first.total, 1);
    assert_eq!(first.new.len(), 1);
    let original_id = first.new[0].clone();

    fetcher.push_ok(vec![
        RawEntry::new("Chapter One", "/c1"),
        RawEntry::new("Chapter 2", "/c2"),
    ]);
    let second = orchestrator.run_scan("worm").await?;

    assert_eq!(second.total, 2);
    assert_eq!(second.updated, vec![original_id.clone()]);
    assert_eq!(second.new.len(), 1);
    assert!(second.removed.is_empty());

    let chapters = orchestrator.chapters("worm").await?;
    assert_eq!(chapters.len(), 2);
    assert_eq!(chapters[0].id, original_id);
    assert_eq!(chapters[0].title, "Chapter One");

    assert_eq!(orchestrator.last_scan("worm").await?, Some(second.clone()));
    let loaded = orchestrator.source("worm").await?.expect("source exists");
    assert_eq!(loaded.last_scan, Some(second));
    assert_eq!(orchestrator.scan_history("worm").await?.len(), 2);
    assert_eq!(orchestrator.changes("worm").await?.len(), 3);
    assert_eq!(orchestrator.current_status("worm"), ScanStatus::Idle);
    Ok(())
}

#[tokio::test]
async fn repeated_scan_of_unchanged_listing_is_a_no_op() -> anyhow::Result<()> {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let store = Arc::new(MemoryScanStore::new());
    store.put_source(&source("pact")).await?;
    let orchestrator = ScanOrchestrator::new(fetcher.clone(), store);

    let listing = vec![
        RawEntry::new("Bonds 1.1", "/b1"),
        RawEntry::new("Bonds 1.2", "/b2"),
    ];
    fetcher.push_ok(listing.clone());
    orchestrator.run_scan("pact").await?;
    let before = orchestrator.chapters("pact").await?;

    fetcher.push_ok(listing);
    let again = orchestrator.run_scan("pact").await?;

    assert!(again.new.is_empty());
    assert!(again.updated.is_empty());
    assert!(again.removed.is_empty());
    assert_eq!(orchestrator.chapters("pact").await?, before);
    Ok(())
}

#[tokio::test]
async fn empty_listing_keeps_chapters_marked_removed() -> anyhow::Result<()> {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let store = Arc::new(MemoryScanStore::new());
    store.put_source(&source("twig")).await?;
    let orchestrator = ScanOrchestrator::new(fetcher.clone(), store);

    fetcher.push_ok(vec![RawEntry::new("Taking Root 1.1", "/c1")]);
    orchestrator.run_scan("twig").await?;

    fetcher.push_ok(Vec::new());
    let scan = orchestrator.run_scan("twig").await?;

    assert_eq!(scan.total, 0);
    assert_eq!(scan.removed.len(), 1);
    let chapters = orchestrator.chapters("twig").await?;
    assert_eq!(chapters.len(), 1);
    assert!(chapters[0].removed);
    Ok(())
}

#[tokio::test]
async fn prune_policy_deletes_missing_chapters() -> anyhow::Result<()> {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let store = Arc::new(MemoryScanStore::new());
    let mut src = source("ward");
    src.policy = ScanPolicy {
        removal: RemovalPolicy::Prune,
        ..ScanPolicy::default()
    };
    store.put_source(&src).await?;
    let orchestrator = ScanOrchestrator::new(fetcher.clone(), store);

    fetcher.push_ok(vec![
        RawEntry::new("Daybreak 1.1", "/c1"),
        RawEntry::new("Daybreak 1.2", "/c2"),
    ]);
    orchestrator.run_scan("ward").await?;

    fetcher.push_ok(vec![RawEntry::new("Daybreak 1.2", "/c2")]);
    let scan = orchestrator.run_scan("ward").await?;

    assert_eq!(scan.removed.len(), 1);
    let chapters = orchestrator.chapters("ward").await?;
    assert_eq!(chapters.len(), 1);
    assert_eq!(chapters[0].title, "Daybreak 1.2");
    assert_eq!(chapters[0].position, 0);
    Ok(())
}

#[tokio::test]
async fn fetch_failure_leaves_stored_state_untouched() -> anyhow::Result<()> {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let store = Arc::new(MemoryScanStore::new());
    store.put_source(&source("worm")).await?;
    let orchestrator = ScanOrchestrator::new(fetcher.clone(), store);

    fetcher.push_ok(vec![RawEntry::new("Chapter 1", "/c1")]);
    let first = orchestrator.run_scan("worm").await?;
    let before = orchestrator.chapters("worm").await?;

    fetcher.push_err(FetchError::Status {
        status: 503,
        url: "https://example.com/worm/toc/".to_owned(),
    });
    let err = orchestrator.run_scan("worm").await.unwrap_err();

    assert!(matches!(err, ScanError::FetchFailed(_)));
    assert!(err.is_transient());
    assert_eq!(orchestrator.chapters("worm").await?, before);
    assert_eq!(orchestrator.last_scan("worm").await?, Some(first));
    assert_eq!(orchestrator.current_status("worm"), ScanStatus::Idle);
    Ok(())
}

#[tokio::test]
async fn persist_failure_is_atomic() -> anyhow::Result<()> {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let store = Arc::new(FlakyStore::new());
    store.put_source(&source("pact")).await?;
    let orchestrator = ScanOrchestrator::new(fetcher.clone(), store.clone());

    fetcher.push_ok(vec![RawEntry::new("Bonds 1.1", "/b1")]);
    orchestrator.run_scan("pact").await?;
    let chapters_before = serde_json::to_vec(&orchestrator.chapters("pact").await?)?;
    let last_before = serde_json::to_vec(&orchestrator.last_scan("pact").await?)?;

    store.fail_saves(true);
    fetcher.push_ok(vec![
        RawEntry::new("Bonds 1.1 (edited)", "/b1"),
        RawEntry::new("Bonds 1.2", "/b2"),
    ]);
    let err = orchestrator.run_scan("pact").await.unwrap_err();

    assert!(matches!(err, ScanError::PersistFailed(_)));
    assert_eq!(
        serde_json::to_vec(&orchestrator.chapters("pact").await?)?,
        chapters_before
    );
    assert_eq!(
        serde_json::to_vec(&orchestrator.last_scan("pact").await?)?,
        last_before
    );
    assert_eq!(orchestrator.current_status("pact"), ScanStatus::Idle);

    // A later attempt can succeed once storage recovers.
    store.fail_saves(false);
    fetcher.push_ok(vec![RawEntry::new("Bonds 1.2", "/b2")]);
    let scan = orchestrator.run_scan("pact").await?;
    assert_eq!(scan.new.len(), 1);
    Ok(())
}

#[tokio::test]
async fn concurrent_scan_of_same_source_is_rejected() -> anyhow::Result<()> {
    let (fetcher, gate) = ScriptedFetcher::gated();
    let fetcher = Arc::new(fetcher);
    let store = Arc::new(MemoryScanStore::new());
    store.put_source(&source("worm")).await?;
    let orchestrator = ScanOrchestrator::new(fetcher.clone(), store);

    fetcher.push_ok(vec![RawEntry::new("Chapter 1", "/c1")]);
    let first = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.run_scan("worm").await }
    });
    wait_for_status(&orchestrator, "worm", ScanStatus::Scanning).await;

    let err = orchestrator.run_scan("worm").await.unwrap_err();
    assert!(matches!(err, ScanError::AlreadyInProgress(ref id) if id == "worm"));

    gate.add_permits(1);
    let scan = first.await??;
    assert_eq!(scan.new.len(), 1);
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(orchestrator.current_status("worm"), ScanStatus::Idle);
    assert_eq!(orchestrator.scan_history("worm").await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn orchestrators_sharing_a_data_dir_do_not_overlap() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let (fetcher_a, gate) = ScriptedFetcher::gated();
    let fetcher_a = Arc::new(fetcher_a);
    let fetcher_b = Arc::new(ScriptedFetcher::new());
    let store_a = Arc::new(LocalFsScanStore::new(temp.path()));
    let store_b = Arc::new(LocalFsScanStore::new(temp.path()));
    store_a.put_source(&source("worm")).await?;
    let a = ScanOrchestrator::new(fetcher_a.clone(), store_a);
    let b = ScanOrchestrator::new(fetcher_b.clone(), store_b);

    fetcher_a.push_ok(vec![
        RawEntry::new("Chapter 1", "/c1"),
        RawEntry::new("Chapter 2", "/c2"),
    ]);
    let first = tokio::spawn({
        let a = a.clone();
        async move { a.run_scan("worm").await }
    });
    tokio::time::timeout(Duration::from_secs(5), async {
        while fetcher_a.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;

    fetcher_b.push_ok(vec![
        RawEntry::new("Chapter 1", "/c1"),
        RawEntry::new("Chapter 3", "/c3"),
    ]);
    let err = b.run_scan("worm").await.unwrap_err();
    assert!(matches!(err, ScanError::AlreadyInProgress(ref id) if id == "worm"));
    assert_eq!(fetcher_b.calls(), 0);

    gate.add_permits(1);
    let scan_a = first.await??;
    assert_eq!(scan_a.new.len(), 2);

    let scan_b = b.run_scan("worm").await?;
    assert_eq!(scan_b.new.len(), 1);
    assert_eq!(scan_b.removed, vec![scan_a.new[1].clone()]);

    let chapters = b
        .chapters("worm")
        .await?
        .into_iter()
        .map(|c| (c.title, c.removed))
        .collect::<Vec<_>>();
    assert_eq!(
        chapters,
        vec![
            ("Chapter 1".to_owned(), false),
            ("Chapter 2".to_owned(), true),
            ("Chapter 3".to_owned(), false),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn different_sources_scan_concurrently() -> anyhow::Result<()> {
    let (fetcher, gate) = ScriptedFetcher::gated();
    let fetcher = Arc::new(fetcher);
    let store = Arc::new(MemoryScanStore::new());
    store.put_source(&source("worm")).await?;
    store.put_source(&source("pact")).await?;
    let orchestrator = ScanOrchestrator::new(fetcher.clone(), store);

    fetcher.push_ok(vec![RawEntry::new("Chapter 1", "/c1")]);
    fetcher.push_ok(vec![RawEntry::new("Chapter 1", "/c1")]);

    let a = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.run_scan("worm").await }
    });
    let b = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.run_scan("pact").await }
    });
    wait_for_status(&orchestrator, "worm", ScanStatus::Scanning).await;
    wait_for_status(&orchestrator, "pact", ScanStatus::Scanning).await;

    gate.add_permits(2);
    assert_eq!(a.await??.new.len(), 1);
    assert_eq!(b.await??.new.len(), 1);
    Ok(())
}

#[tokio::test]
async fn abandoned_scan_still_completes() -> anyhow::Result<()> {
    let (fetcher, gate) = ScriptedFetcher::gated();
    let fetcher = Arc::new(fetcher);
    let store = Arc::new(MemoryScanStore::new());
    store.put_source(&source("worm")).await?;
    let orchestrator = ScanOrchestrator::new(fetcher.clone(), store);

    fetcher.push_ok(vec![RawEntry::new("Chapter 1", "/c1")]);
    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), orchestrator.run_scan("worm")).await;
    assert!(abandoned.is_err(), "scan should still be waiting on the fetcher");
    assert_eq!(orchestrator.current_status("worm"), ScanStatus::Scanning);

    gate.add_permits(1);
    wait_for_status(&orchestrator, "worm", ScanStatus::Idle).await;

    assert_eq!(orchestrator.chapters("worm").await?.len(), 1);
    assert!(orchestrator.last_scan("worm").await?.is_some());
    Ok(())
}

#[tokio::test]
async fn unknown_and_disabled_sources_are_rejected() -> anyhow::Result<()> {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let store = Arc::new(MemoryScanStore::new());
    let mut disabled = source("glow");
    disabled.disabled = true;
    store.put_source(&disabled).await?;
    let orchestrator = ScanOrchestrator::new(fetcher.clone(), store);

    let err = orchestrator.run_scan("missing").await.unwrap_err();
    assert!(matches!(err, ScanError::SourceNotFound(_)));

    let err = orchestrator.run_scan("glow").await.unwrap_err();
    assert!(matches!(err, ScanError::SourceDisabled(_)));
    assert!(!err.is_transient());

    assert_eq!(fetcher.calls(), 0);
    assert_eq!(orchestrator.current_status("glow"), ScanStatus::Idle);
    Ok(())
}

#[tokio::test]
async fn run_all_skips_disabled_sources() -> anyhow::Result<()> {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let store = Arc::new(MemoryScanStore::new());
    let mut disabled = source("glow");
    disabled.disabled = true;
    store.put_source(&disabled).await?;
    store.put_source(&source("worm")).await?;
    let orchestrator = ScanOrchestrator::new(fetcher.clone(), store);

    fetcher.push_ok(vec![RawEntry::new("Chapter 1", "/c1")]);
    let results = orchestrator.run_all().await?;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, "worm");
    assert!(results[0].1.is_ok());
    Ok(())
}
