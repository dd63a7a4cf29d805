use std::io::Write as _;
use std::path::Path;

use anyhow::Context as _;
use serde::Serialize;

use crate::cli::{ScanArgs, SourceAddArgs, SourceArgs};
use crate::model::{Scan, ScanStatus, Source};
use crate::orchestrator::ScanOrchestrator;

pub async fn source_add(
    orchestrator: &ScanOrchestrator,
    args: SourceAddArgs,
) -> anyhow::Result<()> {
    let source = read_source_yaml(&args.file)?;
    orchestrator
        .register_source(&source)
        .await
        .with_context(|| format!("save source {}", source.id))?;
    tracing::info!(source_id = %source.id, "source saved");
    print_json(&source)
}

pub async fn source_list(orchestrator: &ScanOrchestrator) -> anyhow::Result<()> {
    let sources = orchestrator.sources().await.context("list sources")?;
    print_json(&sources)
}

#[derive(Debug, Serialize)]
struct ScanReport {
    source_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    scan: Option<Scan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub async fn scan(orchestrator: &ScanOrchestrator, args: ScanArgs) -> anyhow::Result<()> {
    if let Some(source_id) = args.source {
        let scan = orchestrator
            .run_scan(&source_id)
            .await
            .with_context(|| format!("scan {source_id}"))?;
        return print_json(&scan);
    }

    let results = orchestrator.run_all().await.context("scan all sources")?;
    let total = results.len();
    let mut failed = 0_usize;
    let reports = results
        .into_iter()
        .map(|(source_id, result)| match result {
            Ok(scan) => ScanReport {
                source_id,
                scan: Some(scan),
                error: None,
            },
            Err(err) => {
                failed += 1;
                ScanReport {
                    source_id,
                    scan: None,
                    error: Some(err.to_string()),
                }
            }
        })
        .collect::<Vec<_>>();
    print_json(&reports)?;

    if failed > 0 {
        anyhow::bail!("{failed} of {total} scans failed");
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct StatusReport {
    source_id: String,
    status: ScanStatus,
    chapters: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_scan: Option<Scan>,
}

pub async fn status(orchestrator: &ScanOrchestrator, args: SourceArgs) -> anyhow::Result<()> {
    let source = require_source(orchestrator, &args.source).await?;
    let chapters = orchestrator
        .chapters(&source.id)
        .await
        .context("load chapters")?;
    print_json(&StatusReport {
        status: orchestrator.current_status(&source.id),
        chapters: chapters.len(),
        last_scan: source.last_scan,
        source_id: source.id,
    })
}

pub async fn chapters(orchestrator: &ScanOrchestrator, args: SourceArgs) -> anyhow::Result<()> {
    let source = require_source(orchestrator, &args.source).await?;
    let chapters = orchestrator
        .chapters(&source.id)
        .await
        .context("load chapters")?;
    print_json(&chapters)
}

pub async fn history(orchestrator: &ScanOrchestrator, args: SourceArgs) -> anyhow::Result<()> {
    let source = require_source(orchestrator, &args.source).await?;
    let scans = orchestrator
        .scan_history(&source.id)
        .await
        .context("load scan history")?;
    print_json(&scans)
}

pub async fn changes(orchestrator: &ScanOrchestrator, args: SourceArgs) -> anyhow::Result<()> {
    let source = require_source(orchestrator, &args.source).await?;
    let changes = orchestrator
        .changes(&source.id)
        .await
        .context("load changes")?;
    print_json(&changes)
}

fn read_source_yaml(path: &Path) -> anyhow::Result<Source> {
    let yaml = std::fs::read_to_string(path)
        .with_context(|| format!("read source definition: {}", path.display()))?;
    let source: Source = serde_yaml::from_str(&yaml)
        .with_context(|| format!("parse source definition: {}", path.display()))?;
    if source.id.trim().is_empty() {
        anyhow::bail!("source id is empty: {}", path.display());
    }
    url::Url::parse(&source.url).with_context(|| format!("parse source url: {}", source.url))?;
    Ok(source)
}

async fn require_source(
    orchestrator: &ScanOrchestrator,
    source_id: &str,
) -> anyhow::Result<Source> {
    orchestrator
        .source(source_id)
        .await
        .with_context(|| format!("load source {source_id}"))?
        .ok_or_else(|| anyhow::anyhow!("source not found: {source_id}"))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value).context("serialize output")?;
    stdout.write_all(b"\n").context("write output")?;
    stdout.flush().context("flush output")?;
    Ok(())
}
