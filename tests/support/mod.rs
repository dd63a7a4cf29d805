#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use tocscan::error::{FetchError, StoreError};
use tocscan::fetch::ListingFetcher;
use tocscan::model::{
    Change, Chapter, ImportSettings, RawEntry, Scan, ScanPolicy, ScanStatus, Source, SourceStatus,
};
use tocscan::orchestrator::ScanOrchestrator;
use tocscan::reconcile::Reconciliation;
use tocscan::store::{MemoryScanStore, ScanHistoryStore};

pub fn source(id: &str) -> Source {
    Source {
        id: id.to_owned(),
        name: format!("Source {id}"),
        author: "Anonymous".to_owned(),
        author_url: None,
        image_url: None,
        status: SourceStatus::Active,
        hidden: false,
        url: format!("https://example.com/{id}/toc/"),
        import_settings: ImportSettings::default(),
        policy: ScanPolicy::default(),
        disabled: false,
        last_scan: None,
    }
}

/// Fetcher that replays queued results, optionally waiting on a gate first.
#[derive(Default)]
pub struct ScriptedFetcher {
    responses: Mutex<VecDeque<Result<Vec<RawEntry>, FetchError>>>,
    gate: Option<Arc<Semaphore>>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch blocks until the test adds a permit to the returned semaphore.
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let fetcher = Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::default()
        };
        (fetcher, gate)
    }

    pub fn push_ok(&self, entries: Vec<RawEntry>) {
        self.responses.lock().unwrap().push_back(Ok(entries));
    }

    pub fn push_err(&self, err: FetchError) {
        self.responses.lock().unwrap().push_back(Err(err));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ListingFetcher for ScriptedFetcher {
    async fn fetch(&self, _source: &Source) -> Result<Vec<RawEntry>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .expect("gate semaphore closed")
                .forget();
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(FetchError::Network("no scripted response".to_owned())))
    }
}

/// Memory store whose `save_scan` can be switched to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryScanStore,
    fail_saves: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ScanHistoryStore for FlakyStore {
    async fn list_sources(&self) -> Result<Vec<Source>, StoreError> {
        self.inner.list_sources().await
    }

    async fn load_source(&self, source_id: &str) -> Result<Option<Source>, StoreError> {
        self.inner.load_source(source_id).await
    }

    async fn put_source(&self, source: &Source) -> Result<(), StoreError> {
        self.inner.put_source(source).await
    }

    async fn load_chapters(&self, source_id: &str) -> Result<Vec<Chapter>, StoreError> {
        self.inner.load_chapters(source_id).await
    }

    async fn scan_history(&self, source_id: &str) -> Result<Vec<Scan>, StoreError> {
        self.inner.scan_history(source_id).await
    }

    async fn changes(&self, source_id: &str) -> Result<Vec<Change>, StoreError> {
        self.inner.changes(source_id).await
    }

    async fn save_scan(&self, source_id: &str, commit: &Reconciliation) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Other("disk full".to_owned()));
        }
        self.inner.save_scan(source_id, commit).await
    }
}

pub async fn wait_for_status(orchestrator: &ScanOrchestrator, source_id: &str, want: ScanStatus) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while orchestrator.current_status(source_id) != want {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for scan status");
}

/// Serves `/toc/` with whatever HTML is currently in the returned slot.
pub fn spawn_toc_server() -> (
    String,
    Arc<Mutex<(u16, String)>>,
    mpsc::Sender<()>,
    thread::JoinHandle<()>,
) {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
    let base_url = format!("http://{}", server.server_addr());
    let page = Arc::new(Mutex::new((200_u16, String::new())));
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

    let served = Arc::clone(&page);
    let handle = thread::spawn(move || {
        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }

            let request = match server.recv_timeout(Duration::from_millis(50)) {
                Ok(Some(req)) => req,
                Ok(None) => continue,
                Err(_) => break,
            };

            let (status, body) = if request.url() == "/toc/" {
                served.lock().unwrap().clone()
            } else {
                (404, "not found".to_owned())
            };

            let header = tiny_http::Header::from_bytes(
                &b"Content-Type"[..],
                &b"text/html; charset=utf-8"[..],
            )
            .expect("build header");
            let response = tiny_http::Response::from_string(body)
                .with_status_code(status)
                .with_header(header);
            let _ = request.respond(response);
        }
    });

    (base_url, page, shutdown_tx, handle)
}

pub fn toc_html(chapters: &[(&str, &str)]) -> String {
    let links = chapters
        .iter()
        .map(|(href, title)| format!("      <li><a href=\"{href}\">{title}</a></li>\n"))
        .collect::<String>();
    format!(
        "<!doctype html>
<html>
  <head><title>Contents</title></head>
  <body>
    <ul>
{links}    </ul>
  </body>
</html>
"
    )
}
