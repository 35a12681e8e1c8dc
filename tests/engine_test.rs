use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt};
use tempfile::TempDir;
use tokio::sync::broadcast;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use downloaderd::config::{EngineConfig, FetchConfig};
use downloaderd::engine::{
    DownloadEngine, EngineError, Fetcher, HttpFetcher, RemoteSource, TerminalEvent, fetch,
};
use downloaderd::humanize::ByteSize;
use downloaderd::models::{Download, DownloadState, Request};
use downloaderd::store::{
    BlobStore, FjallStore, MemoryStore, MetadataStore, ObjectBlobStore, Result, StoreError,
};

/// Records every download save so tests can inspect the write history
struct RecordingStore {
    inner: MemoryStore,
    saves: Mutex<Vec<(DownloadState, u64)>>,
    save_delay: Duration,
}

impl RecordingStore {
    fn new() -> Self {
        Self::with_save_delay(Duration::ZERO)
    }

    /// Every download save takes at least `save_delay`
    fn with_save_delay(save_delay: Duration) -> Self {
        Self {
            inner: MemoryStore::new(),
            saves: Mutex::new(Vec::new()),
            save_delay,
        }
    }

    fn saves(&self) -> Vec<(DownloadState, u64)> {
        self.saves.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetadataStore for RecordingStore {
    async fn save_download(&self, download: &Download) -> Result<()> {
        self.saves
            .lock()
            .unwrap()
            .push((download.state(), download.bytes_read()));
        if !self.save_delay.is_zero() {
            tokio::time::sleep(self.save_delay).await;
        }
        self.inner.save_download(download).await
    }

    async fn remove_download(&self, id: Uuid) -> Result<()> {
        self.inner.remove_download(id).await
    }

    async fn find_download(&self, id: Uuid) -> Result<Option<Download>> {
        self.inner.find_download(id).await
    }

    async fn list_downloads(&self) -> Result<Vec<Download>> {
        self.inner.list_downloads().await
    }

    async fn save_request(&self, request: &Request) -> Result<()> {
        self.inner.save_request(request).await
    }

    async fn remove_request(&self, id: Uuid) -> Result<()> {
        self.inner.remove_request(id).await
    }

    async fn find_request(&self, id: Uuid) -> Result<Option<Request>> {
        self.inner.find_request(id).await
    }

    async fn list_requests(&self) -> Result<Vec<Request>> {
        self.inner.list_requests().await
    }

    async fn requests_for_download(&self, download_id: Uuid) -> Result<Vec<Request>> {
        self.inner.requests_for_download(download_id).await
    }
}

fn test_config(queue_length: usize) -> EngineConfig {
    EngineConfig {
        workers: 1,
        queue_length,
        chunk_size: ByteSize(100),
        flush_bytes: ByteSize(100),
        max_attempts: 3,
        retry_base_delay_ms: 10,
        retry_max_delay_ms: 20,
        ..EngineConfig::default()
    }
}

fn build_engine(config: EngineConfig, metadata: Arc<dyn MetadataStore>) -> DownloadEngine {
    let fetcher = HttpFetcher::new(&FetchConfig {
        connect_timeout_secs: 2,
        request_timeout_secs: 10,
        ..FetchConfig::default()
    })
    .expect("Failed to build fetcher");

    DownloadEngine::builder()
        .config(config)
        .metadata(metadata)
        .blobs(Arc::new(ObjectBlobStore::in_memory()))
        .fetcher(Arc::new(fetcher))
        .build()
}

async fn next_terminal(events: &mut broadcast::Receiver<TerminalEvent>) -> TerminalEvent {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("Timed out waiting for terminal event")
        .expect("Event channel closed")
}

async fn mount_file(server: &MockServer, route: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(body, "application/octet-stream"),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_single_worker_downloads_whole_resource() {
    let server = MockServer::start().await;
    let body: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    mount_file(&server, "/file.bin", body.clone()).await;

    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(FjallStore::open(temp_dir.path().join("metadata")).unwrap());
    let engine = build_engine(test_config(4), store);
    let mut events = engine.subscribe();
    engine.start(1);

    let download = Download::new(format!("{}/file.bin", server.uri()));
    let id = download.id;
    engine.submit(download).unwrap();

    let event = next_terminal(&mut events).await;
    assert_eq!(event.id(), id);
    assert_eq!(event.state(), DownloadState::Finished);

    let stored = engine.find_by_id(id).await.unwrap();
    assert_eq!(stored.state(), DownloadState::Finished);
    assert!(stored.is_terminal());
    assert_eq!(stored.bytes_read(), 1000);
    assert_eq!(stored.metadata.size, Some(1000));
    assert_eq!(stored.metadata.mime_type.as_deref(), Some("application/octet-stream"));
    assert!(stored.status.started_at.is_some());
    assert!(stored.status.finished_at.is_some());

    let chunks: Vec<bytes::Bytes> = engine
        .get_reader(&stored)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(chunks.concat(), body);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_progress_is_monotonic_and_ends_terminal() {
    let server = MockServer::start().await;
    mount_file(&server, "/big.bin", vec![7u8; 1000]).await;

    let store = Arc::new(RecordingStore::new());
    let engine = build_engine(test_config(4), store.clone());
    let mut events = engine.subscribe();
    engine.start(1);

    engine
        .submit(Download::new(format!("{}/big.bin", server.uri())))
        .unwrap();
    next_terminal(&mut events).await;

    let saves = store.saves();
    assert!(saves.len() >= 3, "expected progress flushes, got {saves:?}");
    assert_eq!(saves.first(), Some(&(DownloadState::InProgress, 0)));
    assert_eq!(saves.last(), Some(&(DownloadState::Finished, 1000)));
    assert!(saves.windows(2).all(|pair| pair[0].1 <= pair[1].1));
    assert!(
        saves[..saves.len() - 1]
            .iter()
            .all(|(state, _)| *state == DownloadState::InProgress)
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn test_full_queue_rejects_extra_submissions() {
    let engine = build_engine(test_config(2), Arc::new(MemoryStore::new()));

    let results: Vec<_> = (0..5)
        .map(|i| engine.submit(Download::new(format!("http://example.com/{i}"))))
        .collect();

    assert!(results[0].is_ok());
    assert!(results[1].is_ok());
    for result in &results[2..] {
        assert!(matches!(result, Err(EngineError::QueueFull)));
    }
    assert_eq!(engine.queued(), 2);
    assert_eq!(engine.metrics().snapshot().downloads_rejected, 3);
}

#[tokio::test]
async fn test_duplicate_submission_is_already_queued() {
    let engine = build_engine(test_config(4), Arc::new(MemoryStore::new()));
    let download = Download::new("http://example.com/a");

    engine.submit(download.clone()).unwrap();
    assert!(matches!(
        engine.submit(download),
        Err(EngineError::AlreadyQueued(_))
    ));
}

#[tokio::test]
async fn test_connection_errors_fail_after_retry_ceiling() {
    let engine = build_engine(test_config(4), Arc::new(MemoryStore::new()));
    let mut events = engine.subscribe();
    engine.start(1);

    // Nothing listens on port 1
    let download = Download::new("http://127.0.0.1:1/file.bin");
    let id = download.id;
    engine.submit(download).unwrap();

    let event = next_terminal(&mut events).await;
    assert_eq!(event.state(), DownloadState::Failed);

    let stored = engine.find_by_id(id).await.unwrap();
    assert_eq!(stored.state(), DownloadState::Failed);
    let error = stored.status.error.clone().unwrap();
    assert!(!error.is_empty());
    assert!(error.contains("3 attempts"), "unexpected error: {error}");
    assert_eq!(stored.bytes_read(), 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_transient_server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    mount_file(&server, "/flaky", b"finally".to_vec()).await;

    let engine = build_engine(test_config(4), Arc::new(MemoryStore::new()));
    let mut events = engine.subscribe();
    engine.start(1);

    engine
        .submit(Download::new(format!("{}/flaky", server.uri())))
        .unwrap();

    let event = next_terminal(&mut events).await;
    assert_eq!(event.state(), DownloadState::Finished);
    assert_eq!(event.download.bytes_read(), 7);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let engine = build_engine(test_config(4), Arc::new(MemoryStore::new()));
    let mut events = engine.subscribe();
    engine.start(1);

    engine
        .submit(Download::new(format!("{}/missing", server.uri())))
        .unwrap();

    let event = next_terminal(&mut events).await;
    assert_eq!(event.state(), DownloadState::Failed);
    assert!(event.download.status.error.unwrap().contains("404"));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_reader_not_ready_until_finished() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![1u8; 10])
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let engine = build_engine(test_config(4), Arc::new(MemoryStore::new()));
    let mut events = engine.subscribe();
    engine.start(1);

    let download = Download::new(format!("{}/slow", server.uri()));
    let id = download.id;
    engine.submit(download.clone()).unwrap();

    assert!(matches!(
        engine.get_reader(&download).await,
        Err(EngineError::NotReady(not_ready)) if not_ready == id
    ));

    next_terminal(&mut events).await;
    let finished = engine.find_by_id(id).await.unwrap();
    assert!(engine.get_reader(&finished).await.is_ok());

    engine.shutdown().await;
}

#[tokio::test]
async fn test_unknown_id_is_not_found() {
    let engine = build_engine(test_config(4), Arc::new(MemoryStore::new()));
    let id = Uuid::now_v7();

    assert!(matches!(
        engine.find_by_id(id).await,
        Err(EngineError::NotFound(missing)) if missing == id
    ));
}

#[tokio::test]
async fn test_shutdown_finishes_current_job_and_fails_queued() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"slow body".to_vec())
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let engine = build_engine(test_config(4), Arc::new(MemoryStore::new()));
    let mut events = engine.subscribe();
    engine.start(1);

    let first = Download::new(format!("{}/one", server.uri()));
    let second = Download::new(format!("{}/two", server.uri()));
    let (first_id, second_id) = (first.id, second.id);
    engine.submit(first).unwrap();
    engine.submit(second).unwrap();

    // Give the single worker time to pick up the first job
    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.shutdown().await;

    let finished = engine.find_by_id(first_id).await.unwrap();
    assert_eq!(finished.state(), DownloadState::Finished);

    let failed = engine.find_by_id(second_id).await.unwrap();
    assert_eq!(failed.state(), DownloadState::Failed);
    assert_eq!(failed.status.error.as_deref(), Some("engine shut down"));

    let mut seen = vec![next_terminal(&mut events).await, next_terminal(&mut events).await];
    seen.sort_by_key(|event| event.id() != first_id);
    assert_eq!(seen[0].state(), DownloadState::Finished);
    assert_eq!(seen[1].state(), DownloadState::Failed);

    assert!(matches!(
        engine.submit(Download::new("http://example.com/late")),
        Err(EngineError::ShuttingDown)
    ));
}

/// Serves a fixed body while declaring a content length of its own
struct DeclaredLength {
    declared: u64,
    body: &'static [u8],
}

#[async_trait]
impl Fetcher for DeclaredLength {
    async fn open(&self, _url: &str) -> fetch::Result<RemoteSource> {
        let chunk: fetch::Result<Bytes> = Ok(Bytes::from_static(self.body));
        Ok(RemoteSource {
            content_type: Some("application/octet-stream".into()),
            content_length: Some(self.declared),
            body: futures_util::stream::iter(vec![chunk]).boxed(),
        })
    }
}

async fn run_declared(declared: u64, body: &'static [u8]) -> (Download, Arc<ObjectBlobStore>) {
    let blobs = Arc::new(ObjectBlobStore::in_memory());
    let engine = DownloadEngine::builder()
        .config(test_config(4))
        .metadata(Arc::new(MemoryStore::new()))
        .blobs(blobs.clone())
        .fetcher(Arc::new(DeclaredLength { declared, body }))
        .build();
    let mut events = engine.subscribe();
    engine.start(1);

    let download = Download::new("http://example.com/sized.bin");
    let id = download.id;
    engine.submit(download).unwrap();
    next_terminal(&mut events).await;

    let stored = engine.find_by_id(id).await.unwrap();
    engine.shutdown().await;
    (stored, blobs)
}

#[tokio::test]
async fn test_body_shorter_than_declared_fails() {
    let (download, blobs) = run_declared(10, b"12345").await;

    assert_eq!(download.state(), DownloadState::Failed);
    assert_eq!(download.bytes_read(), 5);
    assert_eq!(
        download.status.error.as_deref(),
        Some("content ended after 5 of 10 declared bytes")
    );
    assert!(matches!(
        blobs.open_reader(download.id).await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_body_longer_than_declared_fails() {
    let (download, blobs) = run_declared(10, b"123456789012345").await;

    assert_eq!(download.state(), DownloadState::Failed);
    assert_eq!(download.bytes_read(), 0);
    assert_eq!(
        download.status.error.as_deref(),
        Some("read 15 bytes, declared size is 10")
    );
    assert!(matches!(
        blobs.open_reader(download.id).await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_concurrent_shutdown_waits_for_drain() {
    let store = Arc::new(RecordingStore::with_save_delay(Duration::from_millis(20)));
    let engine = build_engine(test_config(4), store.clone());

    let mut ids = Vec::new();
    for i in 0..3 {
        let download = Download::new(format!("http://example.com/{i}"));
        ids.push(download.id);
        engine.submit(download).unwrap();
    }

    // The second call starts while the first is still saving Failed records
    let second = async {
        tokio::task::yield_now().await;
        engine.shutdown().await;
        let mut states = Vec::new();
        for id in &ids {
            states.push(engine.find_by_id(*id).await.map(|d| d.state()).ok());
        }
        states
    };
    let ((), states) = tokio::join!(engine.shutdown(), second);

    assert_eq!(states, vec![Some(DownloadState::Failed); 3]);
    assert_eq!(engine.queued(), 0);
}
