//! Download engine: bounded queue, fixed worker pool and terminal events.
//!
//! ```text
//! submit/reserve ──► JobQueue (bounded) ──► Worker × N ──► BlobStore
//!                                              │
//!                                              ├──► MetadataStore (progress, terminal state)
//!                                              └──► broadcast<TerminalEvent>
//! ```
//!
//! Submission never blocks: a full queue is reported as [`EngineError::QueueFull`].
//! An id stays tracked from reservation until its terminal state is recorded,
//! so the same download cannot be queued twice.

pub mod fetch;
mod queue;
mod worker;

pub use fetch::{FetchError, Fetcher, HttpFetcher, RemoteSource};
pub use queue::QueueSlot;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashSet;
use thiserror::Error;
use tokio::sync::{OnceCell, broadcast};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::models::{Download, DownloadState};
use crate::observability::Metrics;
use crate::retry::BackoffPolicy;
use crate::store::{BlobStore, BlobStream, MetadataStore, StoreError};

use queue::JobQueue;
use worker::Worker;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("download queue is full")]
    QueueFull,

    #[error("download {0} is already queued")]
    AlreadyQueued(Uuid),

    #[error("download {0} not found")]
    NotFound(Uuid),

    #[error("download {0} has not finished")]
    NotReady(Uuid),

    #[error("download {id} is {state}; only queued downloads can be submitted")]
    NotQueued { id: Uuid, state: DownloadState },

    #[error("queue slot reserved for {expected}, got {actual}")]
    SlotMismatch { expected: Uuid, actual: Uuid },

    #[error("engine is shutting down")]
    ShuttingDown,

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Published once per download, after its terminal state is persisted
#[derive(Debug, Clone)]
pub struct TerminalEvent {
    pub download: Download,
}

impl TerminalEvent {
    pub fn id(&self) -> Uuid {
        self.download.id
    }

    pub fn state(&self) -> DownloadState {
        self.download.state()
    }
}

pub(crate) struct TransferSettings {
    pub chunk_size: usize,
    pub flush_bytes: u64,
    pub flush_interval: Duration,
    pub retry: BackoffPolicy,
}

impl From<&EngineConfig> for TransferSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.as_usize().max(1),
            flush_bytes: config.flush_bytes.as_u64(),
            flush_interval: config.flush_interval(),
            retry: config.retry_policy(),
        }
    }
}

/// State every worker needs
pub(crate) struct Shared {
    pub settings: TransferSettings,
    pub metadata: Arc<dyn MetadataStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub fetcher: Arc<dyn Fetcher>,
    pub metrics: Arc<Metrics>,
    pub events: broadcast::Sender<TerminalEvent>,
    pub tracked: Arc<DashSet<Uuid>>,
}

impl Shared {
    /// Persist a terminal record, publish it and release the id.
    async fn complete(&self, download: Download) {
        let id = download.id;
        let policy = &self.settings.retry;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.metadata.save_download(&download).await {
                Ok(()) => break,
                Err(e) => match policy.next_delay(attempt) {
                    Some(delay) => {
                        warn!(download_id = %id, attempt, error = %e, "Terminal save failed, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        error!(download_id = %id, error = %e, "Terminal state could not be persisted");
                        break;
                    }
                },
            }
        }

        match download.state() {
            DownloadState::Finished => {
                self.metrics.download_finished();
                info!(download_id = %id, bytes = download.bytes_read(), "Download finished");
            }
            state => {
                self.metrics.download_failed();
                warn!(
                    download_id = %id,
                    %state,
                    error = download.status.error.as_deref().unwrap_or_default(),
                    "Download failed"
                );
            }
        }

        if self.events.send(TerminalEvent { download }).is_err() {
            debug!(download_id = %id, "No terminal event subscribers");
        }
        self.tracked.remove(&id);
    }
}

/// Owns the queue and the worker pool
pub struct DownloadEngine {
    shared: Arc<Shared>,
    queue: JobQueue,
    cancel: CancellationToken,
    tasks: TaskTracker,
    accepting: AtomicBool,
    started: AtomicBool,
    stopped: OnceCell<()>,
}

#[bon::bon]
impl DownloadEngine {
    #[builder]
    pub fn new(
        config: EngineConfig,
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        fetcher: Arc<dyn Fetcher>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        let metrics = metrics.unwrap_or_default();
        let queue = JobQueue::new(config.queue_length, metrics.clone());
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        let shared = Arc::new(Shared {
            settings: TransferSettings::from(&config),
            metadata,
            blobs,
            fetcher,
            metrics,
            events,
            tracked: queue.tracked(),
        });

        Self {
            shared,
            queue,
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
            accepting: AtomicBool::new(true),
            started: AtomicBool::new(false),
            stopped: OnceCell::new(),
        }
    }
}

impl DownloadEngine {
    /// Claim queue space for a download that will be sent later.
    pub fn reserve(&self, id: Uuid) -> Result<QueueSlot> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(EngineError::ShuttingDown);
        }
        self.queue.reserve(id)
    }

    /// Enqueue a `Queued` download. Returns at once; a full queue is an error.
    pub fn submit(&self, download: Download) -> Result<()> {
        self.reserve(download.id)?.send(download)
    }

    /// Spawn `workers` workers. Calling it again has no effect.
    pub fn start(&self, workers: usize) {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Engine already started");
            return;
        }
        if !self.accepting.load(Ordering::SeqCst) {
            warn!("Engine shut down before start");
            return;
        }

        let workers = workers.max(1);
        info!(workers, "Starting worker pool");
        for index in 0..workers {
            let worker = Worker::new(index, self.shared.clone());
            self.tasks
                .spawn(worker.run(self.queue.receiver(), self.cancel.clone()));
        }
    }

    /// Stop accepting work, let in-flight downloads finish, and fail
    /// everything still queued.
    ///
    /// Every caller returns only once the pool has stopped, including one
    /// that arrives while another call is still draining.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        self.stopped.get_or_init(|| self.stop()).await;
    }

    async fn stop(&self) {
        info!(queued = self.queue.len(), "Engine shutting down");

        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;

        let leftover = self.queue.receiver().drain().await;
        if !leftover.is_empty() {
            warn!(count = leftover.len(), "Failing downloads left in queue");
        }
        for job in leftover {
            let mut download = job.download;
            if let Err(e) = download.fail(Utc::now(), "engine shut down") {
                error!(download_id = %download.id, error = %e, "Illegal terminal transition");
            }
            self.shared.complete(download).await;
        }

        info!("Engine stopped");
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Download> {
        self.shared
            .metadata
            .find_download(id)
            .await?
            .ok_or(EngineError::NotFound(id))
    }

    pub async fn list_all(&self) -> Result<Vec<Download>> {
        Ok(self.shared.metadata.list_downloads().await?)
    }

    /// Content of a finished download.
    pub async fn get_reader(&self, download: &Download) -> Result<BlobStream> {
        if !download.is_finished() {
            return Err(EngineError::NotReady(download.id));
        }
        Ok(self.shared.blobs.open_reader(download.id).await?)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TerminalEvent> {
        self.shared.events.subscribe()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Downloads waiting for a worker
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_tracked(&self, id: Uuid) -> bool {
        self.queue.is_tracked(id)
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.shared.metrics.clone()
    }
}
