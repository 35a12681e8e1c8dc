//! Worker loop - takes queued downloads and streams them into the blob store

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::Shared;
use super::fetch::{FetchError, RemoteSource};
use super::queue::{Job, JobReceiver};
use crate::models::{Download, Metadata, TransitionError};
use crate::store::{BlobSink, StoreError};

#[derive(Debug, Error)]
pub(crate) enum TransferError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("content ended after {read} of {declared} declared bytes")]
    Truncated { read: u64, declared: u64 },

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    #[error("engine shut down")]
    Cancelled,
}

impl TransferError {
    fn is_retryable(&self) -> bool {
        match self {
            TransferError::Fetch(e) => e.is_retryable(),
            TransferError::Store(_) => true,
            _ => false,
        }
    }
}

/// Decides when accumulated progress is written back to the metadata store
struct ProgressFlusher {
    every_bytes: u64,
    every: Duration,
    last_bytes: u64,
    last_at: Instant,
}

impl ProgressFlusher {
    fn new(every_bytes: u64, every: Duration) -> Self {
        Self {
            every_bytes: every_bytes.max(1),
            every,
            last_bytes: 0,
            last_at: Instant::now(),
        }
    }

    fn due(&self, bytes_read: u64) -> bool {
        bytes_read.saturating_sub(self.last_bytes) >= self.every_bytes
            || self.last_at.elapsed() >= self.every
    }

    fn mark(&mut self, bytes_read: u64) {
        self.last_bytes = bytes_read;
        self.last_at = Instant::now();
    }
}

pub(crate) struct Worker {
    index: usize,
    shared: Arc<Shared>,
}

impl Worker {
    pub fn new(index: usize, shared: Arc<Shared>) -> Self {
        Self { index, shared }
    }

    pub async fn run(self, jobs: JobReceiver, cancel: CancellationToken) {
        info!(worker = self.index, "Worker started");

        while let Some(job) = jobs.next(&cancel).await {
            self.process(job, &cancel).await;
        }

        info!(worker = self.index, "Worker stopped");
    }

    /// Drive one download to a terminal state. Never returns an error; every
    /// failure lands in the record.
    async fn process(&self, job: Job, cancel: &CancellationToken) {
        let Job {
            mut download,
            enqueued_at,
        } = job;

        info!(
            worker = self.index,
            download_id = %download.id,
            url = %download.url,
            waited_ms = enqueued_at.elapsed().as_millis() as u64,
            "Processing download"
        );

        let outcome = self.transfer(&mut download, cancel).await;

        let now = Utc::now();
        let transition = match &outcome {
            Ok(()) => download.finish(now),
            Err(err) => download.fail(now, err.to_string()),
        };
        if let Err(e) = transition {
            error!(download_id = %download.id, error = %e, "Illegal terminal transition");
        }

        self.shared.complete(download).await;
    }

    async fn transfer(
        &self,
        download: &mut Download,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let (source, mut sink) = self.open_with_retry(download, cancel).await?;

        let metadata = Metadata {
            mime_type: source.content_type,
            size: source.content_length,
        };
        download.begin(Utc::now(), metadata)?;

        let streamed = match self.shared.metadata.save_download(download).await {
            Ok(()) => self.stream(download, source.body, sink.as_mut()).await,
            Err(e) => Err(TransferError::Store(e)),
        };

        match streamed {
            Ok(()) => {
                let written = sink.finish().await?;
                debug!(download_id = %download.id, written, "Blob committed");
                Ok(())
            }
            Err(err) => {
                if let Err(e) = sink.abort().await {
                    warn!(download_id = %download.id, error = %e, "Failed to abort blob upload");
                }
                Err(err)
            }
        }
    }

    async fn open(
        &self,
        download: &Download,
    ) -> Result<(RemoteSource, Box<dyn BlobSink>), TransferError> {
        let source = self.shared.fetcher.open(&download.url).await?;
        let sink = self.shared.blobs.open_writer(download.id).await?;
        Ok((source, sink))
    }

    /// Open source and sink, backing off between retryable failures.
    /// Nothing has been written yet, so a retry starts from a clean slate.
    async fn open_with_retry(
        &self,
        download: &Download,
        cancel: &CancellationToken,
    ) -> Result<(RemoteSource, Box<dyn BlobSink>), TransferError> {
        let policy = &self.shared.settings.retry;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match self.open(download).await {
                Ok(opened) => return Ok(opened),
                Err(err) => err,
            };

            if !err.is_retryable() {
                warn!(download_id = %download.id, error = %err, "Open failed permanently");
                return Err(err);
            }
            let Some(delay) = policy.next_delay(attempt) else {
                warn!(download_id = %download.id, attempt, error = %err, "Open retries exhausted");
                if attempt == 1 {
                    return Err(err);
                }
                return Err(TransferError::Exhausted {
                    attempts: attempt,
                    last: err.to_string(),
                });
            };

            warn!(
                download_id = %download.id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Open failed, retrying"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn stream(
        &self,
        download: &mut Download,
        mut body: BoxStream<'static, Result<Bytes, FetchError>>,
        sink: &mut dyn BlobSink,
    ) -> Result<(), TransferError> {
        let settings = &self.shared.settings;
        let mut flusher = ProgressFlusher::new(settings.flush_bytes, settings.flush_interval);

        while let Some(next) = body.next().await {
            let mut data = next?;

            while !data.is_empty() {
                let piece = data.split_to(data.len().min(settings.chunk_size));
                let len = piece.len() as u64;

                sink.write(piece).await?;
                let read = download.record_progress(len)?;

                if flusher.due(read) {
                    // Stale progress is tolerated; only the terminal write must land
                    if let Err(e) = self.shared.metadata.save_download(download).await {
                        warn!(download_id = %download.id, error = %e, "Progress flush failed");
                    }
                    flusher.mark(read);
                }
            }
        }

        if let Some(declared) = download.metadata.size {
            let read = download.bytes_read();
            if read < declared {
                return Err(TransferError::Truncated { read, declared });
            }
        }

        Ok(())
    }
}
