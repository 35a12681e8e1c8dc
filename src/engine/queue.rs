use std::sync::Arc;

use dashmap::DashSet;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::EngineError;
use crate::models::{Download, DownloadState};
use crate::observability::Metrics;

/// Download handed to the worker pool
#[derive(Debug)]
pub(crate) struct Job {
    pub download: Download,
    pub enqueued_at: Instant,
}

/// Bounded FIFO between submitters and the worker pool
///
/// Architecture:
/// 1. A submitter reserves a slot (`reserve`), failing fast when the buffer is full
/// 2. The id is tracked from reservation until the worker records a terminal state
/// 3. Workers share one receiver behind a mutex, so each job goes to exactly one worker
///
/// Capacity is the channel bound. A reserved but unsent slot counts against it.
pub(crate) struct JobQueue {
    sender: mpsc::Sender<Job>,
    receiver: JobReceiver,
    tracked: Arc<DashSet<Uuid>>,
    metrics: Arc<Metrics>,
}

impl JobQueue {
    pub fn new(capacity: usize, metrics: Arc<Metrics>) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: JobReceiver(Arc::new(Mutex::new(receiver))),
            tracked: Arc::new(DashSet::new()),
            metrics,
        }
    }

    /// Claim buffer space for `id`. Never waits.
    pub fn reserve(&self, id: Uuid) -> Result<QueueSlot, EngineError> {
        // Tracking first, so two racing reservations for one id cannot both win
        if !self.tracked.insert(id) {
            return Err(EngineError::AlreadyQueued(id));
        }

        match self.sender.clone().try_reserve_owned() {
            Ok(permit) => Ok(QueueSlot {
                id,
                permit: Some(permit),
                tracked: self.tracked.clone(),
                metrics: self.metrics.clone(),
            }),
            Err(err) => {
                self.tracked.remove(&id);
                match err {
                    TrySendError::Full(_) => {
                        self.metrics.download_rejected();
                        Err(EngineError::QueueFull)
                    }
                    TrySendError::Closed(_) => Err(EngineError::ShuttingDown),
                }
            }
        }
    }

    pub fn receiver(&self) -> JobReceiver {
        self.receiver.clone()
    }

    pub fn tracked(&self) -> Arc<DashSet<Uuid>> {
        self.tracked.clone()
    }

    pub fn is_tracked(&self, id: Uuid) -> bool {
        self.tracked.contains(&id)
    }

    /// Jobs buffered or reserved and not yet picked up
    pub fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }
}

/// Reserved position in the queue
///
/// Dropping an unsent slot gives the space back and forgets the id.
pub struct QueueSlot {
    id: Uuid,
    permit: Option<mpsc::OwnedPermit<Job>>,
    tracked: Arc<DashSet<Uuid>>,
    metrics: Arc<Metrics>,
}

impl QueueSlot {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Hand the download over. It must be the one the slot was reserved for and still `Queued`.
    pub fn send(mut self, download: Download) -> Result<(), EngineError> {
        if download.id != self.id {
            return Err(EngineError::SlotMismatch {
                expected: self.id,
                actual: download.id,
            });
        }
        if download.state() != DownloadState::Queued {
            return Err(EngineError::NotQueued {
                id: download.id,
                state: download.state(),
            });
        }

        let Some(permit) = self.permit.take() else {
            return Err(EngineError::ShuttingDown);
        };
        permit.send(Job {
            download,
            enqueued_at: Instant::now(),
        });
        self.metrics.download_submitted();
        debug!(download_id = %self.id, "Download enqueued");
        Ok(())
    }
}

impl Drop for QueueSlot {
    fn drop(&mut self) {
        if self.permit.is_some() {
            self.tracked.remove(&self.id);
            debug!(download_id = %self.id, "Queue slot released unused");
        }
    }
}

impl std::fmt::Debug for QueueSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueSlot")
            .field("id", &self.id)
            .field("sent", &self.permit.is_none())
            .finish()
    }
}

/// Worker side of the queue
#[derive(Clone)]
pub(crate) struct JobReceiver(Arc<Mutex<mpsc::Receiver<Job>>>);

impl JobReceiver {
    /// Next job, or `None` once cancelled or closed. Cancellation wins over a ready job.
    pub async fn next(&self, cancel: &CancellationToken) -> Option<Job> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            job = async { self.0.lock().await.recv().await } => job,
        }
    }

    /// Close the channel and take everything left in it. Waits for
    /// outstanding slots to be sent or dropped.
    pub async fn drain(&self) -> Vec<Job> {
        let mut receiver = self.0.lock().await;
        receiver.close();

        let mut jobs = Vec::new();
        while let Some(job) = receiver.recv().await {
            jobs.push(job);
        }
        jobs
    }
}
