use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashSet;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::notifier::{HookPayload, Notifier};
use super::{HookError, Result};
use crate::engine::TerminalEvent;
use crate::links::LinkResolver;
use crate::models::{Download, HookRecord, HookState};
use crate::observability::Metrics;
use crate::retry::BackoffPolicy;
use crate::store::{HookStore, MetadataStore};

/// Turns terminal download events into webhook deliveries
///
/// Each delivery runs in its own task so a slow callback never holds up the
/// event stream. The record is saved after every attempt. A delivery
/// interrupted by shutdown stays `Pending` and is picked up by
/// [`HookService::resume_pending`] on the next start.
///
/// Events dropped because the subscriber lagged are recovered by
/// [`HookService::reconcile`], which also runs at startup. A
/// `(download, request)` pair is scheduled at most once per process.
pub struct HookService {
    metadata: Arc<dyn MetadataStore>,
    hooks: Arc<dyn HookStore>,
    notifier: Arc<dyn Notifier>,
    links: Arc<dyn LinkResolver>,
    policy: BackoffPolicy,
    metrics: Arc<Metrics>,
    scheduled: DashSet<(Uuid, Uuid)>,
    tasks: TaskTracker,
    cancel: CancellationToken,
}

#[bon::bon]
impl HookService {
    #[builder]
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        hooks: Arc<dyn HookStore>,
        notifier: Arc<dyn Notifier>,
        links: Arc<dyn LinkResolver>,
        policy: BackoffPolicy,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            metadata,
            hooks,
            notifier,
            links,
            policy,
            metrics: metrics.unwrap_or_default(),
            scheduled: DashSet::new(),
            tasks: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }
}

impl HookService {
    /// Start consuming `events` in the background.
    pub fn spawn(self: &Arc<Self>, events: broadcast::Receiver<TerminalEvent>) {
        let service = Arc::clone(self);
        self.tasks.spawn(async move { service.run(events).await });
    }

    async fn run(self: Arc<Self>, mut events: broadcast::Receiver<TerminalEvent>) {
        info!("Hook service started");

        loop {
            // Events already published are handled before a shutdown is noticed
            let received = tokio::select! {
                biased;
                received = events.recv() => received,
                _ = self.cancel.cancelled() => break,
            };

            match received {
                Ok(event) => self.on_terminal(event).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Hook service fell behind; rescanning terminal downloads");
                    if let Err(e) = self.reconcile().await {
                        error!(error = %e, "Failed to recover hooks for dropped events");
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }

        info!("Hook service stopped");
    }

    async fn on_terminal(self: &Arc<Self>, event: TerminalEvent) {
        let download = event.download;

        let requests = match self.metadata.requests_for_download(download.id).await {
            Ok(requests) => requests,
            Err(e) => {
                error!(download_id = %download.id, error = %e, "Failed to look up requests for hook");
                return;
            }
        };

        for request in requests {
            let Some(callback) = request.callback else {
                continue;
            };
            if !self.scheduled.insert((download.id, request.id)) {
                debug!(download_id = %download.id, request_id = %request.id, "Hook already scheduled");
                continue;
            }

            self.schedule(HookRecord::new(download.id, request.id, callback), download.clone())
                .await;
        }
    }

    async fn schedule(self: &Arc<Self>, record: HookRecord, download: Download) {
        if let Err(e) = self.hooks.save_hook(&record).await {
            error!(hook_id = %record.id, error = %e, "Failed to persist hook record");
        }
        debug!(hook_id = %record.id, download_id = %download.id, callback = %record.callback, "Hook scheduled");

        self.spawn_delivery(record, download);
    }

    /// Schedule hooks for terminal downloads whose callback requests have no
    /// hook record yet. Returns how many were scheduled.
    pub async fn reconcile(self: &Arc<Self>) -> Result<usize> {
        let known: HashSet<(Uuid, Uuid)> = self
            .hooks
            .list_hooks()
            .await?
            .into_iter()
            .map(|hook| (hook.download_id, hook.request_id))
            .collect();

        let mut scheduled = 0;
        for download in self.metadata.list_downloads().await? {
            if !download.is_terminal() {
                continue;
            }
            for request in self.metadata.requests_for_download(download.id).await? {
                let Some(callback) = request.callback else {
                    continue;
                };
                let key = (download.id, request.id);
                if known.contains(&key) || !self.scheduled.insert(key) {
                    continue;
                }

                self.schedule(HookRecord::new(download.id, request.id, callback), download.clone())
                    .await;
                scheduled += 1;
            }
        }

        if scheduled > 0 {
            info!(scheduled, "Recovered hooks for terminal downloads");
        }
        Ok(scheduled)
    }

    fn spawn_delivery(self: &Arc<Self>, record: HookRecord, download: Download) {
        let service = Arc::clone(self);
        self.tasks.spawn(async move {
            // Outcome is already logged and persisted
            let _ = service.deliver(record, download).await;
        });
    }

    /// Attempt delivery until it succeeds, the ceiling is hit or the service stops.
    pub async fn deliver(&self, mut record: HookRecord, download: Download) -> Result<HookRecord> {
        let payload = HookPayload::build(&record, &download, self.links.as_ref()).map_err(|e| {
            error!(hook_id = %record.id, error = %e, "Failed to build hook payload");
            HookError::from(e)
        })?;

        loop {
            let outcome = self.notifier.notify(&record.callback, &payload).await;
            let now = Utc::now();

            match outcome {
                Ok(()) => {
                    record.record_success(now);
                    self.metrics.hook_delivered();
                    self.persist(&record).await;
                    info!(
                        hook_id = %record.id,
                        download_id = %record.download_id,
                        callback = %record.callback,
                        attempt = record.attempts,
                        "Hook delivered"
                    );
                    return Ok(record);
                }
                Err(e) => {
                    record.record_failure(now, e.to_string(), self.policy.max_attempts());

                    let delay = match self.policy.next_delay(record.attempts) {
                        Some(delay) if record.state == HookState::Pending => delay,
                        _ => {
                            record.state = HookState::Exhausted;
                            let err = self.exhausted(&record);
                            self.persist(&record).await;
                            return Err(err);
                        }
                    };
                    self.persist(&record).await;

                    warn!(
                        hook_id = %record.id,
                        callback = %record.callback,
                        attempt = record.attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Hook delivery failed, retrying"
                    );

                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            debug!(hook_id = %record.id, "Hook delivery interrupted by shutdown");
                            return Ok(record);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    fn exhausted(&self, record: &HookRecord) -> HookError {
        self.metrics.hook_exhausted();
        let last_error = record.last_error.clone().unwrap_or_default();
        error!(
            hook_id = %record.id,
            download_id = %record.download_id,
            callback = %record.callback,
            attempts = record.attempts,
            error = %last_error,
            "Hook delivery exhausted"
        );
        HookError::Exhausted {
            attempts: record.attempts,
            last_error,
        }
    }

    async fn persist(&self, record: &HookRecord) {
        if let Err(e) = self.hooks.save_hook(record).await {
            warn!(hook_id = %record.id, error = %e, "Failed to save hook record");
        }
    }

    /// Re-deliver hooks a previous run left `Pending`. Returns how many were scheduled.
    pub async fn resume_pending(self: &Arc<Self>) -> Result<usize> {
        let pending: Vec<HookRecord> = self
            .hooks
            .list_hooks()
            .await?
            .into_iter()
            .filter(|hook| hook.state == HookState::Pending)
            .collect();

        let mut scheduled = 0;
        for record in pending {
            match self.metadata.find_download(record.download_id).await? {
                Some(download) if download.is_terminal() => {
                    self.scheduled.insert((record.download_id, record.request_id));
                    self.spawn_delivery(record, download);
                    scheduled += 1;
                }
                Some(_) => {
                    warn!(hook_id = %record.id, "Pending hook for a download that is not terminal");
                }
                None => {
                    warn!(hook_id = %record.id, download_id = %record.download_id, "Pending hook for unknown download");
                }
            }
        }

        if scheduled > 0 {
            info!(scheduled, "Resumed pending hooks");
        }
        Ok(scheduled)
    }

    /// Stop after handling already-published events; in-flight retries are abandoned as `Pending`.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        info!("Hook deliveries settled");
    }
}
