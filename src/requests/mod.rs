//! Request intake: validate, persist the Request + Download pair, enqueue.
//!
//! The queue slot is reserved before anything is written, so a full queue is
//! reported without touching the store. Once both records are saved the
//! download is handed over through the slot; any failure in between removes
//! what was written and drops the slot, releasing its capacity.

mod validation;

pub use validation::{RequestValidationError, validate_request, validate_url};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::{DownloadEngine, EngineError};
use crate::models::{Download, Request};
use crate::store::{MetadataStore, StoreError};

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] RequestValidationError),

    #[error("request {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, RequestError>;

/// Inbound fetch request
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NewRequest {
    pub url: String,
    #[serde(default)]
    pub callback: Option<String>,
}

/// What a successful submission produced
#[derive(Debug, Clone)]
pub struct Submitted {
    pub request: Request,
    pub download: Download,
}

pub struct RequestService {
    metadata: Arc<dyn MetadataStore>,
    engine: Arc<DownloadEngine>,
}

impl RequestService {
    pub fn new(metadata: Arc<dyn MetadataStore>, engine: Arc<DownloadEngine>) -> Self {
        Self { metadata, engine }
    }

    pub async fn submit(&self, new: NewRequest) -> Result<Submitted> {
        let (url, callback) = validate_request(&new)?;

        let download = Download::new(url.clone());
        let request = Request::new(url, callback, download.id);

        let slot = self.engine.reserve(download.id).inspect_err(|e| {
            warn!(download_id = %download.id, error = %e, "Request rejected by engine");
        })?;

        self.metadata.save_download(&download).await?;
        if let Err(e) = self.metadata.save_request(&request).await {
            self.rollback(download.id, None).await;
            return Err(e.into());
        }

        if let Err(e) = slot.send(download.clone()) {
            self.rollback(download.id, Some(request.id)).await;
            return Err(e.into());
        }

        info!(
            request_id = %request.id,
            download_id = %download.id,
            url = %request.url,
            callback = request.callback.as_deref().unwrap_or_default(),
            "Request accepted"
        );

        Ok(Submitted { request, download })
    }

    /// Remove whatever part of a submission reached the store. The request
    /// goes first so it never points at a missing download. Orphans are
    /// logged if removal fails too.
    async fn rollback(&self, download_id: Uuid, request_id: Option<Uuid>) {
        if let Some(request_id) = request_id {
            if let Err(e) = self.metadata.remove_request(request_id).await {
                warn!(%request_id, error = %e, "Failed to roll back request record");
            }
        }
        if let Err(e) = self.metadata.remove_download(download_id).await {
            warn!(%download_id, error = %e, "Failed to roll back download record");
        }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Request> {
        self.metadata
            .find_request(id)
            .await?
            .ok_or(RequestError::NotFound(id))
    }

    pub async fn list_all(&self) -> Result<Vec<Request>> {
        Ok(self.metadata.list_requests().await?)
    }
}
