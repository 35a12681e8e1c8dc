//! Persistence capabilities consumed by the engine, request and hook services.
//!
//! - [`MetadataStore`] - download and request records, overwrite-by-id
//! - [`HookStore`] - webhook delivery records
//! - [`BlobStore`] - raw content keyed by download id
//!
//! Every `save_*` is a single record write, so concurrent readers see either
//! the previous or the new version of a record, never a mix. Implementations
//! are picked once at startup from [`crate::config`] via [`open_metadata`] and
//! [`open_blobs`]; nothing above this module knows which backend is in use.

mod blob;
mod keys;
mod ledger;
mod memory;

pub use blob::ObjectBlobStore;
pub use ledger::FjallStore;
pub use memory::MemoryStore;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{MetadataBackend, MetadataConfig, StorageConfig};
use crate::models::{Download, HookRecord, Request};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Byte stream of a finished download's content.
pub type BlobStream = BoxStream<'static, Result<Bytes>>;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn save_download(&self, download: &Download) -> Result<()>;

    /// Deletes a download record. Only used to roll back a request whose
    /// submission failed after the download was written.
    async fn remove_download(&self, id: Uuid) -> Result<()>;

    async fn find_download(&self, id: Uuid) -> Result<Option<Download>>;

    /// All downloads, oldest first.
    async fn list_downloads(&self) -> Result<Vec<Download>>;

    async fn save_request(&self, request: &Request) -> Result<()>;

    /// Deletes a request record and its index entry. Only used by rollback.
    async fn remove_request(&self, id: Uuid) -> Result<()>;

    async fn find_request(&self, id: Uuid) -> Result<Option<Request>>;

    async fn list_requests(&self) -> Result<Vec<Request>>;

    async fn requests_for_download(&self, download_id: Uuid) -> Result<Vec<Request>>;
}

#[async_trait]
pub trait HookStore: Send + Sync {
    async fn save_hook(&self, hook: &HookRecord) -> Result<()>;

    async fn find_hook(&self, id: Uuid) -> Result<Option<HookRecord>>;

    async fn list_hooks(&self) -> Result<Vec<HookRecord>>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn open_writer(&self, download_id: Uuid) -> Result<Box<dyn BlobSink>>;

    /// Fails with [`StoreError::NotFound`] when nothing was stored for the id.
    async fn open_reader(&self, download_id: Uuid) -> Result<BlobStream>;
}

/// Write side of one download's content. Nothing is visible to readers until
/// [`BlobSink::finish`] returns.
#[async_trait]
pub trait BlobSink: Send {
    async fn write(&mut self, chunk: Bytes) -> Result<()>;

    /// Completes the upload and returns the number of bytes written.
    async fn finish(self: Box<Self>) -> Result<u64>;

    async fn abort(self: Box<Self>) -> Result<()>;
}

/// Both record capabilities backed by one implementation.
pub struct MetadataHandles {
    pub metadata: Arc<dyn MetadataStore>,
    pub hooks: Arc<dyn HookStore>,
}

pub fn open_metadata(config: &MetadataConfig) -> Result<MetadataHandles> {
    match config.backend {
        MetadataBackend::Fjall => {
            let store = Arc::new(FjallStore::open(&config.path)?);
            Ok(MetadataHandles {
                metadata: store.clone(),
                hooks: store,
            })
        }
        MetadataBackend::Memory => {
            let store = Arc::new(MemoryStore::new());
            Ok(MetadataHandles {
                metadata: store.clone(),
                hooks: store,
            })
        }
    }
}

pub fn open_blobs(config: &StorageConfig) -> Result<Arc<dyn BlobStore>> {
    Ok(Arc::new(ObjectBlobStore::from_config(config)?))
}
