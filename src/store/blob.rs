//! Blob storage for download content
//! Uses Apache Arrow object_store crate

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::buffered::BufWriter;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{ObjectStore, path::Path as StoragePath};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

use super::{BlobSink, BlobStore, BlobStream, Result, StoreError};
use crate::config::{StorageConfig, StorageProvider};

/// Blob store over any object_store backend
#[derive(Clone)]
pub struct ObjectBlobStore {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ObjectBlobStore {
    /// Wrap any object_store backend
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            prefix: "downloads".to_string(),
        }
    }

    /// In-memory storage for testing/development
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()))
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let store: Arc<dyn ObjectStore> = match config.provider {
            StorageProvider::Memory => Arc::new(InMemory::new()),
            StorageProvider::Local => {
                std::fs::create_dir_all(&config.root)?;
                Arc::new(LocalFileSystem::new_with_prefix(&config.root)?)
            }
            StorageProvider::S3 => {
                let mut builder = AmazonS3Builder::new().with_bucket_name(&config.bucket);
                if let Some(region) = &config.region {
                    builder = builder.with_region(region);
                }
                if let Some(endpoint) = &config.endpoint {
                    builder = builder
                        .with_endpoint(endpoint)
                        .with_allow_http(endpoint.starts_with("http://"));
                }
                if let Some(access_key) = &config.access_key {
                    builder = builder.with_access_key_id(access_key);
                }
                if let Some(secret_key) = &config.secret_key {
                    builder = builder.with_secret_access_key(secret_key);
                }
                Arc::new(builder.build()?)
            }
        };

        info!(provider = ?config.provider, "Blob store initialised");
        Ok(Self::new(store))
    }

    fn path(&self, download_id: Uuid) -> StoragePath {
        StoragePath::from(format!("{}/{}", self.prefix, download_id))
    }
}

#[async_trait]
impl BlobStore for ObjectBlobStore {
    async fn open_writer(&self, download_id: Uuid) -> Result<Box<dyn BlobSink>> {
        let path = self.path(download_id);
        debug!(%download_id, %path, "Opening blob writer");
        Ok(Box::new(ObjectBlobSink {
            writer: BufWriter::new(self.store.clone(), path),
            written: 0,
        }))
    }

    async fn open_reader(&self, download_id: Uuid) -> Result<BlobStream> {
        let path = self.path(download_id);
        let result = self.store.get(&path).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => StoreError::NotFound(format!("blob {download_id}")),
            other => StoreError::ObjectStore(other),
        })?;

        debug!(%download_id, size = result.meta.size, "Opened blob reader");
        Ok(result.into_stream().map_err(StoreError::from).boxed())
    }
}

/// Buffered multipart upload of one download's content
pub(crate) struct ObjectBlobSink {
    writer: BufWriter,
    written: u64,
}

#[async_trait]
impl BlobSink for ObjectBlobSink {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        let len = chunk.len() as u64;
        self.writer.put(chunk).await?;
        self.written += len;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<u64> {
        self.writer.shutdown().await?;
        Ok(self.written)
    }

    async fn abort(mut self: Box<Self>) -> Result<()> {
        self.writer.abort().await?;
        Ok(())
    }
}
