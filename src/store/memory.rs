use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{HookStore, MetadataStore, Result};
use crate::models::{Download, HookRecord, Request};

/// Process-local store for development and tests. Records are cloned in and
/// out, so readers never hold a reference into a record a worker is updating.
#[derive(Default)]
pub struct MemoryStore {
    downloads: RwLock<BTreeMap<Uuid, Download>>,
    requests: RwLock<BTreeMap<Uuid, Request>>,
    hooks: RwLock<BTreeMap<Uuid, HookRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn save_download(&self, download: &Download) -> Result<()> {
        self.downloads
            .write()
            .await
            .insert(download.id, download.clone());
        Ok(())
    }

    async fn remove_download(&self, id: Uuid) -> Result<()> {
        self.downloads.write().await.remove(&id);
        Ok(())
    }

    async fn find_download(&self, id: Uuid) -> Result<Option<Download>> {
        Ok(self.downloads.read().await.get(&id).cloned())
    }

    async fn list_downloads(&self) -> Result<Vec<Download>> {
        Ok(self.downloads.read().await.values().cloned().collect())
    }

    async fn save_request(&self, request: &Request) -> Result<()> {
        self.requests
            .write()
            .await
            .insert(request.id, request.clone());
        Ok(())
    }

    async fn remove_request(&self, id: Uuid) -> Result<()> {
        self.requests.write().await.remove(&id);
        Ok(())
    }

    async fn find_request(&self, id: Uuid) -> Result<Option<Request>> {
        Ok(self.requests.read().await.get(&id).cloned())
    }

    async fn list_requests(&self) -> Result<Vec<Request>> {
        Ok(self.requests.read().await.values().cloned().collect())
    }

    async fn requests_for_download(&self, download_id: Uuid) -> Result<Vec<Request>> {
        Ok(self
            .requests
            .read()
            .await
            .values()
            .filter(|request| request.download_id == download_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl HookStore for MemoryStore {
    async fn save_hook(&self, hook: &HookRecord) -> Result<()> {
        self.hooks.write().await.insert(hook.id, hook.clone());
        Ok(())
    }

    async fn find_hook(&self, id: Uuid) -> Result<Option<HookRecord>> {
        Ok(self.hooks.read().await.get(&id).cloned())
    }

    async fn list_hooks(&self) -> Result<Vec<HookRecord>> {
        Ok(self.hooks.read().await.values().cloned().collect())
    }
}
