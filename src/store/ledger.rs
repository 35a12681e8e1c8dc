use std::path::Path;

use async_trait::async_trait;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use uuid::Uuid;

use super::keys::{
    decode_index_key, encode_download_key, encode_hook_key, encode_index_key,
    encode_index_prefix, encode_request_key,
};
use super::{HookStore, MetadataStore, Result, StoreError};
use crate::models::{Download, HookRecord, Request};

/// Fjall-backed store for download, request and hook records
///
/// Each record is one JSON value under one key, so a `save_*` is a single
/// atomic insert. A request and its index entry are written in one batch.
#[derive(Clone)]
pub struct FjallStore {
    keyspace: Keyspace,
    downloads: PartitionHandle,
    requests: PartitionHandle,
    request_index: PartitionHandle,
    hooks: PartitionHandle,
}

impl FjallStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening Fjall store at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;

        let downloads = keyspace.open_partition("downloads", PartitionCreateOptions::default())?;
        let requests = keyspace.open_partition("requests", PartitionCreateOptions::default())?;
        let request_index =
            keyspace.open_partition("request_index", PartitionCreateOptions::default())?;
        let hooks = keyspace.open_partition("hooks", PartitionCreateOptions::default())?;

        info!("Fjall store opened successfully");
        Ok(Self {
            keyspace,
            downloads,
            requests,
            request_index,
            hooks,
        })
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(partition: &PartitionHandle, key: Vec<u8>) -> Result<Option<T>> {
        match partition.get(key)? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn scan_json<T: DeserializeOwned>(partition: &PartitionHandle) -> Result<Vec<T>> {
        let mut records = Vec::new();
        for item in partition.iter() {
            let (_, value) = item?;
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl MetadataStore for FjallStore {
    async fn save_download(&self, download: &Download) -> Result<()> {
        let value = serde_json::to_vec(download)?;
        self.downloads.insert(encode_download_key(download.id), value)?;
        debug!(download_id = %download.id, state = %download.state(), "Saved download");
        Ok(())
    }

    async fn remove_download(&self, id: Uuid) -> Result<()> {
        self.downloads.remove(encode_download_key(id))?;
        debug!(download_id = %id, "Removed download");
        Ok(())
    }

    async fn find_download(&self, id: Uuid) -> Result<Option<Download>> {
        Self::get_json(&self.downloads, encode_download_key(id))
    }

    async fn list_downloads(&self) -> Result<Vec<Download>> {
        Self::scan_json(&self.downloads)
    }

    async fn save_request(&self, request: &Request) -> Result<()> {
        let value = serde_json::to_vec(request)?;
        let mut batch = self.keyspace.batch();
        batch.insert(&self.requests, encode_request_key(request.id), value);
        batch.insert(
            &self.request_index,
            encode_index_key(request.download_id, request.id),
            Vec::<u8>::new(),
        );
        batch.commit()?;
        debug!(request_id = %request.id, download_id = %request.download_id, "Saved request");
        Ok(())
    }

    async fn remove_request(&self, id: Uuid) -> Result<()> {
        let Some(request) = Self::get_json::<Request>(&self.requests, encode_request_key(id))? else {
            return Ok(());
        };
        let mut batch = self.keyspace.batch();
        batch.remove(&self.requests, encode_request_key(id));
        batch.remove(
            &self.request_index,
            encode_index_key(request.download_id, request.id),
        );
        batch.commit()?;
        debug!(request_id = %id, "Removed request");
        Ok(())
    }

    async fn find_request(&self, id: Uuid) -> Result<Option<Request>> {
        Self::get_json(&self.requests, encode_request_key(id))
    }

    async fn list_requests(&self) -> Result<Vec<Request>> {
        Self::scan_json(&self.requests)
    }

    async fn requests_for_download(&self, download_id: Uuid) -> Result<Vec<Request>> {
        let mut request_ids = Vec::new();
        for item in self.request_index.prefix(encode_index_prefix(download_id)) {
            let (key, _) = item?;
            let request_id = decode_index_key(&key).ok_or_else(|| {
                StoreError::InvalidKey(String::from_utf8_lossy(&key).into_owned())
            })?;
            request_ids.push(request_id);
        }

        let mut requests = Vec::with_capacity(request_ids.len());
        for request_id in request_ids {
            if let Some(request) = Self::get_json(&self.requests, encode_request_key(request_id))? {
                requests.push(request);
            }
        }
        Ok(requests)
    }
}

#[async_trait]
impl HookStore for FjallStore {
    async fn save_hook(&self, hook: &HookRecord) -> Result<()> {
        let value = serde_json::to_vec(hook)?;
        self.hooks.insert(encode_hook_key(hook.id), value)?;
        debug!(hook_id = %hook.id, state = ?hook.state, attempts = hook.attempts, "Saved hook");
        Ok(())
    }

    async fn find_hook(&self, id: Uuid) -> Result<Option<HookRecord>> {
        Self::get_json(&self.hooks, encode_hook_key(id))
    }

    async fn list_hooks(&self) -> Result<Vec<HookRecord>> {
        Self::scan_json(&self.hooks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DownloadState, HookState};
    use tempfile::TempDir;

    fn create_test_store() -> (FjallStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FjallStore::open(temp_dir.path().join("test_metadata")).unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_save_and_find_download() {
        let (store, _temp) = create_test_store();
        let download = Download::new("https://example.com/a.bin");

        store.save_download(&download).await.unwrap();
        let found = store.find_download(download.id).await.unwrap().unwrap();

        assert_eq!(found, download);
        assert_eq!(found.state(), DownloadState::Queued);
    }

    #[tokio::test]
    async fn test_save_overwrites_by_id() {
        let (store, _temp) = create_test_store();
        let mut download = Download::new("https://example.com/a.bin");
        store.save_download(&download).await.unwrap();

        download.begin(chrono::Utc::now(), Default::default()).unwrap();
        download.record_progress(512).unwrap();
        store.save_download(&download).await.unwrap();

        let all = store.list_downloads().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].bytes_read(), 512);
    }

    #[tokio::test]
    async fn test_find_unknown_download() {
        let (store, _temp) = create_test_store();
        assert!(store.find_download(Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_download() {
        let (store, _temp) = create_test_store();
        let download = Download::new("https://example.com/a.bin");
        store.save_download(&download).await.unwrap();

        store.remove_download(download.id).await.unwrap();
        assert!(store.find_download(download.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_downloads_in_creation_order() {
        let (store, _temp) = create_test_store();
        let first = Download::new("https://example.com/1");
        let second = Download::new("https://example.com/2");
        store.save_download(&second).await.unwrap();
        store.save_download(&first).await.unwrap();

        let ids: Vec<Uuid> = store
            .list_downloads()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn test_requests_for_download_uses_index() {
        let (store, _temp) = create_test_store();
        let download = Download::new("https://example.com/a.bin");
        let other = Download::new("https://example.com/b.bin");

        let request = Request::new(&download.url, Some("http://cb/".into()), download.id);
        let unrelated = Request::new(&other.url, None, other.id);
        store.save_request(&request).await.unwrap();
        store.save_request(&unrelated).await.unwrap();

        let found = store.requests_for_download(download.id).await.unwrap();
        assert_eq!(found, vec![request.clone()]);
        assert_eq!(store.list_requests().await.unwrap().len(), 2);
        assert_eq!(store.find_request(request.id).await.unwrap(), Some(request));
    }

    #[tokio::test]
    async fn test_remove_request_drops_index_entry() {
        let (store, _temp) = create_test_store();
        let download = Download::new("https://example.com/a.bin");
        let request = Request::new(&download.url, None, download.id);
        store.save_request(&request).await.unwrap();

        store.remove_request(request.id).await.unwrap();
        assert!(store.find_request(request.id).await.unwrap().is_none());
        assert!(store.requests_for_download(download.id).await.unwrap().is_empty());

        // Removing twice is harmless
        store.remove_request(request.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_index_key_is_reported() {
        let (store, _temp) = create_test_store();
        let download_id = Uuid::now_v7();
        let mut key = encode_index_prefix(download_id);
        key.extend_from_slice(b"not-a-uuid");
        store.request_index.insert(key, Vec::<u8>::new()).unwrap();

        let err = store.requests_for_download(download_id).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(key) if key.ends_with("not-a-uuid")));
    }

    #[tokio::test]
    async fn test_hooks_round_trip() {
        let (store, _temp) = create_test_store();
        let mut hook = HookRecord::new(Uuid::now_v7(), Uuid::now_v7(), "http://cb/");
        store.save_hook(&hook).await.unwrap();

        hook.record_success(chrono::Utc::now());
        store.save_hook(&hook).await.unwrap();

        let found = store.find_hook(hook.id).await.unwrap().unwrap();
        assert_eq!(found.state, HookState::Delivered);
        assert_eq!(store.list_hooks().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("reopen");
        let download = Download::new("https://example.com/a.bin");

        {
            let store = FjallStore::open(&path).unwrap();
            store.save_download(&download).await.unwrap();
            store.persist().unwrap();
        }

        let store = FjallStore::open(&path).unwrap();
        assert!(store.find_download(download.id).await.unwrap().is_some());
    }
}
