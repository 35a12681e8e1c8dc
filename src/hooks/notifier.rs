//! Webhook payload and the HTTP POST that carries it.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::HookError;
use crate::config::HookConfig;
use crate::links::{LinkError, LinkResolver, ROUTE_DOWNLOAD, ROUTE_DOWNLOAD_DATA};
use crate::models::{Download, DownloadState, HookRecord};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadLinks {
    pub download: String,
    pub data: String,
}

/// Body POSTed to a callback. Receivers should dedupe on `download_id`;
/// the same outcome can arrive more than once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookPayload {
    pub hook_id: Uuid,
    pub download_id: Uuid,
    pub request_id: Uuid,
    pub url: String,
    pub state: DownloadState,
    pub bytes_read: u64,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub links: PayloadLinks,
}

impl HookPayload {
    pub fn build(
        hook: &HookRecord,
        download: &Download,
        links: &dyn LinkResolver,
    ) -> Result<Self, LinkError> {
        let id = download.id.to_string();
        Ok(Self {
            hook_id: hook.id,
            download_id: download.id,
            request_id: hook.request_id,
            url: download.url.clone(),
            state: download.state(),
            bytes_read: download.bytes_read(),
            finished_at: download.status.finished_at,
            error: download.status.error.clone(),
            links: PayloadLinks {
                download: links.resolve(ROUTE_DOWNLOAD, &id)?,
                data: links.resolve(ROUTE_DOWNLOAD_DATA, &id)?,
            },
        })
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// One delivery attempt. Any non-2xx answer is a failure.
    async fn notify(&self, callback: &str, payload: &HookPayload) -> Result<(), HookError>;
}

pub struct HttpNotifier {
    client: reqwest::Client,
}

impl HttpNotifier {
    pub fn new(config: &HookConfig) -> Result<Self, HookError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, callback: &str, payload: &HookPayload) -> Result<(), HookError> {
        let response = self.client.post(callback).json(payload).send().await?;
        if !response.status().is_success() {
            return Err(HookError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}
