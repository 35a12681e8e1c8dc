use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Client intent to fetch a URL. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: Uuid,
    pub url: String,
    pub created_at: DateTime<Utc>,
    /// Webhook target notified when the spawned download becomes terminal.
    pub callback: Option<String>,
    pub download_id: Uuid,
}

impl Request {
    pub fn new(url: impl Into<String>, callback: Option<String>, download_id: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            url: url.into(),
            created_at: Utc::now(),
            callback,
            download_id,
        }
    }
}
