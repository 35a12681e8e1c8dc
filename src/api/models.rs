//! Wire shapes for the HTTP API.
//!
//! Records are returned with a `links` list of absolute URLs, e.g.
//!
//! ```json
//! {
//!   "id": "0192f1c4-8a4e-7c3b-9d2e-4f5a6b7c8d9e",
//!   "url": "https://cdn.example.com/image.jpg",
//!   "status": { "state": "finished", "bytes_read": 1000, "...": "..." },
//!   "terminal": true,
//!   "links": [
//!     { "rel": "self", "href": "http://localhost:8080/download/0192f1c4-..." },
//!     { "rel": "data", "href": "http://localhost:8080/download/0192f1c4-.../data" }
//!   ]
//! }
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::links::{
    LinkError, LinkResolver, ROUTE_DOWNLOAD, ROUTE_DOWNLOAD_DATA, ROUTE_REQUEST,
};
use crate::models::{Download, Metadata, Request, Status};
use crate::observability::MetricsSnapshot;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub rel: String,
    pub href: String,
}

impl Link {
    fn resolve(
        links: &dyn LinkResolver,
        rel: &str,
        route: &str,
        id: Uuid,
    ) -> Result<Self, LinkError> {
        Ok(Self {
            rel: rel.to_string(),
            href: links.resolve(route, &id.to_string())?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadView {
    pub id: Uuid,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub metadata: Metadata,
    pub status: Status,
    pub terminal: bool,
    pub links: Vec<Link>,
}

impl DownloadView {
    pub fn new(download: Download, links: &dyn LinkResolver) -> Result<Self, LinkError> {
        let links = vec![
            Link::resolve(links, "self", ROUTE_DOWNLOAD, download.id)?,
            Link::resolve(links, "data", ROUTE_DOWNLOAD_DATA, download.id)?,
        ];
        Ok(Self {
            id: download.id,
            terminal: download.is_terminal(),
            url: download.url,
            created_at: download.created_at,
            metadata: download.metadata,
            status: download.status,
            links,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestView {
    pub id: Uuid,
    pub url: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback: Option<String>,
    pub download_id: Uuid,
    pub links: Vec<Link>,
}

impl RequestView {
    pub fn new(request: Request, links: &dyn LinkResolver) -> Result<Self, LinkError> {
        let links = vec![
            Link::resolve(links, "self", ROUTE_REQUEST, request.id)?,
            Link::resolve(links, "download", ROUTE_DOWNLOAD, request.download_id)?,
        ];
        Ok(Self {
            id: request.id,
            url: request.url,
            created_at: request.created_at,
            callback: request.callback,
            download_id: request.download_id,
            links,
        })
    }

    pub fn self_link(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|link| link.rel == "self")
            .map(|link| link.href.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadList {
    pub downloads: Vec<DownloadView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestList {
    pub requests: Vec<RequestView>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: BTreeMap<String, String>,
    pub queued: usize,
    pub metrics: MetricsSnapshot,
    pub version: String,
}
