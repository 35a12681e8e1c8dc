//! Absolute links for API payloads and webhook bodies.
//!
//! Route names double as the keys the HTTP router is built from, so a link
//! always points at a path the server actually serves.

use std::collections::HashMap;

use thiserror::Error;
use url::Url;

pub const ROUTE_DOWNLOADS: &str = "downloads";
pub const ROUTE_DOWNLOAD: &str = "download";
pub const ROUTE_DOWNLOAD_DATA: &str = "download-data";
pub const ROUTE_REQUESTS: &str = "requests";
pub const ROUTE_REQUEST: &str = "request";

pub const DOWNLOADS_PATH: &str = "/download/";
pub const DOWNLOAD_PATH: &str = "/download/{id}";
pub const DOWNLOAD_DATA_PATH: &str = "/download/{id}/data";
pub const REQUESTS_PATH: &str = "/request/";
pub const REQUEST_PATH: &str = "/request/{id}";

/// Route name to axum path template. `{id}` is the only placeholder.
pub const ROUTES: [(&str, &str); 5] = [
    (ROUTE_DOWNLOADS, DOWNLOADS_PATH),
    (ROUTE_DOWNLOAD, DOWNLOAD_PATH),
    (ROUTE_DOWNLOAD_DATA, DOWNLOAD_DATA_PATH),
    (ROUTE_REQUESTS, REQUESTS_PATH),
    (ROUTE_REQUEST, REQUEST_PATH),
];

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("unknown route: {0}")]
    UnknownRoute(String),

    #[error("invalid base url: {0}")]
    InvalidBase(#[from] url::ParseError),
}

pub trait LinkResolver: Send + Sync {
    fn resolve(&self, route: &str, id: &str) -> Result<String, LinkError>;
}

/// Resolves routes against a fixed public base URL
#[derive(Debug, Clone)]
pub struct RouteLinks {
    base: Url,
    routes: HashMap<&'static str, &'static str>,
}

impl RouteLinks {
    pub fn new(base: &str) -> Result<Self, LinkError> {
        let base = Url::parse(base)?;
        Ok(Self {
            base,
            routes: ROUTES.into_iter().collect(),
        })
    }
}

impl LinkResolver for RouteLinks {
    fn resolve(&self, route: &str, id: &str) -> Result<String, LinkError> {
        let template = self
            .routes
            .get(route)
            .ok_or_else(|| LinkError::UnknownRoute(route.to_string()))?;
        let path = template.replace("{id}", id);
        Ok(self.base.join(&path)?.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_download_routes() {
        let links = RouteLinks::new("http://localhost:8080").unwrap();
        let id = "8671301b-49fa-416c-4bc0-2869963779e5";

        assert_eq!(
            links.resolve(ROUTE_DOWNLOAD, id).unwrap(),
            format!("http://localhost:8080/download/{id}")
        );
        assert_eq!(
            links.resolve(ROUTE_DOWNLOAD_DATA, id).unwrap(),
            format!("http://localhost:8080/download/{id}/data")
        );
    }

    #[test]
    fn test_base_path_is_replaced_by_absolute_route() {
        let links = RouteLinks::new("https://dl.example.com/ignored/").unwrap();
        assert_eq!(
            links.resolve(ROUTE_REQUESTS, "").unwrap(),
            "https://dl.example.com/request/"
        );
    }

    #[test]
    fn test_unknown_route() {
        let links = RouteLinks::new("http://localhost:8080").unwrap();
        assert!(matches!(
            links.resolve("nope", "1"),
            Err(LinkError::UnknownRoute(_))
        ));
    }
}
