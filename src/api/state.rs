use std::sync::Arc;

use crate::config::Config;
use crate::engine::DownloadEngine;
use crate::links::LinkResolver;
use crate::observability::Metrics;
use crate::requests::RequestService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Arc<DownloadEngine>,
    pub requests: Arc<RequestService>,
    pub links: Arc<dyn LinkResolver>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        engine: Arc<DownloadEngine>,
        requests: Arc<RequestService>,
        links: Arc<dyn LinkResolver>,
    ) -> Self {
        let metrics = engine.metrics();
        Self {
            config,
            engine,
            requests,
            links,
            metrics,
        }
    }
}
