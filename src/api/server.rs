use std::sync::Arc;

use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tower_http::decompression::RequestDecompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::{
    services::{
        get_download, get_download_data, get_request, health, list_downloads, list_requests,
        submit_request,
    },
    state::AppState,
};
use crate::config::Config;
use crate::engine::{DownloadEngine, HttpFetcher};
use crate::hooks::{HookService, HttpNotifier};
use crate::links::{
    DOWNLOAD_DATA_PATH, DOWNLOAD_PATH, DOWNLOADS_PATH, REQUEST_PATH, REQUESTS_PATH, RouteLinks,
};
use crate::observability::Metrics;
use crate::requests::RequestService;
use crate::store;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(DOWNLOADS_PATH, get(list_downloads))
        .route(DOWNLOAD_PATH, get(get_download))
        .route(DOWNLOAD_DATA_PATH, get(get_download_data))
        .route(REQUESTS_PATH, get(list_requests).post(submit_request))
        .route(REQUEST_PATH, get(get_request))
        .route("/health", get(health))
        .with_state(state)
        // Request bodies may arrive gzip-compressed
        .layer(RequestDecompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Everything the daemon runs, wired from one [`Config`]
pub struct Daemon {
    pub state: AppState,
    pub hooks: Arc<HookService>,
}

impl Daemon {
    pub fn build(config: Config) -> Result<Self, AnyError> {
        config
            .validate()
            .map_err(|e| format!("Invalid configuration: {}", e))?;
        let config = Arc::new(config);
        let metrics = Arc::new(Metrics::new());

        info!(backend = ?config.metadata.backend, path = %config.metadata.path.display(), "Opening metadata store");
        let handles = store::open_metadata(&config.metadata)
            .map_err(|e| format!("Failed to open metadata store: {}", e))?;

        info!(provider = ?config.storage.provider, "Opening blob store");
        let blobs = store::open_blobs(&config.storage)
            .map_err(|e| format!("Failed to open blob store: {}", e))?;

        let fetcher = HttpFetcher::new(&config.fetch)
            .map_err(|e| format!("Failed to build HTTP fetcher: {}", e))?;

        let engine = Arc::new(
            DownloadEngine::builder()
                .config(config.engine.clone())
                .metadata(handles.metadata.clone())
                .blobs(blobs)
                .fetcher(Arc::new(fetcher))
                .metrics(metrics.clone())
                .build(),
        );

        let links = Arc::new(
            RouteLinks::new(&config.server.public_url())
                .map_err(|e| format!("Invalid public url: {}", e))?,
        );

        let notifier = HttpNotifier::new(&config.hooks)
            .map_err(|e| format!("Failed to build webhook client: {}", e))?;
        let hooks = Arc::new(
            HookService::builder()
                .metadata(handles.metadata.clone())
                .hooks(handles.hooks)
                .notifier(Arc::new(notifier))
                .links(links.clone())
                .policy(config.hooks.retry_policy())
                .metrics(metrics)
                .build(),
        );

        let requests = Arc::new(RequestService::new(handles.metadata, engine.clone()));
        let state = AppState::new(config, engine, requests, links);

        Ok(Self { state, hooks })
    }

    /// Start hooks and workers. Hooks subscribe first so no terminal event is missed.
    pub async fn start(&self) {
        self.hooks.spawn(self.state.engine.subscribe());
        if let Err(e) = self.hooks.resume_pending().await {
            warn!(error = %e, "Failed to resume pending hooks");
        }
        if let Err(e) = self.hooks.reconcile().await {
            warn!(error = %e, "Failed to recover hooks for terminal downloads");
        }
        self.state.engine.start(self.state.config.engine.workers);
    }

    /// Engine first, so hooks for downloads it fails on the way out are still sent.
    pub async fn shutdown(&self) {
        self.state.engine.shutdown().await;
        self.hooks.shutdown().await;
    }
}

pub async fn run(config: Config) -> Result<(), AnyError> {
    let address = config.server.bind_addr;
    let daemon = Daemon::build(config)?;
    daemon.start().await;

    let app = router(daemon.state.clone());

    let listener = TcpListener::bind(address).await?;
    info!(%address, public_url = %daemon.state.config.server.public_url(), "downloaderd listening");

    let served = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    daemon.shutdown().await;
    served?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())
            .expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
