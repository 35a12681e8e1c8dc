use crate::humanize::ByteSize;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::retry::BackoffPolicy;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub hooks: HookConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Base for links in API payloads and webhook bodies.
    /// Defaults to `http://{bind_addr}`.
    #[serde(default)]
    pub public_url: Option<String>,
}

impl ServerConfig {
    pub fn public_url(&self) -> String {
        self.public_url
            .clone()
            .unwrap_or_else(|| format!("http://{}", self.bind_addr))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            public_url: None,
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Worker pool, queue and transfer tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_length")]
    pub queue_length: usize,
    /// Largest piece written to the blob sink at once
    #[serde(default = "default_chunk_size")]
    pub chunk_size: ByteSize,
    /// Progress is flushed after this many bytes...
    #[serde(default = "default_flush_bytes")]
    pub flush_bytes: ByteSize,
    /// ...or after this long, whichever comes first
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Attempts to open the source, including the first
    #[serde(default = "default_engine_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Capacity of the terminal-event broadcast channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl EngineConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn retry_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_length: default_queue_length(),
            chunk_size: default_chunk_size(),
            flush_bytes: default_flush_bytes(),
            flush_interval_ms: default_flush_interval_ms(),
            max_attempts: default_engine_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_workers() -> usize {
    2
}

fn default_queue_length() -> usize {
    32
}

fn default_chunk_size() -> ByteSize {
    ByteSize(32 * 1024)
}

fn default_flush_bytes() -> ByteSize {
    ByteSize(1024 * 1024)
}

fn default_flush_interval_ms() -> u64 {
    1000
}

fn default_engine_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_retry_max_delay_ms() -> u64 {
    10_000
}

fn default_event_capacity() -> usize {
    1024
}

/// Remote source HTTP client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            user_agent: default_user_agent(),
            max_redirects: default_max_redirects(),
        }
    }
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    3600
}

fn default_user_agent() -> String {
    format!("downloaderd/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_redirects() -> usize {
    10
}

/// Webhook delivery configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HookConfig {
    #[serde(default = "default_hook_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_hook_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_hook_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_hook_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl HookConfig {
    pub fn retry_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_hook_max_attempts(),
            base_delay_ms: default_hook_base_delay_ms(),
            max_delay_ms: default_hook_max_delay_ms(),
            request_timeout_secs: default_hook_request_timeout_secs(),
        }
    }
}

fn default_hook_max_attempts() -> u32 {
    5
}

fn default_hook_base_delay_ms() -> u64 {
    1000
}

fn default_hook_max_delay_ms() -> u64 {
    60_000
}

fn default_hook_request_timeout_secs() -> u64 {
    10
}

/// Metadata backend type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataBackend {
    #[default]
    Fjall,
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetadataConfig {
    #[serde(default)]
    pub backend: MetadataBackend,
    #[serde(default = "default_metadata_path")]
    pub path: PathBuf,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            backend: MetadataBackend::default(),
            path: default_metadata_path(),
        }
    }
}

fn default_metadata_path() -> PathBuf {
    PathBuf::from("data/metadata")
}

/// Blob storage provider type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    #[default]
    Local,
    Memory,
    S3,
}

/// Blob storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub provider: StorageProvider,
    /// Root directory for the local provider
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    /// S3 access key (loaded from environment, not from config file)
    #[serde(skip)]
    pub access_key: Option<String>,
    /// S3 secret key (loaded from environment, not from config file)
    #[serde(skip)]
    pub secret_key: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: StorageProvider::default(),
            root: default_root(),
            bucket: default_bucket(),
            region: None,
            endpoint: None,
            access_key: None,
            secret_key: None,
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from("download-data")
}

fn default_bucket() -> String {
    "downloaderd".to_string()
}
