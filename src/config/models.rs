use crate::humanize::{ByteSize, HumanDuration};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Fjall keyspace holding posts and the expiry index
    #[serde(default = "default_fjall_path")]
    pub fjall_path: PathBuf,
    /// Fjall keyspace holding the deletion queue
    #[serde(default = "default_queue_path")]
    pub queue_path: PathBuf,
    #[serde(default)]
    pub api: ApiLimits,
}

/// Limits applied to incoming create requests
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiLimits {
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: ByteSize,
    #[serde(default = "default_max_images_per_post")]
    pub max_images_per_post: usize,
    /// Decoded size of a single image
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: ByteSize,
    #[serde(default = "default_max_title_chars")]
    pub max_title_chars: usize,
    #[serde(default = "default_max_body_chars")]
    pub max_body_chars: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            fjall_path: default_fjall_path(),
            queue_path: default_queue_path(),
            api: ApiLimits::default(),
        }
    }
}

impl Default for ApiLimits {
    fn default() -> Self {
        Self {
            max_payload_bytes: default_max_payload_bytes(),
            max_images_per_post: default_max_images_per_post(),
            max_image_bytes: default_max_image_bytes(),
            max_title_chars: default_max_title_chars(),
            max_body_chars: default_max_body_chars(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_fjall_path() -> PathBuf {
    PathBuf::from("data/posts")
}

fn default_queue_path() -> PathBuf {
    PathBuf::from("data/deletion-queue")
}

fn default_max_payload_bytes() -> ByteSize {
    ByteSize(16 * 1024 * 1024) // 16 MB, base64 inflates images by a third
}

fn default_max_images_per_post() -> usize {
    6
}

fn default_max_image_bytes() -> ByteSize {
    ByteSize(2 * 1024 * 1024)
}

fn default_max_title_chars() -> usize {
    120
}

fn default_max_body_chars() -> usize {
    4000
}

/// Storage provider type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    /// Process-local, lost on restart; for tests and demos
    Memory,
    #[default]
    Local,
    S3,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub provider: StorageProvider,
    /// Default namespace: new uploads land here, bare paths resolve here
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Other namespaces older rows may reference
    #[serde(default)]
    pub extra_namespaces: Vec<String>,
    /// Root directory of the local provider; one subdirectory per namespace
    #[serde(default = "default_root")]
    pub root: PathBuf,
    pub endpoint: Option<String>,
    /// S3 access key (loaded from environment, not from config file)
    #[serde(skip)]
    pub access_key: Option<String>,
    /// S3 secret key (loaded from environment, not from config file)
    #[serde(skip)]
    pub secret_key: Option<String>,
    pub region: Option<String>,
    /// Prefix of client-facing object URLs
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

impl StorageConfig {
    /// Default namespace first, then the extra ones, without repeats
    pub fn namespaces(&self) -> Vec<&str> {
        let mut namespaces = vec![self.bucket.as_str()];
        for namespace in &self.extra_namespaces {
            if !namespaces.contains(&namespace.as_str()) {
                namespaces.push(namespace);
            }
        }
        namespaces
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: StorageProvider::default(),
            bucket: default_bucket(),
            extra_namespaces: Vec::new(),
            root: default_root(),
            endpoint: None,
            access_key: None,
            secret_key: None,
            region: None,
            public_base_url: default_public_base_url(),
        }
    }
}

fn default_bucket() -> String {
    "post-images".to_string()
}

fn default_root() -> PathBuf {
    PathBuf::from("data/objects")
}

fn default_public_base_url() -> String {
    "http://localhost:8080/objects".to_string()
}

/// Retention configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    #[serde(default = "default_post_ttl_days")]
    pub post_ttl_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            post_ttl_days: default_post_ttl_days(),
        }
    }
}

fn default_post_ttl_days() -> u32 {
    crate::content::DEFAULT_TTL_DAYS
}

/// How the prune job disposes of object bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PruneMode {
    /// Remove objects before deleting rows
    #[default]
    Inline,
    /// Queue objects for the drain job, then delete rows
    Deferred,
}

/// Prune and drain tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SweepConfig {
    #[serde(default = "default_prune_batch_size")]
    pub prune_batch_size: usize,
    #[serde(default = "default_remove_chunk_size")]
    pub remove_chunk_size: usize,
    #[serde(default = "default_remove_concurrency")]
    pub remove_concurrency: usize,
    #[serde(default = "default_prune_max_iterations")]
    pub prune_max_iterations: usize,
    #[serde(default)]
    pub prune_mode: PruneMode,
    #[serde(default = "default_drain_page_size")]
    pub drain_page_size: usize,
    #[serde(default = "default_drain_max_pages")]
    pub drain_max_pages: usize,
    /// Run prune and drain periodically inside the server process
    #[serde(default = "default_schedule_enabled")]
    pub schedule_enabled: bool,
    #[serde(default = "default_prune_interval")]
    pub prune_interval: HumanDuration,
    #[serde(default = "default_drain_interval")]
    pub drain_interval: HumanDuration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            prune_batch_size: default_prune_batch_size(),
            remove_chunk_size: default_remove_chunk_size(),
            remove_concurrency: default_remove_concurrency(),
            prune_max_iterations: default_prune_max_iterations(),
            prune_mode: PruneMode::default(),
            drain_page_size: default_drain_page_size(),
            drain_max_pages: default_drain_max_pages(),
            schedule_enabled: default_schedule_enabled(),
            prune_interval: default_prune_interval(),
            drain_interval: default_drain_interval(),
        }
    }
}

fn default_prune_batch_size() -> usize {
    500
}

fn default_remove_chunk_size() -> usize {
    100
}

fn default_remove_concurrency() -> usize {
    1
}

fn default_prune_max_iterations() -> usize {
    50
}

fn default_drain_page_size() -> usize {
    500
}

fn default_drain_max_pages() -> usize {
    200
}

fn default_schedule_enabled() -> bool {
    true
}

fn default_prune_interval() -> HumanDuration {
    HumanDuration::from_secs(60 * 60)
}

fn default_drain_interval() -> HumanDuration {
    HumanDuration::from_secs(5 * 60)
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
