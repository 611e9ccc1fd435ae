//! Object storage abstraction for post images
//! Uses Apache Arrow object_store crate
//!
//! Every namespace (bucket) maps to its own `ObjectStore`. Removal goes
//! through [`BlobStore::remove_batch`], one call per namespace, and treats
//! an already-absent object as removed so retries are always safe.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{ObjectStore, path::Path as StoragePath};
use thiserror::Error;

use crate::config::{StorageConfig, StorageProvider};
use crate::content::ObjectRef;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Removal failed in namespace '{namespace}': {message}")]
    RemovalFailed { namespace: String, message: String },

    #[error("Unknown namespace: {0}")]
    UnknownNamespace(String),

    #[error("Storage backend misconfigured: {0}")]
    Misconfigured(String),

    #[error("Object store error: {0}")]
    ObjectStoreError(#[from] object_store::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

/// Metadata returned after upload
#[derive(Debug, Clone)]
pub struct UploadMetadata {
    pub object: ObjectRef,
    pub etag: Option<String>,
    pub size: usize,
}

/// Binary object backend used by the lifecycle core
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload bytes to the given location
    async fn put(&self, object: &ObjectRef, data: Vec<u8>) -> Result<UploadMetadata>;

    /// Remove every path from one namespace in a single call.
    ///
    /// Absent paths count as removed. Returns the number of paths handled;
    /// any other failure fails the whole call.
    async fn remove_batch(&self, namespace: &str, paths: &[String]) -> Result<usize>;

    /// Check if an object exists
    async fn exists(&self, object: &ObjectRef) -> Result<bool>;

    /// Namespace new uploads land in
    fn default_namespace(&self) -> &str;

    /// Client-facing URL of an object
    fn public_url(&self, object: &ObjectRef) -> String;
}

/// Storage client wrapping one object_store backend per namespace
#[derive(Clone)]
pub struct StorageClient {
    stores: HashMap<String, Arc<dyn ObjectStore>>,
    default_namespace: String,
    public_base_url: String,
}

impl StorageClient {
    /// Create a client whose default namespace is backed by `store`
    pub fn new(
        default_namespace: impl Into<String>,
        store: Arc<dyn ObjectStore>,
        public_base_url: impl Into<String>,
    ) -> Self {
        let default_namespace = default_namespace.into();
        let mut stores = HashMap::new();
        stores.insert(default_namespace.clone(), store);
        Self {
            stores,
            default_namespace,
            public_base_url: public_base_url.into(),
        }
    }

    /// Register an additional namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        self.stores.insert(namespace.into(), store);
        self
    }

    /// Create in-memory storage for testing/development
    pub fn in_memory(default_namespace: &str, extra_namespaces: &[&str]) -> Self {
        let mut client = Self::new(
            default_namespace,
            Arc::new(InMemory::new()),
            "memory://local",
        );
        for namespace in extra_namespaces {
            client = client.with_namespace(*namespace, Arc::new(InMemory::new()));
        }
        client
    }

    /// Build the configured backend for every namespace
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let mut client: Option<Self> = None;

        for namespace in config.namespaces() {
            let store: Arc<dyn ObjectStore> = match config.provider {
                StorageProvider::Memory => Arc::new(InMemory::new()),
                StorageProvider::Local => {
                    let root = config.root.join(namespace);
                    std::fs::create_dir_all(&root)?;
                    Arc::new(LocalFileSystem::new_with_prefix(&root)?)
                }
                StorageProvider::S3 => {
                    let mut builder = AmazonS3Builder::new().with_bucket_name(namespace);
                    if let Some(region) = &config.region {
                        builder = builder.with_region(region);
                    }
                    if let Some(endpoint) = &config.endpoint {
                        builder = builder.with_endpoint(endpoint).with_allow_http(true);
                    }
                    match (&config.access_key, &config.secret_key) {
                        (Some(access_key), Some(secret_key)) => {
                            builder = builder
                                .with_access_key_id(access_key)
                                .with_secret_access_key(secret_key);
                        }
                        _ => {
                            return Err(StorageError::Misconfigured(
                                "S3 provider requires access_key and secret_key".to_string(),
                            ));
                        }
                    }
                    Arc::new(builder.build()?)
                }
            };

            client = Some(match client {
                None => Self::new(namespace, store, config.public_base_url.clone()),
                Some(client) => client.with_namespace(namespace, store),
            });
        }

        let client = client.ok_or_else(|| StorageError::Misconfigured("no namespaces".to_string()))?;
        tracing::info!(
            provider = ?config.provider,
            namespaces = client.stores.len(),
            default = %client.default_namespace,
            "Storage client ready"
        );
        Ok(client)
    }

    fn store_for(&self, namespace: &str) -> Result<&Arc<dyn ObjectStore>> {
        self.stores
            .get(namespace)
            .ok_or_else(|| StorageError::UnknownNamespace(namespace.to_string()))
    }
}

#[async_trait]
impl BlobStore for StorageClient {
    async fn put(&self, object: &ObjectRef, data: Vec<u8>) -> Result<UploadMetadata> {
        let path = StoragePath::from(object.path.as_str());
        let size = data.len();

        let put_result = self
            .store_for(&object.namespace)?
            .put(&path, data.into())
            .await
            .map_err(|e| StorageError::UploadFailed(format!("{object}: {e}")))?;

        tracing::info!(object = %object, size, "Uploaded to storage");

        Ok(UploadMetadata {
            object: object.clone(),
            etag: put_result.e_tag.clone(),
            size,
        })
    }

    async fn remove_batch(&self, namespace: &str, paths: &[String]) -> Result<usize> {
        if paths.is_empty() {
            return Ok(0);
        }

        let store = self.store_for(namespace)?;
        let locations = futures::stream::iter(
            paths
                .iter()
                .map(|p| Ok(StoragePath::from(p.as_str())))
                .collect::<Vec<_>>(),
        )
        .boxed();

        let mut results = store.delete_stream(locations);
        let mut removed = 0;
        while let Some(result) = results.next().await {
            match result {
                Ok(_) | Err(object_store::Error::NotFound { .. }) => removed += 1,
                Err(e) => {
                    return Err(StorageError::RemovalFailed {
                        namespace: namespace.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        tracing::debug!(namespace, removed, "Removed objects from storage");
        Ok(removed)
    }

    async fn exists(&self, object: &ObjectRef) -> Result<bool> {
        let path = StoragePath::from(object.path.as_str());

        match self.store_for(&object.namespace)?.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    fn public_url(&self, object: &ObjectRef) -> String {
        format!(
            "{}/{}/{}",
            self.public_base_url.trim_end_matches('/'),
            object.namespace,
            object.path
        )
    }
}

/// Group refs by namespace for batch removal, dropping repeated paths
pub fn group_by_namespace(refs: &[ObjectRef]) -> BTreeMap<String, Vec<String>> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for object in refs {
        let paths = groups.entry(object.namespace.clone()).or_default();
        if !paths.contains(&object.path) {
            paths.push(object.path.clone());
        }
    }
    groups
}

/// Remove refs with one call per namespace, never failing as a whole.
///
/// Returns the number of objects removed and the refs whose namespace call
/// failed.
pub async fn remove_best_effort(storage: &dyn BlobStore, refs: &[ObjectRef]) -> (usize, Vec<ObjectRef>) {
    let mut removed = 0;
    let mut failed = Vec::new();

    for (namespace, paths) in group_by_namespace(refs) {
        match storage.remove_batch(&namespace, &paths).await {
            Ok(_) => removed += paths.len(),
            Err(e) => {
                tracing::warn!(namespace = %namespace, count = paths.len(), error = %e, "Object removal failed");
                failed.extend(paths.into_iter().map(|path| ObjectRef::new(namespace.clone(), path)));
            }
        }
    }

    (removed, failed)
}

/// Wraps a backend and fails removals on demand.
///
/// Used by tests and local fault drills to exercise the partial-failure paths
/// of the prune and drain jobs.
pub struct FaultyStorage {
    inner: Arc<dyn BlobStore>,
    failing_paths: Mutex<HashSet<String>>,
    failing_namespaces: Mutex<HashSet<String>>,
    fail_uploads: AtomicBool,
    remove_calls: AtomicUsize,
}

impl FaultyStorage {
    pub fn new(inner: Arc<dyn BlobStore>) -> Self {
        Self {
            inner,
            failing_paths: Mutex::new(HashSet::new()),
            failing_namespaces: Mutex::new(HashSet::new()),
            fail_uploads: AtomicBool::new(false),
            remove_calls: AtomicUsize::new(0),
        }
    }

    /// Any removal batch containing this path fails
    pub fn fail_path(&self, path: impl Into<String>) {
        lock(&self.failing_paths).insert(path.into());
    }

    /// Every removal batch for this namespace fails
    pub fn fail_namespace(&self, namespace: impl Into<String>) {
        lock(&self.failing_namespaces).insert(namespace.into());
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::Relaxed);
    }

    /// Clear all injected faults
    pub fn heal(&self) {
        lock(&self.failing_paths).clear();
        lock(&self.failing_namespaces).clear();
        self.fail_uploads.store(false, Ordering::Relaxed);
    }

    /// Number of `remove_batch` calls seen, failed ones included
    pub fn remove_calls(&self) -> usize {
        self.remove_calls.load(Ordering::Relaxed)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl BlobStore for FaultyStorage {
    async fn put(&self, object: &ObjectRef, data: Vec<u8>) -> Result<UploadMetadata> {
        if self.fail_uploads.load(Ordering::Relaxed) {
            return Err(StorageError::UploadFailed(format!("{object}: injected fault")));
        }
        self.inner.put(object, data).await
    }

    async fn remove_batch(&self, namespace: &str, paths: &[String]) -> Result<usize> {
        self.remove_calls.fetch_add(1, Ordering::Relaxed);

        let poisoned = lock(&self.failing_namespaces).contains(namespace) || {
            let failing = lock(&self.failing_paths);
            paths.iter().any(|p| failing.contains(p))
        };
        if poisoned {
            return Err(StorageError::RemovalFailed {
                namespace: namespace.to_string(),
                message: "injected fault".to_string(),
            });
        }

        self.inner.remove_batch(namespace, paths).await
    }

    async fn exists(&self, object: &ObjectRef) -> Result<bool> {
        self.inner.exists(object).await
    }

    fn default_namespace(&self) -> &str {
        self.inner.default_namespace()
    }

    fn public_url(&self, object: &ObjectRef) -> String {
        self.inner.public_url(object)
    }
}
