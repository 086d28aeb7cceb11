//! Host service bundle and per-plugin namespacing wrappers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use trellis_core::result::AppResult;
use trellis_core::traits::{
    CacheService, ConfigReader, FilesystemAccess, NetworkClient, ProcessExecutor, RouteRegistrar,
    RouteSpec, StorageService,
};

/// Implementations the host offers to plugins. Absent services are
/// reported as unavailable even when the capability is granted.
#[derive(Debug, Clone, Default)]
pub struct HostServices {
    /// Key-value storage.
    pub storage: Option<Arc<dyn StorageService>>,
    /// Cache.
    pub cache: Option<Arc<dyn CacheService>>,
    /// Route registrar.
    pub routes: Option<Arc<dyn RouteRegistrar>>,
    /// Host configuration.
    pub config: Option<Arc<dyn ConfigReader>>,
    /// Filesystem accessor.
    pub filesystem: Option<Arc<dyn FilesystemAccess>>,
    /// Network client.
    pub network: Option<Arc<dyn NetworkClient>>,
    /// Process executor.
    pub process: Option<Arc<dyn ProcessExecutor>>,
}

impl HostServices {
    /// No services.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the storage service.
    pub fn with_storage(mut self, storage: Arc<dyn StorageService>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Sets the cache service.
    pub fn with_cache(mut self, cache: Arc<dyn CacheService>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets the route registrar.
    pub fn with_routes(mut self, routes: Arc<dyn RouteRegistrar>) -> Self {
        self.routes = Some(routes);
        self
    }

    /// Sets the configuration reader.
    pub fn with_config(mut self, config: Arc<dyn ConfigReader>) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the filesystem accessor.
    pub fn with_filesystem(mut self, filesystem: Arc<dyn FilesystemAccess>) -> Self {
        self.filesystem = Some(filesystem);
        self
    }

    /// Sets the network client.
    pub fn with_network(mut self, network: Arc<dyn NetworkClient>) -> Self {
        self.network = Some(network);
        self
    }

    /// Sets the process executor.
    pub fn with_process(mut self, process: Arc<dyn ProcessExecutor>) -> Self {
        self.process = Some(process);
        self
    }
}

fn plugin_prefix(plugin: &str) -> String {
    format!("plugin:{plugin}:")
}

/// Cache wrapper isolating a plugin's keys under `plugin:{name}:`.
#[derive(Debug, Clone)]
pub struct NamespacedCache {
    /// Host cache.
    inner: Arc<dyn CacheService>,
    /// Key prefix for plugin isolation.
    prefix: String,
}

impl NamespacedCache {
    /// Creates a plugin-scoped cache.
    pub fn new(inner: Arc<dyn CacheService>, plugin: &str) -> Self {
        Self {
            inner,
            prefix: plugin_prefix(plugin),
        }
    }
}

#[async_trait]
impl CacheService for NamespacedCache {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        self.inner.get(&format!("{}{}", self.prefix, key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()> {
        self.inner
            .set(&format!("{}{}", self.prefix, key), value, ttl)
            .await
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        self.inner.delete(&format!("{}{}", self.prefix, key)).await
    }
}

/// Storage wrapper isolating a plugin's keys under `plugin:{name}:`.
#[derive(Debug, Clone)]
pub struct NamespacedStorage {
    inner: Arc<dyn StorageService>,
    prefix: String,
}

impl NamespacedStorage {
    /// Creates a plugin-scoped storage handle.
    pub fn new(inner: Arc<dyn StorageService>, plugin: &str) -> Self {
        Self {
            inner,
            prefix: plugin_prefix(plugin),
        }
    }
}

#[async_trait]
impl StorageService for NamespacedStorage {
    async fn get(&self, key: &str) -> AppResult<Option<Value>> {
        self.inner.get(&format!("{}{}", self.prefix, key)).await
    }

    async fn put(&self, key: &str, value: Value) -> AppResult<()> {
        self.inner
            .put(&format!("{}{}", self.prefix, key), value)
            .await
    }

    async fn delete(&self, key: &str) -> AppResult<bool> {
        self.inner.delete(&format!("{}{}", self.prefix, key)).await
    }

    async fn list_keys(&self, prefix: &str) -> AppResult<Vec<String>> {
        let keys = self
            .inner
            .list_keys(&format!("{}{}", self.prefix, prefix))
            .await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(&self.prefix).map(str::to_string))
            .collect())
    }
}

/// Route registrar bound to one plugin.
#[derive(Debug, Clone)]
pub struct PluginRoutes {
    inner: Arc<dyn RouteRegistrar>,
    plugin: String,
}

impl PluginRoutes {
    /// Binds `inner` to `plugin`.
    pub fn new(inner: Arc<dyn RouteRegistrar>, plugin: &str) -> Self {
        Self {
            inner,
            plugin: plugin.to_string(),
        }
    }

    /// Mounts a route owned by this plugin.
    pub async fn register(&self, route: RouteSpec) -> AppResult<()> {
        self.inner.register(&self.plugin, route).await
    }

    /// Removes every route of this plugin.
    pub async fn unregister_all(&self) -> AppResult<()> {
        self.inner.unregister_all(&self.plugin).await
    }
}
