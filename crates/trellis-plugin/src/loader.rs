//! Loader abstraction producing plugin objects.
//!
//! How plugin code gets into the process is the host's concern. The
//! runtime only asks a [`PluginLoader`] for an object implementing
//! [`Plugin`]. [`StaticLoader`] covers compiled-in plugins and tests.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::manifest::model::Manifest;
use crate::traits::Plugin;

/// Produces plugin objects for validated manifests.
#[async_trait]
pub trait PluginLoader: Send + Sync + std::fmt::Debug {
    /// Loads the plugin described by `manifest`, found at `path`.
    async fn load(&self, manifest: &Manifest, path: &Path) -> Result<Arc<dyn Plugin>, String>;
}

type Factory = dyn Fn(&Manifest) -> Result<Arc<dyn Plugin>, String> + Send + Sync;

/// Loader for plugins compiled into the host, keyed by manifest name.
///
/// A factory is invoked on every load so each instance (including hot
/// reload candidates) gets a fresh object.
#[derive(Default)]
pub struct StaticLoader {
    factories: DashMap<String, Arc<Factory>>,
}

impl std::fmt::Debug for StaticLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticLoader")
            .field("registered", &self.factories.len())
            .finish()
    }
}

impl StaticLoader {
    /// Creates an empty loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the factory for `name`.
    pub fn register<F>(&self, name: &str, factory: F)
    where
        F: Fn(&Manifest) -> Result<Arc<dyn Plugin>, String> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    /// Removes the factory for `name`.
    pub fn unregister(&self, name: &str) -> bool {
        self.factories.remove(name).is_some()
    }
}

#[async_trait]
impl PluginLoader for StaticLoader {
    async fn load(&self, manifest: &Manifest, path: &Path) -> Result<Arc<dyn Plugin>, String> {
        let factory = self
            .factories
            .get(&manifest.name)
            .map(|f| f.value().clone())
            .ok_or_else(|| format!("no compiled-in plugin named '{}'", manifest.name))?;

        debug!(plugin = %manifest.name, path = %path.display(), "Instantiating static plugin");
        factory(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(name: &str) -> Manifest {
        Manifest {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_factory_errors_pass_through() {
        let loader = StaticLoader::new();
        loader.register("broken", |_| Err("missing native library".to_string()));

        let err = loader
            .load(&manifest("broken"), Path::new("plugins/broken"))
            .await
            .unwrap_err();
        assert_eq!(err, "missing native library");
    }

    #[tokio::test]
    async fn test_unregistered_plugin_is_reported() {
        let loader = StaticLoader::new();
        loader.register("audit", |_| Err("unused".to_string()));
        assert!(loader.unregister("audit"));
        assert!(!loader.unregister("audit"));

        let err = loader
            .load(&manifest("audit"), Path::new("plugins/audit"))
            .await
            .unwrap_err();
        assert!(err.contains("no compiled-in plugin named 'audit'"));
    }
}
