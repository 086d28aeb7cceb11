//! Plugin context: permission-gated access to host services.
//!
//! Every accessor consults the [`PermissionEnforcer`] first. A denial is
//! audited and returned as `PermissionDenied`; a grant is counted as a
//! service call in the plugin's metrics.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use trellis_core::traits::{
    CacheService, ConfigReader, FilesystemAccess, NetworkClient, ProcessExecutor, StorageService,
};

use crate::error::{PluginError, PluginResult};
use crate::events::{Event, EventBus};
use crate::metrics::PluginMetrics;
use crate::permissions::{AuditLog, Capability, PermissionEnforcer, PermissionSet};

use super::services::{HostServices, NamespacedCache, NamespacedStorage, PluginRoutes};

/// Context passed to a plugin's `init`, providing access to host services.
#[derive(Clone)]
pub struct PluginContext {
    plugin: String,
    permissions: Arc<PermissionSet>,
    enforcer: PermissionEnforcer,
    services: HostServices,
    config: Arc<BTreeMap<String, Value>>,
    publishes: Arc<Vec<String>>,
    metrics: Arc<PluginMetrics>,
    events: Arc<EventBus>,
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin", &self.plugin)
            .field("permissions", &self.permissions)
            .finish()
    }
}

/// Everything a context is built from.
#[derive(Debug, Clone)]
pub struct ContextParts {
    /// Plugin name.
    pub plugin: String,
    /// Effective capabilities.
    pub permissions: PermissionSet,
    /// Enforcement point.
    pub enforcer: PermissionEnforcer,
    /// Host services.
    pub services: HostServices,
    /// Resolved configuration.
    pub config: Arc<BTreeMap<String, Value>>,
    /// Event types the manifest declares under `events.publishes`.
    pub publishes: Vec<String>,
    /// Metrics of the instance the context belongs to.
    pub metrics: Arc<PluginMetrics>,
    /// Event bus.
    pub events: Arc<EventBus>,
}

impl PluginContext {
    /// Builds a context.
    pub fn new(parts: ContextParts) -> Self {
        Self {
            plugin: parts.plugin,
            permissions: Arc::new(parts.permissions),
            enforcer: parts.enforcer,
            services: parts.services,
            config: parts.config,
            publishes: Arc::new(parts.publishes),
            metrics: parts.metrics,
            events: parts.events,
        }
    }

    /// A context with no services, no grants, and a private audit log.
    pub fn detached(plugin: &str) -> Self {
        Self::new(ContextParts {
            plugin: plugin.to_string(),
            permissions: PermissionSet::none(),
            enforcer: PermissionEnforcer::new(Arc::new(AuditLog::new(16))),
            services: HostServices::new(),
            config: Arc::new(BTreeMap::new()),
            publishes: Vec::new(),
            metrics: Arc::new(PluginMetrics::new(plugin, "0.0.0")),
            events: Arc::new(EventBus::new()),
        })
    }

    /// Name of the plugin this context belongs to.
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Capabilities held by the plugin.
    pub fn permissions(&self) -> &PermissionSet {
        &self.permissions
    }

    /// Resolved configuration value. Not permission-gated.
    pub fn config_value(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }

    /// Whole resolved configuration.
    pub fn config(&self) -> &BTreeMap<String, Value> {
        &self.config
    }

    fn gate<T: ?Sized>(
        &self,
        capability: Capability,
        service: Option<&Arc<T>>,
        name: &str,
    ) -> PluginResult<Arc<T>> {
        self.enforcer
            .enforce(&self.plugin, &self.permissions, &capability)?;
        let service = service.cloned().ok_or_else(|| PluginError::ServiceUnavailable {
            plugin: self.plugin.clone(),
            service: name.to_string(),
        })?;
        self.metrics.record_service_call();
        debug!(plugin = %self.plugin, service = %name, "Service access granted");
        Ok(service)
    }

    /// Storage namespaced to this plugin.
    pub fn storage(&self) -> PluginResult<Arc<dyn StorageService>> {
        let inner = self.gate(Capability::Storage, self.services.storage.as_ref(), "storage")?;
        Ok(Arc::new(NamespacedStorage::new(inner, &self.plugin)))
    }

    /// Cache namespaced to this plugin.
    pub fn cache(&self) -> PluginResult<Arc<dyn CacheService>> {
        let inner = self.gate(Capability::Cache, self.services.cache.as_ref(), "cache")?;
        Ok(Arc::new(NamespacedCache::new(inner, &self.plugin)))
    }

    /// Route registrar bound to this plugin.
    pub fn routes(&self) -> PluginResult<PluginRoutes> {
        let inner = self.gate(Capability::Routing, self.services.routes.as_ref(), "routing")?;
        Ok(PluginRoutes::new(inner, &self.plugin))
    }

    /// Host configuration reader.
    pub fn host_config(&self) -> PluginResult<Arc<dyn ConfigReader>> {
        self.gate(
            Capability::Configuration,
            self.services.config.as_ref(),
            "configuration",
        )
    }

    /// Filesystem accessor.
    pub fn filesystem(&self) -> PluginResult<Arc<dyn FilesystemAccess>> {
        self.gate(
            Capability::Filesystem,
            self.services.filesystem.as_ref(),
            "filesystem",
        )
    }

    /// Network client.
    pub fn network(&self) -> PluginResult<Arc<dyn NetworkClient>> {
        self.gate(Capability::Network, self.services.network.as_ref(), "network")
    }

    /// Process executor.
    pub fn process(&self) -> PluginResult<Arc<dyn ProcessExecutor>> {
        self.gate(
            Capability::ProcessExecution,
            self.services.process.as_ref(),
            "process_execution",
        )
    }

    /// Checks a custom capability.
    pub fn require_custom(&self, name: &str) -> PluginResult<()> {
        self.enforcer
            .enforce(&self.plugin, &self.permissions, &Capability::custom(name))?;
        self.metrics.record_service_call();
        Ok(())
    }

    /// Publishes an event declared under `events.publishes`.
    /// Returns the number of subscribers that accepted it.
    pub async fn publish(&self, event_type: &str, payload: Value) -> PluginResult<usize> {
        if !self.publishes.iter().any(|e| e == event_type) {
            return Err(PluginError::EventRejected {
                plugin: self.plugin.clone(),
                event: event_type.to_string(),
                reason: "event type is not declared under events.publishes".to_string(),
            });
        }
        let event = Event::new(&self.plugin, event_type, payload);
        self.metrics.record_event_published();
        Ok(self.events.publish(&event).await)
    }
}
