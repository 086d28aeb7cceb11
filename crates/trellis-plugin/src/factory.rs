//! Builds plugin instances and drives them up to `Running`.
//!
//! Fresh loads and hot-reload candidates go through the same path, so a
//! candidate is validated and started exactly as a first load would be.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::api::context::{ContextParts, PluginContext};
use crate::api::services::HostServices;
use crate::error::PluginResult;
use crate::events::EventBus;
use crate::health::HealthTracker;
use crate::hooks::definitions::HookPoint;
use crate::hooks::registry::{HandlerRef, HookRegistration};
use crate::instance::{InstanceSlot, PluginInstance};
use crate::loader::PluginLoader;
use crate::manifest::model::Manifest;
use crate::permissions::{PermissionEnforcer, PermissionSet};
use crate::deployment::PluginConfig;

/// Shared collaborators every instance is wired to.
#[derive(Debug)]
pub struct InstanceFactory {
    loader: Arc<dyn PluginLoader>,
    services: HostServices,
    enforcer: PermissionEnforcer,
    events: Arc<EventBus>,
}

impl InstanceFactory {
    /// Creates a factory.
    pub fn new(
        loader: Arc<dyn PluginLoader>,
        services: HostServices,
        enforcer: PermissionEnforcer,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            loader,
            services,
            enforcer,
            events,
        }
    }

    /// Builds an `Unloaded` instance. The granted set is what the manifest
    /// declares intersected with what the entry grants.
    pub fn create(
        &self,
        manifest: Arc<Manifest>,
        entry: &PluginConfig,
        config: BTreeMap<String, Value>,
        path: &Path,
        health: Arc<HealthTracker>,
    ) -> Arc<PluginInstance> {
        let permissions = PermissionSet::effective(&manifest.permissions, &entry.permissions);
        debug!(
            plugin = %manifest.name,
            capabilities = permissions.len(),
            "Creating plugin instance"
        );
        Arc::new(PluginInstance::new(
            manifest,
            Arc::new(config),
            permissions,
            path,
            health,
        ))
    }

    /// Drives `instance` through load, init, and start. The instance is
    /// left `Failed` on error; the caller discards it.
    pub async fn launch(&self, instance: &PluginInstance) -> PluginResult<()> {
        instance.load(self.loader.as_ref()).await?;
        instance.init(self.context_for(instance)).await?;
        instance.start().await
    }

    fn context_for(&self, instance: &PluginInstance) -> PluginContext {
        PluginContext::new(ContextParts {
            plugin: instance.name().to_string(),
            permissions: instance.permissions().clone(),
            enforcer: self.enforcer.clone(),
            services: self.services.clone(),
            config: instance.config().clone(),
            publishes: instance.manifest().events.publishes.clone(),
            metrics: instance.metrics().clone(),
            events: self.events.clone(),
        })
    }

    /// Hook registrations for a started instance.
    ///
    /// Only hook types both declared in the manifest and handled by the
    /// plugin are registered. Every registration resolves through `slot`.
    pub fn registrations(
        instance: &PluginInstance,
        slot: &Arc<InstanceSlot>,
        priority: Option<i64>,
        sequence: usize,
    ) -> Vec<HookRegistration> {
        let mut registrations = Vec::new();

        for (index, declaration) in instance.manifest().hooks.iter().enumerate() {
            let hook = HookPoint::new(declaration.hook_type.as_str());
            if instance.handler(&hook).is_none() {
                warn!(
                    plugin = %instance.identity(),
                    hook = %hook,
                    "Declared hook has no handler, skipping"
                );
                continue;
            }
            registrations.push(HookRegistration {
                plugin: instance.name().to_string(),
                hook,
                priority: priority.unwrap_or(declaration.priority),
                order: (sequence, index),
                enabled: true,
                handler: HandlerRef::Instance(slot.clone()),
            });
        }

        registrations
    }
}
