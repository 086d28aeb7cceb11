//! Plugin manager: lifecycle management for all plugins.
//!
//! The manager owns the plugin table and composes the other components:
//! manifests are read and validated, dependencies resolved, instances
//! built by the [`InstanceFactory`], hooks registered, and reloads handed
//! to the [`HotReloadCoordinator`]. Failures of one plugin never abort the
//! loading of independent plugins.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use semver::Version;
use serde_json::Value;
use tracing::{error, info, warn};

use trellis_core::config::RuntimeSettings;

use crate::api::services::HostServices;
use crate::dependency::{PlanNode, check_dependencies, check_host_version, load_order};
use crate::deployment::{DeploymentConfig, PluginConfig};
use crate::error::{PluginError, PluginResult};
use crate::events::{Event, EventBus};
use crate::factory::InstanceFactory;
use crate::health::{HealthSnapshot, HealthTracker};
use crate::hooks::definitions::{HookPayload, HookPoint};
use crate::hooks::dispatcher::{DispatchResult, HookDispatcher};
use crate::hooks::registry::HookRegistry;
use crate::lifecycle::PluginState;
use crate::loader::PluginLoader;
use crate::manifest::model::{Manifest, PluginIdentity};
use crate::manifest::parser::read_manifest;
use crate::metrics::{MetricsSnapshot, render_text};
use crate::permissions::{AuditLog, PermissionEnforcer, SecurityEvent};
use crate::registry::{Availability, PluginInfo, PluginRecord, PluginTable};
use crate::reload::{HotReloadCoordinator, ReloadOutcome};

/// What happened to one plugin during a batch load.
#[derive(Debug, Clone)]
pub enum LoadOutcome {
    /// Running.
    Loaded(PluginIdentity),
    /// Disabled by configuration or an operator; parsed but not started.
    SkippedDisabled,
    /// Auto-disabled earlier; needs an explicit enable.
    SkippedAutoDisabled,
    /// Failed; other plugins were not affected.
    Failed(PluginError),
}

/// Outcome of one deployment entry.
#[derive(Debug, Clone)]
pub struct PluginLoadReport {
    /// Plugin name.
    pub name: String,
    /// Outcome.
    pub outcome: LoadOutcome,
}

/// Result of [`PluginManager::load_from_config`].
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// Enabled plugins in the order they were started.
    pub load_order: Vec<String>,
    /// One report per deployment entry, in declaration order.
    pub outcomes: Vec<PluginLoadReport>,
}

impl BatchReport {
    /// Outcome for `name`.
    pub fn outcome(&self, name: &str) -> Option<&LoadOutcome> {
        self.outcomes
            .iter()
            .find(|r| r.name == name)
            .map(|r| &r.outcome)
    }

    /// Names of plugins that are running.
    pub fn loaded(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|r| matches!(r.outcome, LoadOutcome::Loaded(_)))
            .map(|r| r.name.as_str())
            .collect()
    }

    /// Failures, in declaration order.
    pub fn failures(&self) -> Vec<(&str, &PluginError)> {
        self.outcomes
            .iter()
            .filter_map(|r| match &r.outcome {
                LoadOutcome::Failed(e) => Some((r.name.as_str(), e)),
                _ => None,
            })
            .collect()
    }
}

/// Everything a load needs once the manifest and config check out.
struct Prepared {
    entry: PluginConfig,
    manifest: Arc<Manifest>,
    manifest_path: PathBuf,
    config: BTreeMap<String, Value>,
}

/// Manages the full lifecycle of plugins: load, init, start, stop, unload.
#[derive(Debug)]
pub struct PluginManager {
    settings: RuntimeSettings,
    table: PluginTable,
    hook_registry: Arc<HookRegistry>,
    hook_dispatcher: HookDispatcher,
    events: Arc<EventBus>,
    audit: Arc<AuditLog>,
    factory: Arc<InstanceFactory>,
    coordinator: HotReloadCoordinator,
}

impl PluginManager {
    /// Creates a manager. Fails when `settings.host_version` is not a
    /// semantic version.
    pub fn new(
        settings: RuntimeSettings,
        loader: Arc<dyn PluginLoader>,
        services: HostServices,
    ) -> PluginResult<Self> {
        if Version::parse(&settings.host_version).is_err() {
            return Err(PluginError::Validation {
                subject: "runtime".to_string(),
                violations: vec![format!(
                    "host_version: '{}' is not a semantic version",
                    settings.host_version
                )],
            });
        }

        let audit = Arc::new(AuditLog::new(settings.audit_capacity));
        let events = Arc::new(EventBus::new());
        let hook_registry = Arc::new(HookRegistry::from_settings(&settings));
        let hook_dispatcher = HookDispatcher::new(hook_registry.clone(), settings.error_threshold);
        let factory = Arc::new(InstanceFactory::new(
            loader,
            services,
            PermissionEnforcer::new(audit.clone()),
            events.clone(),
        ));
        let coordinator = HotReloadCoordinator::new(
            factory.clone(),
            hook_registry.clone(),
            events.clone(),
            settings.drain_timeout(),
        );

        info!(
            host_version = %settings.host_version,
            error_threshold = settings.error_threshold,
            hook_timeout_ms = settings.hook_timeout_ms,
            "Plugin manager created"
        );

        Ok(Self {
            settings,
            table: PluginTable::new(),
            hook_registry,
            hook_dispatcher,
            events,
            audit,
            factory,
            coordinator,
        })
    }

    /// Loads every entry of a deployment in dependency order.
    ///
    /// Disabled entries are parsed and validated but not started. A
    /// dependency cycle among the enabled entries fails the whole batch
    /// before anything is started; every other failure is reported per
    /// plugin.
    pub async fn load_from_config(&self, deployment: &DeploymentConfig) -> PluginResult<BatchReport> {
        deployment.check()?;
        let started = Instant::now();

        let mut outcomes: HashMap<String, LoadOutcome> = HashMap::new();
        let mut parsed: HashMap<String, (Manifest, PathBuf)> = HashMap::new();
        let mut nodes = Vec::new();

        for entry in &deployment.plugins {
            let record = self.table.upsert(entry.clone()).await;
            let manifest = match read_manifest(&entry.path).await {
                Ok(found) => found,
                Err(e) => {
                    warn!(plugin = %entry.name, error = %e, "Manifest rejected");
                    record.state().write().await.last_error = Some(e.clone());
                    outcomes.insert(entry.name.clone(), LoadOutcome::Failed(e));
                    continue;
                }
            };

            let availability = {
                let mut state = record.state().write().await;
                if state.instance.is_none() {
                    state.manifest = Some(Arc::new(manifest.0.clone()));
                    state.manifest_path = Some(manifest.1.clone());
                }
                state.availability
            };

            // Disabled entries keep their config for a later enable, so it
            // is checked now rather than on enable.
            if availability != Availability::Enabled {
                if let Err(e) = entry.resolve_against(&manifest.0) {
                    warn!(plugin = %entry.name, error = %e, "Configuration rejected");
                    record.state().write().await.last_error = Some(e.clone());
                    outcomes.insert(entry.name.clone(), LoadOutcome::Failed(e));
                    continue;
                }
            }

            match availability {
                Availability::Enabled => {
                    nodes.push(PlanNode {
                        name: entry.name.clone(),
                        ..PlanNode::from_manifest(&manifest.0, entry.priority, record.sequence())
                    });
                    parsed.insert(entry.name.clone(), manifest);
                }
                Availability::ManuallyDisabled => {
                    info!(plugin = %entry.name, "Plugin disabled, not starting");
                    outcomes.insert(entry.name.clone(), LoadOutcome::SkippedDisabled);
                }
                Availability::AutoDisabled => {
                    info!(plugin = %entry.name, "Plugin auto-disabled, not starting");
                    outcomes.insert(entry.name.clone(), LoadOutcome::SkippedAutoDisabled);
                }
            }
        }

        let order = load_order(&nodes).map_err(|e| {
            error!(error = %e, "Deployment rejected");
            PluginError::from(e)
        })?;

        for name in &order {
            let Some(record) = self.table.get(name) else {
                continue;
            };
            let _ops = record.ops().lock().await;

            let running = record.state().read().await.instance.clone();
            let outcome = match running {
                Some(instance) => LoadOutcome::Loaded(instance.identity().clone()),
                None => match self.start_record(&record, parsed.remove(name)).await {
                    Ok(identity) => LoadOutcome::Loaded(identity),
                    Err(e) => LoadOutcome::Failed(e),
                },
            };
            outcomes.insert(name.clone(), outcome);
        }

        let report = BatchReport {
            load_order: order,
            outcomes: deployment
                .plugins
                .iter()
                .filter_map(|entry| {
                    outcomes.remove(&entry.name).map(|outcome| PluginLoadReport {
                        name: entry.name.clone(),
                        outcome,
                    })
                })
                .collect(),
        };

        info!(
            loaded = report.loaded().len(),
            failed = report.failures().len(),
            total = report.outcomes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Deployment loaded"
        );
        Ok(report)
    }

    /// Loads one plugin from `path` with the given deployment entry.
    pub async fn load_plugin(
        &self,
        path: impl AsRef<Path>,
        mut entry: PluginConfig,
    ) -> PluginResult<PluginIdentity> {
        entry.path = path.as_ref().to_path_buf();
        entry.check()?;

        let record = self.table.upsert(entry).await;
        let _ops = record.ops().lock().await;

        {
            let state = record.state().read().await;
            if let Some(instance) = &state.instance {
                return Err(PluginError::InvalidStateTransition {
                    plugin: record.name().to_string(),
                    state: instance.state(),
                    action: "load",
                });
            }
            match state.availability {
                Availability::Enabled => {}
                Availability::ManuallyDisabled => {
                    return Err(PluginError::Disabled {
                        plugin: record.name().to_string(),
                        reason: "disabled by configuration".to_string(),
                    });
                }
                Availability::AutoDisabled => {
                    return Err(PluginError::Disabled {
                        plugin: record.name().to_string(),
                        reason: "auto-disabled after repeated failures; enable it explicitly"
                            .to_string(),
                    });
                }
            }
        }

        self.start_record(&record, None).await
    }

    /// Stops and unloads a plugin. Its deployment entry is kept.
    pub async fn unload_plugin(&self, name: &str) -> PluginResult<()> {
        let record = self.record(name)?;
        let _ops = record.ops().lock().await;
        self.retire_record(&record).await
    }

    /// Unloads a plugin if loaded and forgets it entirely.
    pub async fn remove_plugin(&self, name: &str) -> PluginResult<()> {
        let record = self.record(name)?;
        let _ops = record.ops().lock().await;
        if record.state().read().await.instance.is_some() {
            self.retire_record(&record).await?;
        }
        self.table.remove(name);
        info!(plugin = %name, "Plugin removed");
        Ok(())
    }

    /// Hot-reloads a running plugin from its manifest on disk.
    ///
    /// A candidate that fails validation, dependency checks, or startup is
    /// discarded and reported as `RolledBack`; the running instance keeps
    /// serving throughout.
    pub async fn reload_plugin(&self, name: &str) -> PluginResult<ReloadOutcome> {
        let record = self.record(name)?;
        let _ops = record.ops().lock().await;

        let current = record.state().read().await.instance.clone();
        let state = current
            .as_ref()
            .map(|i| i.state())
            .unwrap_or(PluginState::Unloaded);
        if state != PluginState::Running {
            return Err(PluginError::InvalidStateTransition {
                plugin: name.to_string(),
                state,
                action: "reload",
            });
        }

        let prepared = match self.prepare(&record, None).await {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(plugin = %name, error = %e, "Reload candidate rejected");
                return Ok(ReloadOutcome::rolled_back(name, e));
            }
        };

        let candidate = self.factory.create(
            prepared.manifest.clone(),
            &prepared.entry,
            prepared.config,
            &prepared.entry.path,
            Arc::new(HealthTracker::new()),
        );
        let outcome = self
            .coordinator
            .reload(
                record.slot(),
                candidate.clone(),
                prepared.entry.priority,
                record.sequence(),
            )
            .await?;

        if outcome.is_reloaded() {
            let mut state = record.state().write().await;
            state.health = candidate.health().clone();
            state.instance = Some(candidate);
            state.manifest = Some(prepared.manifest);
            state.manifest_path = Some(prepared.manifest_path);
        }
        Ok(outcome)
    }

    /// Clears a disabled flag and the error count. The plugin is started by
    /// the next load attempt. Only this call undoes a disable; reapplying an
    /// unchanged deployment entry keeps the plugin disabled.
    pub async fn enable(&self, name: &str) -> PluginResult<()> {
        let record = self.record(name)?;
        let _ops = record.ops().lock().await;
        let mut state = record.state().write().await;
        state.availability = Availability::Enabled;
        state.last_error = None;
        state.health.reset();
        info!(plugin = %name, "Plugin enabled");
        Ok(())
    }

    /// Disables a plugin, stopping it if it is loaded.
    pub async fn disable(&self, name: &str) -> PluginResult<()> {
        let record = self.record(name)?;
        let _ops = record.ops().lock().await;
        {
            let mut state = record.state().write().await;
            state.availability = Availability::ManuallyDisabled;
        }
        if record.state().read().await.instance.is_some() {
            self.retire_record(&record).await?;
        }
        info!(plugin = %name, "Plugin disabled");
        Ok(())
    }

    /// Every known plugin in declaration order.
    pub async fn list_plugins(&self) -> Vec<PluginInfo> {
        let mut infos = Vec::with_capacity(self.table.len());
        for record in self.table.all() {
            let hooks = self
                .hook_registry
                .hooks_of(record.name())
                .iter()
                .map(|h| h.to_string())
                .collect();
            infos.push(record.info(hooks).await);
        }
        infos
    }

    /// Health of one plugin.
    pub async fn get_health(&self, name: &str) -> PluginResult<HealthSnapshot> {
        Ok(self.record(name)?.health().await)
    }

    /// Health of every known plugin.
    pub async fn get_all_health(&self) -> Vec<HealthSnapshot> {
        let mut snapshots = Vec::with_capacity(self.table.len());
        for record in self.table.all() {
            snapshots.push(record.health().await);
        }
        snapshots
    }

    /// Metrics of a plugin's current instance.
    pub async fn metrics_snapshot(&self, name: &str) -> Option<MetricsSnapshot> {
        let record = self.table.get(name)?;
        let state = record.state().read().await;
        state.instance.as_ref().map(|i| i.metrics().snapshot())
    }

    /// Metrics of every loaded instance.
    pub async fn all_metrics(&self) -> Vec<MetricsSnapshot> {
        let mut snapshots = Vec::new();
        for record in self.table.all() {
            if let Some(instance) = &record.state().read().await.instance {
                snapshots.push(instance.metrics().snapshot());
            }
        }
        snapshots
    }

    /// Text exposition of every plugin's metrics and health.
    pub async fn render_metrics(&self) -> String {
        let metrics = self.all_metrics().await;
        let health = self.get_all_health().await;
        render_text(&metrics, &health)
    }

    /// Dispatches a hook. Plugins whose errors crossed the threshold are
    /// auto-disabled before this returns.
    pub async fn dispatch(&self, payload: &HookPayload) -> DispatchResult {
        let result = self.hook_dispatcher.dispatch(payload).await;
        for plugin in &result.degraded {
            self.auto_disable(plugin).await;
        }
        result
    }

    /// Dispatches a hook and turns a halt or abort into an error.
    pub async fn fire_or_halt(&self, payload: &HookPayload) -> PluginResult<DispatchResult> {
        self.dispatch(payload).await.into_result(&payload.hook)
    }

    /// Publishes an event on behalf of a running plugin.
    pub async fn publish_event(
        &self,
        from: &str,
        event_type: &str,
        payload: Value,
    ) -> PluginResult<usize> {
        let record = self.record(from)?;
        let rejected = |reason: &str| PluginError::EventRejected {
            plugin: from.to_string(),
            event: event_type.to_string(),
            reason: reason.to_string(),
        };

        let instance = record
            .state()
            .read()
            .await
            .instance
            .clone()
            .filter(|i| i.state().is_running())
            .ok_or_else(|| rejected("publisher is not running"))?;
        if !instance.manifest().publishes(event_type) {
            return Err(rejected("event type is not declared under events.publishes"));
        }

        instance.metrics().record_event_published();
        Ok(self.events.publish(&Event::new(from, event_type, payload)).await)
    }

    /// Recorded permission denials, oldest first.
    pub fn audit_events(&self) -> Vec<SecurityEvent> {
        self.audit.events()
    }

    /// Plugins registered for `hook`, in execution order.
    pub fn hook_sequence(&self, hook: &HookPoint) -> Vec<String> {
        self.hook_registry
            .sequence_for(hook)
            .iter()
            .filter(|r| r.enabled)
            .map(|r| r.plugin.clone())
            .collect()
    }

    /// Drains in-flight invocations, bounded by the shutdown timeout, then
    /// tears instances down in reverse load order.
    pub async fn shutdown(&self) {
        let started = Instant::now();
        let mut retiring = Vec::new();

        for record in self.table.all() {
            let _ops = record.ops().lock().await;
            let mut state = record.state().write().await;
            if let Some(instance) = state.instance.take() {
                record.slot().swap(None);
                self.hook_registry.unregister_all(record.name());
                self.events.unsubscribe_all(record.name());
                instance.start_draining();
                retiring.push((state.load_seq, instance));
            }
        }

        let timeout = self.settings.shutdown_timeout();
        let drained = join_all(retiring.iter().map(|(_, i)| i.wait_drained(timeout))).await;
        let stuck = drained.iter().filter(|ok| !**ok).count();
        if stuck > 0 {
            warn!(plugins = stuck, "Shutdown timeout reached with invocations in flight");
        }

        retiring.sort_by_key(|(seq, _)| Reverse(*seq));
        let count = retiring.len();
        for (_, instance) in retiring {
            instance.teardown().await;
        }

        info!(
            plugins = count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Plugin runtime shut down"
        );
    }

    /// Returns the hook dispatcher for firing hooks.
    pub fn dispatcher(&self) -> &HookDispatcher {
        &self.hook_dispatcher
    }

    /// Returns the hook registry.
    pub fn hook_registry(&self) -> &Arc<HookRegistry> {
        &self.hook_registry
    }

    /// Runtime settings.
    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    fn record(&self, name: &str) -> PluginResult<Arc<PluginRecord>> {
        self.table.get(name).ok_or_else(|| PluginError::NotFound {
            plugin: name.to_string(),
        })
    }

    /// Reads and checks everything a load needs. `preloaded` skips the
    /// manifest read when the caller already has it.
    async fn prepare(
        &self,
        record: &PluginRecord,
        preloaded: Option<(Manifest, PathBuf)>,
    ) -> PluginResult<Prepared> {
        let entry = record.state().read().await.entry.clone();
        let (manifest, manifest_path) = match preloaded {
            Some(found) => found,
            None => read_manifest(&entry.path).await?,
        };

        let config = entry.resolve_against(&manifest)?;
        check_host_version(&manifest, &self.settings.host_version)?;
        let loaded = self.table.loaded_view().await;
        check_dependencies(&manifest, |name| loaded.get(name).cloned())?;

        Ok(Prepared {
            entry,
            manifest: Arc::new(manifest),
            manifest_path,
            config,
        })
    }

    /// Starts a record's plugin. The caller holds the record's op lock.
    async fn start_record(
        &self,
        record: &PluginRecord,
        preloaded: Option<(Manifest, PathBuf)>,
    ) -> PluginResult<PluginIdentity> {
        match self.try_start(record, preloaded).await {
            Ok(identity) => Ok(identity),
            Err(error) => Err(self.note_failure(record, error).await),
        }
    }

    async fn try_start(
        &self,
        record: &PluginRecord,
        preloaded: Option<(Manifest, PathBuf)>,
    ) -> PluginResult<PluginIdentity> {
        let health = record.state().read().await.health.clone();
        let started = Instant::now();

        let prepared = match self.prepare(record, preloaded).await {
            Ok(prepared) => prepared,
            Err(e) => {
                health.record_failure(&e.to_string());
                return Err(e);
            }
        };

        {
            let mut state = record.state().write().await;
            state.manifest = Some(prepared.manifest.clone());
            state.manifest_path = Some(prepared.manifest_path.clone());
        }

        let instance = self.factory.create(
            prepared.manifest.clone(),
            &prepared.entry,
            prepared.config,
            &prepared.entry.path,
            health,
        );
        if let Err(e) = self.factory.launch(&instance).await {
            instance.teardown().await;
            return Err(e);
        }

        let registrations = InstanceFactory::registrations(
            &instance,
            record.slot(),
            prepared.entry.priority,
            record.sequence(),
        );
        let hook_count = registrations.len();
        record.slot().swap(Some(instance.clone()));
        self.hook_registry.replace_plugin(record.name(), registrations);
        self.events
            .subscribe(&prepared.manifest.events.subscribes, record.slot());

        {
            let mut state = record.state().write().await;
            state.instance = Some(instance.clone());
            state.load_seq = self.table.next_load_seq();
            state.last_error = None;
            state.was_started = true;
        }

        info!(
            plugin = %instance.identity(),
            hooks = hook_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Plugin loaded and started"
        );
        Ok(instance.identity().clone())
    }

    /// Stores a failed attempt and applies the auto-disable policy.
    async fn note_failure(&self, record: &PluginRecord, error: PluginError) -> PluginError {
        let mut state = record.state().write().await;
        let consecutive = state.health.consecutive_errors();
        let threshold = self.settings.error_threshold;

        let error = if consecutive > threshold {
            state.availability = Availability::AutoDisabled;
            warn!(
                plugin = %record.name(),
                consecutive_errors = consecutive,
                threshold,
                "Plugin auto-disabled"
            );
            PluginError::HealthDegraded {
                plugin: record.name().to_string(),
                consecutive_errors: consecutive,
                threshold,
                cause: error.to_string(),
            }
        } else {
            error!(
                plugin = %record.name(),
                phase = %error.phase(),
                consecutive_errors = consecutive,
                error = %error,
                "Plugin failed to load"
            );
            error
        };

        state.last_error = Some(error.clone());
        error
    }

    /// Hides a plugin from dispatch, drains it, and tears it down.
    async fn retire_record(&self, record: &PluginRecord) -> PluginResult<()> {
        let instance = record
            .state()
            .write()
            .await
            .instance
            .take()
            .ok_or_else(|| PluginError::InvalidStateTransition {
                plugin: record.name().to_string(),
                state: PluginState::Unloaded,
                action: "unload",
            })?;

        record.slot().swap(None);
        self.hook_registry.unregister_all(record.name());
        self.events.unsubscribe_all(record.name());
        self.coordinator.retire(&instance).await;

        info!(plugin = %instance.identity(), "Plugin unloaded");
        Ok(())
    }

    async fn auto_disable(&self, name: &str) {
        let Some(record) = self.table.get(name) else {
            return;
        };
        let _ops = record.ops().lock().await;
        let consecutive = {
            let mut state = record.state().write().await;
            if state.availability == Availability::AutoDisabled {
                return;
            }
            state.availability = Availability::AutoDisabled;
            let consecutive = state.health.consecutive_errors();
            state.last_error = Some(PluginError::HealthDegraded {
                plugin: name.to_string(),
                consecutive_errors: consecutive,
                threshold: self.settings.error_threshold,
                cause: state
                    .health
                    .last_error()
                    .map(|e| e.message)
                    .unwrap_or_default(),
            });
            consecutive
        };
        warn!(
            plugin = %name,
            consecutive_errors = consecutive,
            threshold = self.settings.error_threshold,
            "Plugin auto-disabled after hook failures"
        );
        if record.state().read().await.instance.is_some() {
            if let Err(e) = self.retire_record(&record).await {
                warn!(plugin = %name, error = %e, "Could not stop auto-disabled plugin");
            }
        }
    }
}
