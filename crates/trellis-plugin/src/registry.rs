//! Plugin table: every plugin the manager knows about, loaded or not.
//!
//! A record outlives its instances. It keeps the deployment entry (so a
//! disabled plugin can be enabled later), the availability flag, and the
//! health tracker that counts failed load attempts.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::deployment::PluginConfig;
use crate::error::PluginError;
use crate::health::{HealthSnapshot, HealthStatus, HealthTracker};
use crate::instance::{InstanceSlot, PluginInstance};
use crate::lifecycle::PluginState;
use crate::manifest::model::Manifest;

/// Whether a plugin may be instantiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    /// May be loaded.
    Enabled,
    /// Disabled by configuration or an operator.
    ManuallyDisabled,
    /// Disabled after crossing the error threshold.
    AutoDisabled,
}

/// Mutable part of a record.
#[derive(Debug)]
pub struct RecordState {
    /// Deployment entry.
    pub entry: PluginConfig,
    /// Manifest of the current instance, or of the last successful parse.
    pub manifest: Option<Arc<Manifest>>,
    /// Resolved manifest file.
    pub manifest_path: Option<PathBuf>,
    /// Availability flag.
    pub availability: Availability,
    /// Health of the current instance and of failed load attempts.
    pub health: Arc<HealthTracker>,
    /// Currently loaded instance.
    pub instance: Option<Arc<PluginInstance>>,
    /// Order in which the current instance was started.
    pub load_seq: u64,
    /// Error of the last failed load attempt.
    pub last_error: Option<PluginError>,
    /// Whether an instance was ever started.
    pub was_started: bool,
}

/// One plugin known to the manager.
#[derive(Debug)]
pub struct PluginRecord {
    name: String,
    sequence: usize,
    slot: Arc<InstanceSlot>,
    /// Serializes load, unload, reload, enable, and disable of this plugin.
    ops: Mutex<()>,
    state: RwLock<RecordState>,
}

impl PluginRecord {
    fn new(entry: PluginConfig, sequence: usize) -> Self {
        let availability = if entry.enabled {
            Availability::Enabled
        } else {
            Availability::ManuallyDisabled
        };
        Self {
            name: entry.name.clone(),
            sequence,
            slot: Arc::new(InstanceSlot::new(&entry.name)),
            ops: Mutex::new(()),
            state: RwLock::new(RecordState {
                entry,
                manifest: None,
                manifest_path: None,
                availability,
                health: Arc::new(HealthTracker::new()),
                instance: None,
                load_seq: 0,
                last_error: None,
                was_started: false,
            }),
        }
    }

    /// Plugin name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position of the plugin's first declaration.
    pub fn sequence(&self) -> usize {
        self.sequence
    }

    /// Slot every hook registration and subscription resolves through.
    pub fn slot(&self) -> &Arc<InstanceSlot> {
        &self.slot
    }

    /// Operation lock.
    pub fn ops(&self) -> &Mutex<()> {
        &self.ops
    }

    /// Record state.
    pub fn state(&self) -> &RwLock<RecordState> {
        &self.state
    }

    /// Derived health snapshot.
    pub async fn health(&self) -> HealthSnapshot {
        let state = self.state.read().await;
        let instance_state = state
            .instance
            .as_ref()
            .map(|i| i.state())
            .unwrap_or(PluginState::Unloaded);
        let consecutive = state.health.consecutive_errors();

        let status = match state.availability {
            Availability::AutoDisabled => HealthStatus::AutoDisabled,
            Availability::ManuallyDisabled => HealthStatus::ManuallyDisabled,
            Availability::Enabled => match &state.instance {
                None if state.last_error.is_some() => HealthStatus::Failed,
                None if state.was_started => HealthStatus::Stopped,
                None => HealthStatus::NotLoaded,
                Some(_) => match instance_state {
                    PluginState::Running | PluginState::Reloading if consecutive > 0 => {
                        HealthStatus::Degraded
                    }
                    PluginState::Running | PluginState::Reloading => HealthStatus::Healthy,
                    PluginState::Failed => HealthStatus::Failed,
                    PluginState::Stopping | PluginState::Stopped | PluginState::Unloaded => {
                        HealthStatus::Stopped
                    }
                    _ => HealthStatus::NotLoaded,
                },
            },
        };

        HealthSnapshot {
            plugin: self.name.clone(),
            version: state.instance.as_ref().map(|i| i.identity().version.clone()),
            status,
            state: instance_state,
            consecutive_errors: consecutive,
            total_errors: state.health.total_errors(),
            last_error: state.health.last_error(),
        }
    }

    /// Listing entry.
    pub async fn info(&self, hooks: Vec<String>) -> PluginInfo {
        let health = self.health().await;
        let state = self.state.read().await;
        let manifest = state.manifest.as_deref();
        PluginInfo {
            name: self.name.clone(),
            version: manifest.map(|m| m.version.clone()),
            description: manifest.map(|m| m.description.clone()).unwrap_or_default(),
            author: manifest.map(|m| m.author.clone()).unwrap_or_default(),
            state: health.state,
            status: health.status,
            enabled: state.availability == Availability::Enabled,
            priority: state.entry.priority,
            hooks,
            path: state.entry.path.clone(),
            sequence: self.sequence,
        }
    }
}

/// Summary of one plugin for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin name.
    pub name: String,
    /// Manifest version, once a manifest was read.
    pub version: Option<String>,
    /// Manifest description.
    pub description: String,
    /// Manifest author.
    pub author: String,
    /// Lifecycle state of the current instance.
    pub state: PluginState,
    /// Derived health status.
    pub status: HealthStatus,
    /// Whether the plugin may be loaded.
    pub enabled: bool,
    /// Deployment priority override.
    pub priority: Option<i64>,
    /// Hook types the plugin is registered for.
    pub hooks: Vec<String>,
    /// Manifest file or plugin directory.
    pub path: PathBuf,
    /// Declaration sequence.
    pub sequence: usize,
}

/// All plugin records, keyed by name.
#[derive(Debug, Default)]
pub struct PluginTable {
    records: DashMap<String, Arc<PluginRecord>>,
    next_sequence: AtomicUsize,
    next_load: AtomicU64,
}

impl PluginTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record for `entry.name`, creating it if needed. An
    /// existing record gets the new entry only while nothing is loaded.
    ///
    /// Availability follows the entry's `enabled` flag only when that flag
    /// differs from the previous entry's. A disable by an operator or by
    /// the error threshold survives an unchanged entry.
    pub async fn upsert(&self, entry: PluginConfig) -> Arc<PluginRecord> {
        if let Some(record) = self.get(&entry.name) {
            let mut state = record.state.write().await;
            if state.instance.is_none() {
                if state.availability != Availability::AutoDisabled
                    && entry.enabled != state.entry.enabled
                {
                    state.availability = if entry.enabled {
                        Availability::Enabled
                    } else {
                        Availability::ManuallyDisabled
                    };
                }
                state.entry = entry;
            }
            drop(state);
            return record;
        }

        let name = entry.name.clone();
        let record = self
            .records
            .entry(name.clone())
            .or_insert_with(|| {
                let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
                Arc::new(PluginRecord::new(entry, sequence))
            })
            .clone();
        info!(plugin = %name, sequence = record.sequence, "Plugin registered");
        record
    }

    /// Record for `name`.
    pub fn get(&self, name: &str) -> Option<Arc<PluginRecord>> {
        self.records.get(name).map(|r| r.value().clone())
    }

    /// Forgets `name`.
    pub fn remove(&self, name: &str) -> Option<Arc<PluginRecord>> {
        self.records.remove(name).map(|(_, r)| r)
    }

    /// Every record in declaration order.
    pub fn all(&self) -> Vec<Arc<PluginRecord>> {
        let mut records: Vec<_> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.sequence);
        records
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Next value of the load counter.
    pub fn next_load_seq(&self) -> u64 {
        self.next_load.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// State and version of every loaded instance, for dependency checks.
    pub async fn loaded_view(&self) -> HashMap<String, (PluginState, String)> {
        let mut view = HashMap::new();
        for record in self.all() {
            let state = record.state.read().await;
            if let Some(instance) = &state.instance {
                view.insert(
                    record.name.clone(),
                    (instance.state(), instance.identity().version.clone()),
                );
            }
        }
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_keeps_first_sequence() {
        let table = PluginTable::new();
        let a = table.upsert(PluginConfig::new("a", "plugins/a")).await;
        let b = table.upsert(PluginConfig::new("b", "plugins/b")).await;
        let a_again = table
            .upsert(PluginConfig::new("a", "plugins/a2").with_priority(5))
            .await;

        assert_eq!(a.sequence(), 0);
        assert_eq!(b.sequence(), 1);
        assert!(Arc::ptr_eq(&a, &a_again));
        assert_eq!(a.state().read().await.entry.priority, Some(5));
        let names: Vec<_> = table.all().iter().map(|r| r.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_disabled_entry_reports_manually_disabled() {
        let table = PluginTable::new();
        let record = table
            .upsert(PluginConfig::new("a", "plugins/a").enabled(false))
            .await;
        let health = record.health().await;
        assert_eq!(health.status, HealthStatus::ManuallyDisabled);
        assert_eq!(health.state, PluginState::Unloaded);
    }

    #[tokio::test]
    async fn test_auto_disabled_survives_upsert() {
        let table = PluginTable::new();
        let record = table.upsert(PluginConfig::new("a", "plugins/a")).await;
        record.state().write().await.availability = Availability::AutoDisabled;

        table.upsert(PluginConfig::new("a", "plugins/a")).await;
        assert_eq!(record.health().await.status, HealthStatus::AutoDisabled);
    }

    #[tokio::test]
    async fn test_operator_disable_survives_unchanged_entry() {
        let table = PluginTable::new();
        let record = table.upsert(PluginConfig::new("a", "plugins/a")).await;
        record.state().write().await.availability = Availability::ManuallyDisabled;

        table.upsert(PluginConfig::new("a", "plugins/a")).await;
        assert_eq!(record.health().await.status, HealthStatus::ManuallyDisabled);
    }

    #[tokio::test]
    async fn test_changed_enabled_flag_updates_availability() {
        let table = PluginTable::new();
        let record = table
            .upsert(PluginConfig::new("a", "plugins/a").enabled(false))
            .await;

        table.upsert(PluginConfig::new("a", "plugins/a")).await;
        assert_eq!(record.state().read().await.availability, Availability::Enabled);

        table
            .upsert(PluginConfig::new("a", "plugins/a").enabled(false))
            .await;
        assert_eq!(
            record.state().read().await.availability,
            Availability::ManuallyDisabled
        );
    }
}
