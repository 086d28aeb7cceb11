//! Hot reload: build a replacement off to the side, swap, then drain.
//!
//! The running instance keeps serving while the candidate is loaded,
//! initialized, and started. Only a fully started candidate is published,
//! through a single pointer swap on the plugin's [`InstanceSlot`]. The
//! retired instance is torn down after its in-flight invocations finish.
//! A candidate failure discards the candidate and resumes the old
//! instance as if nothing happened.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{PluginError, PluginResult};
use crate::events::EventBus;
use crate::factory::InstanceFactory;
use crate::hooks::registry::HookRegistry;
use crate::instance::{InstanceSlot, PluginInstance};
use crate::manifest::model::PluginIdentity;

/// Result of a reload request.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReloadOutcome {
    /// The replacement is serving.
    Reloaded {
        /// Identity of the retired instance.
        from: PluginIdentity,
        /// Identity of the new instance.
        to: PluginIdentity,
    },
    /// The replacement failed; the previous instance is still serving.
    RolledBack {
        /// A `ReloadFailure` naming the failing phase and cause.
        #[serde(serialize_with = "serialize_error")]
        error: PluginError,
    },
}

fn serialize_error<S: serde::Serializer>(error: &PluginError, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&error.to_string())
}

impl ReloadOutcome {
    /// Whether the replacement went live.
    pub fn is_reloaded(&self) -> bool {
        matches!(self, Self::Reloaded { .. })
    }

    /// Rolled-back outcome for a failure of `plugin` before any candidate
    /// was built.
    pub fn rolled_back(plugin: &str, error: PluginError) -> Self {
        Self::RolledBack {
            error: error.into_reload_failure(plugin),
        }
    }
}

/// Coordinates swapping a plugin's running instance.
#[derive(Debug)]
pub struct HotReloadCoordinator {
    factory: Arc<InstanceFactory>,
    registry: Arc<HookRegistry>,
    events: Arc<EventBus>,
    drain_timeout: Duration,
}

impl HotReloadCoordinator {
    /// Creates a coordinator.
    pub fn new(
        factory: Arc<InstanceFactory>,
        registry: Arc<HookRegistry>,
        events: Arc<EventBus>,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            factory,
            registry,
            events,
            drain_timeout,
        }
    }

    /// Replaces the instance visible through `slot` with `candidate`.
    ///
    /// `candidate` must be freshly created. Fails without side effects
    /// when the slot has no running instance.
    pub async fn reload(
        &self,
        slot: &Arc<InstanceSlot>,
        candidate: Arc<PluginInstance>,
        priority: Option<i64>,
        sequence: usize,
    ) -> PluginResult<ReloadOutcome> {
        let plugin = slot.plugin().to_string();
        let old = slot.current().ok_or_else(|| PluginError::NotFound {
            plugin: plugin.clone(),
        })?;

        old.begin_reload().await?;
        let started = Instant::now();
        info!(plugin = %old.identity(), candidate = %candidate.identity(), "Hot reload started");

        if let Err(error) = self.factory.launch(&candidate).await {
            candidate.teardown().await;
            if let Err(e) = old.end_reload().await {
                warn!(plugin = %plugin, error = %e, "Could not resume previous instance");
            }
            warn!(plugin = %plugin, error = %error, "Hot reload rolled back");
            return Ok(ReloadOutcome::RolledBack {
                error: error.into_reload_failure(&plugin),
            });
        }

        let registrations = InstanceFactory::registrations(&candidate, slot, priority, sequence);
        let retired = slot.swap(Some(candidate.clone()));
        self.registry.replace_plugin(&plugin, registrations);
        self.events
            .subscribe(&candidate.manifest().events.subscribes, slot);

        let retired = retired.unwrap_or(old);
        self.retire(&retired).await;

        info!(
            plugin = %plugin,
            from = %retired.identity(),
            to = %candidate.identity(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Hot reload completed"
        );

        Ok(ReloadOutcome::Reloaded {
            from: retired.identity().clone(),
            to: candidate.identity().clone(),
        })
    }

    /// Waits for in-flight invocations of an instance that is no longer
    /// visible, then stops and unloads it.
    pub async fn retire(&self, instance: &PluginInstance) {
        instance.start_draining();
        if !instance.wait_drained(self.drain_timeout).await {
            warn!(
                plugin = %instance.identity(),
                in_flight = instance.in_flight(),
                "Tearing down instance with invocations still in flight"
            );
        }
        instance.teardown().await;
    }
}
