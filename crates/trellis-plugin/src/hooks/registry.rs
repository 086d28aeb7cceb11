//! Hook registry: priority-ordered, copy-on-write handler sequences.
//!
//! Writers rebuild the affected sequence and publish a new map; readers
//! take a snapshot and iterate it without holding any lock, so a
//! registration change never blocks or corrupts an in-flight dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use trellis_core::config::{HookMode, RuntimeSettings};

use super::definitions::{HookPayload, HookPoint, HookResult};
use crate::instance::InstanceSlot;

/// Trait for hook handler implementations.
#[async_trait]
pub trait HookHandler: Send + Sync + std::fmt::Debug {
    /// Handles a hook invocation.
    ///
    /// `cancel` fires when the invocation times out; work spawned by the
    /// handler should stop when it does.
    async fn handle(
        &self,
        payload: &HookPayload,
        cancel: CancellationToken,
    ) -> Result<HookResult, String>;
}

/// Where a registration's handler comes from.
#[derive(Debug, Clone)]
pub enum HandlerRef {
    /// A fixed handler, invoked as is.
    Direct(Arc<dyn HookHandler>),
    /// Resolved through the plugin's current instance at invocation time,
    /// so a hot reload retargets the registration atomically.
    Instance(Arc<InstanceSlot>),
}

/// One (plugin, hook type, priority, handler) entry.
#[derive(Debug, Clone)]
pub struct HookRegistration {
    /// Owning plugin.
    pub plugin: String,
    /// Hook type.
    pub hook: HookPoint,
    /// Higher runs earlier.
    pub priority: i64,
    /// Tie-break: (plugin declaration sequence, hook declaration index).
    pub order: (usize, usize),
    /// Disabled registrations stay in place but are skipped.
    pub enabled: bool,
    /// Handler reference.
    pub handler: HandlerRef,
}

impl HookRegistration {
    /// Registration of a fixed handler.
    pub fn direct(
        plugin: &str,
        hook: HookPoint,
        priority: i64,
        order: (usize, usize),
        handler: Arc<dyn HookHandler>,
    ) -> Self {
        Self {
            plugin: plugin.to_string(),
            hook,
            priority,
            order,
            enabled: true,
            handler: HandlerRef::Direct(handler),
        }
    }

    fn sort_key(&self) -> (std::cmp::Reverse<i64>, (usize, usize)) {
        (std::cmp::Reverse(self.priority), self.order)
    }
}

/// Immutable, ordered handler list for one hook type.
pub type HookSequence = Arc<Vec<HookRegistration>>;

/// Execution policy of a hook type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookPolicy {
    /// Continue past failures, or abort on the first one.
    pub mode: HookMode,
    /// Per-invocation timeout.
    pub timeout: Duration,
}

impl HookPolicy {
    /// Whether halts and errors stop the pipeline.
    pub fn is_short_circuit(&self) -> bool {
        self.mode == HookMode::Abort
    }
}

/// Registry of hook handlers organized by hook point.
#[derive(Debug)]
pub struct HookRegistry {
    /// Hook point → sorted registrations. Replaced wholesale on mutation.
    sequences: ArcSwap<HashMap<HookPoint, HookSequence>>,
    /// Per-hook overrides.
    policies: DashMap<HookPoint, HookPolicy>,
    /// Timeout used when no override exists.
    default_timeout: Duration,
}

impl HookRegistry {
    /// Creates a new empty hook registry.
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            sequences: ArcSwap::from_pointee(HashMap::new()),
            policies: DashMap::new(),
            default_timeout,
        }
    }

    /// Creates a registry with the timeout and overrides from `settings`.
    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        let registry = Self::new(settings.hook_timeout());
        for (hook, policy) in &settings.hook_policies {
            let hook = HookPoint::new(hook.as_str());
            let default = registry.policy_for(&hook);
            registry.set_policy(
                hook,
                HookPolicy {
                    mode: policy.mode.unwrap_or(default.mode),
                    timeout: policy
                        .timeout_ms
                        .map(Duration::from_millis)
                        .unwrap_or(default.timeout),
                },
            );
        }
        registry
    }

    /// Overrides the policy of one hook type.
    pub fn set_policy(&self, hook: HookPoint, policy: HookPolicy) {
        debug!(hook = %hook, mode = ?policy.mode, timeout_ms = policy.timeout.as_millis() as u64, "Hook policy set");
        self.policies.insert(hook, policy);
    }

    /// Effective policy: override, else abort for `before_*` and continue
    /// for everything else.
    pub fn policy_for(&self, hook: &HookPoint) -> HookPolicy {
        if let Some(policy) = self.policies.get(hook) {
            return *policy;
        }
        HookPolicy {
            mode: if hook.is_before_hook() {
                HookMode::Abort
            } else {
                HookMode::Continue
            },
            timeout: self.default_timeout,
        }
    }

    /// Registers a handler.
    pub fn register(&self, registration: HookRegistration) {
        self.register_all(vec![registration]);
    }

    /// Registers several handlers in one publication.
    pub fn register_all(&self, registrations: Vec<HookRegistration>) {
        if registrations.is_empty() {
            return;
        }
        for r in &registrations {
            info!(hook = %r.hook, plugin = %r.plugin, priority = r.priority, "Hook handler registered");
        }
        self.update(|map| {
            for r in &registrations {
                let mut entries: Vec<HookRegistration> = map
                    .get(&r.hook)
                    .map(|seq| seq.as_ref().clone())
                    .unwrap_or_default();
                entries.push(r.clone());
                entries.sort_by_key(|e| e.sort_key());
                map.insert(r.hook.clone(), Arc::new(entries));
            }
        });
    }

    /// Atomically replaces every registration of `plugin`.
    pub fn replace_plugin(&self, plugin: &str, registrations: Vec<HookRegistration>) {
        self.update(|map| {
            remove_plugin(map, plugin);
            for r in &registrations {
                let mut entries: Vec<HookRegistration> = map
                    .get(&r.hook)
                    .map(|seq| seq.as_ref().clone())
                    .unwrap_or_default();
                entries.push(r.clone());
                entries.sort_by_key(|e| e.sort_key());
                map.insert(r.hook.clone(), Arc::new(entries));
            }
        });
        info!(plugin = %plugin, hooks = registrations.len(), "Plugin hooks replaced");
    }

    /// Unregisters all handlers for a specific plugin.
    pub fn unregister_all(&self, plugin: &str) {
        self.update(|map| remove_plugin(map, plugin));
        info!(plugin = %plugin, "All hooks unregistered for plugin");
    }

    /// Enables or disables every registration of `plugin` in place.
    pub fn set_enabled(&self, plugin: &str, enabled: bool) {
        self.update(|map| {
            for seq in map.values_mut() {
                if seq.iter().any(|r| r.plugin == plugin && r.enabled != enabled) {
                    let entries = seq
                        .iter()
                        .cloned()
                        .map(|mut r| {
                            if r.plugin == plugin {
                                r.enabled = enabled;
                            }
                            r
                        })
                        .collect();
                    *seq = Arc::new(entries);
                }
            }
        });
    }

    /// Snapshot of the ordered registrations for a hook point.
    pub fn sequence_for(&self, hook: &HookPoint) -> HookSequence {
        self.sequences
            .load()
            .get(hook)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns whether any handlers are registered for a hook point.
    pub fn has_handlers(&self, hook: &HookPoint) -> bool {
        self.handler_count(hook) > 0
    }

    /// Returns the number of handlers registered for a hook point.
    pub fn handler_count(&self, hook: &HookPoint) -> usize {
        self.sequences
            .load()
            .get(hook)
            .map(|seq| seq.len())
            .unwrap_or(0)
    }

    /// Returns all registered hook points.
    pub fn registered_hooks(&self) -> Vec<HookPoint> {
        let mut hooks: Vec<HookPoint> = self.sequences.load().keys().cloned().collect();
        hooks.sort();
        hooks
    }

    /// Hook points `plugin` is registered for.
    pub fn hooks_of(&self, plugin: &str) -> Vec<HookPoint> {
        let mut hooks: Vec<HookPoint> = self
            .sequences
            .load()
            .iter()
            .filter(|(_, seq)| seq.iter().any(|r| r.plugin == plugin))
            .map(|(hook, _)| hook.clone())
            .collect();
        hooks.sort();
        hooks
    }

    fn update<F>(&self, mutate: F)
    where
        F: Fn(&mut HashMap<HookPoint, HookSequence>),
    {
        self.sequences.rcu(|current| {
            let mut next = HashMap::clone(current);
            mutate(&mut next);
            next
        });
    }
}

fn remove_plugin(map: &mut HashMap<HookPoint, HookSequence>, plugin: &str) {
    for seq in map.values_mut() {
        if seq.iter().any(|r| r.plugin == plugin) {
            *seq = Arc::new(seq.iter().filter(|r| r.plugin != plugin).cloned().collect());
        }
    }
    map.retain(|_, seq| !seq.is_empty());
}
