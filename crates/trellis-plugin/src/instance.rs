//! Runtime plugin instances and the swappable slot dispatch reads through.
//!
//! An instance is built once and driven through its lifecycle; a hot
//! reload replaces it with a new instance rather than mutating it. The
//! [`InstanceSlot`] is the single atomic pointer every hook registration
//! and event subscription of a plugin resolves through.
//!
//! Draining uses two sequentially consistent flags: an invoker bumps
//! `in_flight` and then checks `draining`; a retirer sets `draining` and
//! then waits for `in_flight` to reach zero. One of them always observes
//! the other.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::context::PluginContext;
use crate::error::{PluginError, PluginResult};
use crate::health::HealthTracker;
use crate::hooks::definitions::HookPoint;
use crate::hooks::registry::HookHandler;
use crate::lifecycle::PluginState;
use crate::loader::PluginLoader;
use crate::manifest::model::{Manifest, PluginIdentity};
use crate::metrics::PluginMetrics;
use crate::permissions::PermissionSet;
use crate::traits::Plugin;

/// One loaded plugin.
pub struct PluginInstance {
    id: Uuid,
    identity: PluginIdentity,
    manifest: Arc<Manifest>,
    config: Arc<BTreeMap<String, Value>>,
    permissions: PermissionSet,
    path: PathBuf,
    state: RwLock<PluginState>,
    /// Serializes lifecycle transitions of this instance.
    transition: Mutex<()>,
    plugin: RwLock<Option<Arc<dyn Plugin>>>,
    handlers: RwLock<HashMap<HookPoint, Arc<dyn HookHandler>>>,
    metrics: Arc<PluginMetrics>,
    health: Arc<HealthTracker>,
    in_flight: AtomicUsize,
    draining: AtomicBool,
    drained: Notify,
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginInstance")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("state", &self.state())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl PluginInstance {
    /// Creates an `Unloaded` instance.
    pub fn new(
        manifest: Arc<Manifest>,
        config: Arc<BTreeMap<String, Value>>,
        permissions: PermissionSet,
        path: &Path,
        health: Arc<HealthTracker>,
    ) -> Self {
        let identity = manifest.identity();
        Self {
            id: Uuid::now_v7(),
            metrics: Arc::new(PluginMetrics::new(&identity.name, &identity.version)),
            identity,
            manifest,
            config,
            permissions,
            path: path.to_path_buf(),
            state: RwLock::new(PluginState::Unloaded),
            transition: Mutex::new(()),
            plugin: RwLock::new(None),
            handlers: RwLock::new(HashMap::new()),
            health,
            in_flight: AtomicUsize::new(0),
            draining: AtomicBool::new(false),
            drained: Notify::new(),
        }
    }

    /// Unique id of this instance (differs across reloads).
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Plugin name.
    pub fn name(&self) -> &str {
        &self.identity.name
    }

    /// Name and version.
    pub fn identity(&self) -> &PluginIdentity {
        &self.identity
    }

    /// Manifest the instance was built from.
    pub fn manifest(&self) -> &Arc<Manifest> {
        &self.manifest
    }

    /// Resolved configuration values.
    pub fn config(&self) -> &Arc<BTreeMap<String, Value>> {
        &self.config
    }

    /// Effective capability set.
    pub fn permissions(&self) -> &PermissionSet {
        &self.permissions
    }

    /// Metrics collector.
    pub fn metrics(&self) -> &Arc<PluginMetrics> {
        &self.metrics
    }

    /// Health tracker.
    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PluginState {
        self.state
            .read()
            .map(|s| *s)
            .unwrap_or(PluginState::Failed)
    }

    /// Hook invocations currently running against this instance.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Handler for `hook`, if the plugin provides one.
    pub fn handler(&self, hook: &HookPoint) -> Option<Arc<dyn HookHandler>> {
        self.handlers
            .read()
            .ok()
            .and_then(|handlers| handlers.get(hook).cloned())
    }

    /// The plugin object, present between load and unload.
    pub fn plugin(&self) -> Option<Arc<dyn Plugin>> {
        self.plugin.read().ok().and_then(|p| p.clone())
    }

    fn set_state(&self, next: PluginState) {
        if let Ok(mut state) = self.state.write() {
            let previous = *state;
            debug!(plugin = %self.identity, from = %previous, to = %next, "State transition");
            *state = next;
        }
    }

    /// Checks `current -> target` against the lifecycle table.
    fn require(&self, action: &'static str, target: PluginState) -> PluginResult<PluginState> {
        let current = self.state();
        if current.can_transition_to(target) {
            Ok(current)
        } else {
            Err(PluginError::InvalidStateTransition {
                plugin: self.identity.name.clone(),
                state: current,
                action,
            })
        }
    }

    fn fail(&self, message: &str) {
        self.set_state(PluginState::Failed);
        self.metrics.record_error(message);
        let consecutive = self.health.record_failure(message);
        warn!(plugin = %self.identity, consecutive_errors = consecutive, error = %message, "Plugin entered failed state");
    }

    /// `Unloaded | Failed -> Loading`: obtains the plugin object.
    pub async fn load(&self, loader: &dyn PluginLoader) -> PluginResult<()> {
        let _guard = self.transition.lock().await;
        self.require("load", PluginState::Loading)?;
        self.set_state(PluginState::Loading);

        let started = Instant::now();
        match loader.load(&self.manifest, &self.path).await {
            Ok(plugin) => {
                if let Ok(mut slot) = self.plugin.write() {
                    *slot = Some(plugin);
                }
                self.metrics.record_load(started.elapsed());
                Ok(())
            }
            Err(cause) => {
                self.metrics.record_load(started.elapsed());
                self.fail(&cause);
                Err(PluginError::Load {
                    plugin: self.identity.name.clone(),
                    cause,
                })
            }
        }
    }

    /// `Loading -> Initializing -> Initialized`: runs `init` and collects handlers.
    pub async fn init(&self, ctx: PluginContext) -> PluginResult<()> {
        let _guard = self.transition.lock().await;
        self.require("init", PluginState::Initializing)?;
        let plugin = self.plugin().ok_or_else(|| PluginError::Initialization {
            plugin: self.identity.name.clone(),
            cause: "plugin object missing".to_string(),
        })?;
        self.set_state(PluginState::Initializing);

        let started = Instant::now();
        let result = plugin.init(ctx).await;
        self.metrics.record_init(started.elapsed());

        match result {
            Ok(()) => {
                let handlers: HashMap<HookPoint, Arc<dyn HookHandler>> =
                    plugin.hook_handlers().into_iter().collect();
                if let Ok(mut slot) = self.handlers.write() {
                    *slot = handlers;
                }
                self.set_state(PluginState::Initialized);
                Ok(())
            }
            Err(cause) => {
                self.fail(&cause);
                Err(PluginError::Initialization {
                    plugin: self.identity.name.clone(),
                    cause,
                })
            }
        }
    }

    /// `Initialized -> Starting -> Running`.
    pub async fn start(&self) -> PluginResult<()> {
        let _guard = self.transition.lock().await;
        self.require("start", PluginState::Starting)?;
        let plugin = self.plugin().ok_or_else(|| PluginError::Start {
            plugin: self.identity.name.clone(),
            cause: "plugin object missing".to_string(),
        })?;
        self.set_state(PluginState::Starting);

        let started = Instant::now();
        let result = plugin.start().await;
        self.metrics.record_start(started.elapsed());

        match result {
            Ok(()) => {
                self.set_state(PluginState::Running);
                self.health.record_success();
                info!(
                    plugin = %self.identity,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Plugin running"
                );
                Ok(())
            }
            Err(cause) => {
                self.fail(&cause);
                Err(PluginError::Start {
                    plugin: self.identity.name.clone(),
                    cause,
                })
            }
        }
    }

    /// `Running -> Reloading`: the instance keeps serving while a
    /// replacement is built.
    pub async fn begin_reload(&self) -> PluginResult<()> {
        let _guard = self.transition.lock().await;
        self.require("reload", PluginState::Reloading)?;
        self.set_state(PluginState::Reloading);
        Ok(())
    }

    /// `Reloading -> Running` after a rolled-back reload.
    pub async fn end_reload(&self) -> PluginResult<()> {
        let _guard = self.transition.lock().await;
        self.require("resume", PluginState::Running)?;
        self.set_state(PluginState::Running);
        Ok(())
    }

    /// `Running | Reloading | Initialized -> Stopping -> Stopped`, or
    /// `Failed -> Stopped`.
    ///
    /// The instance ends `Stopped` even when the plugin's `stop` fails; the
    /// failure is still returned.
    pub async fn stop(&self) -> PluginResult<()> {
        let _guard = self.transition.lock().await;
        let target = if self.state() == PluginState::Failed {
            PluginState::Stopped
        } else {
            PluginState::Stopping
        };
        let current = self.require("stop", target)?;

        if current == PluginState::Failed {
            self.set_state(PluginState::Stopped);
            return Ok(());
        }

        self.set_state(PluginState::Stopping);
        let started = Instant::now();
        let result = match self.plugin() {
            Some(plugin) => plugin.stop().await,
            None => Ok(()),
        };
        self.metrics.record_stop(started.elapsed());
        self.set_state(PluginState::Stopped);

        result.map_err(|cause| {
            error!(plugin = %self.identity, error = %cause, "Plugin stop returned error");
            self.metrics.record_error(&cause);
            PluginError::Stop {
                plugin: self.identity.name.clone(),
                cause,
            }
        })
    }

    /// `Stopped | Failed | Loading -> Unloaded`: releases the plugin object.
    pub async fn unload(&self) -> PluginResult<()> {
        let _guard = self.transition.lock().await;
        self.require("unload", PluginState::Unloaded)?;

        let plugin = self.plugin.write().ok().and_then(|mut p| p.take());
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.clear();
        }
        if let Some(plugin) = plugin {
            if let Err(cause) = plugin.unload().await {
                warn!(plugin = %self.identity, error = %cause, "Plugin unload returned error");
            }
        }
        self.set_state(PluginState::Unloaded);
        Ok(())
    }

    /// Stops and unloads whatever state the instance is in. Used to
    /// discard failed candidates and retired instances.
    pub async fn teardown(&self) {
        let state = self.state();
        if state == PluginState::Failed || state.can_transition_to(PluginState::Stopping) {
            if let Err(e) = self.stop().await {
                warn!(plugin = %self.identity, error = %e, "Error while stopping instance");
            }
        }
        if self.state().can_transition_to(PluginState::Unloaded) {
            if let Err(e) = self.unload().await {
                warn!(plugin = %self.identity, error = %e, "Error while unloading instance");
            }
        }
    }

    /// Marks the instance as draining; new invocations will not enter it.
    pub fn start_draining(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    /// Waits until no invocation is in flight, up to `timeout`.
    /// Returns whether the instance drained.
    pub async fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.drained.notified();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let remaining = self.in_flight.load(Ordering::SeqCst);
                if remaining == 0 {
                    return true;
                }
                warn!(plugin = %self.identity, in_flight = remaining, "Drain timed out");
                return false;
            }
        }
    }

    fn try_enter(self: &Arc<Self>) -> Option<InvocationGuard> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InvocationGuard {
            instance: self.clone(),
        };
        if self.draining.load(Ordering::SeqCst) {
            drop(guard);
            return None;
        }
        Some(guard)
    }
}

/// Keeps an instance alive and counted as busy for one invocation.
#[derive(Debug)]
pub struct InvocationGuard {
    instance: Arc<PluginInstance>,
}

impl InvocationGuard {
    /// The instance being invoked.
    pub fn instance(&self) -> &Arc<PluginInstance> {
        &self.instance
    }
}

impl std::ops::Deref for InvocationGuard {
    type Target = PluginInstance;

    fn deref(&self) -> &Self::Target {
        &self.instance
    }
}

impl Drop for InvocationGuard {
    fn drop(&mut self) {
        let previous = self.instance.in_flight.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 && self.instance.draining.load(Ordering::SeqCst) {
            self.instance.drained.notify_waiters();
        }
    }
}

/// Atomic reference to the instance currently visible to dispatch.
#[derive(Debug)]
pub struct InstanceSlot {
    plugin: String,
    current: ArcSwapOption<PluginInstance>,
}

impl InstanceSlot {
    /// Empty slot for `plugin`.
    pub fn new(plugin: &str) -> Self {
        Self {
            plugin: plugin.to_string(),
            current: ArcSwapOption::empty(),
        }
    }

    /// Plugin this slot belongs to.
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Currently visible instance.
    pub fn current(&self) -> Option<Arc<PluginInstance>> {
        self.current.load_full()
    }

    /// Publishes `next` and returns the previously visible instance.
    pub fn swap(&self, next: Option<Arc<PluginInstance>>) -> Option<Arc<PluginInstance>> {
        self.current.swap(next)
    }

    /// Enters the visible instance for one invocation.
    ///
    /// Returns `None` when nothing is visible. If the instance observed is
    /// already draining, retries against whatever replaced it.
    pub fn enter(&self) -> Option<InvocationGuard> {
        loop {
            let instance = self.current.load_full()?;
            if let Some(guard) = instance.try_enter() {
                return Some(guard);
            }
            let replaced = match self.current.load_full() {
                Some(now) => !Arc::ptr_eq(&now, &instance),
                None => false,
            };
            if !replaced {
                return None;
            }
        }
    }
}
