//! Shared test helpers for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use trellis_core::config::RuntimeSettings;
use trellis_plugin::api::HostServices;
use trellis_plugin::events::Event;
use trellis_plugin::hooks::registry::HookHandler;
use trellis_plugin::loader::StaticLoader;
use trellis_plugin::manifest::model::{
    DependencySpec, FrameworkRequirement, HookDeclaration, Manifest,
};
use trellis_plugin::manifest::{ManifestFormat, encode};
use trellis_plugin::traits::{ClosureHandler, Plugin};
use trellis_plugin::{HookPoint, HookResult, PluginContext, PluginManager};

/// Knobs a test flips to steer one plugin's behavior.
#[derive(Debug)]
pub struct Controls {
    /// `start` fails while set.
    pub fail_start: AtomicBool,
    /// Hook handlers fail while set.
    pub fail_hooks: AtomicBool,
    /// Handlers invoked with `hold = true` that have started.
    pub entered: AtomicUsize,
    /// Handlers invoked with `hold = true` wait for a permit here.
    pub gate: Semaphore,
    /// Next generation handed to a new plugin object.
    pub generations: AtomicU64,
    /// Event types delivered to the plugin.
    pub received: Mutex<Vec<String>>,
    /// Context of the most recent `init`.
    pub context: Mutex<Option<PluginContext>>,
}

impl Default for Controls {
    fn default() -> Self {
        Self {
            fail_start: AtomicBool::new(false),
            fail_hooks: AtomicBool::new(false),
            entered: AtomicUsize::new(0),
            gate: Semaphore::new(0),
            generations: AtomicU64::new(0),
            received: Mutex::new(Vec::new()),
            context: Mutex::new(None),
        }
    }
}

/// A plugin whose behavior is driven by [`Controls`] and which logs every
/// lifecycle call as `step:name:generation`.
#[derive(Debug)]
pub struct TestPlugin {
    name: String,
    generation: u64,
    hooks: Vec<HookPoint>,
    controls: Arc<Controls>,
    log: Arc<Mutex<Vec<String>>>,
}

impl TestPlugin {
    fn record(&self, step: &str) {
        self.log
            .lock()
            .unwrap()
            .push(format!("{step}:{}:{}", self.name, self.generation));
    }
}

#[async_trait]
impl Plugin for TestPlugin {
    async fn init(&self, ctx: PluginContext) -> Result<(), String> {
        *self.controls.context.lock().unwrap() = Some(ctx);
        self.record("init");
        Ok(())
    }

    async fn start(&self) -> Result<(), String> {
        if self.controls.fail_start.load(Ordering::SeqCst) {
            return Err("refused to start".into());
        }
        self.record("start");
        Ok(())
    }

    async fn stop(&self) -> Result<(), String> {
        self.record("stop");
        Ok(())
    }

    fn hook_handlers(&self) -> Vec<(HookPoint, Arc<dyn HookHandler>)> {
        self.hooks
            .iter()
            .map(|hook| {
                let name = self.name.clone();
                let generation = self.generation;
                let controls = self.controls.clone();
                let log = self.log.clone();
                let label = name.clone();
                let handler = ClosureHandler::shared(&label, move |payload, _cancel| {
                    let name = name.clone();
                    let controls = controls.clone();
                    let log = log.clone();
                    async move {
                        if payload.get_bool("hold") == Some(true) {
                            controls.entered.fetch_add(1, Ordering::SeqCst);
                            let _permit = controls.gate.acquire().await.map_err(|e| e.to_string())?;
                        }
                        if controls.fail_hooks.load(Ordering::SeqCst) {
                            return Err("hook failed".to_string());
                        }
                        log.lock()
                            .unwrap()
                            .push(format!("hook:{name}:{generation}"));
                        Ok(HookResult::continue_with_output(
                            json!({ "plugin": name, "generation": generation }),
                        ))
                    }
                });
                (hook.clone(), handler)
            })
            .collect()
    }

    async fn on_event(&self, event: &Event) -> Result<(), String> {
        self.controls
            .received
            .lock()
            .unwrap()
            .push(event.event_type.clone());
        Ok(())
    }
}

/// Test host: a temp directory of plugin bundles plus a static loader.
pub struct TestHost {
    pub dir: TempDir,
    pub loader: Arc<StaticLoader>,
    pub log: Arc<Mutex<Vec<String>>>,
    controls: Mutex<HashMap<String, Arc<Controls>>>,
}

impl TestHost {
    /// Creates an empty host.
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("Failed to create temp dir"),
            loader: Arc::new(StaticLoader::new()),
            log: Arc::new(Mutex::new(Vec::new())),
            controls: Mutex::new(HashMap::new()),
        }
    }

    /// Controls of `name`, created on first use.
    pub fn controls(&self, name: &str) -> Arc<Controls> {
        self.controls
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Writes `manifest` as `<dir>/<name>/plugin.<ext>`, registers a
    /// factory for it, and returns the bundle directory.
    pub fn install(&self, manifest: &Manifest, format: ManifestFormat) -> PathBuf {
        let bundle = self.dir.path().join(&manifest.name);
        std::fs::create_dir_all(&bundle).expect("Failed to create bundle dir");
        for stale in ["plugin.yaml", "plugin.json", "plugin.toml"] {
            let _ = std::fs::remove_file(bundle.join(stale));
        }
        let text = encode(manifest, format).expect("Failed to encode manifest");
        std::fs::write(bundle.join(format!("plugin.{}", format.extension())), text)
            .expect("Failed to write manifest");

        let controls = self.controls(&manifest.name);
        let log = self.log.clone();
        self.loader.register(&manifest.name, move |m: &Manifest| {
            Ok(Arc::new(TestPlugin {
                name: m.name.clone(),
                generation: controls.generations.fetch_add(1, Ordering::SeqCst),
                hooks: m
                    .hooks
                    .iter()
                    .map(|h| HookPoint::new(h.hook_type.as_str()))
                    .collect(),
                controls: controls.clone(),
                log: log.clone(),
            }) as Arc<dyn Plugin>)
        });
        bundle
    }

    /// Manager with default settings.
    pub fn manager(&self) -> Arc<PluginManager> {
        self.manager_with(RuntimeSettings::default())
    }

    /// Manager with `settings`.
    pub fn manager_with(&self, settings: RuntimeSettings) -> Arc<PluginManager> {
        self.manager_with_services(settings, HostServices::new())
    }

    /// Manager with `settings` and host `services`.
    pub fn manager_with_services(
        &self,
        settings: RuntimeSettings,
        services: HostServices,
    ) -> Arc<PluginManager> {
        Arc::new(
            PluginManager::new(settings, self.loader.clone(), services)
                .expect("Failed to create manager"),
        )
    }

    /// Lifecycle and hook log so far.
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Index of `entry` in the log.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.log().iter().position(|e| e == entry)
    }
}

/// A valid manifest handling `after_request`.
pub fn manifest(name: &str, version: &str) -> Manifest {
    Manifest {
        name: name.to_string(),
        version: version.to_string(),
        description: format!("{name} test plugin"),
        author: "Trellis Tests".to_string(),
        framework: FrameworkRequirement {
            version: ">=0.1.0".to_string(),
        },
        hooks: vec![HookDeclaration {
            hook_type: HookPoint::AFTER_REQUEST.to_string(),
            priority: 100,
        }],
        ..Default::default()
    }
}

/// Adds a required dependency.
pub fn depends_on(mut manifest: Manifest, name: &str, version: &str) -> Manifest {
    manifest.dependencies.push(DependencySpec {
        name: name.to_string(),
        version: version.to_string(),
        optional: false,
    });
    manifest
}

/// Settings with a custom error threshold and bounded timeouts.
pub fn settings(error_threshold: u32) -> RuntimeSettings {
    RuntimeSettings {
        error_threshold,
        hook_timeout_ms: 10_000,
        drain_timeout_ms: 5_000,
        ..Default::default()
    }
}

/// Polls `check` until it holds or `timeout` passes.
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

/// Path of a fixture file.
pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}
