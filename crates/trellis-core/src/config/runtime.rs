//! Plugin runtime tuning: failure containment, timeouts, hook policies.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a hook type reacts to a handler failure or halt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookMode {
    /// Record the failure and run the remaining handlers.
    Continue,
    /// Stop the pipeline on the first failure or halt.
    Abort,
}

/// Per-hook-type override of the dispatch policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookPolicyConfig {
    /// Execution mode; falls back to the naming convention when unset.
    #[serde(default)]
    pub mode: Option<HookMode>,
    /// Per-invocation timeout in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Runtime settings for the plugin engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Version of the embedding host, matched against `framework.version`.
    #[serde(default = "default_host_version")]
    pub host_version: String,
    /// Consecutive errors tolerated before a plugin is auto-disabled.
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,
    /// Default per-invocation hook timeout in milliseconds.
    #[serde(default = "default_hook_timeout")]
    pub hook_timeout_ms: u64,
    /// Maximum time to wait for in-flight invocations when retiring an instance.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_ms: u64,
    /// Maximum time the whole runtime waits for in-flight work on shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,
    /// Number of security events retained in the in-memory audit log.
    #[serde(default = "default_audit_capacity")]
    pub audit_capacity: usize,
    /// Hook type name -> policy override.
    #[serde(default)]
    pub hook_policies: BTreeMap<String, HookPolicyConfig>,
}

impl RuntimeSettings {
    /// Default hook timeout as a `Duration`.
    pub fn hook_timeout(&self) -> Duration {
        Duration::from_millis(self.hook_timeout_ms)
    }

    /// Drain timeout as a `Duration`.
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Shutdown timeout as a `Duration`.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            host_version: default_host_version(),
            error_threshold: default_error_threshold(),
            hook_timeout_ms: default_hook_timeout(),
            drain_timeout_ms: default_drain_timeout(),
            shutdown_timeout_ms: default_shutdown_timeout(),
            audit_capacity: default_audit_capacity(),
            hook_policies: BTreeMap::new(),
        }
    }
}

fn default_host_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_error_threshold() -> u32 {
    3
}

fn default_hook_timeout() -> u64 {
    5_000
}

fn default_drain_timeout() -> u64 {
    10_000
}

fn default_shutdown_timeout() -> u64 {
    30_000
}

fn default_audit_capacity() -> usize {
    1024
}
