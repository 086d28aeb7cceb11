//! Plugin runtime error taxonomy.
//!
//! Every plugin-scoped failure carries the plugin name, the phase it
//! failed in, and the underlying cause. Errors are cheap to clone so they
//! can be stored in load reports and health snapshots.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use trellis_core::error::{AppError, ErrorKind};

use crate::lifecycle::PluginState;

/// Phase of plugin handling in which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginPhase {
    /// Decoding a manifest or deployment document.
    Parse,
    /// Semantic validation of a decoded document.
    Validate,
    /// Dependency and host-version resolution.
    Resolve,
    /// Obtaining the plugin object from the loader.
    Load,
    /// The plugin's `init` callback.
    Initialize,
    /// The plugin's `start` callback.
    Start,
    /// The plugin's `stop` callback.
    Stop,
    /// Releasing the plugin object.
    Unload,
    /// A hook handler invocation.
    Hook,
    /// Building or swapping a hot-reload candidate.
    Reload,
    /// Access to a host service.
    Service,
    /// Event publication or delivery.
    Event,
}

impl fmt::Display for PluginPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Parse => "parse",
            Self::Validate => "validate",
            Self::Resolve => "resolve",
            Self::Load => "load",
            Self::Initialize => "initialize",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Unload => "unload",
            Self::Hook => "hook",
            Self::Reload => "reload",
            Self::Service => "service",
            Self::Event => "event",
        };
        f.write_str(name)
    }
}

/// Missing, incompatible, or circular dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyError {
    /// A required dependency is not known to the runtime.
    #[error("plugin '{plugin}' requires '{dependency}', which is not loaded")]
    Missing {
        /// Dependent plugin.
        plugin: String,
        /// Name of the missing dependency.
        dependency: String,
    },
    /// A dependency is loaded but its version does not satisfy the constraint.
    #[error("plugin '{plugin}' requires '{dependency}' {required}, found {found}")]
    Incompatible {
        /// Dependent plugin.
        plugin: String,
        /// Name of the dependency.
        dependency: String,
        /// Declared version constraint.
        required: String,
        /// Version actually running.
        found: String,
    },
    /// A dependency is known but not in the `Running` state.
    #[error("plugin '{plugin}' requires '{dependency}' to be running (currently {state})")]
    NotRunning {
        /// Dependent plugin.
        plugin: String,
        /// Name of the dependency.
        dependency: String,
        /// Observed state of the dependency.
        state: String,
    },
    /// The dependency graph of a batch contains a cycle.
    #[error("dependency cycle detected: {}", cycle.join(" -> "))]
    Cycle {
        /// Plugins on the cycle, first element repeated at the end.
        cycle: Vec<String>,
    },
    /// The host does not satisfy the manifest's `framework.version`.
    #[error("plugin '{plugin}' requires host {required}, host is {host}")]
    HostVersion {
        /// Plugin declaring the requirement.
        plugin: String,
        /// Declared requirement.
        required: String,
        /// Host version.
        host: String,
    },
}

impl DependencyError {
    /// Name of the plugin whose load failed, if the error is plugin-scoped.
    pub fn plugin(&self) -> Option<&str> {
        match self {
            Self::Missing { plugin, .. }
            | Self::Incompatible { plugin, .. }
            | Self::NotRunning { plugin, .. }
            | Self::HostVersion { plugin, .. } => Some(plugin),
            Self::Cycle { .. } => None,
        }
    }

    /// Name of the offending dependency, if any.
    pub fn dependency(&self) -> Option<&str> {
        match self {
            Self::Missing { dependency, .. }
            | Self::Incompatible { dependency, .. }
            | Self::NotRunning { dependency, .. } => Some(dependency),
            Self::HostVersion { .. } | Self::Cycle { .. } => None,
        }
    }
}

/// Errors raised by the plugin runtime.
#[derive(Debug, Clone, Error)]
pub enum PluginError {
    /// A manifest or deployment document could not be decoded.
    #[error("failed to parse {format} document '{source_name}': {message}")]
    Parse {
        /// File name or other label of the source.
        source_name: String,
        /// Decoder that was used.
        format: String,
        /// Decoder message.
        message: String,
    },

    /// The file extension does not select a known decoder.
    #[error("unsupported document format '{extension}' for '{path}'")]
    UnsupportedFormat {
        /// Offending path.
        path: String,
        /// Extension found (may be empty).
        extension: String,
    },

    /// A decoded document is semantically invalid. Lists every violation.
    #[error("validation failed for '{subject}': {}", violations.join("; "))]
    Validation {
        /// Manifest or config entry name.
        subject: String,
        /// One entry per violated field, `path: reason`.
        violations: Vec<String>,
    },

    /// Dependency resolution failed.
    #[error(transparent)]
    Dependency(#[from] DependencyError),

    /// A capability was requested but not granted.
    #[error("plugin '{plugin}' was denied capability '{capability}'")]
    PermissionDenied {
        /// Requesting plugin.
        plugin: String,
        /// Requested capability.
        capability: String,
    },

    /// A lifecycle method was called out of order. No state was changed.
    #[error("plugin '{plugin}' cannot {action} while {state}")]
    InvalidStateTransition {
        /// Plugin name.
        plugin: String,
        /// Current state.
        state: PluginState,
        /// Lifecycle method that was refused.
        action: &'static str,
    },

    /// The loader could not produce the plugin object.
    #[error("plugin '{plugin}' failed to load: {cause}")]
    Load {
        /// Plugin name.
        plugin: String,
        /// Loader message.
        cause: String,
    },

    /// The plugin's `init` callback failed.
    #[error("plugin '{plugin}' failed to initialize: {cause}")]
    Initialization {
        /// Plugin name.
        plugin: String,
        /// Plugin-reported cause.
        cause: String,
    },

    /// The plugin's `start` callback failed.
    #[error("plugin '{plugin}' failed to start: {cause}")]
    Start {
        /// Plugin name.
        plugin: String,
        /// Plugin-reported cause.
        cause: String,
    },

    /// The plugin's `stop` callback failed. The instance is still stopped.
    #[error("plugin '{plugin}' reported an error while stopping: {cause}")]
    Stop {
        /// Plugin name.
        plugin: String,
        /// Plugin-reported cause.
        cause: String,
    },

    /// A hook handler exceeded its per-invocation timeout.
    #[error("plugin '{plugin}' timed out on hook '{hook}' after {timeout_ms}ms")]
    HookTimeout {
        /// Plugin name.
        plugin: String,
        /// Hook type.
        hook: String,
        /// Timeout that was exceeded.
        timeout_ms: u64,
    },

    /// A hook handler returned an error.
    #[error("plugin '{plugin}' failed on hook '{hook}': {cause}")]
    HookExecution {
        /// Plugin name.
        plugin: String,
        /// Hook type.
        hook: String,
        /// Handler-reported cause.
        cause: String,
    },

    /// A short-circuiting hook was halted by a handler.
    #[error("hook '{hook}' halted by plugin '{plugin}': {reason}")]
    HookHalted {
        /// Plugin that halted.
        plugin: String,
        /// Hook type.
        hook: String,
        /// Reason supplied by the handler.
        reason: String,
    },

    /// A reload candidate failed; the running instance was left untouched.
    #[error("reload of plugin '{plugin}' rolled back during {phase}: {cause}")]
    ReloadFailure {
        /// Plugin name.
        plugin: String,
        /// Phase in which the candidate failed.
        phase: PluginPhase,
        /// Underlying cause.
        cause: String,
    },

    /// The consecutive-error threshold was crossed and the plugin was disabled.
    #[error(
        "plugin '{plugin}' auto-disabled after {consecutive_errors} consecutive errors (threshold {threshold}): {cause}"
    )]
    HealthDegraded {
        /// Plugin name.
        plugin: String,
        /// Consecutive error count at the time of disabling.
        consecutive_errors: u32,
        /// Configured threshold.
        threshold: u32,
        /// Last error observed.
        cause: String,
    },

    /// A host service was granted but the host did not provide it.
    #[error("plugin '{plugin}' requested '{service}', which the host does not provide")]
    ServiceUnavailable {
        /// Plugin name.
        plugin: String,
        /// Service name.
        service: String,
    },

    /// An event could not be published or delivered.
    #[error("plugin '{plugin}' event '{event}' rejected: {reason}")]
    EventRejected {
        /// Plugin name.
        plugin: String,
        /// Event type.
        event: String,
        /// Reason.
        reason: String,
    },

    /// The named plugin is not known to the manager.
    #[error("plugin '{plugin}' not found")]
    NotFound {
        /// Plugin name.
        plugin: String,
    },

    /// The plugin is disabled and the operation requires it enabled.
    #[error("plugin '{plugin}' is disabled: {reason}")]
    Disabled {
        /// Plugin name.
        plugin: String,
        /// Why it is disabled.
        reason: String,
    },

    /// Reading a manifest or configuration file failed.
    #[error("I/O error on '{path}': {message}")]
    Io {
        /// Path involved.
        path: String,
        /// OS message.
        message: String,
    },
}

impl PluginError {
    /// Plugin the error is about, when there is one.
    pub fn plugin(&self) -> Option<&str> {
        match self {
            Self::Dependency(err) => err.plugin(),
            Self::PermissionDenied { plugin, .. }
            | Self::InvalidStateTransition { plugin, .. }
            | Self::Load { plugin, .. }
            | Self::Initialization { plugin, .. }
            | Self::Start { plugin, .. }
            | Self::Stop { plugin, .. }
            | Self::HookTimeout { plugin, .. }
            | Self::HookExecution { plugin, .. }
            | Self::HookHalted { plugin, .. }
            | Self::ReloadFailure { plugin, .. }
            | Self::HealthDegraded { plugin, .. }
            | Self::ServiceUnavailable { plugin, .. }
            | Self::EventRejected { plugin, .. }
            | Self::NotFound { plugin }
            | Self::Disabled { plugin, .. } => Some(plugin),
            Self::Validation { subject, .. } => Some(subject),
            Self::Parse { .. } | Self::UnsupportedFormat { .. } | Self::Io { .. } => None,
        }
    }

    /// Phase in which the error was raised.
    pub fn phase(&self) -> PluginPhase {
        match self {
            Self::Parse { .. } | Self::UnsupportedFormat { .. } | Self::Io { .. } => {
                PluginPhase::Parse
            }
            Self::Validation { .. } => PluginPhase::Validate,
            Self::Dependency(_) | Self::NotFound { .. } | Self::Disabled { .. } => {
                PluginPhase::Resolve
            }
            Self::PermissionDenied { .. } | Self::ServiceUnavailable { .. } => PluginPhase::Service,
            Self::InvalidStateTransition { .. } | Self::Load { .. } => PluginPhase::Load,
            Self::Initialization { .. } => PluginPhase::Initialize,
            Self::Start { .. } => PluginPhase::Start,
            Self::Stop { .. } => PluginPhase::Stop,
            Self::HookTimeout { .. } | Self::HookExecution { .. } | Self::HookHalted { .. } => {
                PluginPhase::Hook
            }
            Self::ReloadFailure { phase, .. } => *phase,
            Self::HealthDegraded { .. } => PluginPhase::Hook,
            Self::EventRejected { .. } => PluginPhase::Event,
        }
    }

    /// Wraps any error as a reload failure for `plugin`.
    pub fn into_reload_failure(self, plugin: &str) -> Self {
        match self {
            Self::ReloadFailure { .. } => self,
            other => Self::ReloadFailure {
                plugin: plugin.to_string(),
                phase: other.phase(),
                cause: other.to_string(),
            },
        }
    }

    /// Builds an I/O error for `path`.
    pub fn io(path: &std::path::Path, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

/// Result alias for plugin runtime operations.
pub type PluginResult<T> = Result<T, PluginError>;

impl From<PluginError> for AppError {
    fn from(err: PluginError) -> Self {
        let kind = match &err {
            PluginError::Parse { .. } => ErrorKind::Serialization,
            PluginError::UnsupportedFormat { .. } | PluginError::Validation { .. } => {
                ErrorKind::Validation
            }
            PluginError::Dependency(_) => ErrorKind::Dependency,
            PluginError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            PluginError::InvalidStateTransition { .. } => ErrorKind::Conflict,
            PluginError::HookTimeout { .. } => ErrorKind::Timeout,
            PluginError::NotFound { .. } => ErrorKind::NotFound,
            PluginError::ServiceUnavailable { .. } | PluginError::Disabled { .. } => {
                ErrorKind::ServiceUnavailable
            }
            PluginError::Io { .. } => ErrorKind::Storage,
            _ => ErrorKind::Plugin,
        };
        AppError::with_source(kind, err.to_string(), err)
    }
}
