//! # trellis-plugin
//!
//! Plugin runtime for Trellis. Provides:
//!
//! - Manifests in YAML, JSON, or TOML decoded into one canonical model,
//!   with aggregated validation
//! - Default-deny capability checks with an audit trail of denials
//! - A copy-on-write hook registry with per-hook timeouts and
//!   continue/abort policies
//! - A lifecycle state machine per plugin instance
//! - Per-plugin metrics and health, exportable as text exposition
//! - Hot reload with drain and rollback
//! - An inter-plugin event bus

pub mod api;
pub mod dependency;
pub mod deployment;
pub mod error;
pub mod events;
pub mod factory;
pub mod health;
pub mod hooks;
pub mod instance;
pub mod lifecycle;
pub mod loader;
pub mod manager;
pub mod manifest;
pub mod metrics;
pub mod permissions;
pub mod prelude;
pub mod registry;
pub mod reload;
pub mod traits;

pub use api::context::PluginContext;
pub use deployment::{DeploymentConfig, PluginConfig};
pub use error::{DependencyError, PluginError, PluginPhase, PluginResult};
pub use health::{HealthSnapshot, HealthStatus};
pub use hooks::definitions::{HookAction, HookPayload, HookPoint, HookResult};
pub use hooks::dispatcher::{DispatchResult, HookDispatcher};
pub use hooks::registry::HookRegistry;
pub use lifecycle::PluginState;
pub use manager::{BatchReport, LoadOutcome, PluginManager};
pub use manifest::{Manifest, ManifestFormat};
pub use registry::PluginInfo;
pub use reload::ReloadOutcome;
