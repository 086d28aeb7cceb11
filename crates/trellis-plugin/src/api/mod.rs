//! Plugin-facing API: the service context and host service wrappers.

pub mod context;
pub mod services;

pub use context::{ContextParts, PluginContext};
pub use services::{HostServices, NamespacedCache, NamespacedStorage, PluginRoutes};
