//! Route registration trait exposed to plugins.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::result::AppResult;

/// A route a plugin asks the host to mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSpec {
    /// HTTP method, upper-case.
    pub method: String,
    /// Path pattern in the host router's syntax.
    pub path: String,
    /// Name of the plugin hook that serves the route.
    pub handler: String,
}

/// Registers plugin-provided routes with the host router.
#[async_trait]
pub trait RouteRegistrar: Send + Sync + std::fmt::Debug + 'static {
    /// Mount a route on behalf of `plugin`.
    async fn register(&self, plugin: &str, route: RouteSpec) -> AppResult<()>;

    /// Remove every route mounted by `plugin`.
    async fn unregister_all(&self, plugin: &str) -> AppResult<()>;
}
