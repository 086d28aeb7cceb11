//! Cache trait exposed to plugins.

use std::time::Duration;

use async_trait::async_trait;

use crate::result::AppResult;

/// String-valued cache with TTLs.
///
/// Values are serialized as strings (usually JSON). Key namespacing per
/// plugin is the implementation's responsibility.
#[async_trait]
pub trait CacheService: Send + Sync + std::fmt::Debug + 'static {
    /// Get a value by key. Returns `None` if the key does not exist or has expired.
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    /// Set a value with a TTL.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()>;

    /// Delete a key from the cache.
    async fn delete(&self, key: &str) -> AppResult<()>;
}
