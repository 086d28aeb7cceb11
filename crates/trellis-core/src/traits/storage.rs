//! Key-value storage trait exposed to plugins.

use async_trait::async_trait;
use serde_json::Value;

use crate::result::AppResult;

/// Durable key-value storage handle.
#[async_trait]
pub trait StorageService: Send + Sync + std::fmt::Debug + 'static {
    /// Read a value. Returns `None` if the key is absent.
    async fn get(&self, key: &str) -> AppResult<Option<Value>>;

    /// Insert or replace a value.
    async fn put(&self, key: &str, value: Value) -> AppResult<()>;

    /// Delete a value. Returns whether it existed.
    async fn delete(&self, key: &str) -> AppResult<bool>;

    /// List keys starting with `prefix`.
    async fn list_keys(&self, prefix: &str) -> AppResult<Vec<String>>;
}
