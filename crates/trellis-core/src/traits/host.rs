//! Remaining host facilities: configuration, filesystem, network, processes.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::result::AppResult;

/// Read-only view of host configuration.
#[async_trait]
pub trait ConfigReader: Send + Sync + std::fmt::Debug + 'static {
    /// Look up a dotted configuration key.
    async fn get(&self, key: &str) -> AppResult<Option<Value>>;
}

/// Scoped filesystem access.
#[async_trait]
pub trait FilesystemAccess: Send + Sync + std::fmt::Debug + 'static {
    /// Read a whole file.
    async fn read(&self, path: &Path) -> AppResult<Vec<u8>>;

    /// Write a whole file, replacing existing content.
    async fn write(&self, path: &Path, contents: &[u8]) -> AppResult<()>;
}

/// Outbound network client.
#[async_trait]
pub trait NetworkClient: Send + Sync + std::fmt::Debug + 'static {
    /// Perform a request and return the status code and body.
    async fn request(
        &self,
        method: &str,
        url: &str,
        body: Option<Vec<u8>>,
    ) -> AppResult<(u16, Vec<u8>)>;
}

/// Captured result of a child process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOutput {
    /// Exit code, `None` when killed by a signal.
    pub status: Option<i32>,
    /// Captured standard output.
    pub stdout: Vec<u8>,
    /// Captured standard error.
    pub stderr: Vec<u8>,
}

/// Child-process execution facility.
#[async_trait]
pub trait ProcessExecutor: Send + Sync + std::fmt::Debug + 'static {
    /// Run `program` with `args`, killing it after `timeout`.
    async fn run(&self, program: &str, args: &[String], timeout: Duration)
    -> AppResult<ProcessOutput>;
}
