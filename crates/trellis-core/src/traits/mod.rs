//! Host-service traits implemented by the embedding application.
//!
//! The plugin runtime never implements these itself; it hands plugins a
//! permission-checked handle to whatever implementation the host supplies.

pub mod cache;
pub mod host;
pub mod routing;
pub mod storage;

pub use cache::CacheService;
pub use host::{ConfigReader, FilesystemAccess, NetworkClient, ProcessExecutor, ProcessOutput};
pub use routing::{RouteRegistrar, RouteSpec};
pub use storage::StorageService;
