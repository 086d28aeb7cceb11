//! # trellis-core
//!
//! Core crate for the Trellis plugin runtime. Contains the unified error
//! type, runtime configuration schemas, and the host-service traits that
//! plugins reach through the permission-gated plugin context.
//!
//! This crate has **no** internal dependencies on other Trellis crates.

pub mod config;
pub mod error;
pub mod result;
pub mod traits;

pub use error::AppError;
pub use result::AppResult;
