//! Prelude for convenient imports when writing plugins.

pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;

pub use crate::api::context::PluginContext;
pub use crate::error::{PluginError, PluginResult};
pub use crate::events::Event;
pub use crate::hooks::definitions::{HookAction, HookPayload, HookPoint, HookResult};
pub use crate::hooks::registry::HookHandler;
pub use crate::loader::{PluginLoader, StaticLoader};
pub use crate::manifest::model::Manifest;
pub use crate::permissions::Capability;
pub use crate::traits::{ClosureHandler, Plugin};
