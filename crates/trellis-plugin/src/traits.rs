//! Interfaces a plugin object implements, plus a closure-based handler.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::api::context::PluginContext;
use crate::events::Event;
use crate::hooks::definitions::{HookPayload, HookPoint, HookResult};
use crate::hooks::registry::HookHandler;

/// Trait that every plugin object implements.
///
/// The runtime drives these callbacks in order: `init`, `start`, `stop`,
/// `unload`. Errors are plain messages; the runtime attaches identity and
/// phase.
#[async_trait]
pub trait Plugin: Send + Sync + std::fmt::Debug {
    /// Called once with the permission-gated context.
    async fn init(&self, ctx: PluginContext) -> Result<(), String>;

    /// Called when the plugin should begin serving.
    async fn start(&self) -> Result<(), String>;

    /// Called when the plugin should stop serving.
    async fn stop(&self) -> Result<(), String>;

    /// Called before the plugin object is released.
    async fn unload(&self) -> Result<(), String> {
        Ok(())
    }

    /// Handlers for the hook types declared in the manifest.
    fn hook_handlers(&self) -> Vec<(HookPoint, Arc<dyn HookHandler>)>;

    /// Receives an event the manifest subscribes to.
    async fn on_event(&self, _event: &Event) -> Result<(), String> {
        Ok(())
    }
}

type HandlerFn = dyn Fn(HookPayload, CancellationToken) -> Pin<Box<dyn Future<Output = Result<HookResult, String>> + Send>>
    + Send
    + Sync;

/// A closure-based hook handler for quick handler creation.
pub struct ClosureHandler {
    /// Label used in logs.
    name: String,
    /// Handler function.
    handler: Arc<HandlerFn>,
}

impl std::fmt::Debug for ClosureHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClosureHandler")
            .field("name", &self.name)
            .field("handler", &"<closure>")
            .finish()
    }
}

impl ClosureHandler {
    /// Creates a new closure-based handler.
    pub fn new<F, Fut>(name: &str, handler: F) -> Self
    where
        F: Fn(HookPayload, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HookResult, String>> + Send + 'static,
    {
        Self {
            name: name.to_string(),
            handler: Arc::new(move |payload, cancel| Box::pin(handler(payload, cancel))),
        }
    }

    /// Wraps the handler for registration.
    pub fn shared<F, Fut>(name: &str, handler: F) -> Arc<dyn HookHandler>
    where
        F: Fn(HookPayload, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HookResult, String>> + Send + 'static,
    {
        Arc::new(Self::new(name, handler))
    }
}

#[async_trait]
impl HookHandler for ClosureHandler {
    async fn handle(
        &self,
        payload: &HookPayload,
        cancel: CancellationToken,
    ) -> Result<HookResult, String> {
        (self.handler)(payload.clone(), cancel).await
    }
}
