//! Hook system: hook points, the copy-on-write registry, and dispatch.

pub mod definitions;
pub mod dispatcher;
pub mod registry;

pub use definitions::{HookAction, HookPayload, HookPoint, HookResult};
pub use dispatcher::{DispatchResult, HookDispatcher};
pub use registry::{HandlerRef, HookHandler, HookPolicy, HookRegistration, HookRegistry, HookSequence};
