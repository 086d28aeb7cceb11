//! Hook dispatcher: runs a hook type's handlers in priority order.
//!
//! Handlers run sequentially against a snapshot of the registry. Each
//! invocation gets its own timeout and cancellation token. What happens
//! after a failure depends on the hook's policy:
//!
//! - `continue`: the failure is recorded against the plugin and the next
//!   handler runs. `Halt` results are ignored with a warning.
//! - `abort`: the first failure or `Halt` stops the pipeline.
//!
//! `ContinueWith` modifications are merged into the payload seen by later
//! handlers and returned to the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{PluginError, PluginResult};
use crate::metrics::HookOutcome;

use super::definitions::{HookAction, HookPayload, HookPoint, HookResult};
use super::registry::{HandlerRef, HookHandler, HookRegistration, HookRegistry};
use crate::instance::InvocationGuard;

/// Aggregated result of dispatching a hook to all handlers.
#[derive(Debug, Clone, Default)]
pub struct DispatchResult {
    /// Whether execution was halted by a handler.
    pub halted: bool,
    /// Halt reason (if halted).
    pub halt_reason: Option<String>,
    /// Plugin that halted (if halted).
    pub halted_by: Option<String>,
    /// Failure that aborted a short-circuiting hook.
    pub aborted: Option<PluginError>,
    /// Every handler failure, in execution order.
    pub errors: Vec<PluginError>,
    /// Successful handler results with their plugin, in execution order.
    pub results: Vec<(String, HookResult)>,
    /// Merged modifications from `ContinueWith` results.
    pub modifications: HashMap<String, serde_json::Value>,
    /// Plugins whose consecutive-error count crossed the threshold here.
    pub degraded: Vec<String>,
}

impl DispatchResult {
    /// Whether the pipeline ran to completion.
    pub fn completed(&self) -> bool {
        !self.halted && self.aborted.is_none()
    }

    /// Converts a halt into `HookHalted` and an abort into the error that
    /// caused it.
    pub fn into_result(self, hook: &HookPoint) -> PluginResult<Self> {
        if self.halted {
            return Err(PluginError::HookHalted {
                plugin: self.halted_by.unwrap_or_default(),
                hook: hook.to_string(),
                reason: self
                    .halt_reason
                    .unwrap_or_else(|| "Hook halted execution".to_string()),
            });
        }
        match self.aborted {
            Some(error) => Err(error),
            None => Ok(self),
        }
    }
}

/// Dispatches hooks to all registered handlers.
#[derive(Debug)]
pub struct HookDispatcher {
    /// Hook registry.
    registry: Arc<HookRegistry>,
    /// Consecutive errors tolerated before a plugin is reported degraded.
    error_threshold: u32,
}

impl HookDispatcher {
    /// Creates a new hook dispatcher.
    pub fn new(registry: Arc<HookRegistry>, error_threshold: u32) -> Self {
        Self {
            registry,
            error_threshold,
        }
    }

    /// Dispatches a hook to all registered, enabled handlers.
    pub async fn dispatch(&self, payload: &HookPayload) -> DispatchResult {
        let sequence = self.registry.sequence_for(&payload.hook);
        let mut outcome = DispatchResult::default();

        if sequence.is_empty() {
            return outcome;
        }

        let policy = self.registry.policy_for(&payload.hook);
        debug!(
            hook = %payload.hook,
            handler_count = sequence.len(),
            mode = ?policy.mode,
            "Dispatching hook"
        );

        let mut working = payload.clone();

        for registration in sequence.iter().filter(|r| r.enabled) {
            let Some((handler, guard)) = resolve(registration) else {
                continue;
            };

            let cancel = CancellationToken::new();
            let started = Instant::now();
            let result =
                tokio::time::timeout(policy.timeout, handler.handle(&working, cancel.clone()))
                    .await;
            let elapsed = started.elapsed();

            let failure = match result {
                Ok(Ok(result)) => {
                    if let Some(guard) = &guard {
                        guard
                            .metrics()
                            .record_hook(&payload.hook, elapsed, HookOutcome::Completed);
                        guard.health().record_success();
                    }
                    let halt_reason = match &result.action {
                        HookAction::Continue => None,
                        HookAction::ContinueWith(mods) => {
                            debug!(
                                hook = %payload.hook,
                                plugin = %registration.plugin,
                                modifications = mods.len(),
                                "Handler returned ContinueWith"
                            );
                            working.data.extend(mods.clone());
                            outcome.modifications.extend(mods.clone());
                            None
                        }
                        HookAction::Halt { reason } => Some(reason.clone()),
                    };
                    outcome.results.push((registration.plugin.clone(), result));

                    if let Some(reason) = halt_reason {
                        if policy.is_short_circuit() {
                            info!(
                                hook = %payload.hook,
                                plugin = %registration.plugin,
                                reason = %reason,
                                "Handler halted execution"
                            );
                            outcome.halted = true;
                            outcome.halt_reason = Some(reason);
                            outcome.halted_by = Some(registration.plugin.clone());
                            break;
                        }
                        warn!(
                            hook = %payload.hook,
                            plugin = %registration.plugin,
                            "Handler returned Halt for a non-short-circuiting hook, ignoring"
                        );
                    }
                    None
                }
                Ok(Err(cause)) => {
                    if let Some(guard) = &guard {
                        guard
                            .metrics()
                            .record_hook(&payload.hook, elapsed, HookOutcome::Failed);
                    }
                    Some(PluginError::HookExecution {
                        plugin: registration.plugin.clone(),
                        hook: payload.hook.to_string(),
                        cause,
                    })
                }
                Err(_) => {
                    cancel.cancel();
                    if let Some(guard) = &guard {
                        guard
                            .metrics()
                            .record_hook(&payload.hook, elapsed, HookOutcome::TimedOut);
                    }
                    Some(PluginError::HookTimeout {
                        plugin: registration.plugin.clone(),
                        hook: payload.hook.to_string(),
                        timeout_ms: policy.timeout.as_millis() as u64,
                    })
                }
            };

            let Some(error) = failure else {
                continue;
            };

            warn!(
                hook = %payload.hook,
                plugin = %registration.plugin,
                error = %error,
                "Hook handler failed"
            );

            if let Some(guard) = &guard {
                let message = error.to_string();
                guard.metrics().record_error(&message);
                let consecutive = guard.health().record_failure(&message);
                if consecutive > self.error_threshold
                    && !outcome.degraded.contains(&registration.plugin)
                {
                    outcome.degraded.push(registration.plugin.clone());
                }
            }

            outcome.errors.push(error.clone());
            if policy.is_short_circuit() {
                outcome.aborted = Some(error);
                break;
            }
        }

        outcome
    }

    /// Fires a hook and returns an error if it was halted or aborted.
    pub async fn fire_or_halt(&self, payload: &HookPayload) -> PluginResult<DispatchResult> {
        self.dispatch(payload).await.into_result(&payload.hook)
    }

    /// Returns a reference to the hook registry.
    pub fn registry(&self) -> &Arc<HookRegistry> {
        &self.registry
    }
}

/// Resolves the handler to invoke and, for managed plugins, pins the
/// instance serving it for the duration of the call.
fn resolve(
    registration: &HookRegistration,
) -> Option<(Arc<dyn HookHandler>, Option<InvocationGuard>)> {
    match &registration.handler {
        HandlerRef::Direct(handler) => Some((handler.clone(), None)),
        HandlerRef::Instance(slot) => {
            let guard = slot.enter()?;
            let handler = guard.handler(&registration.hook)?;
            Some((handler, Some(guard)))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::traits::ClosureHandler;

    fn recorder(
        log: &Arc<Mutex<Vec<String>>>,
        name: &'static str,
        result: HookResult,
    ) -> Arc<dyn HookHandler> {
        let log = log.clone();
        ClosureHandler::shared(name, move |_, _| {
            let log = log.clone();
            let result = result.clone();
            async move {
                log.lock().unwrap().push(name.to_string());
                Ok(result)
            }
        })
    }

    fn failing(name: &'static str) -> Arc<dyn HookHandler> {
        ClosureHandler::shared(name, |_, _| async { Err("boom".to_string()) })
    }

    fn sleeper(name: &'static str, cancelled: Arc<Mutex<bool>>) -> Arc<dyn HookHandler> {
        ClosureHandler::shared(name, move |_, cancel: CancellationToken| {
            let cancelled = cancelled.clone();
            async move {
                let watcher = cancel.clone();
                tokio::spawn(async move {
                    watcher.cancelled().await;
                    *cancelled.lock().unwrap() = true;
                });
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(HookResult::continue_execution())
            }
        })
    }

    fn setup(timeout: Duration) -> (Arc<HookRegistry>, HookDispatcher) {
        let registry = Arc::new(HookRegistry::new(timeout));
        let dispatcher = HookDispatcher::new(registry.clone(), 3);
        (registry, dispatcher)
    }

    #[tokio::test]
    async fn test_runs_in_priority_order() {
        let (registry, dispatcher) = setup(Duration::from_secs(1));
        let log = Arc::new(Mutex::new(Vec::new()));
        let hook = HookPoint::AFTER_REQUEST;

        registry.register(HookRegistration::direct("b", hook.clone(), 100, (1, 0),
            recorder(&log, "b", HookResult::continue_execution())));
        registry.register(HookRegistration::direct("a", hook.clone(), 200, (0, 0),
            recorder(&log, "a", HookResult::continue_execution())));

        let result = dispatcher.dispatch(&HookPayload::new(hook)).await;
        assert!(result.completed());
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_continue_mode_isolates_failures() {
        let (registry, dispatcher) = setup(Duration::from_secs(1));
        let log = Arc::new(Mutex::new(Vec::new()));
        let hook = HookPoint::AFTER_REQUEST;

        registry.register(HookRegistration::direct("bad", hook.clone(), 200, (0, 0), failing("bad")));
        registry.register(HookRegistration::direct("good", hook.clone(), 100, (1, 0),
            recorder(&log, "good", HookResult::continue_execution())));

        let result = dispatcher.dispatch(&HookPayload::new(hook)).await;
        assert!(result.completed());
        assert_eq!(result.errors.len(), 1);
        assert!(matches!(result.errors[0], PluginError::HookExecution { .. }));
        assert_eq!(*log.lock().unwrap(), vec!["good"]);
    }

    #[tokio::test]
    async fn test_abort_mode_stops_on_first_error() {
        let (registry, dispatcher) = setup(Duration::from_secs(1));
        let log = Arc::new(Mutex::new(Vec::new()));
        let hook = HookPoint::BEFORE_REQUEST;

        registry.register(HookRegistration::direct("bad", hook.clone(), 200, (0, 0), failing("bad")));
        registry.register(HookRegistration::direct("good", hook.clone(), 100, (1, 0),
            recorder(&log, "good", HookResult::continue_execution())));

        let err = dispatcher.fire_or_halt(&HookPayload::new(hook)).await.unwrap_err();
        assert!(matches!(err, PluginError::HookExecution { ref plugin, .. } if plugin == "bad"));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_cancels_and_continues() {
        let (registry, dispatcher) = setup(Duration::from_millis(20));
        let log = Arc::new(Mutex::new(Vec::new()));
        let cancelled = Arc::new(Mutex::new(false));
        let hook = HookPoint::AFTER_REQUEST;

        registry.register(HookRegistration::direct("slow", hook.clone(), 200, (0, 0),
            sleeper("slow", cancelled.clone())));
        registry.register(HookRegistration::direct("fast", hook.clone(), 100, (1, 0),
            recorder(&log, "fast", HookResult::continue_execution())));

        let result = dispatcher.dispatch(&HookPayload::new(hook)).await;
        assert!(matches!(result.errors[0], PluginError::HookTimeout { timeout_ms: 20, .. }));
        assert_eq!(*log.lock().unwrap(), vec!["fast"]);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(*cancelled.lock().unwrap());
    }

    #[tokio::test]
    async fn test_halt_honored_only_when_short_circuiting() {
        let (registry, dispatcher) = setup(Duration::from_secs(1));
        let log = Arc::new(Mutex::new(Vec::new()));

        for hook in [HookPoint::BEFORE_REQUEST, HookPoint::AFTER_REQUEST] {
            registry.register(HookRegistration::direct("guard", hook.clone(), 200, (0, 0),
                recorder(&log, "guard", HookResult::halt("blocked"))));
            registry.register(HookRegistration::direct("next", hook.clone(), 100, (1, 0),
                recorder(&log, "next", HookResult::continue_execution())));
        }

        let err = dispatcher
            .fire_or_halt(&HookPayload::new(HookPoint::BEFORE_REQUEST))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::HookHalted { ref reason, .. } if reason == "blocked"));
        assert_eq!(*log.lock().unwrap(), vec!["guard"]);

        log.lock().unwrap().clear();
        let result = dispatcher.dispatch(&HookPayload::new(HookPoint::AFTER_REQUEST)).await;
        assert!(!result.halted);
        assert_eq!(*log.lock().unwrap(), vec!["guard", "next"]);
    }

    #[tokio::test]
    async fn test_modifications_visible_to_later_handlers() {
        let (registry, dispatcher) = setup(Duration::from_secs(1));
        let hook = HookPoint::BEFORE_REQUEST;

        let mut mods = HashMap::new();
        mods.insert("tenant".to_string(), serde_json::json!("acme"));
        registry.register(HookRegistration::direct("tagger", hook.clone(), 200, (0, 0),
            ClosureHandler::shared("tagger", move |_, _| {
                let mods = mods.clone();
                async move { Ok(HookResult::continue_with(mods)) }
            })));
        registry.register(HookRegistration::direct("reader", hook.clone(), 100, (1, 0),
            ClosureHandler::shared("reader", |payload: HookPayload, _| async move {
                let tenant = payload.get_string("tenant").unwrap_or_default().to_string();
                Ok(HookResult::continue_with_output(serde_json::json!(tenant)))
            })));

        let result = dispatcher.fire_or_halt(&HookPayload::new(hook)).await.unwrap();
        assert_eq!(result.modifications["tenant"], serde_json::json!("acme"));
        assert_eq!(result.results[1].1.output, Some(serde_json::json!("acme")));
    }

    #[tokio::test]
    async fn test_disabled_registration_skipped() {
        let (registry, dispatcher) = setup(Duration::from_secs(1));
        let log = Arc::new(Mutex::new(Vec::new()));
        let hook = HookPoint::AFTER_REQUEST;
        registry.register(HookRegistration::direct("a", hook.clone(), 100, (0, 0),
            recorder(&log, "a", HookResult::continue_execution())));
        registry.set_enabled("a", false);

        let result = dispatcher.dispatch(&HookPayload::new(hook)).await;
        assert!(result.results.is_empty());
        assert!(log.lock().unwrap().is_empty());
    }
}
