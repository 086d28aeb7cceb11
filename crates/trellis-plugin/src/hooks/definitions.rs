//! Hook points, payloads, and handler results.

use std::borrow::Cow;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Named extension point in the host's processing pipeline.
///
/// Hook types are open-ended strings declared by manifests; the host's
/// well-known points are available as constants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HookPoint(Cow<'static, str>);

impl HookPoint {
    /// Fired once the runtime has started all plugins.
    pub const ON_STARTUP: HookPoint = HookPoint(Cow::Borrowed("on_startup"));
    /// Fired before the runtime shuts down.
    pub const ON_SHUTDOWN: HookPoint = HookPoint(Cow::Borrowed("on_shutdown"));
    /// Fired before a request is handled. Can modify or halt.
    pub const BEFORE_REQUEST: HookPoint = HookPoint(Cow::Borrowed("before_request"));
    /// Fired after a request is handled.
    pub const AFTER_REQUEST: HookPoint = HookPoint(Cow::Borrowed("after_request"));
    /// Fired before a response is written. Can modify or halt.
    pub const BEFORE_RESPONSE: HookPoint = HookPoint(Cow::Borrowed("before_response"));
    /// Fired when the host configuration changes.
    pub const ON_CONFIG_CHANGE: HookPoint = HookPoint(Cow::Borrowed("on_config_change"));

    /// Hook point with an arbitrary name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// Returns the string name of this hook point.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns whether this is a "before" hook that defaults to short-circuiting.
    pub fn is_before_hook(&self) -> bool {
        self.0.starts_with("before_")
    }
}

impl std::fmt::Display for HookPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HookPoint {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for HookPoint {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}

/// Payload passed to hook handlers: a flexible key-value map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookPayload {
    /// The hook point being fired.
    pub hook: HookPoint,
    /// Arbitrary data keyed by string.
    pub data: HashMap<String, serde_json::Value>,
    /// Correlates the handler invocations of one dispatch.
    pub correlation_id: Uuid,
    /// Timestamp of the event.
    pub timestamp: DateTime<Utc>,
}

impl HookPayload {
    /// Creates a new hook payload.
    pub fn new(hook: impl Into<HookPoint>) -> Self {
        Self {
            hook: hook.into(),
            data: HashMap::new(),
            correlation_id: Uuid::now_v7(),
            timestamp: Utc::now(),
        }
    }

    /// Inserts a typed data value.
    pub fn with_data(mut self, key: &str, value: serde_json::Value) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }

    /// Inserts a string value.
    pub fn with_string(self, key: &str, value: &str) -> Self {
        self.with_data(key, serde_json::json!(value))
    }

    /// Inserts an integer value.
    pub fn with_int(self, key: &str, value: i64) -> Self {
        self.with_data(key, serde_json::json!(value))
    }

    /// Inserts a boolean value.
    pub fn with_bool(self, key: &str, value: bool) -> Self {
        self.with_data(key, serde_json::json!(value))
    }

    /// Gets a data value by key.
    pub fn get_data(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    /// Gets a string data value.
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    /// Gets an i64 data value.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.data.get(key).and_then(|v| v.as_i64())
    }

    /// Gets a bool data value.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.data.get(key).and_then(|v| v.as_bool())
    }
}

/// Action returned by a hook handler telling the dispatcher what to do next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HookAction {
    /// Continue to the next handler.
    Continue,
    /// Continue, merging these values into the payload seen by later handlers.
    ContinueWith(HashMap<String, serde_json::Value>),
    /// Stop the pipeline. Honored only by short-circuiting hook types.
    Halt {
        /// Reason for halting.
        reason: String,
    },
}

/// Result returned from a hook handler invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookResult {
    /// The action the handler wants the dispatcher to take.
    pub action: HookAction,
    /// Optional output data from the handler.
    pub output: Option<serde_json::Value>,
}

impl HookResult {
    /// Creates a continue result.
    pub fn continue_execution() -> Self {
        Self {
            action: HookAction::Continue,
            output: None,
        }
    }

    /// Creates a continue-with-modification result.
    pub fn continue_with(modifications: HashMap<String, serde_json::Value>) -> Self {
        Self {
            action: HookAction::ContinueWith(modifications),
            output: None,
        }
    }

    /// Creates a halt result.
    pub fn halt(reason: &str) -> Self {
        Self {
            action: HookAction::Halt {
                reason: reason.to_string(),
            },
            output: None,
        }
    }

    /// Creates a continue result with output data.
    pub fn continue_with_output(output: serde_json::Value) -> Self {
        Self {
            action: HookAction::Continue,
            output: Some(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_and_dynamic_points_compare_equal() {
        assert_eq!(HookPoint::BEFORE_REQUEST, HookPoint::new("before_request"));
        assert!(HookPoint::BEFORE_REQUEST.is_before_hook());
        assert!(!HookPoint::AFTER_REQUEST.is_before_hook());
    }

    #[test]
    fn test_payload_accessors() {
        let payload = HookPayload::new("after_request")
            .with_string("path", "/health")
            .with_int("status", 200)
            .with_bool("cached", false);
        assert_eq!(payload.get_string("path"), Some("/health"));
        assert_eq!(payload.get_i64("status"), Some(200));
        assert_eq!(payload.get_bool("cached"), Some(false));
        assert!(payload.get_data("missing").is_none());
    }
}
