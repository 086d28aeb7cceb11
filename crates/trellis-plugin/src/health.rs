//! Per-plugin health accounting.
//!
//! The tracker outlives individual load attempts so the consecutive-error
//! count can drive auto-disable across retries.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lifecycle::PluginState;

/// Externally visible health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Running with no outstanding errors.
    Healthy,
    /// Running, but the last operations failed.
    Degraded,
    /// The last load attempt failed.
    Failed,
    /// Stopped or unloaded.
    Stopped,
    /// Never instantiated.
    NotLoaded,
    /// Disabled by an operator or by deployment configuration.
    ManuallyDisabled,
    /// Disabled by the error threshold; needs an explicit enable.
    AutoDisabled,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
            Self::NotLoaded => "not_loaded",
            Self::ManuallyDisabled => "manually_disabled",
            Self::AutoDisabled => "auto_disabled",
        };
        f.write_str(name)
    }
}

/// Most recent error observed for a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    /// Error message.
    pub message: String,
    /// When it was observed.
    pub at: DateTime<Utc>,
}

/// Thread-safe error counters for one plugin.
#[derive(Debug, Default)]
pub struct HealthTracker {
    consecutive_errors: AtomicU32,
    total_errors: AtomicU64,
    last_error: Mutex<Option<LastError>>,
}

impl HealthTracker {
    /// Creates a clean tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure and returns the new consecutive count.
    pub fn record_failure(&self, message: &str) -> u32 {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(LastError {
                message: message.to_string(),
                at: Utc::now(),
            });
        }
        self.consecutive_errors.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Clears the consecutive count after a success.
    pub fn record_success(&self) {
        self.consecutive_errors.store(0, Ordering::Release);
    }

    /// Clears the consecutive count and the last error.
    pub fn reset(&self) {
        self.consecutive_errors.store(0, Ordering::Release);
        if let Ok(mut last) = self.last_error.lock() {
            *last = None;
        }
    }

    /// Current consecutive error count.
    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors.load(Ordering::Acquire)
    }

    /// Total errors since the tracker was created.
    pub fn total_errors(&self) -> u64 {
        self.total_errors.load(Ordering::Relaxed)
    }

    /// Last recorded error, if any.
    pub fn last_error(&self) -> Option<LastError> {
        self.last_error.lock().ok().and_then(|last| last.clone())
    }
}

/// Point-in-time health of one plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Plugin name.
    pub plugin: String,
    /// Version of the current instance, if any.
    pub version: Option<String>,
    /// Derived status.
    pub status: HealthStatus,
    /// Lifecycle state of the latest instance.
    pub state: PluginState,
    /// Consecutive errors.
    pub consecutive_errors: u32,
    /// Total errors.
    pub total_errors: u64,
    /// Most recent error.
    pub last_error: Option<LastError>,
}

impl HealthSnapshot {
    /// Whether the plugin is serving hooks.
    pub fn is_up(&self) -> bool {
        matches!(self.status, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}
