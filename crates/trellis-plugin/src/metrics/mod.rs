//! Per-plugin metrics collection.
//!
//! Counters are atomics so concurrent hook invocations record without
//! lost updates. Per-hook statistics live in a sharded map so unrelated
//! hooks and plugins never contend on one lock.

pub mod exposition;

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::health::LastError;
use crate::hooks::definitions::HookPoint;

pub use exposition::render_text;

/// How a single hook invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// Handler returned a result.
    Completed,
    /// Handler returned an error.
    Failed,
    /// Handler exceeded its timeout.
    TimedOut,
}

/// Counters for one hook type.
#[derive(Debug, Default)]
pub struct HookStats {
    executions: AtomicU64,
    errors: AtomicU64,
    timeouts: AtomicU64,
    total_micros: AtomicU64,
}

impl HookStats {
    fn record(&self, elapsed: Duration, outcome: HookOutcome) {
        self.executions.fetch_add(1, Ordering::Relaxed);
        self.total_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        match outcome {
            HookOutcome::Completed => {}
            HookOutcome::Failed => {
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
            HookOutcome::TimedOut => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                self.timeouts.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn snapshot(&self) -> HookStatsSnapshot {
        let executions = self.executions.load(Ordering::Relaxed);
        let total_micros = self.total_micros.load(Ordering::Relaxed);
        HookStatsSnapshot {
            executions,
            errors: self.errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            total_duration_us: total_micros,
            average_duration_us: if executions == 0 {
                0
            } else {
                total_micros / executions
            },
        }
    }
}

/// Metrics collector for one plugin instance.
#[derive(Debug)]
pub struct PluginMetrics {
    plugin: String,
    version: String,
    load_micros: AtomicU64,
    init_micros: AtomicU64,
    start_micros: AtomicU64,
    stop_micros: AtomicU64,
    events_published: AtomicU64,
    events_received: AtomicU64,
    service_calls: AtomicU64,
    hooks: DashMap<HookPoint, HookStats>,
    last_error: Mutex<Option<LastError>>,
}

impl PluginMetrics {
    /// Creates an empty collector.
    pub fn new(plugin: &str, version: &str) -> Self {
        Self {
            plugin: plugin.to_string(),
            version: version.to_string(),
            load_micros: AtomicU64::new(0),
            init_micros: AtomicU64::new(0),
            start_micros: AtomicU64::new(0),
            stop_micros: AtomicU64::new(0),
            events_published: AtomicU64::new(0),
            events_received: AtomicU64::new(0),
            service_calls: AtomicU64::new(0),
            hooks: DashMap::new(),
            last_error: Mutex::new(None),
        }
    }

    /// Records the duration of the load step.
    pub fn record_load(&self, elapsed: Duration) {
        self.load_micros
            .store(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    /// Records the duration of `init`.
    pub fn record_init(&self, elapsed: Duration) {
        self.init_micros
            .store(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    /// Records the duration of `start`.
    pub fn record_start(&self, elapsed: Duration) {
        self.start_micros
            .store(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    /// Records the duration of `stop`.
    pub fn record_stop(&self, elapsed: Duration) {
        self.stop_micros
            .store(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    /// Records one hook invocation.
    pub fn record_hook(&self, hook: &HookPoint, elapsed: Duration, outcome: HookOutcome) {
        if let Some(stats) = self.hooks.get(hook) {
            stats.record(elapsed, outcome);
            return;
        }
        self.hooks
            .entry(hook.clone())
            .or_default()
            .record(elapsed, outcome);
    }

    /// Records a published event.
    pub fn record_event_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a delivered event.
    pub fn record_event_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a granted host-service access.
    pub fn record_service_call(&self) {
        self.service_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Replaces the rolling last error.
    pub fn record_error(&self, message: &str) {
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(LastError {
                message: message.to_string(),
                at: Utc::now(),
            });
        }
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let hooks = self
            .hooks
            .iter()
            .map(|entry| (entry.key().to_string(), entry.value().snapshot()))
            .collect();

        MetricsSnapshot {
            plugin: self.plugin.clone(),
            version: self.version.clone(),
            load_duration_us: self.load_micros.load(Ordering::Relaxed),
            init_duration_us: self.init_micros.load(Ordering::Relaxed),
            start_duration_us: self.start_micros.load(Ordering::Relaxed),
            stop_duration_us: self.stop_micros.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            events_received: self.events_received.load(Ordering::Relaxed),
            service_calls: self.service_calls.load(Ordering::Relaxed),
            hooks,
            last_error: self.last_error.lock().ok().and_then(|last| last.clone()),
        }
    }
}

/// Snapshot of one hook type's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookStatsSnapshot {
    /// Invocations, successful or not.
    pub executions: u64,
    /// Failed or timed-out invocations.
    pub errors: u64,
    /// Timed-out invocations.
    pub timeouts: u64,
    /// Cumulative duration in microseconds.
    pub total_duration_us: u64,
    /// `total_duration_us / executions`.
    pub average_duration_us: u64,
}

/// A point-in-time snapshot of one plugin's metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Plugin name.
    pub plugin: String,
    /// Plugin version.
    pub version: String,
    /// Load step duration.
    pub load_duration_us: u64,
    /// `init` duration.
    pub init_duration_us: u64,
    /// `start` duration.
    pub start_duration_us: u64,
    /// `stop` duration (zero while running).
    pub stop_duration_us: u64,
    /// Events published by the plugin.
    pub events_published: u64,
    /// Events delivered to the plugin.
    pub events_received: u64,
    /// Granted host-service accesses.
    pub service_calls: u64,
    /// Per-hook statistics keyed by hook type.
    pub hooks: BTreeMap<String, HookStatsSnapshot>,
    /// Rolling last error.
    pub last_error: Option<LastError>,
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_hook_counters_and_average() {
        let m = PluginMetrics::new("audit", "1.0.0");
        let hook = HookPoint::AFTER_REQUEST;
        m.record_hook(&hook, Duration::from_micros(100), HookOutcome::Completed);
        m.record_hook(&hook, Duration::from_micros(300), HookOutcome::Failed);
        m.record_hook(&hook, Duration::from_micros(200), HookOutcome::TimedOut);

        let snap = m.snapshot();
        let stats = &snap.hooks["after_request"];
        assert_eq!(stats.executions, 3);
        assert_eq!(stats.errors, 2);
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.total_duration_us, 600);
        assert_eq!(stats.average_duration_us, 200);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        const WORKERS: usize = 8;
        const PER_WORKER: usize = 10_000;

        let m = Arc::new(PluginMetrics::new("audit", "1.0.0"));
        let handles: Vec<_> = (0..WORKERS)
            .map(|_| {
                let m = m.clone();
                std::thread::spawn(move || {
                    let hook = HookPoint::BEFORE_REQUEST;
                    for _ in 0..PER_WORKER {
                        m.record_hook(&hook, Duration::from_micros(1), HookOutcome::Completed);
                        m.record_service_call();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snap = m.snapshot();
        let expected = (WORKERS * PER_WORKER) as u64;
        assert_eq!(snap.hooks["before_request"].executions, expected);
        assert_eq!(snap.service_calls, expected);
    }

    #[test]
    fn test_snapshot_serialization() {
        let m = PluginMetrics::new("audit", "1.0.0");
        m.record_event_published();
        m.record_error("boom");
        let json = serde_json::to_string(&m.snapshot()).unwrap();
        let back: MetricsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.events_published, 1);
        assert_eq!(back.last_error.map(|e| e.message), Some("boom".into()));
    }
}
