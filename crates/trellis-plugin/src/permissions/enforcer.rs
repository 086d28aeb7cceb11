//! Enforcement point that turns a denied check into an audited error.

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use crate::error::{PluginError, PluginResult};

use super::audit::{AuditSink, SecurityEvent};
use super::{Capability, PermissionSet, check_access};

/// Checks capability requests and audits every denial exactly once.
#[derive(Debug, Clone)]
pub struct PermissionEnforcer {
    audit: Arc<dyn AuditSink>,
}

impl PermissionEnforcer {
    /// Creates an enforcer reporting denials to `audit`.
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self { audit }
    }

    /// Returns `Ok` when `capability` is granted, otherwise records a
    /// security event and returns `PermissionDenied`.
    pub fn enforce(
        &self,
        plugin: &str,
        granted: &PermissionSet,
        capability: &Capability,
    ) -> PluginResult<()> {
        if check_access(granted, capability) {
            return Ok(());
        }

        warn!(
            target: "trellis::security",
            plugin = %plugin,
            capability = %capability,
            "Capability denied"
        );

        self.audit.record(SecurityEvent {
            plugin: plugin.to_string(),
            capability: capability.clone(),
            at: Utc::now(),
        });

        Err(PluginError::PermissionDenied {
            plugin: plugin.to_string(),
            capability: capability.to_string(),
        })
    }
}
