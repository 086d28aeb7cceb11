//! Default-deny capability checks seen through a running plugin.

mod helpers;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use helpers::{TestHost, manifest};
use trellis_core::result::AppResult;
use trellis_core::traits::CacheService;
use trellis_plugin::api::HostServices;
use trellis_plugin::manifest::{ManifestFormat, PermissionDeclaration};
use trellis_plugin::permissions::Capability;
use trellis_plugin::{PluginConfig, PluginContext, PluginError};

#[derive(Debug, Default)]
struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl CacheService for MemoryCache {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str, _ttl: Duration) -> AppResult<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

fn context_of(host: &TestHost, plugin: &str) -> PluginContext {
    host.controls(plugin)
        .context
        .lock()
        .unwrap()
        .clone()
        .expect("plugin was initialized")
}

#[tokio::test]
async fn test_granted_capability_reaches_namespaced_service() {
    let host = TestHost::new();
    let cache = Arc::new(MemoryCache::default());
    let manager = host.manager_with_services(
        Default::default(),
        HostServices::new().with_cache(cache.clone()),
    );

    let mut m = manifest("sessions", "1.0.0");
    m.permissions.cache = true;
    let path = host.install(&m, ManifestFormat::Yaml);
    let grant = PermissionDeclaration {
        cache: true,
        ..Default::default()
    };
    manager
        .load_plugin(&path, PluginConfig::new("sessions", &path).with_permissions(grant))
        .await
        .unwrap();

    let ctx = context_of(&host, "sessions");
    let handle = ctx.cache().unwrap();
    handle.set("token", "abc", Duration::from_secs(60)).await.unwrap();

    assert_eq!(handle.get("token").await.unwrap(), Some("abc".to_string()));
    let keys: Vec<_> = cache.entries.lock().unwrap().keys().cloned().collect();
    assert_eq!(keys, vec!["plugin:sessions:token"]);
    assert!(manager.audit_events().is_empty());

    let metrics = manager.metrics_snapshot("sessions").await.unwrap();
    assert_eq!(metrics.service_calls, 1);
}

#[tokio::test]
async fn test_denial_is_audited_exactly_once() {
    let host = TestHost::new();
    let manager = host.manager();

    let m = manifest("reporter", "1.0.0");
    let path = host.install(&m, ManifestFormat::Yaml);
    manager
        .load_plugin(&path, PluginConfig::new("reporter", &path))
        .await
        .unwrap();

    let ctx = context_of(&host, "reporter");
    let err = ctx.network().unwrap_err();
    assert!(matches!(
        err,
        PluginError::PermissionDenied { ref plugin, ref capability }
            if plugin == "reporter" && capability == "network"
    ));

    let events = manager.audit_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].plugin, "reporter");
    assert_eq!(events[0].capability, Capability::Network);
}

#[tokio::test]
async fn test_declared_but_not_granted_is_denied() {
    let host = TestHost::new();
    let manager = host.manager();

    let mut m = manifest("exporter", "1.0.0");
    m.permissions.storage = true;
    m.permissions.custom.insert("compliance_export".to_string(), true);
    let path = host.install(&m, ManifestFormat::Toml);

    let mut grant = PermissionDeclaration::default();
    grant.custom.insert("compliance_export".to_string(), true);
    manager
        .load_plugin(&path, PluginConfig::new("exporter", &path).with_permissions(grant))
        .await
        .unwrap();

    let ctx = context_of(&host, "exporter");
    assert!(ctx.require_custom("compliance_export").is_ok());
    assert!(matches!(
        ctx.storage().unwrap_err(),
        PluginError::PermissionDenied { .. }
    ));
    assert!(matches!(
        ctx.require_custom("bulk_delete").unwrap_err(),
        PluginError::PermissionDenied { .. }
    ));

    let denied: Vec<_> = manager
        .audit_events()
        .into_iter()
        .map(|e| e.capability)
        .collect();
    assert_eq!(
        denied,
        vec![Capability::Storage, Capability::custom("bulk_delete")]
    );
}

#[tokio::test]
async fn test_granted_but_missing_service_is_not_a_denial() {
    let host = TestHost::new();
    let manager = host.manager();

    let mut m = manifest("sessions", "1.0.0");
    m.permissions.cache = true;
    let path = host.install(&m, ManifestFormat::Json);
    let grant = PermissionDeclaration {
        cache: true,
        ..Default::default()
    };
    manager
        .load_plugin(&path, PluginConfig::new("sessions", &path).with_permissions(grant))
        .await
        .unwrap();

    let err = context_of(&host, "sessions").cache().unwrap_err();
    assert!(matches!(err, PluginError::ServiceUnavailable { .. }));
    assert!(manager.audit_events().is_empty());
}
