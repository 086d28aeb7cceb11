//! Deployment configuration: the ordered list of plugins a host runs.
//!
//! Entries override manifest defaults per deployment. Their sequence is
//! authoritative for initialization order among equal-priority plugins.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::error::{PluginError, PluginResult};
use crate::manifest::model::{Manifest, PermissionDeclaration};
use crate::manifest::parser::{ManifestFormat, decode};
use crate::manifest::validate::collect_violations;

fn default_enabled() -> bool {
    true
}

/// Per-deployment settings for one plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct PluginConfig {
    /// Plugin name; must match the manifest name.
    #[validate(length(min = 1, message = "must not be empty"))]
    pub name: String,
    /// Disabled entries are parsed and validated but never instantiated.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Manifest file or plugin directory.
    pub path: PathBuf,
    /// Overrides every hook priority of the plugin when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0, max = 1000, message = "must be between 0 and 1000"))]
    pub priority: Option<i64>,
    /// Configuration values, checked against the manifest schema.
    #[serde(default)]
    pub config: BTreeMap<String, Value>,
    /// Granted capabilities. Anything absent is denied.
    #[serde(default)]
    pub permissions: PermissionDeclaration,
}

impl PluginConfig {
    /// Entry for `name` at `path` with everything else defaulted.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            path: path.into(),
            priority: None,
            config: BTreeMap::new(),
            permissions: PermissionDeclaration::default(),
        }
    }

    /// Sets the priority override.
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Sets a configuration value.
    pub fn with_value(mut self, key: &str, value: Value) -> Self {
        self.config.insert(key.to_string(), value);
        self
    }

    /// Replaces the permission grant.
    pub fn with_permissions(mut self, permissions: PermissionDeclaration) -> Self {
        self.permissions = permissions;
        self
    }

    /// Sets the enabled flag.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Validates the entry on its own, aggregating violations.
    pub fn check(&self) -> PluginResult<()> {
        let mut violations = Vec::new();
        if let Err(errors) = self.validate() {
            collect_violations("", &errors, &mut violations);
        }
        if violations.is_empty() {
            Ok(())
        } else {
            violations.sort();
            Err(PluginError::Validation {
                subject: self.name.clone(),
                violations,
            })
        }
    }

    /// Applies manifest defaults and checks values against its schema.
    ///
    /// Returns the resolved configuration; unknown keys are kept.
    pub fn resolve_against(&self, manifest: &Manifest) -> PluginResult<BTreeMap<String, Value>> {
        let mut resolved = self.config.clone();
        let mut violations = Vec::new();

        if self.name != manifest.name {
            violations.push(format!(
                "name: deployment entry '{}' points at manifest '{}'",
                self.name, manifest.name
            ));
        }

        for (key, field) in &manifest.config {
            match resolved.get(key) {
                Some(value) => {
                    if !field.field_type.accepts(value) {
                        violations.push(format!("config.{key}: expected {}", field.field_type));
                    }
                }
                None => match &field.default {
                    Some(default) => {
                        resolved.insert(key.clone(), default.clone());
                    }
                    None if field.required => {
                        violations.push(format!("config.{key}: required value is missing"));
                    }
                    None => {}
                },
            }
        }

        if violations.is_empty() {
            Ok(resolved)
        } else {
            violations.sort();
            Err(PluginError::Validation {
                subject: self.name.clone(),
                violations,
            })
        }
    }
}

/// Ordered list of plugin entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Entries in declared order.
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

impl DeploymentConfig {
    /// Decodes a deployment document and checks every entry.
    pub fn parse(bytes: &[u8], format: ManifestFormat, source_name: &str) -> PluginResult<Self> {
        let config: DeploymentConfig = decode(bytes, format, source_name)?;
        config.check()?;
        Ok(config)
    }

    /// Reads a deployment document; relative entry paths resolve against
    /// the document's directory.
    pub async fn load(path: &Path) -> PluginResult<Self> {
        let base = path.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
        Self::load_in(path, &base).await
    }

    /// Reads a deployment document; relative entry paths resolve against
    /// `plugin_dir`.
    pub async fn load_in(path: &Path, plugin_dir: &Path) -> PluginResult<Self> {
        let format = ManifestFormat::from_path(path)?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| PluginError::io(path, &e))?;
        let mut config = Self::parse(&bytes, format, &path.display().to_string())?;

        for entry in &mut config.plugins {
            if entry.path.is_relative() {
                entry.path = plugin_dir.join(&entry.path);
            }
        }
        Ok(config)
    }

    /// Checks each entry and rejects duplicate names.
    pub fn check(&self) -> PluginResult<()> {
        let mut violations = Vec::new();
        let mut seen = HashSet::new();

        for (index, entry) in self.plugins.iter().enumerate() {
            if let Err(errors) = entry.validate() {
                collect_violations(&format!("plugins[{index}]"), &errors, &mut violations);
            }
            if !entry.name.is_empty() && !seen.insert(entry.name.as_str()) {
                violations.push(format!(
                    "plugins[{index}].name: '{}' is declared more than once",
                    entry.name
                ));
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            violations.sort();
            Err(PluginError::Validation {
                subject: "deployment".to_string(),
                violations,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::model::{ConfigField, ConfigFieldType};
    use serde_json::json;

    const TOML: &str = r#"
[[plugins]]
name = "audit"
path = "plugins/audit"
priority = 200

[plugins.config]
retention_days = 30

[plugins.permissions]
storage = true

[[plugins]]
name = "metrics"
path = "plugins/metrics"
enabled = false
"#;

    fn manifest_with_schema() -> Manifest {
        let mut manifest = Manifest {
            name: "audit".into(),
            ..Default::default()
        };
        manifest.config.insert(
            "retention_days".into(),
            ConfigField {
                field_type: ConfigFieldType::Integer,
                required: true,
                default: None,
                description: String::new(),
            },
        );
        manifest.config.insert(
            "sink".into(),
            ConfigField {
                field_type: ConfigFieldType::String,
                required: true,
                default: Some(json!("stdout")),
                description: String::new(),
            },
        );
        manifest
    }

    #[test]
    fn test_parse_preserves_order_and_defaults() {
        let config = DeploymentConfig::parse(TOML.as_bytes(), ManifestFormat::Toml, "test").unwrap();
        assert_eq!(config.plugins.len(), 2);
        assert_eq!(config.plugins[0].name, "audit");
        assert_eq!(config.plugins[0].priority, Some(200));
        assert!(config.plugins[0].permissions.storage);
        assert!(!config.plugins[0].permissions.network);
        assert!(!config.plugins[1].enabled);
        assert_eq!(config.plugins[1].priority, None);
    }

    #[tokio::test]
    async fn test_load_in_resolves_against_plugin_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("deploy.toml");
        let doc = format!("{TOML}\n[[plugins]]\nname = \"pinned\"\npath = \"/opt/pinned\"\n");
        std::fs::write(&file, doc).unwrap();

        let config = DeploymentConfig::load_in(&file, Path::new("/srv/bundles"))
            .await
            .unwrap();
        assert_eq!(config.plugins[0].path, Path::new("/srv/bundles/plugins/audit"));
        assert_eq!(config.plugins[2].path, Path::new("/opt/pinned"));

        let config = DeploymentConfig::load(&file).await.unwrap();
        assert_eq!(config.plugins[1].path, dir.path().join("plugins/metrics"));
    }

    #[test]
    fn test_priority_out_of_range_rejected() {
        let doc = r#"{"plugins":[{"name":"a","path":"a","priority":1500}]}"#;
        let err = DeploymentConfig::parse(doc.as_bytes(), ManifestFormat::Json, "test").unwrap_err();
        let PluginError::Validation { violations, .. } = err else {
            panic!("expected validation error");
        };
        assert_eq!(violations, vec!["plugins[0].priority: must be between 0 and 1000"]);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let doc = r#"{"plugins":[{"name":"a","path":"a"},{"name":"a","path":"b"}]}"#;
        let err = DeploymentConfig::parse(doc.as_bytes(), ManifestFormat::Json, "test").unwrap_err();
        assert!(err.to_string().contains("declared more than once"));
    }

    #[test]
    fn test_resolve_fills_defaults() {
        let entry = PluginConfig::new("audit", "x").with_value("retention_days", json!(7));
        let resolved = entry.resolve_against(&manifest_with_schema()).unwrap();
        assert_eq!(resolved["sink"], json!("stdout"));
        assert_eq!(resolved["retention_days"], json!(7));
    }

    #[test]
    fn test_resolve_aggregates_schema_violations() {
        let entry = PluginConfig::new("audit", "x").with_value("sink", json!(5));
        let err = entry.resolve_against(&manifest_with_schema()).unwrap_err();
        let PluginError::Validation { violations, .. } = err else {
            panic!("expected validation error");
        };
        assert_eq!(
            violations,
            vec![
                "config.retention_days: required value is missing".to_string(),
                "config.sink: expected string".to_string(),
            ]
        );
    }
}
