//! Canonical in-memory manifest.
//!
//! Every serialization (YAML, JSON, TOML) decodes into these types. String
//! fields default to empty so that a missing field surfaces as a validation
//! violation rather than a decoder error, which keeps reports aggregated.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Default hook priority when a declaration omits it.
pub const DEFAULT_HOOK_PRIORITY: i64 = 100;

/// Highest accepted priority for hooks and deployment entries.
pub const MAX_PRIORITY: i64 = 1000;

fn default_hook_priority() -> i64 {
    DEFAULT_HOOK_PRIORITY
}

/// Plugin manifest. Immutable once parsed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct Manifest {
    /// Unique plugin name.
    #[serde(default)]
    #[validate(length(min = 1, message = "must not be empty"))]
    pub name: String,
    /// Semantic version of the plugin.
    #[serde(default)]
    #[validate(length(min = 1, message = "must not be empty"))]
    pub version: String,
    /// Human-readable description.
    #[serde(default)]
    #[validate(length(min = 1, message = "must not be empty"))]
    pub description: String,
    /// Author or maintainer.
    #[serde(default)]
    #[validate(length(min = 1, message = "must not be empty"))]
    pub author: String,
    /// Host framework requirement.
    #[serde(default)]
    #[validate(nested)]
    pub framework: FrameworkRequirement,
    /// Ordered dependencies on other plugins.
    #[serde(default)]
    #[validate(nested)]
    pub dependencies: Vec<DependencySpec>,
    /// Capabilities the plugin may ask for.
    #[serde(default)]
    pub permissions: PermissionDeclaration,
    /// Configuration schema keyed by field name.
    #[serde(default)]
    pub config: BTreeMap<String, ConfigField>,
    /// Hook declarations in manifest order.
    #[serde(default)]
    #[validate(nested)]
    pub hooks: Vec<HookDeclaration>,
    /// Events published and subscribed to.
    #[serde(default)]
    pub events: EventDeclaration,
    /// Exported capability names.
    #[serde(default)]
    pub exports: Vec<String>,
}

impl Manifest {
    /// `name@version` identity of this manifest.
    pub fn identity(&self) -> PluginIdentity {
        PluginIdentity {
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }

    /// Names of required (non-optional) dependencies.
    pub fn required_dependencies(&self) -> impl Iterator<Item = &DependencySpec> {
        self.dependencies.iter().filter(|d| !d.optional)
    }

    /// Whether the manifest subscribes to `event_type`.
    pub fn subscribes_to(&self, event_type: &str) -> bool {
        self.events.subscribes.iter().any(|e| e == event_type)
    }

    /// Whether the manifest declares publishing `event_type`.
    pub fn publishes(&self, event_type: &str) -> bool {
        self.events.publishes.iter().any(|e| e == event_type)
    }
}

/// Name and version pair identifying a plugin build.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PluginIdentity {
    /// Plugin name.
    pub name: String,
    /// Plugin version.
    pub version: String,
}

impl fmt::Display for PluginIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Minimum host version requirement (`framework.version`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct FrameworkRequirement {
    /// Semver requirement the host must satisfy, e.g. `>=0.1.0`.
    #[serde(default)]
    #[validate(length(min = 1, message = "must not be empty"))]
    pub version: String,
}

/// A dependency on another plugin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct DependencySpec {
    /// Name of the plugin depended on.
    #[serde(default)]
    #[validate(length(min = 1, message = "must not be empty"))]
    pub name: String,
    /// Semver requirement on the dependency's version.
    #[serde(default)]
    #[validate(length(min = 1, message = "must not be empty"))]
    pub version: String,
    /// Optional dependencies never fail a load.
    #[serde(default)]
    pub optional: bool,
}

/// Named boolean capabilities plus an open-ended custom map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionDeclaration {
    /// Key-value or relational storage.
    pub storage: bool,
    /// Cache handle.
    pub cache: bool,
    /// Route registration.
    pub routing: bool,
    /// Host configuration reader.
    pub configuration: bool,
    /// Filesystem access.
    pub filesystem: bool,
    /// Outbound network client.
    pub network: bool,
    /// Spawning processes.
    #[serde(alias = "process")]
    pub process_execution: bool,
    /// Caller-defined capabilities.
    pub custom: BTreeMap<String, bool>,
}

/// Declared type of a configuration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigFieldType {
    /// UTF-8 string.
    String,
    /// Signed or unsigned integer.
    Integer,
    /// Any JSON number.
    Number,
    /// `true` / `false`.
    Boolean,
    /// Sequence of values.
    Array,
    /// Map of values.
    Object,
}

impl ConfigFieldType {
    /// Whether `value` is an instance of this type.
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

impl fmt::Display for ConfigFieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        };
        f.write_str(name)
    }
}

/// One field of a manifest configuration schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigField {
    /// Declared type.
    #[serde(rename = "type")]
    pub field_type: ConfigFieldType,
    /// Whether a value must be present after defaults are applied.
    #[serde(default)]
    pub required: bool,
    /// Value used when the deployment does not provide one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// Operator-facing description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Registration of interest in a hook type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct HookDeclaration {
    /// Hook type name, e.g. `before_request`.
    #[serde(rename = "type", default)]
    #[validate(length(min = 1, message = "must not be empty"))]
    pub hook_type: String,
    /// Priority in `[0, 1000]`; higher runs earlier.
    #[serde(default = "default_hook_priority")]
    #[validate(range(min = 0, max = 1000, message = "must be between 0 and 1000"))]
    pub priority: i64,
}

/// Published and subscribed event names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventDeclaration {
    /// Event types this plugin may publish.
    pub publishes: Vec<String>,
    /// Event types delivered to this plugin.
    pub subscribes: Vec<String>,
}
