//! Plugin manifests: model, decoding, and validation.

pub mod model;
pub mod parser;
pub mod validate;

pub use model::{
    ConfigField, ConfigFieldType, DependencySpec, EventDeclaration, FrameworkRequirement,
    HookDeclaration, Manifest, PermissionDeclaration, PluginIdentity,
};
pub use parser::{
    ManifestFormat, decode, encode, parse_and_validate, parse_manifest, read_manifest,
    resolve_manifest_path,
};
pub use validate::validate_manifest;
