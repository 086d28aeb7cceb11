//! Manifest decoding across formats and aggregated validation.

mod helpers;

use helpers::fixture;
use serde_json::json;
use trellis_plugin::manifest::{
    ConfigFieldType, ManifestFormat, decode, encode, parse_and_validate, read_manifest,
};
use trellis_plugin::{Manifest, PluginError};

#[tokio::test]
async fn test_fixtures_decode_to_same_manifest() {
    let (yaml, _) = read_manifest(&fixture("audit.yaml")).await.unwrap();
    let (json, _) = read_manifest(&fixture("audit.json")).await.unwrap();
    let (toml, _) = read_manifest(&fixture("audit.toml")).await.unwrap();

    assert_eq!(yaml, json);
    assert_eq!(yaml, toml);

    assert_eq!(yaml.name, "audit");
    assert_eq!(yaml.version, "1.2.0");
    assert_eq!(yaml.dependencies.len(), 2);
    assert!(yaml.dependencies[1].optional);
    assert!(yaml.permissions.storage);
    assert!(!yaml.permissions.network);
    assert_eq!(yaml.permissions.custom.get("compliance_export"), Some(&true));
    assert_eq!(yaml.config["retention_days"].field_type, ConfigFieldType::Integer);
    assert_eq!(yaml.config["retention_days"].default, Some(json!(30)));
    assert!(yaml.config["sink"].required);
    assert_eq!(yaml.hooks[0].priority, 900);
    assert_eq!(yaml.hooks[1].priority, 100);
    assert!(yaml.publishes("audit.recorded"));
    assert!(yaml.subscribes_to("auth.login"));
    assert_eq!(yaml.exports, vec!["audit_trail"]);
}

#[tokio::test]
async fn test_yaml_converts_to_every_format() {
    let (original, _) = read_manifest(&fixture("audit.yaml")).await.unwrap();

    for format in ManifestFormat::ALL {
        let text = encode(&original, format).unwrap();
        let decoded: Manifest = decode(text.as_bytes(), format, "converted").unwrap();
        assert_eq!(decoded, original, "conversion to {format} changed the manifest");
    }
}

#[tokio::test]
async fn test_directory_path_finds_manifest() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::copy(fixture("audit.json"), dir.path().join("plugin.json")).unwrap();

    let (manifest, file) = read_manifest(dir.path()).await.unwrap();
    assert_eq!(manifest.name, "audit");
    assert!(file.ends_with("plugin.json"));
}

#[test]
fn test_every_violation_is_reported() {
    let yaml = r#"
name: ""
version: "one"
author: Ops
framework:
  version: "not a range"
dependencies:
  - name: auth
    version: "^1"
  - name: auth
    version: "^1"
hooks:
  - type: after_request
    priority: 5000
config:
  retries:
    type: integer
    default: "three"
"#;
    let err = parse_and_validate(yaml.as_bytes(), ManifestFormat::Yaml, "bad.yaml").unwrap_err();
    let PluginError::Validation { violations, .. } = err else {
        panic!("expected a validation error, got {err}");
    };

    let joined = violations.join("\n");
    for field in [
        "name",
        "version",
        "description",
        "framework.version",
        "dependencies[1].name",
        "hooks[0].priority",
        "config.retries.default",
    ] {
        assert!(
            violations.iter().any(|v| v.starts_with(&format!("{field}:"))),
            "missing violation for {field} in:\n{joined}"
        );
    }
}

#[test]
fn test_decoder_errors_name_the_source() {
    let err = parse_and_validate(b"name = [", ManifestFormat::Toml, "broken.toml").unwrap_err();
    match err {
        PluginError::Parse {
            source_name, format, ..
        } => {
            assert_eq!(source_name, "broken.toml");
            assert_eq!(format, "TOML");
        }
        other => panic!("expected a parse error, got {other}"),
    }
}

#[tokio::test]
async fn test_unsupported_extension_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plugin.ini");
    std::fs::write(&path, "name = audit").unwrap();

    let err = read_manifest(&path).await.unwrap_err();
    assert!(matches!(err, PluginError::UnsupportedFormat { ref extension, .. } if extension == "ini"));
}
