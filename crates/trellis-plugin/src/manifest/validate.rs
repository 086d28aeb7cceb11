//! Semantic validation of manifests.
//!
//! Structural checks come from the `validator` derive on the model; semver
//! and cross-field checks are layered on top. All violations are gathered
//! into one [`PluginError::Validation`].

use std::collections::HashSet;

use semver::{Version, VersionReq};
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

use crate::error::{PluginError, PluginResult};

use super::model::Manifest;

/// Validates a manifest, reporting every violated field at once.
pub fn validate_manifest(manifest: &Manifest) -> PluginResult<()> {
    let mut violations = Vec::new();

    if let Err(errors) = manifest.validate() {
        collect_violations("", &errors, &mut violations);
    }

    if !manifest.version.is_empty() && Version::parse(&manifest.version).is_err() {
        violations.push(format!(
            "version: '{}' is not a semantic version",
            manifest.version
        ));
    }

    if !manifest.framework.version.is_empty()
        && VersionReq::parse(&manifest.framework.version).is_err()
    {
        violations.push(format!(
            "framework.version: '{}' is not a version requirement",
            manifest.framework.version
        ));
    }

    let mut seen_deps = HashSet::new();
    for (index, dep) in manifest.dependencies.iter().enumerate() {
        if !dep.version.is_empty() && VersionReq::parse(&dep.version).is_err() {
            violations.push(format!(
                "dependencies[{index}].version: '{}' is not a version requirement",
                dep.version
            ));
        }
        if !dep.name.is_empty() && !seen_deps.insert(dep.name.as_str()) {
            violations.push(format!(
                "dependencies[{index}].name: '{}' is declared more than once",
                dep.name
            ));
        }
        if !dep.name.is_empty() && dep.name == manifest.name {
            violations.push(format!(
                "dependencies[{index}].name: plugin cannot depend on itself"
            ));
        }
    }

    let mut seen_hooks = HashSet::new();
    for (index, hook) in manifest.hooks.iter().enumerate() {
        if !hook.hook_type.is_empty() && !seen_hooks.insert(hook.hook_type.as_str()) {
            violations.push(format!(
                "hooks[{index}].type: '{}' is declared more than once",
                hook.hook_type
            ));
        }
    }

    for key in manifest.permissions.custom.keys() {
        if key.trim().is_empty() {
            violations.push("permissions.custom: capability name must not be empty".to_string());
        }
    }

    for (index, export) in manifest.exports.iter().enumerate() {
        if export.trim().is_empty() {
            violations.push(format!("exports[{index}]: must not be empty"));
        }
    }

    for (kind, names) in [
        ("publishes", &manifest.events.publishes),
        ("subscribes", &manifest.events.subscribes),
    ] {
        for (index, name) in names.iter().enumerate() {
            if name.trim().is_empty() {
                violations.push(format!("events.{kind}[{index}]: must not be empty"));
            }
        }
    }

    for (field, spec) in &manifest.config {
        if let Some(default) = &spec.default {
            if !spec.field_type.accepts(default) {
                violations.push(format!(
                    "config.{field}.default: expected {}",
                    spec.field_type
                ));
            }
        }
    }

    if violations.is_empty() {
        return Ok(());
    }

    violations.sort();
    Err(PluginError::Validation {
        subject: subject_for(manifest),
        violations,
    })
}

fn subject_for(manifest: &Manifest) -> String {
    if manifest.name.is_empty() {
        "<unnamed manifest>".to_string()
    } else {
        manifest.name.clone()
    }
}

/// Flattens nested `validator` errors into `path: reason` strings.
pub(crate) fn collect_violations(prefix: &str, errors: &ValidationErrors, out: &mut Vec<String>) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };

        match kind {
            ValidationErrorsKind::Field(list) => {
                for err in list {
                    let reason = err
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| err.code.to_string());
                    out.push(format!("{path}: {reason}"));
                }
            }
            ValidationErrorsKind::Struct(nested) => collect_violations(&path, nested, out),
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    collect_violations(&format!("{path}[{index}]"), nested, out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::model::{DependencySpec, FrameworkRequirement, HookDeclaration};

    fn valid_manifest() -> Manifest {
        Manifest {
            name: "audit".into(),
            version: "1.2.0".into(),
            description: "Audit trail".into(),
            author: "Ops".into(),
            framework: FrameworkRequirement {
                version: ">=0.1.0".into(),
            },
            hooks: vec![HookDeclaration {
                hook_type: "after_request".into(),
                priority: 100,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_manifest_passes() {
        assert!(validate_manifest(&valid_manifest()).is_ok());
    }

    #[test]
    fn test_reports_every_violation() {
        let mut manifest = valid_manifest();
        manifest.description.clear();
        manifest.author.clear();
        manifest.framework.version.clear();
        manifest.hooks.push(HookDeclaration {
            hook_type: String::new(),
            priority: 1001,
        });
        manifest.dependencies.push(DependencySpec {
            name: String::new(),
            version: "^1".into(),
            optional: false,
        });

        let err = validate_manifest(&manifest).unwrap_err();
        let PluginError::Validation { subject, violations } = err else {
            panic!("expected validation error");
        };
        assert_eq!(subject, "audit");

        let joined = violations.join("\n");
        assert!(joined.contains("description: must not be empty"));
        assert!(joined.contains("author: must not be empty"));
        assert!(joined.contains("framework.version: must not be empty"));
        assert!(joined.contains("hooks[1].type: must not be empty"));
        assert!(joined.contains("hooks[1].priority: must be between 0 and 1000"));
        assert!(joined.contains("dependencies[0].name: must not be empty"));
        assert_eq!(violations.len(), 6);
    }

    #[test]
    fn test_rejects_bad_semver() {
        let mut manifest = valid_manifest();
        manifest.version = "one".into();
        manifest.framework.version = "not a range".into();

        let err = validate_manifest(&manifest).unwrap_err();
        let PluginError::Validation { violations, .. } = err else {
            panic!("expected validation error");
        };
        assert_eq!(violations.len(), 2);
    }

    #[test]
    fn test_rejects_empty_export_and_duplicate_hook() {
        let mut manifest = valid_manifest();
        manifest.exports = vec!["reports".into(), " ".into()];
        manifest.hooks.push(HookDeclaration {
            hook_type: "after_request".into(),
            priority: 5,
        });

        let err = validate_manifest(&manifest).unwrap_err();
        let PluginError::Validation { violations, .. } = err else {
            panic!("expected validation error");
        };
        assert!(violations.iter().any(|v| v.starts_with("exports[1]")));
        assert!(violations.iter().any(|v| v.starts_with("hooks[1].type")));
    }
}
