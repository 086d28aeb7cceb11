//! Deployment planning CLI commands.

use std::collections::HashSet;
use std::path::PathBuf;

use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::Tabled;

use crate::output::{self, OutputFormat};
use trellis_core::config::RuntimeConfig;
use trellis_core::error::AppError;
use trellis_plugin::DeploymentConfig;
use trellis_plugin::PluginError;
use trellis_plugin::dependency::{PlanNode, check_host_version, load_order};
use trellis_plugin::manifest::{Manifest, read_manifest};

/// Arguments for deploy commands
#[derive(Debug, Args)]
pub struct DeployArgs {
    /// Deploy subcommand
    #[command(subcommand)]
    pub command: DeployCommand,
}

/// Deploy subcommands
#[derive(Debug, Subcommand)]
pub enum DeployCommand {
    /// Resolve every manifest and print the load order
    Plan {
        /// Deployment file; defaults to `plugins.deployment` from the config
        file: Option<PathBuf>,
    },
}

/// One row of a deployment plan
#[derive(Debug, Serialize, Tabled)]
pub struct PlanRow {
    #[tabled(rename = "Order")]
    pub order: String,
    #[tabled(rename = "Plugin")]
    pub name: String,
    #[tabled(rename = "Version")]
    pub version: String,
    #[tabled(rename = "Priority")]
    pub priority: String,
    #[tabled(rename = "Depends on")]
    pub dependencies: String,
    #[tabled(rename = "Status")]
    pub status: String,
}

/// Execute deploy commands
pub async fn execute(
    args: &DeployArgs,
    config: &RuntimeConfig,
    format: OutputFormat,
) -> Result<(), AppError> {
    match &args.command {
        DeployCommand::Plan { file } => {
            let path = file
                .clone()
                .unwrap_or_else(|| PathBuf::from(&config.plugins.deployment));
            let plugin_dir = PathBuf::from(&config.plugins.directory);
            tracing::debug!(
                path = %path.display(),
                plugin_dir = %plugin_dir.display(),
                "Planning deployment"
            );
            let deployment = DeploymentConfig::load_in(&path, &plugin_dir).await?;
            let (rows, problems) = plan(&deployment, &config.runtime.host_version).await?;

            output::print_list(&rows, format)?;
            if format == OutputFormat::Table {
                if problems == 0 {
                    output::print_success(&format!(
                        "{} plugin(s) planned from '{}'",
                        rows.len(),
                        path.display()
                    ));
                } else {
                    output::print_warning(&format!("{} plugin(s) cannot be loaded", problems));
                }
            }
        }
    }

    Ok(())
}

/// Builds plan rows: planned plugins in load order, then disabled and
/// rejected entries in declaration order. A dependency cycle fails the plan.
async fn plan(
    deployment: &DeploymentConfig,
    host_version: &str,
) -> Result<(Vec<PlanRow>, usize), AppError> {
    let mut accepted: Vec<(PlanNode, Manifest)> = Vec::new();
    let mut skipped = Vec::new();
    let mut problems = 0;

    for (sequence, entry) in deployment.plugins.iter().enumerate() {
        let checked = match read_manifest(&entry.path).await {
            Ok((manifest, _)) if manifest.name != entry.name => Err(PluginError::Validation {
                subject: entry.name.clone(),
                violations: vec![format!(
                    "name: manifest declares '{}' but the entry is '{}'",
                    manifest.name, entry.name
                )],
            }),
            Ok((manifest, _)) => check_host_version(&manifest, host_version)
                .map_err(PluginError::from)
                .and_then(|_| entry.resolve_against(&manifest).map(|_| manifest)),
            Err(e) => Err(e),
        };

        match checked {
            Ok(manifest) if entry.enabled => {
                let node = PlanNode::from_manifest(&manifest, entry.priority, sequence);
                accepted.push((node, manifest));
            }
            Ok(manifest) => skipped.push(row("-", &manifest, entry.priority, "disabled")),
            Err(e) => {
                problems += 1;
                skipped.push(PlanRow {
                    order: "-".to_string(),
                    name: entry.name.clone(),
                    version: "?".to_string(),
                    priority: display_priority(entry.priority),
                    dependencies: String::new(),
                    status: e.to_string(),
                });
            }
        }
    }

    let nodes: Vec<PlanNode> = accepted.iter().map(|(n, _)| n.clone()).collect();
    let order = load_order(&nodes).map_err(PluginError::from)?;
    let planned: HashSet<&str> = order.iter().map(String::as_str).collect();

    let mut rows = Vec::with_capacity(deployment.plugins.len());
    for (position, name) in order.iter().enumerate() {
        let Some((node, manifest)) = accepted.iter().find(|(n, _)| &n.name == name) else {
            continue;
        };
        let missing: Vec<&str> = manifest
            .required_dependencies()
            .map(|d| d.name.as_str())
            .filter(|d| !planned.contains(d))
            .collect();
        let status = if missing.is_empty() {
            "ready".to_string()
        } else {
            problems += 1;
            format!("missing {}", missing.join(", "))
        };
        rows.push(row(
            &(position + 1).to_string(),
            manifest,
            Some(node.priority),
            &status,
        ));
    }
    rows.extend(skipped);

    Ok((rows, problems))
}

fn row(order: &str, manifest: &Manifest, priority: Option<i64>, status: &str) -> PlanRow {
    PlanRow {
        order: order.to_string(),
        name: manifest.name.clone(),
        version: manifest.version.clone(),
        priority: display_priority(priority),
        dependencies: manifest
            .dependencies
            .iter()
            .map(|d| format!("{} {}", d.name, d.version))
            .collect::<Vec<_>>()
            .join(", "),
        status: status.to_string(),
    }
}

fn display_priority(priority: Option<i64>) -> String {
    priority.map_or_else(|| "-".to_string(), |p| p.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_plugin::PluginConfig;
    use trellis_plugin::manifest::{
        DependencySpec, FrameworkRequirement, HookDeclaration, ManifestFormat, encode,
    };

    fn write(dir: &std::path::Path, name: &str, deps: &[&str]) -> PathBuf {
        let manifest = Manifest {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            description: "test plugin".to_string(),
            author: "ops".to_string(),
            framework: FrameworkRequirement {
                version: ">=0.1.0".to_string(),
            },
            dependencies: deps
                .iter()
                .map(|d| DependencySpec {
                    name: d.to_string(),
                    version: "^1".to_string(),
                    optional: false,
                })
                .collect(),
            hooks: vec![HookDeclaration {
                hook_type: "after_request".to_string(),
                priority: 100,
            }],
            ..Default::default()
        };
        let path = dir.join(format!("{name}.yaml"));
        std::fs::write(&path, encode(&manifest, ManifestFormat::Yaml).unwrap()).unwrap();
        path
    }

    #[tokio::test]
    async fn test_plan_orders_dependencies_first() {
        let dir = tempfile::tempdir().unwrap();
        let deployment = DeploymentConfig {
            plugins: vec![
                PluginConfig::new("web", write(dir.path(), "web", &["auth"])).with_priority(900),
                PluginConfig::new("auth", write(dir.path(), "auth", &[])),
                PluginConfig::new("legacy", write(dir.path(), "legacy", &[])).enabled(false),
            ],
        };

        let (rows, problems) = plan(&deployment, "0.1.0").await.unwrap();
        let names: Vec<_> = rows.iter().map(|r| (r.order.as_str(), r.name.as_str())).collect();
        assert_eq!(names, vec![("1", "auth"), ("2", "web"), ("-", "legacy")]);
        assert_eq!(rows[2].status, "disabled");
        assert_eq!(problems, 0);
    }

    #[tokio::test]
    async fn test_plan_rejects_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let deployment = DeploymentConfig {
            plugins: vec![
                PluginConfig::new("a", write(dir.path(), "a", &["b"])),
                PluginConfig::new("b", write(dir.path(), "b", &["a"])),
            ],
        };

        let err = plan(&deployment, "0.1.0").await.unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[tokio::test]
    async fn test_plan_reports_missing_dependency() {
        let dir = tempfile::tempdir().unwrap();
        let deployment = DeploymentConfig {
            plugins: vec![PluginConfig::new("web", write(dir.path(), "web", &["auth"]))],
        };

        let (rows, problems) = plan(&deployment, "0.1.0").await.unwrap();
        assert_eq!(rows[0].status, "missing auth");
        assert_eq!(problems, 1);
    }
}
