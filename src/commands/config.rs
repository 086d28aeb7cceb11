//! Runtime configuration CLI commands.

use clap::{Args, Subcommand};

use crate::output::{self, OutputFormat};
use trellis_core::config::RuntimeConfig;
use trellis_core::error::AppError;

/// Arguments for config commands
#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration, environment overrides included
    Show,
    /// Summarize the runtime limits
    Check,
}

/// Execute config commands
pub fn execute(
    args: &ConfigArgs,
    config: &RuntimeConfig,
    config_path: &str,
    format: OutputFormat,
) -> Result<(), AppError> {
    match &args.command {
        ConfigCommand::Show => output::print_item(config, format)?,
        ConfigCommand::Check => {
            let runtime = &config.runtime;
            semver::Version::parse(&runtime.host_version).map_err(|e| {
                AppError::configuration(format!(
                    "runtime.host_version '{}' is not a semantic version: {}",
                    runtime.host_version, e
                ))
            })?;

            output::print_success(&format!("Configuration '{}' is valid", config_path));
            output::print_kv("Host version", &runtime.host_version);
            output::print_kv("Error threshold", &runtime.error_threshold.to_string());
            output::print_kv("Hook timeout", &format!("{:?}", runtime.hook_timeout()));
            output::print_kv("Drain timeout", &format!("{:?}", runtime.drain_timeout()));
            output::print_kv("Shutdown timeout", &format!("{:?}", runtime.shutdown_timeout()));
            output::print_kv("Deployment", &config.plugins.deployment);
            for (hook, policy) in &runtime.hook_policies {
                output::print_kv(&format!("Policy {}", hook), &format!("{:?}", policy));
            }
        }
    }

    Ok(())
}
