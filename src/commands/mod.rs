//! CLI command definitions and dispatch.

pub mod config;
pub mod deploy;
pub mod manifest;

use clap::{Parser, Subcommand};

use crate::output::OutputFormat;
use trellis_core::config::RuntimeConfig;
use trellis_core::error::AppError;

/// Trellis: inspect plugin manifests and plan deployments
#[derive(Debug, Parser)]
#[command(name = "trellis", version, about, long_about = None)]
pub struct Cli {
    /// Path to the runtime configuration file
    #[arg(short, long, default_value = "config/default")]
    pub config: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Manifest validation and conversion
    Manifest(manifest::ManifestArgs),
    /// Deployment planning
    Deploy(deploy::DeployArgs),
    /// Runtime configuration
    Config(config::ConfigArgs),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self, config: &RuntimeConfig) -> Result<(), AppError> {
        match &self.command {
            Commands::Manifest(args) => manifest::execute(args, self.format).await,
            Commands::Deploy(args) => deploy::execute(args, config, self.format).await,
            Commands::Config(args) => config::execute(args, config, &self.config, self.format),
        }
    }
}
