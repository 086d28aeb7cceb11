//! Manifest CLI commands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::output::{self, OutputFormat};
use trellis_core::error::AppError;
use trellis_plugin::PluginError;
use trellis_plugin::manifest::{
    ManifestFormat, encode, parse_and_validate, read_manifest, resolve_manifest_path,
};

/// Arguments for manifest commands
#[derive(Debug, Args)]
pub struct ManifestArgs {
    /// Manifest subcommand
    #[command(subcommand)]
    pub command: ManifestCommand,
}

/// Manifest subcommands
#[derive(Debug, Subcommand)]
pub enum ManifestCommand {
    /// Check a manifest and list every violation
    Validate {
        /// Manifest file or plugin directory
        path: PathBuf,
    },
    /// Print the parsed manifest
    Show {
        /// Manifest file or plugin directory
        path: PathBuf,
    },
    /// Re-encode a manifest in another format
    Convert {
        /// Manifest file or plugin directory
        path: PathBuf,
        /// Target format
        #[arg(long, value_enum)]
        to: DocumentFormat,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Document formats accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DocumentFormat {
    Yaml,
    Json,
    Toml,
}

impl From<DocumentFormat> for ManifestFormat {
    fn from(format: DocumentFormat) -> Self {
        match format {
            DocumentFormat::Yaml => ManifestFormat::Yaml,
            DocumentFormat::Json => ManifestFormat::Json,
            DocumentFormat::Toml => ManifestFormat::Toml,
        }
    }
}

/// Execute manifest commands
pub async fn execute(args: &ManifestArgs, format: OutputFormat) -> Result<(), AppError> {
    match &args.command {
        ManifestCommand::Validate { path } => match read_manifest(path).await {
            Ok((manifest, file)) => {
                output::print_success(&format!(
                    "{} is valid ({})",
                    manifest.identity(),
                    file.display()
                ));
                output::print_kv("Hooks", &manifest.hooks.len().to_string());
                output::print_kv("Dependencies", &manifest.dependencies.len().to_string());
                output::print_kv("Framework", &manifest.framework.version);
            }
            Err(PluginError::Validation {
                subject,
                violations,
            }) => {
                for violation in &violations {
                    output::print_error(violation);
                }
                return Err(AppError::validation(format!(
                    "'{}' has {} violation(s)",
                    subject,
                    violations.len()
                )));
            }
            Err(e) => return Err(e.into()),
        },
        ManifestCommand::Show { path } => {
            let (manifest, _) = read_manifest(path).await?;
            output::print_item(&manifest, format)?;
        }
        ManifestCommand::Convert { path, to, output: out } => {
            let file = resolve_manifest_path(path).await?;
            let source = ManifestFormat::from_path(&file)?;
            let bytes = tokio::fs::read(&file).await?;
            let manifest = parse_and_validate(&bytes, source, &file.display().to_string())?;

            let target = ManifestFormat::from(*to);
            if target == source {
                output::print_warning(&format!("'{}' is already {}", file.display(), target));
            }
            let rendered = encode(&manifest, target)?;

            match out {
                Some(out_path) => {
                    tokio::fs::write(out_path, rendered).await?;
                    output::print_success(&format!(
                        "Wrote {} manifest to '{}'",
                        target,
                        out_path.display()
                    ));
                }
                None => print!("{}", rendered),
            }
        }
    }

    Ok(())
}
