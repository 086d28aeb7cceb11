//! Table and JSON output for CLI commands.

use serde::Serialize;
use tabled::{Table, Tabled};
use trellis_core::error::{AppError, ErrorKind};

/// Output format selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// JSON output
    Json,
}

/// Print rows as a table, or as a JSON array.
pub fn print_list<T: Serialize + Tabled>(items: &[T], format: OutputFormat) -> Result<(), AppError> {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("No plugins.");
            } else {
                println!("{}", Table::new(items));
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(items)?),
    }
    Ok(())
}

/// Print one document. Table mode falls back to YAML, which reads better
/// than a debug dump for nested manifests.
pub fn print_item<T: Serialize>(item: &T, format: OutputFormat) -> Result<(), AppError> {
    let rendered = match format {
        OutputFormat::Table => render_yaml(item)?,
        OutputFormat::Json => serde_json::to_string_pretty(item)?,
    };
    println!("{}", rendered.trim_end());
    Ok(())
}

fn render_yaml<T: Serialize>(item: &T) -> Result<String, AppError> {
    serde_yaml::to_string(item).map_err(|e| {
        AppError::with_source(
            ErrorKind::Serialization,
            format!("YAML serialization error: {e}"),
            e,
        )
    })
}

pub fn print_success(msg: &str) {
    println!("✓ {}", msg);
}

pub fn print_warning(msg: &str) {
    println!("⚠ {}", msg);
}

pub fn print_error(msg: &str) {
    eprintln!("✗ {}", msg);
}

/// Print a key-value pair
pub fn print_kv(key: &str, value: &str) {
    println!("  {:<24} {}", format!("{}:", key), value);
}
