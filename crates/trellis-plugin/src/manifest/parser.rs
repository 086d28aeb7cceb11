//! Format detection and decoding for manifests and deployment documents.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{PluginError, PluginResult};

use super::model::Manifest;
use super::validate::validate_manifest;

/// File names probed, in order, when a manifest path is a directory.
pub const MANIFEST_FILE_NAMES: [&str; 4] =
    ["plugin.toml", "plugin.yaml", "plugin.yml", "plugin.json"];

/// Serialization format of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManifestFormat {
    /// YAML 1.2.
    Yaml,
    /// JSON.
    Json,
    /// TOML.
    Toml,
}

impl ManifestFormat {
    /// All supported formats.
    pub const ALL: [ManifestFormat; 3] = [Self::Yaml, Self::Json, Self::Toml];

    /// Selects a format from a file extension, case-insensitively.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Some(Self::Yaml),
            "json" => Some(Self::Json),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }

    /// Selects a format from the extension of `path`.
    pub fn from_path(path: &Path) -> PluginResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        Self::from_extension(ext).ok_or_else(|| PluginError::UnsupportedFormat {
            path: path.display().to_string(),
            extension: ext.to_string(),
        })
    }

    /// Canonical file extension.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Yaml => "yaml",
            Self::Json => "json",
            Self::Toml => "toml",
        }
    }
}

impl fmt::Display for ManifestFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Yaml => "YAML",
            Self::Json => "JSON",
            Self::Toml => "TOML",
        };
        f.write_str(name)
    }
}

/// Decodes any serde type from `bytes` in `format`.
pub fn decode<T: DeserializeOwned>(
    bytes: &[u8],
    format: ManifestFormat,
    source_name: &str,
) -> PluginResult<T> {
    let parse_error = |message: String| PluginError::Parse {
        source_name: source_name.to_string(),
        format: format.to_string(),
        message,
    };

    match format {
        ManifestFormat::Yaml => serde_yaml::from_slice(bytes).map_err(|e| parse_error(e.to_string())),
        ManifestFormat::Json => serde_json::from_slice(bytes).map_err(|e| parse_error(e.to_string())),
        ManifestFormat::Toml => {
            let text = std::str::from_utf8(bytes).map_err(|e| parse_error(e.to_string()))?;
            toml::from_str(text).map_err(|e| parse_error(e.to_string()))
        }
    }
}

/// Encodes any serde type as a `format` document.
pub fn encode<T: Serialize>(value: &T, format: ManifestFormat) -> PluginResult<String> {
    let encode_error = |message: String| PluginError::Parse {
        source_name: "<encoder>".to_string(),
        format: format.to_string(),
        message,
    };

    match format {
        ManifestFormat::Yaml => serde_yaml::to_string(value).map_err(|e| encode_error(e.to_string())),
        ManifestFormat::Json => {
            serde_json::to_string_pretty(value).map_err(|e| encode_error(e.to_string()))
        }
        ManifestFormat::Toml => {
            toml::to_string_pretty(value).map_err(|e| encode_error(e.to_string()))
        }
    }
}

/// Decodes a manifest without validating it.
pub fn parse_manifest(bytes: &[u8], format: ManifestFormat) -> PluginResult<Manifest> {
    decode(bytes, format, "<manifest>")
}

/// Decodes and validates a manifest.
pub fn parse_and_validate(
    bytes: &[u8],
    format: ManifestFormat,
    source_name: &str,
) -> PluginResult<Manifest> {
    let manifest: Manifest = decode(bytes, format, source_name)?;
    validate_manifest(&manifest)?;
    Ok(manifest)
}

/// Resolves a manifest path: files are returned as is, directories are
/// probed for one of [`MANIFEST_FILE_NAMES`].
pub async fn resolve_manifest_path(path: &Path) -> PluginResult<PathBuf> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| PluginError::io(path, &e))?;

    if !metadata.is_dir() {
        return Ok(path.to_path_buf());
    }

    for name in MANIFEST_FILE_NAMES {
        let candidate = path.join(name);
        if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return Ok(candidate);
        }
    }

    Err(PluginError::Io {
        path: path.display().to_string(),
        message: format!("no manifest found (looked for {})", MANIFEST_FILE_NAMES.join(", ")),
    })
}

/// Reads, decodes, and validates the manifest at `path`.
pub async fn read_manifest(path: &Path) -> PluginResult<(Manifest, PathBuf)> {
    let file = resolve_manifest_path(path).await?;
    let format = ManifestFormat::from_path(&file)?;
    let bytes = tokio::fs::read(&file)
        .await
        .map_err(|e| PluginError::io(&file, &e))?;

    debug!(path = %file.display(), format = %format, "Reading manifest");

    let manifest = parse_and_validate(&bytes, format, &file.display().to_string())?;
    Ok((manifest, file))
}
