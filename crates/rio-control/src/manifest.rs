//! Loading desired state from disk.
//!
//! Package manifests and state files are JSON or YAML, chosen by extension.
//! YAML is parsed into `serde_yaml::Value` and converted, so both formats
//! produce the same `serde_json::Value` documents.

use std::path::Path;

use serde_json::Value;

use crate::error::{ControlError, Result};
use crate::types::StateEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Yaml,
}

fn format_of(path: &Path) -> Result<Format> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => Ok(Format::Json),
        Some("yaml" | "yml") => Ok(Format::Yaml),
        _ => Err(ControlError::InvalidManifest(format!(
            "{}: expected a .json, .yaml or .yml file",
            path.display()
        ))),
    }
}

fn read_document(path: &Path) -> Result<Value> {
    let format = format_of(path)?;
    let text = std::fs::read_to_string(path)
        .map_err(|e| ControlError::InvalidManifest(format!("{}: {e}", path.display())))?;

    let parsed = match format {
        Format::Json => serde_json::from_str(&text).map_err(|e| e.to_string()),
        Format::Yaml => serde_yaml::from_str::<serde_yaml::Value>(&text)
            .map_err(|e| e.to_string())
            .and_then(|yaml| serde_json::to_value(yaml).map_err(|e| e.to_string())),
    };
    parsed.map_err(|e| ControlError::InvalidManifest(format!("{}: {e}", path.display())))
}

/// Load a package manifest from a `.json`, `.yaml` or `.yml` file.
///
/// # Errors
///
/// Returns `ControlError::InvalidManifest` if the extension is not supported
/// or the file cannot be read or parsed.
pub fn load_manifest(path: &Path) -> Result<Value> {
    let manifest = read_document(path)?;
    tracing::debug!(path = %path.display(), "Loaded package manifest");
    Ok(manifest)
}

/// Load the entries of a state file.
///
/// The file holds a list of entries. Relative manifest `source` paths are
/// resolved against the directory of the state file.
///
/// # Errors
///
/// Returns `ControlError::InvalidManifest` if the file cannot be loaded or an
/// entry is malformed.
pub fn load_state(path: &Path) -> Result<Vec<StateEntry>> {
    let document = read_document(path)?;
    let mut entries: Vec<StateEntry> = serde_json::from_value(document)
        .map_err(|e| ControlError::InvalidManifest(format!("{}: {e}", path.display())))?;

    let base = path.parent().unwrap_or_else(|| Path::new(""));
    for entry in &mut entries {
        if let StateEntry::Package {
            source: Some(source),
            ..
        } = entry
        {
            if source.is_relative() {
                *source = base.join(&*source);
            }
        }
    }

    tracing::info!(path = %path.display(), entries = entries.len(), "Loaded state file");
    Ok(entries)
}
