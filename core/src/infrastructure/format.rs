//! Configuration File Formats
//!
//! Two structural formats are supported for both reading and writing: the
//! whitespace-significant format (YAML) and the brace-delimited format
//! (JSON). Detection is by extension first, content second; the format that
//! parsed is remembered so re-writes preserve it.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::domain::context::CONFIG_EXTENSIONS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigFormat {
    #[default]
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Guess the format from the file extension. `None` when the extension
    /// is unrecognized and content detection must decide.
    pub fn from_extension(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str())? {
            "yml" | "yaml" => Some(ConfigFormat::Yaml),
            "json" => Some(ConfigFormat::Json),
            _ => None,
        }
    }

    /// Extensions the fragment walker recognizes.
    pub const EXTENSIONS: [&'static str; 3] = CONFIG_EXTENSIONS;
}

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("failed to read {path}: {error}")]
    Read { path: String, error: String },

    #[error("failed to write {path}: {error}")]
    Write { path: String, error: String },

    #[error("{path} parsed as neither YAML nor JSON: {error}")]
    Parse { path: String, error: String },

    #[error("serialization failed: {0}")]
    Serialize(String),
}

/// Read and deserialize a config file, detecting its format.
///
/// The extension-preferred format is tried first; on a parse failure the
/// other format is tried before giving up.
pub fn read_config<T: DeserializeOwned>(path: &Path) -> Result<(T, ConfigFormat), FormatError> {
    let content = fs::read_to_string(path).map_err(|e| FormatError::Read {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;

    let preferred = ConfigFormat::from_extension(path).unwrap_or(ConfigFormat::Yaml);
    let order = match preferred {
        ConfigFormat::Yaml => [ConfigFormat::Yaml, ConfigFormat::Json],
        ConfigFormat::Json => [ConfigFormat::Json, ConfigFormat::Yaml],
    };

    let mut first_error = None;
    for format in order {
        match deserialize(&content, format) {
            Ok(value) => return Ok((value, format)),
            Err(e) => first_error.get_or_insert(e),
        };
    }

    Err(FormatError::Parse {
        path: path.display().to_string(),
        error: first_error.unwrap_or_else(|| "empty input".to_string()),
    })
}

fn deserialize<T: DeserializeOwned>(content: &str, format: ConfigFormat) -> Result<T, String> {
    match format {
        ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
        ConfigFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
    }
}

/// Serialize `value` in `format`.
pub fn serialize<T: Serialize>(value: &T, format: ConfigFormat) -> Result<String, FormatError> {
    match format {
        ConfigFormat::Yaml => {
            serde_yaml::to_string(value).map_err(|e| FormatError::Serialize(e.to_string()))
        }
        ConfigFormat::Json => serde_json::to_string_pretty(value)
            .map_err(|e| FormatError::Serialize(e.to_string())),
    }
}

/// Write a config file atomically: serialize, write a temp sibling, rename
/// over the target. Override files must never be left half-written because
/// their mere existence shadows the default twin.
pub fn write_config<T: Serialize>(
    path: &Path,
    value: &T,
    format: ConfigFormat,
) -> Result<(), FormatError> {
    let content = serialize(value, format)?;
    write_atomic(path, &content)
}

fn write_atomic(path: &Path, content: &str) -> Result<(), FormatError> {
    let write_err = |e: std::io::Error| FormatError::Write {
        path: path.display().to_string(),
        error: e.to_string(),
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
    }

    let tmp = temp_sibling(path);
    fs::write(&tmp, content).map_err(write_err)?;
    fs::rename(&tmp, path).map_err(write_err)?;
    Ok(())
}

/// Temp name next to the target, keeping the full file name so siblings
/// differing only in extension (`a.yml`, `a.json`) never share one.
fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn test_reads_yaml_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.yml");
        std::fs::write(&path, "name: a\ncount: 2\n").unwrap();

        let (value, format): (Sample, _) = read_config(&path).unwrap();
        assert_eq!(format, ConfigFormat::Yaml);
        assert_eq!(value.count, 2);
    }

    #[test]
    fn test_falls_back_to_json_content() {
        let dir = tempfile::tempdir().unwrap();
        // JSON body behind a .yml extension still loads; YAML happens to be
        // a superset of JSON, so the remembered format stays YAML.
        let path = dir.path().join("sample.json");
        std::fs::write(&path, r#"{"name": "a", "count": 3}"#).unwrap();

        let (value, format): (Sample, _) = read_config(&path).unwrap();
        assert_eq!(format, ConfigFormat::Json);
        assert_eq!(value.name, "a");
    }

    #[test]
    fn test_round_trip_preserves_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        let sample = Sample {
            name: "x".into(),
            count: 7,
        };
        write_config(&path, &sample, ConfigFormat::Json).unwrap();

        let (read, format): (Sample, _) = read_config(&path).unwrap();
        assert_eq!(read, sample);
        assert_eq!(format, ConfigFormat::Json);
    }

    #[test]
    fn test_temp_sibling_keeps_full_name() {
        assert_eq!(
            temp_sibling(Path::new("/ctx/a.yml")),
            PathBuf::from("/ctx/a.yml.tmp")
        );
        // Extension-only siblings get distinct temp names.
        assert_ne!(
            temp_sibling(Path::new("/ctx/a.yml")),
            temp_sibling(Path::new("/ctx/a.json"))
        );
    }

    #[test]
    fn test_unparsable_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yml");
        std::fs::write(&path, "{ not: [ valid").unwrap();

        let result: Result<(Sample, _), _> = read_config(&path);
        assert!(matches!(result, Err(FormatError::Parse { .. })));
    }
}
