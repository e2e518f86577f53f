//! Conversion settings.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Archive path of the wrapped database inside a KPF.
pub const DEFAULT_KDF_ENTRY: &str = "resources/book.kdf";

/// Settings for one conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Entry holding the wrapped KDF database.
    pub kdf_entry: String,
    /// Directory for the unwrapped database. The system temp directory is
    /// used when unset.
    pub work_dir: Option<PathBuf>,
    /// Keep `book.sqlite` in `work_dir` after the conversion.
    pub keep_unwrapped: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kdf_entry: DEFAULT_KDF_ENTRY.to_string(),
            work_dir: None,
            keep_unwrapped: false,
        }
    }
}

impl Config {
    /// Load settings from a JSON file. Missing keys take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("kfxpack.json");
        fs::write(&path, r#"{ "keep_unwrapped": true, "work_dir": "/tmp/kdf" }"#).unwrap();

        let config = Config::from_json_file(&path).unwrap();
        assert_eq!(config.kdf_entry, DEFAULT_KDF_ENTRY);
        assert!(config.keep_unwrapped);
        assert_eq!(config.work_dir, Some(PathBuf::from("/tmp/kdf")));
    }

    #[test]
    fn test_bad_json_is_a_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("kfxpack.json");
        fs::write(&path, "{ not json").unwrap();
        let err = Config::from_json_file(&path).unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
        assert_eq!(err.class(), crate::ErrorClass::Config);
        assert!(err.to_string().starts_with("config: "));

        let missing = Config::from_json_file(dir.path().join("absent.json")).unwrap_err();
        assert_eq!(missing.class(), crate::ErrorClass::Environment);
    }
}
