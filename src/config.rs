/// Catalog configuration
///
/// Loaded from a JSON file; every field has a default so a partial (or
/// empty) file is valid. The database lives in the user's data directory
/// unless configured otherwise:
/// - Linux: ~/.local/share/raw-catalog/catalog.db
/// - macOS: ~/Library/Application Support/raw-catalog/catalog.db
/// - Windows: %APPDATA%\raw-catalog\catalog.db

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub database_path: PathBuf,
    pub roots: Vec<RootConfig>,
    pub scan: ScanConfig,
}

/// A collection root to register on open
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootConfig {
    pub label: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Lower-case file extensions to catalog; empty accepts every file
    pub extensions: Vec<String>,
    /// Skip files and directories whose name starts with '.'
    pub skip_hidden: bool,
    pub follow_links: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self { database_path: default_database_path(), roots: Vec::new(), scan: ScanConfig::default() }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self { extensions: Vec::new(), skip_hidden: true, follow_links: true }
    }
}

impl CatalogConfig {
    /// Read a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Configuration with a single collection root
    pub fn with_root(mut self, label: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.roots.push(RootConfig { label: label.into(), path: path.into() });
        self
    }
}

impl ScanConfig {
    /// Whether a file with this name should be cataloged
    pub fn accepts(&self, file_name: &str) -> bool {
        if self.skip_hidden && file_name.starts_with('.') {
            return false;
        }
        if self.extensions.is_empty() {
            return true;
        }
        let Some((_, ext)) = file_name.rsplit_once('.') else {
            return false;
        };
        let ext = ext.to_ascii_lowercase();
        self.extensions.iter().any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(&ext))
    }
}

/// `<data_dir>/raw-catalog/catalog.db`, falling back to the home directory
/// and then the working directory.
pub fn default_database_path() -> PathBuf {
    let mut path = dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."));

    path.push("raw-catalog");
    path.push("catalog.db");
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = CatalogConfig::from_json(
            r#"{ "roots": [{ "label": "Photos", "path": "/photos" }], "scan": { "extensions": ["jpg"] } }"#,
        )
        .unwrap();

        assert_eq!(config.database_path, default_database_path());
        assert_eq!(config.roots[0].path, PathBuf::from("/photos"));
        assert!(config.scan.skip_hidden);
        assert!(config.scan.follow_links);
    }

    #[test]
    fn test_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("catalog.json");
        let config = CatalogConfig { database_path: dir.path().join("c.db"), ..Default::default() }
            .with_root("Photos", "/photos");
        std::fs::write(&file, config.to_json().unwrap()).unwrap();

        assert_eq!(CatalogConfig::load(&file).unwrap(), config);
    }

    #[test]
    fn test_load_errors() {
        let err = CatalogConfig::load("/nonexistent/catalog.json").unwrap_err();
        assert!(err.is_storage());
        assert!(matches!(CatalogConfig::from_json("{ nope"), Err(Error::Serialization(_))));
    }

    #[test]
    fn test_default_path_ends_with_app_dir() {
        assert!(default_database_path().ends_with("raw-catalog/catalog.db"));
    }

    #[rstest]
    #[case(&[], "IMG_0001.NEF", true)]
    #[case(&[], ".hidden.jpg", false)]
    #[case(&["jpg", "nef"], "IMG_0001.NEF", true)]
    #[case(&["jpg", ".nef"], "IMG_0001.nef", true)]
    #[case(&["jpg"], "notes.txt", false)]
    #[case(&["jpg"], "README", false)]
    fn test_accepts(#[case] extensions: &[&str], #[case] name: &str, #[case] accepted: bool) {
        let scan = ScanConfig { extensions: extensions.iter().map(|e| e.to_string()).collect(), ..Default::default() };
        assert_eq!(scan.accepts(name), accepted);
    }
}
