//! Engine Configuration
//!
//! `EngineConfig` is read from TOML; the class registration table is a
//! separate flat TOML file mapping module paths to native type names.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;

/// Reserved class table key listing libraries to initialize at startup
pub const INIT_LIBS_KEY: &str = "initLibs";

/// Engine configuration (duplex.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directories probed, in order, by `require`
    pub search_paths: Vec<PathBuf>,
    /// Class registration table, skipped when missing
    pub class_table: Option<PathBuf>,
    /// Script evaluated once the engine is up, skipped when missing
    pub rc_file: Option<PathBuf>,
    /// Heap limit of the script runtime, in bytes
    pub memory_limit: Option<usize>,
    /// Stack limit of the script runtime, in bytes
    pub max_stack_size: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            search_paths: vec![PathBuf::from("."), PathBuf::from("./jsruntime")],
            class_table: Some(PathBuf::from("./classes.toml")),
            rc_file: Some(PathBuf::from("./rc.js")),
            memory_limit: None,
            max_stack_size: None,
        }
    }
}

impl EngineConfig {
    /// No search paths, no class table, no rc file
    pub fn in_memory() -> Self {
        Self {
            search_paths: Vec::new(),
            class_table: None,
            rc_file: None,
            memory_limit: None,
            max_stack_size: None,
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(path, &source)
    }

    pub fn from_toml_str(path: &Path, source: &str) -> Result<Self, ConfigError> {
        toml::from_str(source).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Class Table
// ─────────────────────────────────────────────────────────────────────────────

/// Module path to native type name, plus the libraries to initialize eagerly
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassTable {
    entries: Vec<(String, String)>,
    init_libs: Vec<String>,
}

impl ClassTable {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &source)
    }

    /// Parse a class table. Nested tables flatten to dotted keys; entries
    /// whose value is not a string are logged and skipped.
    pub fn parse(path: &Path, source: &str) -> Result<Self, ConfigError> {
        let table: toml::Table = toml::from_str(source).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let mut flat = Vec::new();
        flatten("", table, &mut flat);

        let mut class_table = ClassTable::default();
        for (key, value) in flat {
            let toml::Value::String(value) = value else {
                warn!(
                    target: "duplex.config",
                    key = %key,
                    "class table entry is not a string, skipping"
                );
                continue;
            };
            if key == INIT_LIBS_KEY {
                class_table.init_libs.extend(
                    value
                        .split(';')
                        .map(str::trim)
                        .filter(|lib| !lib.is_empty())
                        .map(str::to_string),
                );
            } else {
                class_table.entries.push((key, value));
            }
        }
        Ok(class_table)
    }

    /// `(module path, native type name)` pairs in file order
    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn init_libs(&self) -> &[String] {
        &self.init_libs
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.init_libs.is_empty()
    }
}

fn flatten(prefix: &str, table: toml::Table, out: &mut Vec<(String, toml::Value)>) {
    for (key, value) in table {
        let key = if prefix.is_empty() {
            key
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            toml::Value::Table(nested) => flatten(&key, nested, out),
            other => out.push((key, other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.search_paths, vec![PathBuf::from("."), PathBuf::from("./jsruntime")]);
        assert_eq!(config.class_table, Some(PathBuf::from("./classes.toml")));
        assert_eq!(config.rc_file, Some(PathBuf::from("./rc.js")));
    }

    #[test]
    fn test_partial_config() {
        let config = EngineConfig::from_toml_str(
            Path::new("duplex.toml"),
            "search_paths = [\"scripts\"]\nmemory_limit = 1048576\n",
        )
        .unwrap();
        assert_eq!(config.search_paths, vec![PathBuf::from("scripts")]);
        assert_eq!(config.memory_limit, Some(1_048_576));
        assert_eq!(config.rc_file, Some(PathBuf::from("./rc.js")));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = EngineConfig::load(&dir.path().join("missing.toml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_parse_class_table() {
        let source = r#"
"demo.greeter" = "Greeter"
initLibs = "base.print; ;demo.extra;"

[ui]
label = "Label"
broken = 3
"#;
        let table = ClassTable::parse(Path::new("classes.toml"), source).unwrap();
        let mut entries = table.entries().to_vec();
        entries.sort();
        assert_eq!(
            entries,
            vec![
                ("demo.greeter".to_string(), "Greeter".to_string()),
                ("ui.label".to_string(), "Label".to_string()),
            ]
        );
        assert_eq!(table.init_libs(), ["base.print", "demo.extra"]);
    }

    #[test]
    fn test_malformed_class_table() {
        let result = ClassTable::parse(Path::new("classes.toml"), "this is = = not toml");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }
}
