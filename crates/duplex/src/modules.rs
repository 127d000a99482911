//! Module Resolution
//!
//! Maps a dotted module path such as `util.binding` to script source. Files
//! under the search paths are probed first, in order; modules defined in
//! memory (the built-ins and anything the host defines) come last.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{BridgeResult, ScriptNotFound};

const BINDING_SOURCE: &str = include_str!("js/binding.js");

/// Source of a resolved module
#[derive(Debug, Clone)]
pub struct ModuleScript {
    /// Cache key: the file location, or `memory:<path>` for in-memory modules
    pub key: String,
    pub source: String,
}

#[derive(Debug)]
pub struct ModuleLoader {
    search_paths: Vec<PathBuf>,
    memory: HashMap<String, String>,
}

impl ModuleLoader {
    pub fn new(search_paths: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut loader = Self {
            search_paths: search_paths.into_iter().collect(),
            memory: HashMap::new(),
        };
        loader.define("binding", BINDING_SOURCE);
        loader.define("util.binding", BINDING_SOURCE);
        loader
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    pub fn add_search_path(&mut self, path: impl Into<PathBuf>) {
        self.search_paths.push(path.into());
    }

    /// Define an in-memory module. Replaces an earlier definition.
    pub fn define(&mut self, module_path: &str, source: impl Into<String>) {
        self.memory.insert(normalize(module_path), source.into());
    }

    pub fn is_defined(&self, module_path: &str) -> bool {
        self.memory.contains_key(&normalize(module_path))
    }

    /// Relative file name for a module path: `util.binding` -> `util/binding.js`
    pub fn file_name(module_path: &str) -> PathBuf {
        let normalized = normalize(module_path);
        PathBuf::from(format!("{}.js", normalized.replace('.', "/")))
    }

    /// First existing file for the module under the search paths
    pub fn find_file(&self, module_path: &str) -> Option<PathBuf> {
        let relative = Self::file_name(module_path);
        for dir in &self.search_paths {
            if !dir.exists() {
                warn!(target: "duplex.modules", path = %dir.display(), "search path does not exist");
                continue;
            }
            if !dir.is_dir() {
                warn!(target: "duplex.modules", path = %dir.display(), "search path is not a directory");
                continue;
            }
            let candidate = dir.join(&relative);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }

    pub fn resolve(&self, module_path: &str) -> BridgeResult<ModuleScript> {
        if let Some(file) = self.find_file(module_path) {
            debug!(target: "duplex.modules", module = module_path, file = %file.display(), "resolved module file");
            let source = std::fs::read_to_string(&file)?;
            return Ok(ModuleScript {
                key: canonical_key(&file),
                source,
            });
        }

        let normalized = normalize(module_path);
        match self.memory.get(&normalized) {
            Some(source) => Ok(ModuleScript {
                key: format!("memory:{normalized}"),
                source: source.clone(),
            }),
            None => Err(ScriptNotFound {
                path: module_path.to_string(),
                search_paths: self.search_paths.clone(),
            }
            .into()),
        }
    }
}

fn normalize(module_path: &str) -> String {
    let trimmed = module_path.trim();
    trimmed.strip_suffix(".js").unwrap_or(trimmed).to_string()
}

fn canonical_key(file: &Path) -> String {
    std::fs::canonicalize(file)
        .unwrap_or_else(|_| file.to_path_buf())
        .display()
        .to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
