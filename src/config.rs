use crate::{error::DocTreeError, fsutil::write_atomic};
use serde::{Deserialize, Serialize};
use std::{
    fs::read_to_string,
    path::{Path, PathBuf},
};

fn default_projects_root() -> PathBuf {
    PathBuf::from("./projects")
}

/// Engine settings, read from TOML. Every field has a default, so an empty file is valid.
///
/// ```toml
/// projects_root = "/var/lib/doctree"
///
/// [search]
/// max_results = 20
///
/// [history]
/// retain = 25
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_projects_root")]
    pub projects_root: PathBuf,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            projects_root: default_projects_root(),
            search: SearchConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub max_results: usize,
    /// Context captured on each side of a match, in bytes.
    pub context_chars: usize,
    pub suggestion_limit: usize,
    /// Only this much of each body is tokenized for suggestions.
    pub suggestion_scan_chars: usize,
    pub summary_chars: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            max_results: 50,
            context_chars: 100,
            suggestion_limit: 10,
            suggestion_scan_chars: 5000,
            summary_chars: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Snapshots kept per node. `None` keeps everything.
    pub retain: Option<usize>,
}

impl EngineConfig {
    /// Read `path`, falling back to defaults when it does not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DocTreeError> {
        let path = path.as_ref();
        tracing::debug!("Attempting to read engine config from: {:?}", path);
        if !path.exists() {
            tracing::debug!("Config file not found, using defaults.");
            return Ok(EngineConfig::default());
        }
        let content = read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), DocTreeError> {
        let path = path.as_ref();
        tracing::debug!("Attempting to write engine config to: {:?}", path);
        let toml_string = toml::to_string(self)?;
        write_atomic(path, toml_string.as_bytes())
    }

    /// Where a project's index and content files live.
    pub fn project_dir(&self, project_id: &str) -> PathBuf {
        self.projects_root.join(project_id).join("documents")
    }
}
