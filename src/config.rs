//! Engine configuration, loadable from TOML.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::LiveError;
use crate::eval::DEFAULT_RECURSION_LIMIT;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Defaults for every context created by a registry
    #[serde(default)]
    pub context: ContextConfig,

    /// Reload coordinator settings
    #[serde(default)]
    pub reload: ReloadConfig,

    /// Filesystem watch settings
    #[serde(default)]
    pub watch: WatchConfig,
}

/// Which kinds of top-level forms a context executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Bind `import` definitions
    #[serde(default = "default_true")]
    pub execute_imports: bool,

    /// Bind `defn` and `deftype` definitions
    #[serde(default = "default_true")]
    pub define_functions: bool,

    /// Evaluate `def` bodies and run statements
    #[serde(default = "default_true")]
    pub run_code: bool,

    /// Maximum nesting of function calls
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReloadConfig {
    /// End a cycle early when the file content hash did not change
    #[serde(default = "default_true")]
    pub skip_unchanged: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// File extensions that count as source, without the dot
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// How often the forwarder thread drains watcher events
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_true() -> bool {
    true
}
fn default_recursion_limit() -> usize {
    DEFAULT_RECURSION_LIMIT
}
fn default_extensions() -> Vec<String> {
    vec!["lisp".into()]
}
fn default_poll_interval() -> u64 {
    50
}

impl Default for ContextConfig {
    fn default() -> Self {
        ContextConfig {
            execute_imports: true,
            define_functions: true,
            run_code: true,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
        }
    }
}

impl Default for ReloadConfig {
    fn default() -> Self {
        ReloadConfig {
            skip_unchanged: true,
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig {
            extensions: default_extensions(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, LiveError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, LiveError> {
        let text = std::fs::read_to_string(path).map_err(|error| LiveError::Io {
            path: path.to_path_buf(),
            error,
        })?;
        Self::from_toml_str(&text)
    }
}

impl WatchConfig {
    /// True if `path` has one of the configured extensions.
    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|x| x == ext))
    }
}
