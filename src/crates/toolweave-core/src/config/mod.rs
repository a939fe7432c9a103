//! Execution options
//!
//! [`Options`] travel with every execution tree. They carry the
//! [`DebugFlag`] injected into every debug state store, the autosave
//! settings consulted when a root context finishes, and the default worker
//! bound used by fan-out combinators.
//!
//! Options can be assembled in code, read from `TOOLWEAVE_*` environment
//! variables, or loaded from YAML:
//!
//! ```yaml
//! debug: true
//! save_on_error: true
//! save_dir: ./runs
//! max_workers: 4
//! ```

pub mod builder;
pub mod env;

pub use builder::ConfigBuilder;

use crate::error::{AgentError, Result};
use crate::state::DebugFlag;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix of the environment variables read by [`Options::from_env`]
pub const ENV_PREFIX: &str = "TOOLWEAVE_";

/// Default upper bound on concurrently running fan-out children
pub const DEFAULT_MAX_WORKERS: usize = 8;

/// Per-execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Gate of debug-scoped state
    pub debug: DebugFlag,
    /// Save the tree when its root completes
    pub save_on_success: bool,
    /// Save the tree when its root fails or is cancelled
    pub save_on_error: bool,
    /// Directory autosaved snapshots are written to
    pub save_dir: Option<PathBuf>,
    pub max_workers: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            debug: DebugFlag::default(),
            save_on_success: false,
            save_on_error: false,
            save_dir: None,
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share an existing flag instead of the one created by default
    pub fn with_debug_flag(mut self, flag: DebugFlag) -> Self {
        self.debug = flag;
        self
    }

    pub fn with_debug(self, enabled: bool) -> Self {
        self.debug.set(enabled);
        self
    }

    pub fn with_save_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_dir = Some(dir.into());
        self
    }

    pub fn with_save_on_success(mut self, enabled: bool) -> Self {
        self.save_on_success = enabled;
        self
    }

    pub fn with_save_on_error(mut self, enabled: bool) -> Self {
        self.save_on_error = enabled;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Parse options from a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let options: Options = serde_yaml::from_str(yaml)
            .map_err(|e| AgentError::Configuration(format!("Invalid options YAML: {}", e)))?;
        options.validate()?;
        Ok(options)
    }

    /// Read options from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AgentError::Configuration(format!(
                "Failed to read options file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml_str(&contents)
    }
}

impl ConfigBuilder for Options {
    fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(AgentError::Configuration(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if (self.save_on_success || self.save_on_error) && self.save_dir.is_none() {
            return Err(AgentError::Configuration(
                "autosave is enabled but save_dir is not set".to_string(),
            ));
        }
        Ok(())
    }

    fn from_env(prefix: &str) -> Result<Self> {
        let mut options = Self::default();
        if let Some(debug) = env::get_env_bool(&env::build_env_key(prefix, "debug"))? {
            options.debug.set(debug);
        }
        if let Some(v) = env::get_env_bool(&env::build_env_key(prefix, "save_on_success"))? {
            options.save_on_success = v;
        }
        if let Some(v) = env::get_env_bool(&env::build_env_key(prefix, "save_on_error"))? {
            options.save_on_error = v;
        }
        if let Some(dir) = env::get_env(&env::build_env_key(prefix, "save_dir"))? {
            options.save_dir = Some(PathBuf::from(dir));
        }
        if let Some(n) = env::get_env_parse(&env::build_env_key(prefix, "max_workers"))? {
            options.max_workers = n;
        }
        Ok(options)
    }

    fn merge(&mut self, other: Self) -> &mut Self {
        let defaults = Self::default();
        if other.debug.is_enabled() {
            self.debug.enable();
        }
        self.save_on_success |= other.save_on_success;
        self.save_on_error |= other.save_on_error;
        if other.save_dir.is_some() {
            self.save_dir = other.save_dir;
        }
        if other.max_workers != defaults.max_workers {
            self.max_workers = other.max_workers;
        }
        self
    }
}
