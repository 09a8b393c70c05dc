//! Optional `covlens.toml` configuration.
//!
//! ```toml
//! roots = ["/home/me/project", "/home/me/vendor"]
//! reports = ["target/lcov.info"]
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{CovlensError, Result};

/// File name looked up in the working directory when no config is given.
pub const DEFAULT_CONFIG_FILE: &str = "covlens.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Candidate workspace roots, in priority order.
    pub roots: Vec<PathBuf>,
    /// LCOV reports to ingest.
    pub reports: Vec<PathBuf>,
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| CovlensError::Config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| CovlensError::Config(format!("{}: {e}", path.display())))
    }

    /// Load `path` if given, otherwise `covlens.toml` if present, otherwise
    /// an empty config.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.is_file() {
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Append command-line roots and reports after the configured ones.
    pub fn extend(&mut self, roots: Vec<PathBuf>, reports: Vec<PathBuf>) {
        self.roots.extend(roots);
        self.reports.extend(reports);
    }
}
