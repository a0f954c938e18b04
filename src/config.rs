//! Configuration for hpc-extras
//!
//! Configuration is read from TOML files in increasing order of priority:
//! system (`/etc/hpc-extras/config.toml`), user
//! (`<config dir>/hpc-extras/config.toml`) and local (`./hpc-extras.toml`).
//! Later files override individual keys of earlier ones.

pub mod cache;
pub mod scheduler;

pub use cache::CacheConfig;
pub use scheduler::SchedulerConfig;

use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{ExtrasError, IoContext, Result};

const VALID_FORMATS: &[&str] = &["table", "json"];
const VALID_LOG_LEVELS: &[&str] = &["off", "error", "warn", "info", "debug", "trace"];

/// Output settings for the command-line tool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output format ("table" or "json")
    pub format: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: "table".to_string(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtrasConfig {
    /// Log level (off, error, warn, info, debug, trace)
    pub log_level: String,

    pub cache: CacheConfig,

    pub scheduler: SchedulerConfig,

    pub output: OutputConfig,
}

impl Default for ExtrasConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            cache: CacheConfig::default(),
            scheduler: SchedulerConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

/// Locations searched for configuration files
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub system: PathBuf,
    pub user: Option<PathBuf>,
    pub local: PathBuf,
}

impl Default for ConfigPaths {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigPaths {
    pub fn new() -> Self {
        Self {
            system: PathBuf::from("/etc/hpc-extras/config.toml"),
            user: dirs::config_dir().map(|d| d.join("hpc-extras").join("config.toml")),
            local: PathBuf::from("hpc-extras.toml"),
        }
    }

    /// Paths in priority order (lowest first), whether or not they exist
    pub fn all_paths(&self) -> Vec<&PathBuf> {
        let mut paths = vec![&self.system];
        if let Some(user) = &self.user {
            paths.push(user);
        }
        paths.push(&self.local);
        paths
    }

    /// Paths in priority order (lowest first) that exist
    pub fn existing_paths(&self) -> Vec<&PathBuf> {
        self.all_paths().into_iter().filter(|p| p.exists()).collect()
    }

    /// Directory holding the user configuration file
    pub fn user_config_dir(&self) -> Option<&Path> {
        self.user.as_deref().and_then(Path::parent)
    }
}

impl ExtrasConfig {
    /// Load configuration from the standard locations
    pub fn load() -> Result<Self> {
        Self::load_with_paths(&ConfigPaths::new())
    }

    pub fn load_with_paths(paths: &ConfigPaths) -> Result<Self> {
        let files: Vec<PathBuf> = paths.existing_paths().into_iter().cloned().collect();
        Self::load_from_files(&files)
    }

    /// Load configuration from `files`, later files taking priority. Missing
    /// files are skipped.
    pub fn load_from_files(files: &[PathBuf]) -> Result<Self> {
        let mut merged = toml::Value::Table(toml::map::Map::new());

        for path in files {
            if !path.exists() {
                debug!("Skipping missing config file {}", path.display());
                continue;
            }
            let content = fs::read_to_string(path)
                .io_context(|| format!("failed to read config file {}", path.display()))?;
            let value: toml::Value = toml::from_str(&content).map_err(|e| ExtrasError::Config {
                reason: format!("{}: {}", path.display(), e),
            })?;
            debug!("Loaded config file {}", path.display());
            merge_values(&mut merged, value);
        }

        merged.try_into().map_err(|e: toml::de::Error| ExtrasError::Config {
            reason: e.to_string(),
        })
    }

    /// Check the configuration, returning every problem found
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            errors.push(format!(
                "log_level must be one of {:?}, got '{}'",
                VALID_LOG_LEVELS, self.log_level
            ));
        }

        if self.cache.build_root.as_os_str().is_empty() {
            errors.push("cache.build_root must not be empty".to_string());
        }
        if self.cache.run_cache_root.as_os_str().is_empty() {
            errors.push("cache.run_cache_root must not be empty".to_string());
        }
        if self.cache.noop_script.is_empty() {
            errors.push("cache.noop_script must not be empty".to_string());
        } else if self.cache.noop_script.contains(['/', '\\']) {
            errors.push(format!(
                "cache.noop_script must be a file name, got '{}'",
                self.cache.noop_script
            ));
        }

        if self.scheduler.sinfo_exec.is_empty() {
            errors.push("scheduler.sinfo_exec must not be empty".to_string());
        }
        if self.scheduler.scontrol_exec.is_empty() {
            errors.push("scheduler.scontrol_exec must not be empty".to_string());
        }
        for state in &self.scheduler.exclude_states {
            if self
                .scheduler
                .only_states
                .iter()
                .any(|s| s.eq_ignore_ascii_case(state))
            {
                errors.push(format!(
                    "scheduler state '{}' is in both exclude_states and only_states",
                    state
                ));
            }
        }

        if !VALID_FORMATS.contains(&self.output.format.as_str()) {
            errors.push(format!(
                "output.format must be one of {:?}, got '{}'",
                VALID_FORMATS, self.output.format
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ExtrasError::Config {
            reason: e.to_string(),
        })
    }

    /// Commented default configuration suitable for `config init`
    pub fn generate_default_config() -> String {
        let body = Self::default()
            .to_toml()
            .unwrap_or_else(|e| format!("# failed to render defaults: {}\n", e));
        format!(
            "# hpc-extras configuration\n\
             # Files are read from /etc/hpc-extras/config.toml, the user config\n\
             # directory and ./hpc-extras.toml; later files override earlier ones.\n\n{}",
            body
        )
    }
}

/// Recursively merge `overlay` into `base`; tables merge key by key, anything
/// else is replaced.
fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_table.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_values_nested() {
        let mut base: toml::Value = toml::from_str(
            "[cache]\nbuild_root = \"a\"\nrun_cache_root = \"b\"\n",
        )
        .unwrap();
        let overlay: toml::Value = toml::from_str("[cache]\nbuild_root = \"c\"\n").unwrap();
        merge_values(&mut base, overlay);
        assert_eq!(base["cache"]["build_root"].as_str(), Some("c"));
        assert_eq!(base["cache"]["run_cache_root"].as_str(), Some("b"));
    }

    #[test]
    fn test_all_paths_order() {
        let paths = ConfigPaths {
            system: PathBuf::from("/sys.toml"),
            user: None,
            local: PathBuf::from("local.toml"),
        };
        assert_eq!(
            paths.all_paths(),
            vec![&PathBuf::from("/sys.toml"), &PathBuf::from("local.toml")]
        );
    }
}
