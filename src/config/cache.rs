//! Artifact cache configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where build and run-output caches live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Root of the build cache (`<build_root>/<system>/<partition>/<environment>/<test>`)
    pub build_root: PathBuf,

    /// Default root of the run-output cache; tests may override it
    pub run_cache_root: PathBuf,

    /// File name of the script substituted for the executable on cached runs
    pub noop_script: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            build_root: PathBuf::from("builds"),
            run_cache_root: PathBuf::from("cache"),
            noop_script: "noop.sh".to_string(),
        }
    }
}
