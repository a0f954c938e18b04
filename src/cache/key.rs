//! Cache identity: which execution context an artifact belongs to

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::errors::{ExtrasError, Result};

/// Identifies one build/run context: target system, scheduler partition,
/// toolchain environment and test.
///
/// Each component becomes exactly one directory level of the cache path, so
/// components may not be empty, `.`/`..`, or contain path separators. This
/// keeps distinct keys from mapping to the same directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BuildKey {
    system: String,
    partition: String,
    environment: String,
    test_identity: String,
}

impl BuildKey {
    pub fn new(
        system: impl Into<String>,
        partition: impl Into<String>,
        environment: impl Into<String>,
        test_identity: impl Into<String>,
    ) -> Result<Self> {
        let key = Self {
            system: system.into(),
            partition: partition.into(),
            environment: environment.into(),
            test_identity: test_identity.into(),
        };
        for (label, value) in key.components() {
            validate_component(label, value)?;
        }
        Ok(key)
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn test_identity(&self) -> &str {
        &self.test_identity
    }

    fn components(&self) -> [(&'static str, &str); 4] {
        [
            ("system", &self.system),
            ("partition", &self.partition),
            ("environment", &self.environment),
            ("test", &self.test_identity),
        ]
    }

    /// `<system>/<partition>/<environment>/<test>`
    pub fn relative_dir(&self) -> PathBuf {
        self.components().iter().map(|(_, v)| *v).collect()
    }
}

impl fmt::Display for BuildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.system, self.partition, self.environment, self.test_identity
        )
    }
}

fn validate_component(label: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(ExtrasError::invalid_key(format!("{} must not be empty", label)));
    }
    if value == "." || value == ".." {
        return Err(ExtrasError::invalid_key(format!(
            "{} must not be '{}'",
            label, value
        )));
    }
    if value.contains(['/', '\\', '\0']) {
        return Err(ExtrasError::invalid_key(format!(
            "{} '{}' contains a path separator",
            label, value
        )));
    }
    Ok(())
}

/// Check that `executable` is a relative path that stays inside the directory
/// it is joined to. It may contain subdirectories.
pub(crate) fn validate_executable(executable: &Path) -> Result<()> {
    if executable.as_os_str().is_empty() {
        return Err(ExtrasError::invalid_key("executable path must not be empty"));
    }
    for component in executable.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(ExtrasError::invalid_key(format!(
                    "executable path {} must be relative and must not contain '..'",
                    executable.display()
                )));
            }
        }
    }
    Ok(())
}

/// What a cached artifact holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// A built executable
    Build,
    /// A directory of recorded run output
    RunOutput,
}

/// One artifact in the cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactRecord {
    pub key: BuildKey,
    pub artifact_path: PathBuf,
    pub kind: ArtifactKind,
}
