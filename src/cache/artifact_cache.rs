//! Build and run-output caching keyed by execution context
//!
//! Build cache layout: `<build_root>/<system>/<partition>/<environment>/<test>/<executable>`.
//! Run-output cache layout: `<cache_root>/<test output dir relative to the output root>`.
//!
//! Existence of the expected path is the only state: there are no manifests,
//! lock files, or eviction. Removing a directory invalidates its entries.

use log::{debug, info};
use std::fs;
use std::path::{Component, Path, PathBuf};

use super::fs_util::{copy_tree, publish_file};
use super::key::{ArtifactKind, ArtifactRecord, BuildKey, validate_executable};
use crate::config::CacheConfig;
use crate::errors::{ExtrasError, IoContext, Result};

/// Script run in place of the real executable when run output is cached
pub const NOOP_SCRIPT: &str = "#!/bin/bash\necho \"noop $@\"\n";

/// Result of looking up a build
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildLookup {
    Cached(ArtifactRecord),
    Miss,
}

impl BuildLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, BuildLookup::Cached(_))
    }
}

/// How the build phase should run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildStep {
    /// The test's own build system
    #[default]
    Configured,
    /// Emit no build commands
    NoOp,
}

/// Changes the driver applies to a test when its build is cached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSubstitution {
    pub build_step: BuildStep,
    /// Directory to copy into the stage directory instead of the original sources
    pub sources_dir: PathBuf,
}

/// Changes the driver applies to a test when its run output is cached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSubstitution {
    /// Executable to invoke instead of the real one, relative to the stage directory
    pub executable: String,
    pub script_path: PathBuf,
}

/// Recorded run output restored into a stage directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredRunOutput {
    /// The cache entry, with `artifact_path` set to the recorded directory
    pub record: ArtifactRecord,
    /// Files copied, relative to the stage directory, sorted
    pub files: Vec<PathBuf>,
}

/// Where a test's run output cache lives
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RunCacheSetting {
    #[default]
    Disabled,
    /// Use the cache's default run-cache root
    DefaultRoot,
    /// Use this root instead
    Root(PathBuf),
}

impl RunCacheSetting {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, RunCacheSetting::Disabled)
    }
}

/// Persistent cache of build artifacts and recorded run output.
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    build_root: PathBuf,
    run_cache_root: PathBuf,
}

impl ArtifactCache {
    pub fn new(build_root: impl Into<PathBuf>) -> Self {
        Self {
            build_root: build_root.into(),
            run_cache_root: CacheConfig::default().run_cache_root,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            build_root: config.build_root.clone(),
            run_cache_root: config.run_cache_root.clone(),
        }
    }

    pub fn with_run_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.run_cache_root = root.into();
        self
    }

    pub fn build_root(&self) -> &Path {
        &self.build_root
    }

    pub fn run_cache_root(&self) -> &Path {
        &self.run_cache_root
    }

    /// Run-cache root for a test's setting, or `None` if run caching is off
    pub fn run_cache_root_for(&self, setting: &RunCacheSetting) -> Option<PathBuf> {
        match setting {
            RunCacheSetting::Disabled => None,
            RunCacheSetting::DefaultRoot => Some(self.run_cache_root.clone()),
            RunCacheSetting::Root(root) => Some(root.clone()),
        }
    }

    /// Directory holding the cached build for `key`
    pub fn build_dir(&self, key: &BuildKey) -> PathBuf {
        self.build_root.join(key.relative_dir())
    }

    /// Canonical location of `executable` (relative, may contain
    /// subdirectories) in the cache for `key`
    pub fn build_artifact_path(&self, key: &BuildKey, executable: &Path) -> Result<PathBuf> {
        validate_executable(executable)?;
        Ok(self.build_dir(key).join(executable))
    }

    /// Check whether a build of `executable` is cached for `key`. Only looks at
    /// the filesystem.
    pub fn resolve_build(&self, key: &BuildKey, executable: &Path) -> Result<BuildLookup> {
        let path = self.build_artifact_path(key, executable)?;
        if path.is_file() {
            info!("found exe at {}", path.display());
            Ok(BuildLookup::Cached(ArtifactRecord {
                key: key.clone(),
                artifact_path: path,
                kind: ArtifactKind::Build,
            }))
        } else {
            debug!("no cached build for {} at {}", key, path.display());
            Ok(BuildLookup::Miss)
        }
    }

    /// Store `produced`, the output of a real build, as the cached `executable`
    /// for `key`. Readers never observe a partially written file.
    pub fn on_build_miss_complete(
        &self,
        key: &BuildKey,
        executable: &Path,
        produced: &Path,
    ) -> Result<ArtifactRecord> {
        let path = self.build_artifact_path(key, executable)?;
        publish_file(produced, &path)?;
        info!("copied exe to {}", path.display());
        Ok(ArtifactRecord {
            key: key.clone(),
            artifact_path: path,
            kind: ArtifactKind::Build,
        })
    }

    /// Build substitution for a cache hit: skip the build and stage the test
    /// from the cache directory so the cached binary is copied in as if it had
    /// just been built.
    pub fn on_cache_hit(&self, record: &ArtifactRecord) -> BuildSubstitution {
        BuildSubstitution {
            build_step: BuildStep::NoOp,
            sources_dir: self.build_dir(&record.key),
        }
    }

    /// Directory under `cache_root` mirroring `output_dir`'s position below
    /// `output_root`. The relative part may only descend, so the result
    /// always lies inside `cache_root`.
    pub fn run_cache_dir(cache_root: &Path, output_dir: &Path, output_root: &Path) -> Result<PathBuf> {
        let invalid = |reason: String| ExtrasError::InvalidPath {
            path: output_dir.to_path_buf(),
            reason,
        };
        let rel = output_dir
            .strip_prefix(output_root)
            .map_err(|_| invalid(format!("not under output root {}", output_root.display())))?;
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(invalid(format!(
                "escapes output root {}",
                output_root.display()
            )));
        }
        Ok(cache_root.join(rel))
    }

    /// Copy recorded output for `key`, whose output directory is
    /// `output_dir`, into `stage_dir`. The cache entry must exist: a missing
    /// entry is an error and nothing is copied.
    pub fn resolve_run_output(
        &self,
        key: &BuildKey,
        cache_root: &Path,
        output_dir: &Path,
        output_root: &Path,
        stage_dir: &Path,
    ) -> Result<RestoredRunOutput> {
        let saved = Self::run_cache_dir(cache_root, output_dir, output_root)?;
        if !saved.is_dir() {
            let path = std::path::absolute(&saved).unwrap_or(saved);
            return Err(ExtrasError::MissingCacheEntry { path });
        }

        fs::create_dir_all(stage_dir)
            .io_context(|| format!("failed to create stage directory {}", stage_dir.display()))?;
        let files = copy_tree(&saved, stage_dir)?;
        info!(
            "restored {} cached output files for {} from {}",
            files.len(),
            key,
            saved.display()
        );
        Ok(RestoredRunOutput {
            record: ArtifactRecord {
                key: key.clone(),
                artifact_path: saved,
                kind: ArtifactKind::RunOutput,
            },
            files,
        })
    }

    /// Write the no-op script into `stage_dir` and return the executable that
    /// replaces the test's real one.
    pub fn prepare_noop_run(stage_dir: &Path, script_name: &str) -> Result<RunSubstitution> {
        let script_path = stage_dir.join(script_name);
        fs::write(&script_path, NOOP_SCRIPT)
            .io_context(|| format!("failed to write {}", script_path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let mut perms = fs::metadata(&script_path)
                .io_context(|| format!("failed to stat {}", script_path.display()))?
                .permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&script_path, perms)
                .io_context(|| format!("failed to chmod {}", script_path.display()))?;
        }

        debug!("Created no-op run script: {}", script_path.display());
        Ok(RunSubstitution {
            executable: format!("./{}", script_name),
            script_path,
        })
    }
}
