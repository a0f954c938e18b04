//! Phase hooks called by a test-execution engine around build and run
//!
//! The engine owns a [`TestContext`] per test instance and calls the hooks at
//! fixed points: `before_build` and `after_build` around the build phase,
//! `before_run` just before the executable is launched.

use log::{debug, info};
use std::path::{Path, PathBuf};

use super::artifact_cache::{ArtifactCache, BuildLookup, BuildStep, RunCacheSetting};
use super::key::BuildKey;
use crate::config::CacheConfig;
use crate::errors::Result;

/// The parts of a test instance the caching hooks read and modify
#[derive(Debug, Clone)]
pub struct TestContext {
    pub key: BuildKey,
    /// Executable path relative to the stage directory
    pub executable: String,
    pub executable_opts: Vec<String>,
    pub stage_dir: PathBuf,
    /// The test's output directory
    pub output_dir: PathBuf,
    /// Root of all test output directories
    pub output_root: PathBuf,
    /// Directory copied into the stage directory before building, if any
    pub sources_dir: Option<PathBuf>,
    pub build_step: BuildStep,
    /// Cached executable used for this test; `None` means it was built
    pub build_path: Option<PathBuf>,
}

impl TestContext {
    pub fn new(
        key: BuildKey,
        executable: impl Into<String>,
        stage_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            key,
            executable: executable.into(),
            executable_opts: Vec::new(),
            stage_dir: stage_dir.into(),
            output_dir: output_dir.into(),
            output_root: output_root.into(),
            sources_dir: None,
            build_step: BuildStep::Configured,
            build_path: None,
        }
    }
}

/// Callbacks invoked by the execution engine at phase boundaries
pub trait TestPhaseHooks {
    fn before_build(&self, test: &mut TestContext) -> Result<()>;

    fn after_build(&self, test: &mut TestContext) -> Result<()>;

    fn before_run(&self, test: &mut TestContext) -> Result<()>;
}

/// Hooks that reuse cached builds and/or replay cached run output.
///
/// Tests using run caching must not change `executable` after `before_run`.
#[derive(Debug, Clone)]
pub struct CachingHooks {
    pub cache: ArtifactCache,
    pub build_caching: bool,
    pub run_cache: RunCacheSetting,
    pub noop_script: String,
}

impl CachingHooks {
    pub fn new(cache: ArtifactCache) -> Self {
        Self {
            cache,
            build_caching: false,
            run_cache: RunCacheSetting::Disabled,
            noop_script: "noop.sh".to_string(),
        }
    }

    /// Hooks for the configured cache roots and no-op script, with both
    /// caches disabled until opted into
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(ArtifactCache::from_config(config)).with_noop_script(config.noop_script.clone())
    }

    pub fn with_build_caching(mut self, enabled: bool) -> Self {
        self.build_caching = enabled;
        self
    }

    pub fn with_run_cache(mut self, setting: RunCacheSetting) -> Self {
        self.run_cache = setting;
        self
    }

    pub fn with_noop_script(mut self, name: impl Into<String>) -> Self {
        self.noop_script = name.into();
        self
    }
}

impl TestPhaseHooks for CachingHooks {
    fn before_build(&self, test: &mut TestContext) -> Result<()> {
        if !self.build_caching {
            return Ok(());
        }

        match self
            .cache
            .resolve_build(&test.key, Path::new(&test.executable))?
        {
            BuildLookup::Cached(record) => {
                let sub = self.cache.on_cache_hit(&record);
                test.build_step = sub.build_step;
                test.sources_dir = Some(sub.sources_dir);
                test.build_path = Some(record.artifact_path);
            }
            BuildLookup::Miss => test.build_path = None,
        }
        Ok(())
    }

    fn after_build(&self, test: &mut TestContext) -> Result<()> {
        if !self.build_caching || test.build_path.is_some() {
            return Ok(());
        }

        let produced = test.stage_dir.join(&test.executable);
        self.cache
            .on_build_miss_complete(&test.key, Path::new(&test.executable), &produced)?;
        Ok(())
    }

    fn before_run(&self, test: &mut TestContext) -> Result<()> {
        let Some(cache_root) = self.cache.run_cache_root_for(&self.run_cache) else {
            return Ok(());
        };

        let restored = self.cache.resolve_run_output(
            &test.key,
            &cache_root,
            &test.output_dir,
            &test.output_root,
            &test.stage_dir,
        )?;

        let sub = ArtifactCache::prepare_noop_run(&test.stage_dir, &self.noop_script)?;
        debug!(
            "Replacing executable {} with {} for {}",
            test.executable, sub.executable, test.key
        );
        test.executable = sub.executable;
        info!(
            "Using cached run output for {} from {}",
            test.key,
            restored.record.artifact_path.display()
        );
        Ok(())
    }
}
