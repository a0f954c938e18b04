//! Artifact caching across repeated test invocations
//!
//! Builds are cached per (system, partition, environment, test) and reused
//! instead of recompiling. Run output can be replayed from a directory tree
//! recorded earlier, with the real executable replaced by a no-op script.

pub mod artifact_cache;
mod fs_util;
pub mod hooks;
pub mod key;

pub use artifact_cache::{
    ArtifactCache, BuildLookup, BuildStep, BuildSubstitution, NOOP_SCRIPT, RestoredRunOutput,
    RunCacheSetting, RunSubstitution,
};
pub use hooks::{CachingHooks, TestContext, TestPhaseHooks};
pub use key::{ArtifactKind, ArtifactRecord, BuildKey};
