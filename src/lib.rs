//! Extensions for running HPC benchmark suites across clusters
//!
//! Two independent pieces:
//!
//! - [`cache`]: reuse build artifacts and recorded run output across repeated
//!   test invocations, keyed by system, partition, environment and test.
//! - [`hpc`]: query the batch scheduler for the nodes a job could use and
//!   summarise them as a homogeneous pool.

pub mod cache;
pub mod config;
pub mod errors;
pub mod hpc;
pub mod sequence;

pub use cache::{ArtifactCache, BuildKey, CachingHooks, TestContext, TestPhaseHooks};
pub use config::ExtrasConfig;
pub use errors::{ExtrasError, Result};
pub use hpc::{NodeInventory, NodeInventorySummary, SchedulerInterface, SlurmInterface};
pub use sequence::sequence;
