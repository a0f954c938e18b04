//! HPC scheduler queries
//!
//! This module provides an abstraction for reading node state from batch
//! schedulers, a Slurm implementation, and the node inventory built on top of
//! it: nodes a job could land on, validated to share one CPU layout and reduced
//! to per-node core counts.

pub mod common;
pub mod inventory;
pub mod scheduler_interface;
pub mod slurm_interface;

pub use common::{NodeState, SchedulerNode, SocketCoreThread};
pub use inventory::{AccessDirectives, NodeInventory, NodeInventorySummary};
pub use scheduler_interface::SchedulerInterface;
pub use slurm_interface::{SlurmInterface, parse_sinfo_output};
