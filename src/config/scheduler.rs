//! Scheduler query configuration

use serde::{Deserialize, Serialize};

/// How to query the batch scheduler and which node states to count
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Executable used to list nodes
    pub sinfo_exec: String,

    /// Executable used to expand hostlist expressions
    pub scontrol_exec: String,

    /// Node states never counted in an inventory (e.g. "down", "drain")
    pub exclude_states: Vec<String>,

    /// If non-empty, only nodes in these states are counted
    pub only_states: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sinfo_exec: "sinfo".to_string(),
            scontrol_exec: "scontrol".to_string(),
            exclude_states: Vec::new(),
            only_states: Vec::new(),
        }
    }
}
