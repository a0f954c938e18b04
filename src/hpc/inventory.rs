//! Homogeneous node inventory for a scheduler partition
//!
//! The inventory is computed by a single pipeline:
//! query -> partition filter -> exclusion filter -> state filter ->
//! topology homogeneity check -> reduction to per-node counters.

use log::{debug, info};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::OnceLock;

use super::common::{SchedulerNode, SocketCoreThread};
use super::scheduler_interface::SchedulerInterface;
use crate::errors::{ExtrasError, Result};

fn directive_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*--(partition|exclude)=(\S*)\s*$").expect("directive regex is valid")
    })
}

/// Scheduler submission directives that narrow which nodes a job may use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessDirectives {
    /// Value of `--partition=NAME`
    pub partition: Option<String>,
    /// Value of `--exclude=EXPR`, a hostlist expression
    pub exclude: Option<String>,
}

impl AccessDirectives {
    /// Extract `--partition=` and `--exclude=` from free-form submission flags.
    ///
    /// Unrelated directives (e.g. `--exclusive`, `-q queue`) are ignored. When a
    /// directive is repeated the last value wins. Empty values count as absent.
    pub fn parse<S: AsRef<str>>(directives: &[S]) -> Self {
        let mut parsed = Self::default();
        for directive in directives {
            let Some(caps) = directive_regex().captures(directive.as_ref()) else {
                continue;
            };
            let value = caps[2].to_string();
            let value = (!value.is_empty()).then_some(value);
            match &caps[1] {
                "partition" => parsed.partition = value,
                _ => parsed.exclude = value,
            }
        }
        parsed
    }
}

/// Aggregate capacity of a set of identical nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInventorySummary {
    pub num_nodes: usize,
    pub sockets_per_node: u32,
    pub physical_cores_per_node: u32,
    pub logical_cores_per_node: u32,
}

impl NodeInventorySummary {
    /// Summarise `nodes`, which must all share one topology. An empty set
    /// yields an all-zero summary.
    pub fn from_nodes(nodes: &[SchedulerNode]) -> Result<Self> {
        let Some(first) = nodes.first() else {
            return Ok(Self::default());
        };

        let distinct: BTreeSet<SocketCoreThread> = nodes.iter().map(|n| n.topology).collect();
        if distinct.len() > 1 {
            let mut descriptors: Vec<String> = distinct.iter().map(|t| t.to_string()).collect();
            descriptors.sort();
            return Err(ExtrasError::HeterogeneousTopology { descriptors });
        }

        Ok(Self::from_topology(nodes.len(), first.topology))
    }

    pub fn from_topology(num_nodes: usize, topology: SocketCoreThread) -> Self {
        Self {
            num_nodes,
            sockets_per_node: topology.sockets(),
            physical_cores_per_node: topology.physical_cores(),
            logical_cores_per_node: topology.logical_cores(),
        }
    }

    pub fn total_physical_cores(&self) -> u64 {
        self.num_nodes as u64 * self.physical_cores_per_node as u64
    }

    pub fn total_logical_cores(&self) -> u64 {
        self.num_nodes as u64 * self.logical_cores_per_node as u64
    }
}

impl fmt::Display for NodeInventorySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NodeInventorySummary(num_nodes={}, sockets_per_node={}, physical_cores_per_node={}, logical_cores_per_node={})",
            self.num_nodes,
            self.sockets_per_node,
            self.physical_cores_per_node,
            self.logical_cores_per_node
        )
    }
}

/// Builds node inventories from a scheduler.
pub struct NodeInventory<S: SchedulerInterface> {
    scheduler: S,
}

impl<S: SchedulerInterface> NodeInventory<S> {
    pub fn new(scheduler: S) -> Self {
        Self { scheduler }
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// Nodes a job with `access_directives` could land on, after state filtering.
    ///
    /// Without a `--partition=` directive only nodes in the scheduler's default
    /// partition are considered.
    pub fn select_nodes<A: AsRef<str>, E: AsRef<str>, O: AsRef<str>>(
        &self,
        access_directives: &[A],
        exclude_states: &[E],
        only_states: &[O],
    ) -> Result<Vec<SchedulerNode>> {
        let access = AccessDirectives::parse(access_directives);
        debug!("Access directives: {:?}", access);

        let nodes = self.scheduler.query_nodes(access.partition.as_deref())?;
        let queried = nodes.len();

        let excluded_hosts: HashSet<String> = match access.exclude.as_deref() {
            Some(expr) => self.scheduler.expand_hostlist(expr)?.into_iter().collect(),
            None => HashSet::new(),
        };

        let selected: Vec<SchedulerNode> = nodes
            .into_iter()
            .filter(|n| match access.partition.as_deref() {
                Some(_) => true,
                None => n.is_default_partition,
            })
            .filter(|n| !excluded_hosts.contains(&n.name))
            .filter(|n| !n.state.matches_any(exclude_states))
            .filter(|n| only_states.is_empty() || n.state.matches_any(only_states))
            .collect();

        debug!(
            "Selected {} of {} nodes ({} hosts excluded by hostlist)",
            selected.len(),
            queried,
            excluded_hosts.len()
        );
        Ok(selected)
    }

    /// Summarise the nodes selected by [`Self::select_nodes`].
    pub fn build_inventory<A: AsRef<str>, E: AsRef<str>, O: AsRef<str>>(
        &self,
        access_directives: &[A],
        exclude_states: &[E],
        only_states: &[O],
    ) -> Result<NodeInventorySummary> {
        let nodes = self.select_nodes(access_directives, exclude_states, only_states)?;
        let summary = NodeInventorySummary::from_nodes(&nodes)?;
        info!("{}", summary);
        Ok(summary)
    }
}
