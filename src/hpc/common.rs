//! Common types for scheduler node information

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::errors::ExtrasError;

/// CPU layout of a node: sockets, cores per socket, threads per core.
///
/// All three counts are positive and their product fits in a `u32`, so the
/// derived core counts never overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SocketCoreThread {
    sockets: u32,
    cores_per_socket: u32,
    threads_per_core: u32,
}

impl SocketCoreThread {
    pub fn new(
        sockets: u32,
        cores_per_socket: u32,
        threads_per_core: u32,
    ) -> Result<Self, ExtrasError> {
        let total = sockets
            .checked_mul(cores_per_socket)
            .and_then(|p| p.checked_mul(threads_per_core));
        match total {
            Some(t) if t > 0 => Ok(Self {
                sockets,
                cores_per_socket,
                threads_per_core,
            }),
            _ => Err(ExtrasError::InvalidTopology {
                descriptor: format!("{}:{}:{}", sockets, cores_per_socket, threads_per_core),
            }),
        }
    }

    pub fn sockets(&self) -> u32 {
        self.sockets
    }

    pub fn cores_per_socket(&self) -> u32 {
        self.cores_per_socket
    }

    pub fn threads_per_core(&self) -> u32 {
        self.threads_per_core
    }

    /// Physical cores per node
    pub fn physical_cores(&self) -> u32 {
        self.sockets * self.cores_per_socket
    }

    /// Logical cores (hardware threads) per node
    pub fn logical_cores(&self) -> u32 {
        self.physical_cores() * self.threads_per_core
    }
}

impl FromStr for SocketCoreThread {
    type Err = ExtrasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ExtrasError::InvalidTopology {
            descriptor: s.to_string(),
        };

        let parts: Vec<u32> = s
            .trim()
            .split(':')
            .map(|p| p.parse::<u32>().map_err(|_| invalid()))
            .collect::<Result<_, _>>()?;

        match parts.as_slice() {
            [sockets, cores, threads] => {
                Self::new(*sockets, *cores, *threads).map_err(|_| invalid())
            }
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for SocketCoreThread {
    type Error = ExtrasError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SocketCoreThread> for String {
    fn from(topology: SocketCoreThread) -> Self {
        topology.to_string()
    }
}

impl fmt::Display for SocketCoreThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.sockets, self.cores_per_socket, self.threads_per_core
        )
    }
}

/// Characters Slurm appends to a node state to flag conditions such as
/// "not responding" (`*`) or "powered down" (`~`).
const STATE_FLAG_CHARS: &[char] = &['*', '~', '#', '!', '%', '$', '@', '^', '-', '+'];

/// Node state as reported by the scheduler, e.g. `idle`, `mix`, `down*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeState(String);

impl NodeState {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The state exactly as reported
    pub fn raw(&self) -> &str {
        &self.0
    }

    /// The state with trailing flag characters removed
    pub fn base(&self) -> &str {
        self.0.trim_end_matches(STATE_FLAG_CHARS)
    }

    /// True if `filter` names this state, either with or without its flags.
    pub fn matches(&self, filter: &str) -> bool {
        let filter = filter.trim();
        filter.eq_ignore_ascii_case(self.raw()) || filter.eq_ignore_ascii_case(self.base())
    }

    /// True if any of `filters` names this state
    pub fn matches_any<S: AsRef<str>>(&self, filters: &[S]) -> bool {
        filters.iter().any(|f| self.matches(f.as_ref()))
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One compute node as reported by a single scheduler query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerNode {
    pub name: String,
    /// Partitions the node belongs to, without the default-partition marker
    pub partition_names: BTreeSet<String>,
    pub state: NodeState,
    pub topology: SocketCoreThread,
    pub memory_mb: Option<u64>,
    pub cpus: Option<u32>,
    /// Set when any of the node's partitions is the scheduler's default
    pub is_default_partition: bool,
    pub reason: Option<String>,
}

impl SchedulerNode {
    pub fn in_partition(&self, partition: &str) -> bool {
        self.partition_names.contains(partition)
    }

    /// Partition names joined with commas, for display
    pub fn partitions_str(&self) -> String {
        self.partition_names
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}
