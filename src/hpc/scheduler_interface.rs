//! Trait implemented by scheduler back ends that can describe their nodes

use super::common::SchedulerNode;
use crate::errors::Result;

/// Read-only view of a batch scheduler's node inventory.
///
/// Every call reflects the scheduler's state at the time of the call; nothing
/// is cached between calls.
pub trait SchedulerInterface {
    /// List nodes, optionally restricted to a single partition.
    fn query_nodes(&self, partition: Option<&str>) -> Result<Vec<SchedulerNode>>;

    /// Expand a compressed hostlist expression such as `node[01-04]` into
    /// individual hostnames.
    fn expand_hostlist(&self, expression: &str) -> Result<Vec<String>>;
}

impl<T: SchedulerInterface + ?Sized> SchedulerInterface for Box<T> {
    fn query_nodes(&self, partition: Option<&str>) -> Result<Vec<SchedulerNode>> {
        (**self).query_nodes(partition)
    }

    fn expand_hostlist(&self, expression: &str) -> Result<Vec<String>> {
        (**self).expand_hostlist(expression)
    }
}
