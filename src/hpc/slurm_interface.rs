//! Slurm scheduler interface implementation

use log::{debug, trace};
use std::collections::HashMap;
use std::env;
use std::process::Command;

use super::common::{NodeState, SchedulerNode, SocketCoreThread};
use super::scheduler_interface::SchedulerInterface;
use crate::config::SchedulerConfig;
use crate::errors::{ExtrasError, Result};

/// Environment variable that replaces the `sinfo` executable (allows testing with a fake binary)
pub const SINFO_ENV: &str = "HPC_EXTRAS_SINFO";
/// Environment variable that replaces the `scontrol` executable
pub const SCONTROL_ENV: &str = "HPC_EXTRAS_SCONTROL";

const COL_NODELIST: &str = "NODELIST";
const COL_PARTITION: &str = "PARTITION";
const COL_STATE: &str = "STATE";
const COL_SCT: &str = "S:C:T";
const COL_MEMORY: &str = "MEMORY";
const COL_CPUS: &str = "CPUS";
const COL_REASON: &str = "REASON";

const REQUIRED_COLUMNS: [&str; 4] = [COL_NODELIST, COL_PARTITION, COL_STATE, COL_SCT];

/// Slurm scheduler implementation
#[derive(Debug, Clone)]
pub struct SlurmInterface {
    sinfo_exec: String,
    scontrol_exec: String,
}

impl Default for SlurmInterface {
    fn default() -> Self {
        Self::new()
    }
}

impl SlurmInterface {
    /// Create a Slurm interface using `sinfo` and `scontrol` from `PATH`
    pub fn new() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }

    /// Create a Slurm interface from configuration. The `HPC_EXTRAS_SINFO` and
    /// `HPC_EXTRAS_SCONTROL` environment variables take precedence.
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            sinfo_exec: env::var(SINFO_ENV).unwrap_or_else(|_| config.sinfo_exec.clone()),
            scontrol_exec: env::var(SCONTROL_ENV)
                .unwrap_or_else(|_| config.scontrol_exec.clone()),
        }
    }

    /// Create a Slurm interface with explicit executables, ignoring the environment
    pub fn with_executables(sinfo_exec: impl Into<String>, scontrol_exec: impl Into<String>) -> Self {
        Self {
            sinfo_exec: sinfo_exec.into(),
            scontrol_exec: scontrol_exec.into(),
        }
    }

    pub fn sinfo_exec(&self) -> &str {
        &self.sinfo_exec
    }

    pub fn scontrol_exec(&self) -> &str {
        &self.scontrol_exec
    }

    /// Run a command to completion and return its stdout. Spawn failures and
    /// non-zero exits are both reported as `SchedulerUnavailable`.
    fn run_command(&self, cmd: &str, args: &[&str]) -> Result<String> {
        let command_line = std::iter::once(cmd)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        trace!("Running command: {}", command_line);

        let output =
            Command::new(cmd)
                .args(args)
                .output()
                .map_err(|e| ExtrasError::SchedulerUnavailable {
                    command: command_line.clone(),
                    reason: e.to_string(),
                })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            let return_code = output.status.code().unwrap_or(-1);
            return Err(ExtrasError::SchedulerUnavailable {
                command: command_line,
                reason: format!("exit code {}: {}", return_code, stderr.trim()),
            });
        }

        trace!("{} output: [{}]", cmd, stdout);
        Ok(stdout)
    }
}

impl SchedulerInterface for SlurmInterface {
    fn query_nodes(&self, partition: Option<&str>) -> Result<Vec<SchedulerNode>> {
        let partition_arg = partition.map(|p| format!("--partition={}", p));
        let mut args = vec!["--Node", "--long"];
        if let Some(arg) = &partition_arg {
            args.push(arg);
        }

        let stdout = self.run_command(&self.sinfo_exec, &args)?;
        let nodes = parse_sinfo_output(&stdout)?;
        debug!(
            "sinfo reported {} nodes (partition filter: {:?})",
            nodes.len(),
            partition
        );
        Ok(nodes)
    }

    fn expand_hostlist(&self, expression: &str) -> Result<Vec<String>> {
        let stdout = self.run_command(&self.scontrol_exec, &["show", "hostnames", expression])?;
        Ok(stdout.split_whitespace().map(str::to_string).collect())
    }
}

/// Parse the output of `sinfo --Node --long`.
///
/// The first line is a timestamp and is ignored. The second line is the column
/// header; every following non-blank line is mapped onto it by position. A row
/// may be shorter than the header only when the missing trailing columns are
/// optional, and longer only when the final column is the free-text `REASON`.
///
/// `sinfo --Node` prints one row per node and partition, so rows sharing a
/// node name are merged into a single [`SchedulerNode`].
pub fn parse_sinfo_output(text: &str) -> Result<Vec<SchedulerNode>> {
    let mut lines = text.lines();

    let timestamp = lines
        .next()
        .ok_or_else(|| ExtrasError::malformed(1, "missing timestamp line"))?;
    debug!("sinfo timestamp: {}", timestamp.trim());

    let header: Vec<&str> = lines
        .next()
        .ok_or_else(|| ExtrasError::malformed(2, "missing header line"))?
        .split_whitespace()
        .collect();

    let columns: HashMap<&str, usize> = header.iter().enumerate().map(|(i, c)| (*c, i)).collect();
    for required in REQUIRED_COLUMNS {
        if !columns.contains_key(required) {
            return Err(ExtrasError::malformed(
                2,
                format!("missing required column {}", required),
            ));
        }
    }
    let required_max = REQUIRED_COLUMNS
        .iter()
        .map(|c| columns[c])
        .max()
        .unwrap_or(0);
    let reason_is_last = header.last() == Some(&COL_REASON);

    let mut nodes: Vec<SchedulerNode> = Vec::new();
    let mut index_by_name: HashMap<String, usize> = HashMap::new();

    for (offset, line) in lines.enumerate() {
        let line_no = offset + 3;
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }

        let fields = align_row(&header, tokens, reason_is_last, required_max, line_no)?;
        let field = |name: &str| column_value(&columns, &fields, name);
        // Required columns are guaranteed present by align_row.
        let name = field(COL_NODELIST).unwrap_or_default().to_string();
        let partition_raw = field(COL_PARTITION).unwrap_or_default();
        let state = NodeState::new(field(COL_STATE).unwrap_or_default());
        let sct = field(COL_SCT).unwrap_or_default();

        let topology: SocketCoreThread = sct
            .parse()
            .map_err(|_| ExtrasError::malformed(line_no, format!("invalid S:C:T '{}'", sct)))?;
        let memory_mb = parse_optional::<u64>(field(COL_MEMORY), COL_MEMORY, line_no)?;
        let cpus = parse_optional::<u32>(field(COL_CPUS), COL_CPUS, line_no)?;
        let reason = field(COL_REASON)
            .filter(|r| !r.eq_ignore_ascii_case("none"))
            .map(str::to_string);

        let is_default = partition_raw.ends_with('*');
        let partition = partition_raw.trim_end_matches('*').to_string();

        if let Some(&idx) = index_by_name.get(&name) {
            let existing = &mut nodes[idx];
            if existing.topology != topology {
                return Err(ExtrasError::malformed(
                    line_no,
                    format!(
                        "node {} reported topology {} and {}",
                        name, existing.topology, topology
                    ),
                ));
            }
            existing.partition_names.insert(partition);
            existing.is_default_partition |= is_default;
            continue;
        }

        index_by_name.insert(name.clone(), nodes.len());
        nodes.push(SchedulerNode {
            name,
            partition_names: [partition].into_iter().collect(),
            state,
            topology,
            memory_mb,
            cpus,
            is_default_partition: is_default,
            reason,
        });
    }

    Ok(nodes)
}

/// Map a row's tokens onto the header, returning one value per header column.
fn align_row(
    header: &[&str],
    tokens: Vec<&str>,
    reason_is_last: bool,
    required_max: usize,
    line_no: usize,
) -> Result<Vec<String>> {
    let ncols = header.len();
    if tokens.len() > ncols {
        if !reason_is_last {
            return Err(ExtrasError::malformed(
                line_no,
                format!("expected {} fields, got {}", ncols, tokens.len()),
            ));
        }
        let mut fields: Vec<String> = tokens[..ncols - 1].iter().map(|t| t.to_string()).collect();
        fields.push(tokens[ncols - 1..].join(" "));
        return Ok(fields);
    }

    if tokens.len() <= required_max {
        return Err(ExtrasError::malformed(
            line_no,
            format!(
                "expected {} fields, got {}; column {} is missing",
                ncols,
                tokens.len(),
                header[tokens.len()]
            ),
        ));
    }

    let mut fields: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();
    fields.resize(ncols, String::new());
    Ok(fields)
}

fn column_value<'a>(
    columns: &HashMap<&str, usize>,
    fields: &'a [String],
    name: &str,
) -> Option<&'a str> {
    columns
        .get(name)
        .and_then(|&i| fields.get(i))
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

fn parse_optional<T: std::str::FromStr>(
    value: Option<&str>,
    column: &str,
    line_no: usize,
) -> Result<Option<T>> {
    value
        .map(|v| {
            v.parse::<T>().map_err(|_| {
                ExtrasError::malformed(line_no, format!("invalid {} value '{}'", column, v))
            })
        })
        .transpose()
}
