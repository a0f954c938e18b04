use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, builder::styling};
use env_logger::Builder;
use log::{LevelFilter, debug};
use std::fs;
use std::path::{Path, PathBuf};
use tabled::Tabled;

use hpc_extras::cache::{ArtifactCache, BuildKey, BuildLookup};
use hpc_extras::config::{ConfigPaths, ExtrasConfig};
use hpc_extras::hpc::{NodeInventory, SchedulerInterface, SchedulerNode, SlurmInterface};
use hpc_extras::sequence;

mod output;

use output::{OutputFormat, display_key_values, display_table_with_count, print_json};

const STYLES: styling::Styles = styling::Styles::styled()
    .header(styling::AnsiColor::Green.on_default().bold())
    .usage(styling::AnsiColor::Green.on_default().bold())
    .literal(styling::AnsiColor::Cyan.on_default().bold())
    .placeholder(styling::AnsiColor::Cyan.on_default());

#[derive(Parser, Debug)]
#[command(name = "hpc-extras")]
#[command(about = "Scheduler node inventory and artifact cache tools for HPC benchmarks", long_about = None)]
#[command(styles = STYLES)]
struct Cli {
    /// Additional config file, read after the standard locations
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Output format
    #[arg(short, long, global = true, value_enum)]
    format: Option<OutputFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Summarise the nodes a job could use
    ///
    /// Without a --partition= access directive the scheduler's default
    /// partition is summarised.
    Inventory {
        /// Scheduler access directive, e.g. --access=--partition=standard
        #[arg(short, long = "access", allow_hyphen_values = true)]
        access: Vec<String>,

        /// Ignore nodes in this state (repeatable, added to configured states)
        #[arg(long = "exclude-state")]
        exclude_states: Vec<String>,

        /// Only count nodes in this state (repeatable, added to configured states)
        #[arg(long = "only-state")]
        only_states: Vec<String>,
    },
    /// List nodes reported by the scheduler
    Nodes {
        /// Restrict to this partition
        #[arg(short, long)]
        partition: Option<String>,
    },
    /// Expand a hostlist expression such as node[01-04]
    Hostnames {
        expression: String,
    },
    /// Report whether a build is cached
    CacheStatus {
        #[arg(long)]
        system: String,
        #[arg(long)]
        partition: String,
        #[arg(long)]
        environment: String,
        #[arg(long)]
        test: String,
        /// Executable path relative to the build directory
        #[arg(long)]
        executable: PathBuf,
    },
    /// Print a geometric sequence: START, START*FACTOR, ... below END
    Sequence {
        start: u64,
        end: u64,
        factor: u64,
    },
    /// Inspect or create configuration files
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// List the configuration file locations
    Paths,
    /// Check the effective configuration
    Validate,
    /// Write a default configuration file
    Init {
        /// Destination (defaults to ./hpc-extras.toml)
        path: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Tabled)]
struct NodeTableRow {
    #[tabled(rename = "Node")]
    name: String,
    #[tabled(rename = "Partitions")]
    partitions: String,
    #[tabled(rename = "Default")]
    is_default: bool,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "S:C:T")]
    topology: String,
    #[tabled(rename = "Memory (MB)")]
    memory_mb: String,
}

impl From<&SchedulerNode> for NodeTableRow {
    fn from(node: &SchedulerNode) -> Self {
        Self {
            name: node.name.clone(),
            partitions: node.partitions_str(),
            is_default: node.is_default_partition,
            state: node.state.to_string(),
            topology: node.topology.to_string(),
            memory_mb: node
                .memory_mb
                .map(|m| m.to_string())
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

fn load_config(extra: Option<&Path>) -> Result<ExtrasConfig> {
    let paths = ConfigPaths::new();
    let mut files: Vec<PathBuf> = paths.existing_paths().into_iter().cloned().collect();
    if let Some(path) = extra {
        if !path.exists() {
            bail!("config file {} does not exist", path.display());
        }
        files.push(path.to_path_buf());
    }
    ExtrasConfig::load_from_files(&files).context("Failed to load configuration")
}

fn init_logging(level: &str) {
    let filter = level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info);
    Builder::from_default_env().filter_level(filter).init();
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    init_logging(&config.log_level);
    debug!("Effective configuration: {:?}", config);

    let format = cli
        .format
        .unwrap_or_else(|| OutputFormat::from_config(&config.output.format));

    match cli.command {
        Commands::Inventory {
            access,
            exclude_states,
            only_states,
        } => {
            let mut exclude = config.scheduler.exclude_states.clone();
            exclude.extend(exclude_states);
            let mut only = config.scheduler.only_states.clone();
            only.extend(only_states);

            let inventory = NodeInventory::new(SlurmInterface::from_config(&config.scheduler));
            let summary = inventory
                .build_inventory(&access, &exclude, &only)
                .context("Failed to build node inventory")?;

            match format {
                OutputFormat::Json => print_json(&summary)?,
                OutputFormat::Table => display_key_values(&[
                    ("num_nodes", summary.num_nodes.to_string()),
                    ("sockets_per_node", summary.sockets_per_node.to_string()),
                    (
                        "physical_cores_per_node",
                        summary.physical_cores_per_node.to_string(),
                    ),
                    (
                        "logical_cores_per_node",
                        summary.logical_cores_per_node.to_string(),
                    ),
                    ("total_physical_cores", summary.total_physical_cores().to_string()),
                    ("total_logical_cores", summary.total_logical_cores().to_string()),
                ]),
            }
        }
        Commands::Nodes { partition } => {
            let slurm = SlurmInterface::from_config(&config.scheduler);
            let nodes = slurm
                .query_nodes(partition.as_deref())
                .context("Failed to query nodes")?;
            match format {
                OutputFormat::Json => print_json(&nodes)?,
                OutputFormat::Table => {
                    let rows: Vec<NodeTableRow> = nodes.iter().map(NodeTableRow::from).collect();
                    display_table_with_count(&rows, "nodes");
                }
            }
        }
        Commands::Hostnames { expression } => {
            let slurm = SlurmInterface::from_config(&config.scheduler);
            let hosts = slurm
                .expand_hostlist(&expression)
                .with_context(|| format!("Failed to expand hostlist '{}'", expression))?;
            match format {
                OutputFormat::Json => print_json(&hosts)?,
                OutputFormat::Table => {
                    for host in hosts {
                        println!("{}", host);
                    }
                }
            }
        }
        Commands::CacheStatus {
            system,
            partition,
            environment,
            test,
            executable,
        } => {
            let key = BuildKey::new(system, partition, environment, test)?;
            let cache = ArtifactCache::from_config(&config.cache);
            let path = cache.build_artifact_path(&key, &executable)?;
            let lookup = cache.resolve_build(&key, &executable)?;
            let status = if lookup.is_hit() { "hit" } else { "miss" };

            match format {
                OutputFormat::Json => print_json(&serde_json::json!({
                    "key": key,
                    "status": status,
                    "path": path,
                    "record": match &lookup {
                        BuildLookup::Cached(record) => Some(record),
                        BuildLookup::Miss => None,
                    },
                }))?,
                OutputFormat::Table => display_key_values(&[
                    ("key", key.to_string()),
                    ("status", status.to_string()),
                    ("path", path.display().to_string()),
                ]),
            }
        }
        Commands::Sequence { start, end, factor } => {
            let values = sequence(start, end, factor)?;
            match format {
                OutputFormat::Json => print_json(&values)?,
                OutputFormat::Table => {
                    let line: Vec<String> = values.iter().map(u64::to_string).collect();
                    println!("{}", line.join(" "));
                }
            }
        }
        Commands::Config { command } => run_config_command(command, &config, format)?,
    }

    Ok(())
}

fn run_config_command(
    command: ConfigCommands,
    config: &ExtrasConfig,
    format: OutputFormat,
) -> Result<()> {
    match command {
        ConfigCommands::Show => match format {
            OutputFormat::Json => print_json(config)?,
            OutputFormat::Table => print!("{}", config.to_toml()?),
        },
        ConfigCommands::Paths => {
            let paths = ConfigPaths::new();
            for path in paths.all_paths() {
                let marker = if path.exists() { "found" } else { "missing" };
                println!("{:8} {}", marker, path.display());
            }
        }
        ConfigCommands::Validate => match config.validate() {
            Ok(()) => println!("Configuration is valid."),
            Err(errors) => {
                for error in &errors {
                    eprintln!("  - {}", error);
                }
                bail!("configuration has {} error(s)", errors.len());
            }
        },
        ConfigCommands::Init { path, force } => {
            let path = path.unwrap_or_else(|| ConfigPaths::new().local);
            if path.exists() && !force {
                bail!(
                    "{} already exists; use --force to overwrite",
                    path.display()
                );
            }
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            fs::write(&path, ExtrasConfig::generate_default_config())
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}
