//! stagefetch CLI: plan shuffle fetches and pull partitions from workers.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use stagefetch_core::key_codec::decode_tuple;
use stagefetch_core::{DataType, FetchDescriptor, FetchKind, SortKey};
use stagefetch_planner::{
    AssignmentMode, ChildStage, PlannerConfig, Repartitioner, Task, TaskIdAllocator,
};
use stagefetch_pullserver::{deserialize_meta, FetchOutcome, Fetcher};

#[derive(Parser)]
#[command(name = "stagefetch")]
#[command(about = "Plan and fetch intermediate stage output")]
#[command(version)]
struct Cli {
    /// Enable verbose logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan next-stage tasks from a JSON description of finished child stages
    Plan {
        /// Path to the plan request JSON
        request: PathBuf,

        /// Assignment mode; `auto` follows the child's partition type
        #[arg(short, long, value_enum, default_value = "auto")]
        mode: Mode,

        /// Upper bound on hash-partitioned task count
        #[arg(long, env = "STAGEFETCH_MAX_TASKS")]
        max_tasks: Option<usize>,

        /// Target intermediate bytes per range-partitioned task
        #[arg(long, env = "STAGEFETCH_BYTES_PER_RANGE_TASK")]
        bytes_per_range_task: Option<u64>,

        /// Write the planned tasks here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Issue a fetch URL against a pull service and save the body
    Fetch {
        url: String,

        /// Output file; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the contents of a fetch URL as JSON
    Decode {
        url: String,

        /// Sort key used to decode range bounds, as `column:type[:desc]`.
        /// Repeat in key order.
        #[arg(short = 'k', long = "key")]
        keys: Vec<String>,
    },

    /// Print the port recorded in a pull server handshake file
    Port { meta_file: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Auto,
    Hash,
    Range,
    Broadcast,
}

/// Input of `stagefetch plan`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PlanRequest {
    /// Stage the planned tasks belong to.
    stage_id: u32,
    #[serde(default)]
    max_tasks: Option<usize>,
    inputs: Vec<ChildStage>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Plan {
            request,
            mode,
            max_tasks,
            bytes_per_range_task,
            output,
        } => {
            let mut config = PlannerConfig::default();
            if let Some(bytes) = bytes_per_range_task {
                config.bytes_per_range_task = bytes;
            }
            let request = load_plan_request(&request)?;
            let tasks = plan(&request, mode, max_tasks, config)?;
            let json = serde_json::to_string_pretty(&tasks)?;
            write_output(output.as_deref(), json.as_bytes())?;
        }
        Commands::Fetch { url, output } => {
            let descriptor = FetchDescriptor::parse(&url)?;
            match Fetcher::new().fetch(&descriptor).await? {
                FetchOutcome::Data(bytes) => {
                    info!("Fetched {} bytes from {}", bytes.len(), descriptor.address);
                    write_output(output.as_deref(), &bytes)?;
                }
                FetchOutcome::NoContent => {
                    info!("No rows for {}", url);
                    write_output(output.as_deref(), &[])?;
                }
            }
        }
        Commands::Decode { url, keys } => {
            let keys = keys
                .iter()
                .map(|k| parse_sort_key(k))
                .collect::<Result<Vec<_>>>()?;
            let descriptor = FetchDescriptor::parse(&url)?;
            let json = serde_json::to_string_pretty(&describe(&descriptor, &keys)?)?;
            println!("{}", json);
        }
        Commands::Port { meta_file } => {
            let bytes = std::fs::read(&meta_file)
                .with_context(|| format!("Failed to read {}", meta_file.display()))?;
            println!("{}", deserialize_meta(&bytes)?);
        }
    }

    Ok(())
}

fn load_plan_request(path: &Path) -> Result<PlanRequest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan request {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid plan request {}", path.display()))
}

fn plan(
    request: &PlanRequest,
    mode: Mode,
    max_tasks: Option<usize>,
    config: PlannerConfig,
) -> Result<Vec<Task>> {
    let max_tasks = max_tasks
        .or(request.max_tasks)
        .unwrap_or(config.default_max_tasks);
    let planner = Repartitioner::new(config);
    let mut ids = TaskIdAllocator::new(request.stage_id);

    let tasks = match mode {
        Mode::Auto => match request.inputs.as_slice() {
            [] => bail!("Plan request has no input stages"),
            [child] => planner.plan_non_leaf(child, max_tasks, &mut ids)?,
            inputs => planner.plan_join(inputs, max_tasks, &mut ids)?,
        },
        Mode::Hash => planner.plan(
            &request.inputs,
            AssignmentMode::Hash { max_tasks },
            &mut ids,
        )?,
        Mode::Range => planner.plan(&request.inputs, AssignmentMode::Range, &mut ids)?,
        Mode::Broadcast => planner.plan(&request.inputs, AssignmentMode::Broadcast, &mut ids)?,
    };
    info!(
        "Planned {} task(s) for stage {} from {} input(s)",
        tasks.len(),
        request.stage_id,
        request.inputs.len()
    );
    Ok(tasks)
}

/// `column:type[:asc|:desc]`, type one of int4, int8, float8, text.
fn parse_sort_key(arg: &str) -> Result<SortKey> {
    let parts: Vec<&str> = arg.split(':').collect();
    let (column, data_type, direction) = match parts.as_slice() {
        [column, data_type] => (*column, *data_type, "asc"),
        [column, data_type, direction] => (*column, *data_type, *direction),
        _ => bail!("Invalid sort key '{}', expected column:type[:desc]", arg),
    };
    let data_type = match data_type.to_ascii_lowercase().as_str() {
        "int4" => DataType::Int4,
        "int8" => DataType::Int8,
        "float8" => DataType::Float8,
        "text" => DataType::Text,
        other => bail!("Unknown key type '{}' in '{}'", other, arg),
    };
    let ascending = match direction.to_ascii_lowercase().as_str() {
        "asc" => true,
        "desc" => false,
        other => bail!("Unknown sort direction '{}' in '{}'", other, arg),
    };
    Ok(SortKey::new(column, data_type, ascending))
}

fn describe(descriptor: &FetchDescriptor, keys: &[SortKey]) -> Result<serde_json::Value> {
    let request = &descriptor.request;
    let mut value = serde_json::json!({
        "host": descriptor.address.host,
        "port": descriptor.address.port,
        "stage_id": request.stage_id,
        "partition_id": request.partition_id,
        "type": request.partition_type(),
        "attempts": request.attempts.iter().map(|ta| ta.to_string()).collect::<Vec<_>>(),
    });
    if let FetchKind::Range {
        start,
        end,
        is_final,
    } = &request.kind
    {
        value["final"] = serde_json::json!(is_final);
        if keys.is_empty() {
            value["start_bytes"] = serde_json::json!(start.len());
            value["end_bytes"] = serde_json::json!(end.len());
        } else {
            value["start"] = serde_json::json!(decode_tuple(keys, start)?.to_string());
            value["end"] = serde_json::json!(decode_tuple(keys, end)?.to_string());
        }
    }
    Ok(value)
}

fn write_output(path: Option<&Path>, bytes: &[u8]) -> Result<()> {
    match path {
        Some(path) => {
            std::fs::write(path, bytes)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {} bytes to {}", bytes.len(), path.display());
        }
        None => {
            use std::io::Write;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(bytes)?;
            stdout.flush()?;
        }
    }
    Ok(())
}
