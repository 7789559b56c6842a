//! SimFlow CLI Entry Point
//!
//! Provides command-line interface for workflow execution and job history.
//!
//! # Usage
//!
//! ```bash
//! # Execute a workflow against the local backend
//! simflow run simulation.yaml
//!
//! # Abort the whole run after two hours
//! simflow run simulation.yaml --timeout 7200
//!
//! # Inspect recorded jobs
//! simflow history --tool fenicsx --limit 20
//! simflow stats
//!
//! # Check the local backend before submitting
//! simflow health
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use colored::{ColoredString, Colorize};
use log::{debug, info, warn};

use simflow::execution::{WorkflowEngine, WorkflowOutcome};
use simflow::monitoring::{HistoryStore, JobMonitor};
use simflow::submitter::{HealthStatus, LocalSubmitter, TaskSubmitter};
use simflow::workflow::{load_workflow, ExecutionMode, TaskStatus, WorkflowStatus};
use simflow::{APP_NAME, VERSION};

/// Default number of records shown by `history`.
const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Subcommand selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Command {
    Run,
    History,
    Stats,
    Health,
}

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    command: Command,
    workflow_path: String,
    history_path: Option<PathBuf>,
    timeout: Option<Duration>,
    poll_interval: Option<Duration>,
    mode_override: Option<ExecutionMode>,
    limit: Option<usize>,
    tool: Option<String>,
    status: Option<TaskStatus>,
    verbose: bool,
    quiet: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command: Command::Run,
            workflow_path: String::new(),
            history_path: None,
            timeout: None,
            poll_interval: None,
            mode_override: None,
            limit: None,
            tool: None,
            status: None,
            verbose: false,
            quiet: false,
        }
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("Workflow Orchestration for Simulation Jobs");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: simflow <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  run <WORKFLOW_FILE>  Execute a workflow YAML file");
    println!("  history              List recorded jobs, newest first");
    println!("  stats                Summary statistics over the job history");
    println!("  health               Check the local backend");
    println!();
    println!("Options for run:");
    println!("  --timeout SECONDS      Wall-clock limit for the whole workflow");
    println!("  --poll-interval MS     Polling cadence in milliseconds (default: 500)");
    println!("  --sequential           Force sequential execution");
    println!("  --parallel             Force parallel execution");
    println!();
    println!("Options for history:");
    println!("  --limit N              Show at most N records (default: {})", DEFAULT_HISTORY_LIMIT);
    println!("  --tool NAME            Only jobs for this tool");
    println!("  --status STATUS        Only jobs with this status (e.g. failed)");
    println!();
    println!("Common options:");
    println!("  --history PATH         Job history file (default: ~/.simflow/history.jsonl)");
    println!("  --verbose              Enable debug logging");
    println!("  --quiet                Only warnings and errors");
    println!("  --help                 Show this help message");
    println!("  --version              Show version information");
    println!();
    println!("Examples:");
    println!("  simflow run simulation.yaml");
    println!("  simflow run simulation.yaml --timeout 3600 --parallel");
    println!("  simflow history --tool lammps --status failed");
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut positional_index = 0;
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--quiet" | "-q" => {
                config.quiet = true;
            }
            "--history" => {
                i += 1;
                if i >= args.len() {
                    return Err("--history requires a path argument".to_string());
                }
                config.history_path = Some(PathBuf::from(&args[i]));
            }
            "--timeout" => {
                i += 1;
                if i >= args.len() {
                    return Err("--timeout requires a number of seconds".to_string());
                }
                let seconds: u64 = args[i]
                    .parse()
                    .map_err(|_| format!("Invalid timeout value: {}", args[i]))?;
                config.timeout = Some(Duration::from_secs(seconds));
            }
            "--poll-interval" => {
                i += 1;
                if i >= args.len() {
                    return Err("--poll-interval requires a number of milliseconds".to_string());
                }
                let millis: u64 = args[i]
                    .parse()
                    .map_err(|_| format!("Invalid poll interval: {}", args[i]))?;
                config.poll_interval = Some(Duration::from_millis(millis));
            }
            "--sequential" => {
                config.mode_override = Some(ExecutionMode::Sequential);
            }
            "--parallel" => {
                config.mode_override = Some(ExecutionMode::Parallel);
            }
            "--limit" => {
                i += 1;
                if i >= args.len() {
                    return Err("--limit requires a number argument".to_string());
                }
                config.limit = Some(
                    args[i]
                        .parse()
                        .map_err(|_| format!("Invalid limit value: {}", args[i]))?,
                );
            }
            "--tool" => {
                i += 1;
                if i >= args.len() {
                    return Err("--tool requires a name argument".to_string());
                }
                config.tool = Some(args[i].clone());
            }
            "--status" => {
                i += 1;
                if i >= args.len() {
                    return Err("--status requires a status argument".to_string());
                }
                config.status = Some(args[i].parse()?);
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                // Positional argument
                match positional_index {
                    0 => {
                        config.command = match arg.as_str() {
                            "run" => Command::Run,
                            "history" => Command::History,
                            "stats" => Command::Stats,
                            "health" => Command::Health,
                            other => return Err(format!("Unknown command: {}", other)),
                        };
                    }
                    1 if config.command == Command::Run => {
                        config.workflow_path = arg.clone();
                    }
                    _ => return Err(format!("Unexpected argument: {}", arg)),
                }
                positional_index += 1;
            }
        }
        i += 1;
    }

    if config.command == Command::Run && config.workflow_path.is_empty() {
        return Err("run requires a workflow file argument".to_string());
    }

    Ok(config)
}

fn open_store(config: &Config) -> Result<HistoryStore, Box<dyn std::error::Error>> {
    let store = match &config.history_path {
        Some(path) => HistoryStore::open(path.clone())?,
        None => HistoryStore::open_default()?,
    };
    Ok(store)
}

/// Pads then colors a task status so table columns stay aligned.
fn status_label(status: TaskStatus) -> ColoredString {
    let text = format!("{:<9}", status.as_str().to_uppercase());
    match status {
        TaskStatus::Success => text.green(),
        TaskStatus::Failed | TaskStatus::Timeout => text.red(),
        TaskStatus::Cancelled => text.yellow(),
        _ => text.normal(),
    }
}

fn print_outcome(outcome: &WorkflowOutcome) {
    println!();
    println!("Results:");
    for task in &outcome.tasks {
        let duration = task
            .duration_seconds
            .map(|d| format!("{:.1}s", d))
            .unwrap_or_else(|| "-".to_string());
        let cpu = task
            .resource_usage
            .map(|u| format!("cpu {:.1}s", u.cpu_total_seconds))
            .unwrap_or_default();

        println!(
            "  {} {:<24} {:>8}  {:<12} {}",
            status_label(task.status),
            task.name,
            duration,
            cpu,
            task.error.as_deref().unwrap_or("")
        );
    }

    println!();
    let status_text = outcome.status.as_str().to_uppercase();
    let label = match outcome.status {
        WorkflowStatus::Success => status_text.green().bold(),
        WorkflowStatus::Cancelled => status_text.yellow().bold(),
        _ => status_text.red().bold(),
    };
    println!(
        "Workflow: {} ({} of {} task(s) succeeded)",
        label,
        outcome.count(TaskStatus::Success),
        outcome.tasks.len()
    );
}

/// Executes a workflow file against the local backend.
fn cmd_run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!("Loading workflow: {}", config.workflow_path);
    let mut workflow = load_workflow(&config.workflow_path).map_err(|e| {
        format!(
            "Could not load workflow from '{}': {}",
            config.workflow_path, e
        )
    })?;

    if let Some(mode) = config.mode_override {
        workflow.mode = mode;
    }

    info!(
        "Workflow loaded: {} task(s), {} unique tool(s), {:?} mode",
        workflow.len(),
        workflow.tools().len(),
        workflow.mode
    );

    let submitter = Arc::new(LocalSubmitter::new());

    // Refuse to dispatch into a backend that says it cannot take work.
    let health = submitter.health_check();
    match health.status {
        HealthStatus::Unhealthy => {
            return Err(format!(
                "local backend is unhealthy: {}",
                health.detail.unwrap_or_else(|| "no detail".to_string())
            )
            .into());
        }
        HealthStatus::Degraded => {
            warn!(
                "Local backend is degraded: {}",
                health.detail.as_deref().unwrap_or("no detail")
            );
        }
        HealthStatus::Healthy => {}
    }

    let monitor = Arc::new(JobMonitor::new(open_store(&config)?));
    info!("Job history: {}", monitor.history().path().display());

    let mut engine = WorkflowEngine::new(submitter as Arc<dyn TaskSubmitter>);
    engine.set_monitor(monitor);
    engine.set_timeout(config.timeout);
    if let Some(interval) = config.poll_interval {
        engine.set_poll_interval(interval);
    }

    let outcome = engine.run_with_progress(&workflow, |p| {
        debug!(
            "Progress: {}/{} terminal ({} running, {} pending, {:.0?} elapsed)",
            p.terminal, p.total, p.running, p.pending, p.elapsed
        );
    })?;

    print_outcome(&outcome);

    if !outcome.succeeded() {
        return Err(format!("workflow ended {}", outcome.status).into());
    }
    Ok(())
}

/// Lists recorded jobs, newest first.
fn cmd_history(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(&config)?;

    let mut query = store.query().with_limit(config.limit.unwrap_or(DEFAULT_HISTORY_LIMIT));
    if let Some(tool) = &config.tool {
        query = query.for_tool(tool.clone());
    }
    if let Some(status) = config.status {
        query = query.with_status(status);
    }
    let records = query.run()?;

    if records.is_empty() {
        println!("No matching jobs recorded in {}", store.path().display());
        return Ok(());
    }

    println!();
    println!("{} job(s), newest first:", records.len());
    for record in &records {
        println!(
            "  {}  {} {:<12} {:>8}  {}",
            record.start_time.format("%Y-%m-%d %H:%M:%S"),
            status_label(record.status),
            record.tool,
            format!("{:.1}s", record.duration_seconds),
            record.task_id
        );
        if let Some(error) = &record.error {
            println!("        {}", error.dimmed());
        }
    }
    Ok(())
}

/// Prints summary statistics over the whole job history.
fn cmd_stats(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(&config)?;
    let stats = store.summary()?;

    if stats.total_jobs == 0 {
        println!("No jobs recorded yet in {}", store.path().display());
        return Ok(());
    }

    println!();
    println!("Job history: {}", store.path().display());
    println!("  Total jobs:      {}", stats.total_jobs);
    println!("  Succeeded:       {}", stats.succeeded);
    println!("  Failed:          {}", stats.failed);
    println!("  Success rate:    {:.1}%", stats.success_rate);
    println!("  Total CPU:       {:.1}s", stats.total_cpu_seconds);
    println!("  Avg CPU/job:     {:.2}s", stats.average_cpu_seconds);
    println!("  Total duration:  {:.1}s", stats.total_duration_seconds);
    println!("  Avg duration:    {:.2}s", stats.average_duration_seconds);

    if !stats.per_tool.is_empty() {
        println!();
        println!("Per tool:");
        for (tool, t) in &stats.per_tool {
            println!(
                "  {:<16} {:>5} job(s)  {:>6.1}% success  {:>8.1}s cpu",
                tool, t.total_jobs, t.success_rate, t.total_cpu_seconds
            );
        }
    }
    Ok(())
}

/// Reports the local backend's health and capabilities.
fn cmd_health() -> Result<(), Box<dyn std::error::Error>> {
    let submitter = LocalSubmitter::new();
    let meta = submitter.metadata();
    let health = submitter.health_check();

    println!("Adapter: {} v{}", meta.name, meta.version);
    println!("Capabilities: {}", meta.capabilities.join(", "));
    println!();

    let label = match health.status {
        HealthStatus::Healthy => "HEALTHY".green().bold(),
        HealthStatus::Degraded => "DEGRADED".yellow().bold(),
        HealthStatus::Unhealthy => "UNHEALTHY".red().bold(),
    };
    println!("Status: {}", label);
    println!("  Broker reachable: {}", health.broker_reachable);
    println!("  Available memory: {} MB", health.memory_available_mb);
    println!("  Active tasks:     {} / {}", health.active_tasks, health.capacity);
    if let Some(detail) = &health.detail {
        println!("  Detail: {}", detail);
    }

    if health.status == HealthStatus::Unhealthy {
        return Err("backend reported unhealthy".into());
    }
    Ok(())
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    // Setup logging
    setup_logging(config.verbose, config.quiet);

    if !config.quiet {
        print_banner();
    }

    match config.command {
        Command::Run => cmd_run(config),
        Command::History => cmd_history(config),
        Command::Stats => cmd_stats(config),
        Command::Health => cmd_health(),
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
