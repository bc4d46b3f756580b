//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use autoextend_helper::cascade::{CascadeOutcome, DonorVerdict};
use autoextend_helper::core::config::Config;
use autoextend_helper::core::errors::AehError;
use autoextend_helper::daemon::runtime::{
    CapacityDaemon, DaemonReport, build_cascade, build_executor,
};
use autoextend_helper::daemon::signals::ShutdownSignal;
use autoextend_helper::logger::activity::{ActivityLoggerConfig, spawn_logger};
use autoextend_helper::lvm::model::Topology;
use autoextend_helper::monitor::usage_probe::{MountReading, MountSnapshot, UsageProbe};
use autoextend_helper::platform::pal::detect_platform;

/// autoextend helper: grows an LVM logical volume before its filesystem fills up.
#[derive(Debug, Parser)]
#[command(
    name = "aeh",
    author,
    version,
    about = "Autoextend Helper - self-healing LVM capacity manager",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Simulate storage operations regardless of configuration.
    #[arg(long, global = true)]
    dry_run: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the capacity daemon until SIGINT/SIGTERM.
    Run(RunArgs),
    /// Show current usage, pool free space, and donor eligibility.
    Check,
    /// Run one extension cascade now.
    Extend,
    /// View and validate configuration.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct RunArgs {
    /// Do not start the synthetic load generator.
    #[arg(long)]
    no_load: bool,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand, Serialize)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input, bad configuration, or a failed cascade.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
        }
    }
}

impl From<AehError> for CliError {
    fn from(err: AehError) -> Self {
        match err {
            AehError::InvalidConfig { .. }
            | AehError::MissingConfig { .. }
            | AehError::ConfigParse { .. } => Self::User(err.to_string()),
            AehError::Serialization { .. } => Self::Internal(err.to_string()),
            _ => Self::Runtime(err.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Run(args) => run_daemon(cli, args),
        Command::Check => run_check(cli),
        Command::Extend => run_extend(cli),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    if cli.dry_run {
        config.dry_run = true;
    }
    Ok(config)
}

// ──────────────────── run ────────────────────

fn run_daemon(cli: &Cli, args: &RunArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let mut daemon = CapacityDaemon::bootstrap(config)?;
    if args.no_load {
        daemon = daemon.without_load();
    }
    let report = daemon.run()?;

    match output_mode(cli) {
        OutputMode::Human => print_daemon_report(&report),
        OutputMode::Json => {
            let payload = json!({
                "command": "run",
                "report": serde_json::to_value(&report)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn print_daemon_report(report: &DaemonReport) {
    let stats = &report.supervisor;
    println!("{}", "Daemon stopped.".bold());
    println!("  Uptime: {}s", report.uptime_secs);
    println!(
        "  Ticks: {} ({} undetermined)",
        stats.ticks, stats.undetermined
    );
    println!(
        "  Breaches: {} (extended {}, failed {}, cancelled {})",
        stats.breaches, stats.extensions, stats.failures, stats.cancelled
    );
    if let Some(load) = &report.load {
        println!(
            "  Load generator: {} files, {} bytes, stopped: {}",
            load.files_written,
            load.bytes_written,
            load.stop_reason.label()
        );
    }
}

// ──────────────────── check ────────────────────

#[derive(Debug, Serialize)]
struct DonorReading {
    donor: String,
    #[serde(flatten)]
    reading: MountReading,
    verdict: DonorVerdict,
}

#[derive(Debug, Serialize)]
struct CheckReport {
    command: &'static str,
    volume: String,
    monitored: MountReading,
    threshold_pct: u8,
    breached: Option<bool>,
    group: String,
    group_free_gib: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_error: Option<String>,
    growth_increment_gib: u64,
    donors: Vec<DonorReading>,
    dry_run: bool,
}

fn run_check(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let topology = Topology::from_config(&config);
    let probe = UsageProbe::new(detect_platform()?);
    let executor = build_executor(&config);
    let needed = topology.volume.growth_increment_gib;

    let monitored = MountReading {
        mount_path: topology.volume.mount_path.clone(),
        snapshot: probe.snapshot_of(&topology.volume.mount_path),
    };
    let (group_free_gib, group_error) = match executor.group_free_gib(&topology.group) {
        Ok(free) => (Some(free), None),
        Err(err) => (None, Some(err.to_string())),
    };
    let donors = topology
        .donors
        .iter()
        .map(|donor| {
            let snapshot = probe.snapshot_of(&donor.mount_path);
            DonorReading {
                donor: donor.id().to_string(),
                reading: MountReading {
                    mount_path: donor.mount_path.clone(),
                    snapshot,
                },
                verdict: DonorVerdict::judge(snapshot, config.cascade.donor_max_usage_pct, needed),
            }
        })
        .collect();

    let report = CheckReport {
        command: "check",
        volume: topology.volume.volume.to_string(),
        breached: monitored
            .snapshot
            .map(|s| s.usage_pct >= config.monitor.threshold_pct),
        monitored,
        threshold_pct: config.monitor.threshold_pct,
        group: topology.group.name.clone(),
        group_free_gib,
        group_error,
        growth_increment_gib: needed,
        donors,
        dry_run: config.dry_run,
    };

    match output_mode(cli) {
        OutputMode::Human => print_check_report(&report),
        OutputMode::Json => write_json_line(&serde_json::to_value(&report)?)?,
    }
    Ok(())
}

fn describe_snapshot(snapshot: Option<MountSnapshot>) -> String {
    snapshot.map_or_else(
        || "usage undetermined".to_string(),
        |s| format!("usage {}%, free {} GiB", s.usage_pct, s.free_gib),
    )
}

fn print_check_report(report: &CheckReport) {
    let status = match report.breached {
        Some(true) => "BREACH".red().bold(),
        Some(false) => "ok".green(),
        None => "unknown".yellow(),
    };
    println!(
        "{} {} ({}): {} [threshold {}%] {status}",
        "Monitored".bold(),
        report.volume,
        report.monitored.mount_path.display(),
        describe_snapshot(report.monitored.snapshot),
        report.threshold_pct,
    );

    match (report.group_free_gib, &report.group_error) {
        (Some(free), _) => {
            let free_str = format!("{free} GiB free");
            let colored_free = if free >= report.growth_increment_gib {
                free_str.green()
            } else {
                free_str.yellow()
            };
            println!("{} {}: {colored_free}", "Group".bold(), report.group);
        }
        (None, Some(err)) => {
            println!("{} {}: {}", "Group".bold(), report.group, err.red());
        }
        (None, None) => println!("{} {}: unknown", "Group".bold(), report.group),
    }

    if report.donors.is_empty() {
        println!("{} none configured", "Donors".bold());
    }
    for donor in &report.donors {
        let verdict = if donor.verdict.is_eligible() {
            donor.verdict.to_string().green()
        } else {
            donor.verdict.to_string().dimmed()
        };
        println!(
            "{} {} ({}): {} -> {verdict}",
            "Donor".bold(),
            donor.donor,
            donor.reading.mount_path.display(),
            describe_snapshot(donor.reading.snapshot),
        );
    }
    if report.dry_run {
        println!("{}", "(dry run: storage operations are simulated)".dimmed());
    }
}

// ──────────────────── extend ────────────────────

fn run_extend(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let topology = Topology::from_config(&config);
    let platform = detect_platform()?;
    let executor = build_executor(&config);
    let dry_run = executor.is_dry_run();

    let (events, logger_join) = spawn_logger(ActivityLoggerConfig::from_config(&config))?;
    let cascade = build_cascade(&config, platform, executor, events.clone());
    let outcome = cascade.extend(&topology, &ShutdownSignal::with_os_hooks());
    drop(cascade);
    events.shutdown();
    logger_join
        .join()
        .map_err(|_| CliError::Internal("logger thread panicked".to_string()))?;

    match output_mode(cli) {
        OutputMode::Human => {
            let line = format!("{}: {outcome}", topology.volume.volume);
            match &outcome {
                CascadeOutcome::Failed { .. } => println!("{}", line.red().bold()),
                CascadeOutcome::Cancelled => println!("{}", line.yellow()),
                _ => println!("{}", line.green()),
            }
            if dry_run {
                println!("{}", "(dry run: no storage was modified)".dimmed());
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "extend",
                "volume": topology.volume.volume.to_string(),
                "dry_run": dry_run,
                "result": serde_json::to_value(&outcome)?,
            });
            write_json_line(&payload)?;
        }
    }

    if outcome.is_failed() {
        return Err(CliError::User(format!("cascade {outcome}")));
    }
    Ok(())
}

// ──────────────────── config ────────────────────

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = load_config(cli)?;
            match output_mode(cli) {
                OutputMode::Human => println!("{}", config.to_toml()?),
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match load_config(cli) {
            Ok(config) => {
                let hash = config.stable_hash()?;
                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("{}", "Configuration is valid.".green());
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                if output_mode(cli) == OutputMode::Json {
                    let payload = json!({
                        "command": "config validate",
                        "valid": false,
                        "error": e.to_string(),
                    });
                    write_json_line(&payload)?;
                }
                Err(e)
            }
        },
    }
}

// ──────────────────── output ────────────────────

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("AEH_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
