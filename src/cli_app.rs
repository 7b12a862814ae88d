//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use dumpkeeper::core::config::Config;
use dumpkeeper::core::errors::{DkError, FailureRecord};
use dumpkeeper::lock::{LockMode, LockOpenOptions, LockableFile};
use dumpkeeper::logger::activity::ActivityLogger;
use dumpkeeper::retention::{
    ManagedEntry, PASS_LOCK_FILE, PassReport, PruneReport, RetentionEngine,
};

/// dumpkeeper: keeps a directory of crash dumps within a size and count budget.
#[derive(Debug, Parser)]
#[command(
    name = "dk",
    author,
    version,
    about = "dumpkeeper - bounded retention for crash dumps and other generated artifacts",
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
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run one retention pass: scan, evict oldest-first, prune empty directories.
    Run(RunArgs),
    /// List managed artifacts, oldest first.
    List(RootArgs),
    /// Remove empty directories under the managed root.
    Prune(RootArgs),
    /// Take an advisory lock on a file, hold it, then release it.
    Lock(LockArgs),
    /// View and validate configuration.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct RootArgs {
    /// Managed root (defaults to `retention.root` from config).
    #[arg(long, value_name = "PATH")]
    root: Option<PathBuf>,
}

#[derive(Debug, Clone, Args, Default)]
struct RunArgs {
    #[command(flatten)]
    root: RootArgs,
    /// Report what would be evicted without deleting anything.
    #[arg(long)]
    dry_run: bool,
    /// Wait for a concurrent pass over the same root instead of failing.
    #[arg(long)]
    wait: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LockModeArg {
    Read,
    Write,
}

impl From<LockModeArg> for LockMode {
    fn from(arg: LockModeArg) -> Self {
        match arg {
            LockModeArg::Read => Self::Read,
            LockModeArg::Write => Self::Write,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct LockArgs {
    /// File to lock (created if missing).
    #[arg(value_name = "FILE")]
    file: PathBuf,
    /// Shared (read) or exclusive (write) lock.
    #[arg(long, value_enum, default_value_t = LockModeArg::Write)]
    mode: LockModeArg,
    /// Fail immediately if the lock is held elsewhere.
    #[arg(long)]
    nonblocking: bool,
    /// Seconds to hold the lock before releasing it.
    #[arg(long, default_value_t = 0, value_name = "SECONDS")]
    hold_secs: u64,
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print the config file path in use.
    Path,
    /// Print the effective configuration.
    Show,
    /// Validate the configuration.
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
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// Operation partially succeeded.
    #[error("{0}")]
    Partial(String),
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
            Self::Partial(_) => 4,
        }
    }
}

impl From<DkError> for CliError {
    fn from(err: DkError) -> Self {
        match err {
            DkError::InvalidConfig { .. }
            | DkError::MissingConfig { .. }
            | DkError::ConfigParse { .. }
            | DkError::Precondition { .. } => Self::User(err.to_string()),
            DkError::Serialization { .. } => Self::Internal(err.to_string()),
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
        Command::Run(args) => run_pass(cli, args),
        Command::List(args) => run_list(cli, args),
        Command::Prune(args) => run_prune(cli, args),
        Command::Lock(args) => run_lock(cli, args),
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
    Ok(Config::load(cli.config.as_deref())?)
}

fn build_engine(
    config: &Config,
    root: Option<&Path>,
    logger: Option<ActivityLogger>,
) -> Result<RetentionEngine, CliError> {
    let mut engine = RetentionEngine::new(&config.retention, logger);
    engine.set_root(root.unwrap_or(&config.retention.root))?;
    Ok(engine)
}

/// Like [`build_engine`] but the root must already exist.
fn attach_engine(config: &Config, root: Option<&Path>) -> Result<RetentionEngine, CliError> {
    let mut engine = RetentionEngine::new(&config.retention, None);
    engine.attach_root(root.unwrap_or(&config.retention.root))?;
    Ok(engine)
}

fn run_pass(cli: &Cli, args: &RunArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let logger = ActivityLogger::from_config(&config.logging);
    let mut engine = build_engine(&config, args.root.root.as_deref(), logger.clone())?;
    if args.dry_run {
        engine.set_dry_run(true);
    }

    let lock_path = engine.root().join(PASS_LOCK_FILE);
    let mut pass_lock: LockableFile =
        LockableFile::open_path(&lock_path, &LockOpenOptions::read_write())?
            .with_logger(logger.clone());
    match pass_lock.acquire(LockMode::Write, args.wait) {
        Ok(()) => {}
        Err(DkError::LockContended { .. }) => {
            return Err(CliError::Runtime(format!(
                "another retention pass holds {}; retry later or pass --wait",
                lock_path.display()
            )));
        }
        Err(DkError::UnsupportedPlatform { details }) => {
            eprintln!("dk: warning: passes are not serialised on this platform: {details}");
        }
        Err(e) => return Err(e.into()),
    }

    let report = engine.run_pass();
    pass_lock.close();
    if let Some(logger) = &logger {
        logger.flush();
    }

    match output_mode(cli) {
        OutputMode::Human => print_pass_report(&report),
        OutputMode::Json => emit_pass_report_json(&report)?,
    }

    let failures = report.failures().count();
    if failures > 0 {
        return Err(CliError::Partial(format!(
            "retention pass finished with {failures} recorded failure(s)"
        )));
    }
    Ok(())
}

fn print_pass_report(report: &PassReport) {
    let eviction = &report.eviction;
    let header = if eviction.dry_run {
        format!("Retention pass over {} (dry run):", report.root.display())
    } else {
        format!("Retention pass over {}:", report.root.display())
    };
    println!("{}", header.bold());
    println!(
        "  Scanned:   {} artifacts, {}",
        report.scanned_count,
        format_bytes(report.scanned_size_bytes),
    );
    let verb = if eviction.dry_run {
        "Would evict"
    } else {
        "Evicted"
    };
    println!(
        "  {verb}: {} artifacts, {}",
        eviction.evicted.len(),
        format_bytes(eviction.bytes_evicted),
    );
    if !eviction.vanished.is_empty() {
        println!(
            "  Vanished:  {} artifacts (removed by another process)",
            eviction.vanished.len()
        );
    }
    println!(
        "  Remaining: {} artifacts, {} (limits: {}, {} artifacts)",
        eviction.remaining_count,
        format_bytes(eviction.remaining_size_bytes),
        format_bytes(report.limits.max_size_bytes),
        report.limits.max_count,
    );
    if let Some(prune) = &report.prune {
        println!("  Pruned:    {} empty directories", prune.removed_count());
    }
    println!("  Elapsed:   {} ms", report.duration_ms);

    let failures: Vec<&FailureRecord> = report.failures().collect();
    if !failures.is_empty() {
        println!("  {} {}", "Failures:".red(), failures.len());
        for failure in failures {
            eprintln!("    {}: {}", failure.path.display(), failure.error);
        }
    }
}

fn emit_pass_report_json(report: &PassReport) -> Result<(), CliError> {
    let failures: Vec<Value> = report.failures().map(failure_json).collect();
    let evicted: Vec<Value> = report.eviction.evicted.iter().map(entry_json).collect();
    let survivors: Vec<String> = report
        .surviving_paths()
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();

    let payload = json!({
        "command": "run",
        "root": report.root.to_string_lossy(),
        "dry_run": report.eviction.dry_run,
        "limits": serde_json::to_value(report.limits)?,
        "scanned_count": report.scanned_count,
        "scanned_size_bytes": report.scanned_size_bytes,
        "evicted_count": report.evicted_count(),
        "bytes_evicted": report.bytes_evicted(),
        "evicted": evicted,
        "vanished_count": report.eviction.vanished.len(),
        "remaining_count": report.eviction.remaining_count,
        "remaining_size_bytes": report.eviction.remaining_size_bytes,
        "survivors": survivors,
        "pruned_dirs": report.prune.as_ref().map(PruneReport::removed_count),
        "duration_ms": report.duration_ms,
        "errors": failures,
    });
    write_json_line(&payload)
}

fn run_list(cli: &Cli, args: &RootArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let engine = attach_engine(&config, args.root.as_deref())?;
    let entries = engine.list_artifacts();
    let total_bytes: u64 = entries.iter().map(|e| e.size_bytes).sum();

    match output_mode(cli) {
        OutputMode::Human => {
            if entries.is_empty() {
                println!("No artifacts under {}.", engine.root().display());
            } else {
                for entry in &entries {
                    println!(
                        "{}  {:>10}  {}",
                        format_time(entry),
                        format_bytes(entry.size_bytes),
                        entry.path.display()
                    );
                }
                println!(
                    "{} artifacts, {} (limits: {}, {} artifacts)",
                    entries.len(),
                    format_bytes(total_bytes),
                    format_bytes(engine.limits().max_size_bytes),
                    engine.limits().max_count,
                );
            }
        }
        OutputMode::Json => {
            let artifacts: Vec<Value> = entries.iter().map(entry_json).collect();
            let payload = json!({
                "command": "list",
                "root": engine.root().to_string_lossy(),
                "count": entries.len(),
                "total_bytes": total_bytes,
                "artifacts": artifacts,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_prune(cli: &Cli, args: &RootArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let logger = ActivityLogger::from_config(&config.logging);
    let engine = build_engine(&config, args.root.as_deref(), logger.clone())?;
    let report = engine.prune();
    if let Some(logger) = &logger {
        logger.flush();
    }

    match output_mode(cli) {
        OutputMode::Human => {
            println!(
                "Pruned {} empty directories under {}.",
                report.removed_count(),
                engine.root().display()
            );
            for failure in &report.failures {
                eprintln!("  {}: {}", failure.path.display(), failure.error);
            }
        }
        OutputMode::Json => {
            let removed: Vec<String> = report
                .removed
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect();
            let errors: Vec<Value> = report.failures.iter().map(failure_json).collect();
            let payload = json!({
                "command": "prune",
                "root": engine.root().to_string_lossy(),
                "removed_count": report.removed_count(),
                "removed": removed,
                "errors": errors,
            });
            write_json_line(&payload)?;
        }
    }

    if report.failures.is_empty() {
        Ok(())
    } else {
        Err(CliError::Partial(format!(
            "prune finished with {} recorded failure(s)",
            report.failures.len()
        )))
    }
}

fn run_lock(cli: &Cli, args: &LockArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let logger = ActivityLogger::from_config(&config.logging);
    let mode = LockMode::from(args.mode);

    let mut file: LockableFile =
        LockableFile::open_path(&args.file, &LockOpenOptions::read_write())?
            .with_logger(logger.clone());

    let start = Instant::now();
    match file.acquire(mode, !args.nonblocking) {
        Ok(()) => {}
        Err(DkError::LockContended { .. }) => {
            return Err(CliError::Runtime(format!(
                "{mode} lock on {} is held by another process",
                args.file.display()
            )));
        }
        Err(e) => return Err(e.into()),
    }
    #[allow(clippy::cast_possible_truncation)]
    let waited_ms = start.elapsed().as_millis() as u64;

    match output_mode(cli) {
        OutputMode::Human => {
            println!(
                "{} {mode} lock on {} (waited {waited_ms} ms, backend {})",
                "Acquired".green(),
                args.file.display(),
                file.backend_name(),
            );
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "lock",
                "path": args.file.to_string_lossy(),
                "mode": mode.as_str(),
                "acquired": true,
                "waited_ms": waited_ms,
                "hold_secs": args.hold_secs,
                "backend": file.backend_name(),
            });
            write_json_line(&payload)?;
        }
    }
    io::stdout().flush()?;

    if args.hold_secs > 0 {
        std::thread::sleep(Duration::from_secs(args.hold_secs));
    }
    file.release()?;
    if let Some(logger) = &logger {
        logger.flush();
    }

    if output_mode(cli) == OutputMode::Human {
        println!("Released {mode} lock on {}.", args.file.display());
    }
    Ok(())
}

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
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Internal(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let value = serde_json::to_value(&config)?;
                    let payload = json!({
                        "command": "config show",
                        "config": value,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
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
                match output_mode(cli) {
                    OutputMode::Human => {
                        eprintln!("{} {e}", "Configuration is INVALID:".red());
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "error_code": e.code(),
                            "error": e.to_string(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

fn entry_json(entry: &ManagedEntry) -> Value {
    json!({
        "path": entry.path.to_string_lossy(),
        "size_bytes": entry.size_bytes,
        "modified": format_time(entry),
    })
}

fn failure_json(failure: &FailureRecord) -> Value {
    json!({
        "path": failure.path.to_string_lossy(),
        "error": failure.error,
        "error_code": failure.error_code,
        "recoverable": failure.recoverable,
    })
}

fn format_time(entry: &ManagedEntry) -> String {
    DateTime::<Utc>::from(entry.modified_at).to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[allow(clippy::cast_precision_loss)]
fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;

    if bytes >= GIB {
        format!("{:.1} GB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("DK_OUTPUT_FORMAT").ok();
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
