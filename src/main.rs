//! scrubgate - strips private metadata from images dropped into a hot folder.
//!
//! Usage:
//!   scrubgate --input IN --output OUT --processed DONE --errors ERR
//!                              Run one intake pass
//!   scrubgate check ...        Verify the directories without touching files
//!   scrubgate --help           Show help

use std::path::{Component, Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, eyre};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use scrubgate_core::{DuplicatePolicy, EngineConfig, IntakeConfig, RunSummary, StateLocation};
use scrubgate_ops::{RunOutcome, Runner, preflight};
use scrubgate_scan::TempNameMatcher;

/// Exit status when `--fail-on-error` is set and some files failed.
const EXIT_FILE_ERRORS: u8 = 2;

#[derive(Parser)]
#[command(
    name = "scrubgate",
    version,
    about = "Strip private image metadata from a hot folder, once files stop changing",
    long_about = "scrubgate performs one bounded pass over an intake directory.\n\n\
                  Files are scrubbed only after they have been unchanged for the \
                  stability window. Originals go to the processed directory, \
                  duplicates are deleted or quarantined, and a summary line is \
                  printed for schedulers to parse."
)]
struct Cli {
    #[command(flatten)]
    options: Options,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Check that all directories exist, are real directories and are writable
    Check,
}

#[derive(clap::Args)]
struct Options {
    /// TOML configuration file (flags and environment override it)
    #[arg(long, global = true, env = "SCRUBGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Intake directory
    #[arg(long, global = true, env = "SCRUBGATE_INPUT")]
    input: Option<PathBuf>,

    /// Directory receiving scrubbed copies
    #[arg(long, global = true, env = "SCRUBGATE_OUTPUT")]
    output: Option<PathBuf>,

    /// Directory receiving originals after processing
    #[arg(long, global = true, env = "SCRUBGATE_PROCESSED")]
    processed: Option<PathBuf>,

    /// Quarantine directory for duplicates
    #[arg(long, global = true, env = "SCRUBGATE_ERRORS")]
    errors: Option<PathBuf>,

    /// Descend into subdirectories of the intake directory
    #[arg(short, long, env = "SCRUBGATE_RECURSIVE")]
    recursive: bool,

    /// Seconds a file must stay unchanged before it is scrubbed
    #[arg(long, env = "SCRUBGATE_STABLE_SECONDS")]
    stable_seconds: Option<u64>,

    /// State file path, or "disabled"
    #[arg(long, env = "SCRUBGATE_STATE")]
    state_file: Option<StateLocation>,

    /// What to do when the output already has the file: delete or quarantine (move)
    #[arg(long, env = "SCRUBGATE_ON_DUPLICATE")]
    on_duplicate: Option<DuplicatePolicy>,

    /// Delete originals after a successful scrub
    #[arg(long, env = "SCRUBGATE_DELETE_ORIGINAL")]
    delete_original: bool,

    /// Report what would happen without changing anything
    #[arg(long, env = "SCRUBGATE_DRY_RUN")]
    dry_run: bool,

    /// Maximum number of files to process in this run
    #[arg(long, env = "SCRUBGATE_MAX_FILES")]
    max_files: Option<usize>,

    /// Also strip the ICC colour profile
    #[arg(long, env = "SCRUBGATE_PARANOIA")]
    paranoia: bool,

    /// Copyright notice to stamp into outputs
    #[arg(long, env = "SCRUBGATE_COPYRIGHT")]
    copyright: Option<String>,

    /// Comment to stamp into outputs
    #[arg(long, env = "SCRUBGATE_COMMENT")]
    comment: Option<String>,

    /// Engine executable
    #[arg(long, env = "SCRUBGATE_ENGINE")]
    engine: Option<PathBuf>,

    /// Seconds before a hung engine invocation is killed
    #[arg(long, env = "SCRUBGATE_ENGINE_TIMEOUT")]
    engine_timeout: Option<u64>,

    /// Run lock file
    #[arg(long, env = "SCRUBGATE_LOCK_FILE")]
    lock_file: Option<PathBuf>,

    /// Log filter (e.g. "info", "scrubgate_ops=debug"); defaults to RUST_LOG or info
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Only log errors and print only the summary line
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Summary format
    #[arg(long, default_value = "text")]
    format: OutputFormat,

    /// Exit with status 2 when any file failed
    #[arg(long, env = "SCRUBGATE_FAIL_ON_ERROR")]
    fail_on_error: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Settings read from `--config`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    input_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    processed_dir: Option<PathBuf>,
    errors_dir: Option<PathBuf>,
    recursive: Option<bool>,
    stable_seconds: Option<u64>,
    state: Option<StateLocation>,
    on_duplicate: Option<DuplicatePolicy>,
    delete_original: Option<bool>,
    dry_run: Option<bool>,
    max_files: Option<usize>,
    temp_patterns: Option<Vec<String>>,
    lock_path: Option<PathBuf>,
    #[serde(default)]
    engine: FileEngineConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileEngineConfig {
    program: Option<PathBuf>,
    program_args: Option<Vec<String>>,
    paranoia: Option<bool>,
    copyright: Option<String>,
    comment: Option<String>,
    timeout_secs: Option<u64>,
}

fn main() -> Result<ExitCode> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_logging(&cli.options)?;

    let config = build_config(&cli.options)?;

    match cli.command {
        Some(Command::Check) => run_check(&config),
        None => run_intake(config, &cli.options),
    }
}

/// Install the stderr log subscriber.
fn init_logging(options: &Options) -> Result<()> {
    let filter = if options.quiet {
        EnvFilter::new("error")
    } else if let Some(level) = &options.log_level {
        EnvFilter::try_new(level).with_context(|| format!("Invalid log filter {level:?}"))?
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| eyre!("Failed to install logger: {e}"))
}

/// Merge defaults, the optional TOML file, environment and flags.
fn build_config(options: &Options) -> Result<IntakeConfig> {
    let file = match &options.config {
        Some(path) => load_file_config(path)?,
        None => FileConfig::default(),
    };

    let mut builder = IntakeConfig::builder();

    let dirs = [
        ("--input", options.input.clone().or(file.input_dir)),
        ("--output", options.output.clone().or(file.output_dir)),
        ("--processed", options.processed.clone().or(file.processed_dir)),
        ("--errors", options.errors.clone().or(file.errors_dir)),
    ];
    for (flag, dir) in &dirs {
        if dir.is_none() {
            return Err(eyre!("Missing {flag} directory (flag, environment or config file)"));
        }
    }
    let [input, output, processed, errors] = dirs.map(|(_, dir)| dir.unwrap_or_default());
    builder
        .input_dir(absolute(input)?)
        .output_dir(absolute(output)?)
        .processed_dir(absolute(processed)?)
        .errors_dir(absolute(errors)?)
        .recursive(options.recursive || file.recursive.unwrap_or(false))
        .delete_original(options.delete_original || file.delete_original.unwrap_or(false))
        .dry_run(options.dry_run || file.dry_run.unwrap_or(false));

    if let Some(seconds) = options.stable_seconds.or(file.stable_seconds) {
        builder.stable_seconds(seconds);
    }
    if let Some(state) = options.state_file.clone().or(file.state) {
        let state = match state {
            StateLocation::Path(path) => StateLocation::Path(absolute(path)?),
            disabled => disabled,
        };
        builder.state(Some(state));
    }
    if let Some(policy) = options.on_duplicate.or(file.on_duplicate) {
        builder.on_duplicate(policy);
    }
    if let Some(limit) = options.max_files.or(file.max_files) {
        builder.max_files(Some(limit));
    }
    if let Some(patterns) = file.temp_patterns {
        builder.temp_patterns(patterns);
    }
    if let Some(lock) = options.lock_file.clone().or(file.lock_path) {
        builder.lock_path(Some(absolute(lock)?));
    }

    let defaults = EngineConfig::default();
    let engine = EngineConfig {
        program: options
            .engine
            .clone()
            .or(file.engine.program)
            .unwrap_or(defaults.program),
        program_args: file.engine.program_args.unwrap_or(defaults.program_args),
        paranoia: options.paranoia || file.engine.paranoia.unwrap_or(defaults.paranoia),
        copyright: options.copyright.clone().or(file.engine.copyright),
        comment: options.comment.clone().or(file.engine.comment),
        timeout_secs: options
            .engine_timeout
            .or(file.engine.timeout_secs)
            .unwrap_or(defaults.timeout_secs),
    };
    builder.engine(engine);

    builder.build().map_err(|e| eyre!("Invalid configuration: {e}"))
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("Invalid config file {}", path.display()))
}

/// Make `path` absolute without `.` or `..` components.
///
/// The parent is resolved through the filesystem when it exists. The last
/// component is kept as given, so a symlinked directory is still refused by
/// preflight rather than silently followed.
fn absolute(path: PathBuf) -> Result<PathBuf> {
    let joined =
        std::path::absolute(&path).with_context(|| format!("Invalid path {}", path.display()))?;

    match (joined.parent(), joined.file_name()) {
        (Some(parent), Some(name)) => {
            if let Ok(parent) = std::fs::canonicalize(parent) {
                return Ok(parent.join(name));
            }
        }
        // Ends in `..`: the result is whatever directory the kernel lands on.
        _ => {
            if let Ok(resolved) = std::fs::canonicalize(&joined) {
                return Ok(resolved);
            }
        }
    }
    Ok(normalize_lexically(&joined))
}

/// Drop `.` and apply `..` without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// Verify the directories and report.
fn run_check(config: &IntakeConfig) -> Result<ExitCode> {
    for (label, dir) in config.labelled_dirs() {
        preflight::check_directory(label, dir).context("Preflight failed")?;
        println!(" ok  {label:<10} {}", dir.display());
    }
    check_temp_patterns(config)?;
    println!(" ok  {:<10} {}", "State", config.state_location());
    println!(" ok  {:<10} {}", "Lock", config.lock_file().display());
    Ok(ExitCode::SUCCESS)
}

/// Reject temporary-name patterns that do not compile.
fn check_temp_patterns(config: &IntakeConfig) -> Result<()> {
    TempNameMatcher::new(&config.temp_patterns)
        .map(drop)
        .context("Invalid configuration")
}

/// Run one intake pass and print its summary.
fn run_intake(config: IntakeConfig, options: &Options) -> Result<ExitCode> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")?;

    let outcome = runtime
        .block_on(Runner::new(config).run())
        .context("Intake pass aborted")?;

    let report = match outcome {
        RunOutcome::LockHeld => return Ok(ExitCode::SUCCESS),
        RunOutcome::Completed(report) => report,
    };

    print_summary(&report.summary, options)?;

    if let Some(err) = report.error {
        return Err(eyre!(err).wrap_err("Scan stopped part-way"));
    }
    if options.fail_on_error && report.summary.errors > 0 {
        warn!(errors = report.summary.errors, "some files failed");
        return Ok(ExitCode::from(EXIT_FILE_ERRORS));
    }
    info!("done");
    Ok(ExitCode::SUCCESS)
}

fn print_summary(summary: &RunSummary, options: &Options) -> Result<()> {
    match options.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(summary)?);
        }
        OutputFormat::Text => {
            if !options.quiet {
                print_summary_block(summary);
            }
            println!("{}", summary.machine_line());
        }
    }
    Ok(())
}

fn print_summary_block(summary: &RunSummary) {
    let skipped = &summary.skipped;

    println!();
    println!("{}", "─".repeat(60));
    println!(
        " scrubgate run - {}",
        summary.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!(
        " {} file(s) considered in {:.2}s",
        summary.total,
        summary.duration.as_secs_f64()
    );
    println!("{}", "─".repeat(60));
    println!(
        " Scrubbed    {:>6}  ({})",
        summary.scrubbed,
        format_size(summary.bytes_scrubbed)
    );
    println!(" Skipped     {:>6}", summary.skipped_total());
    for (label, count) in [
        ("unstable", skipped.unstable),
        ("temporary", skipped.temporary),
        ("unsafe", skipped.unsafe_path),
        ("duplicate", skipped.duplicate),
        ("deferred", skipped.deferred),
        ("dry run", skipped.dry_run),
    ] {
        if count > 0 {
            println!("   {label:<10}{count:>6}");
        }
    }
    println!(
        " Duplicates  {:>6}  ({} deleted, {} moved)",
        summary.duplicates(),
        summary.duplicates_deleted,
        summary.duplicates_moved
    );
    println!(" Errors      {:>6}", summary.errors);
    for failure in &summary.failures {
        let name = failure
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| failure.path.display().to_string());
        println!("   {}: {}", truncate(&name, 30), failure.message);
    }
    if summary.scan_warnings > 0 {
        println!(" Warnings    {:>6}", summary.scan_warnings);
    }
    println!(" State       {:>6}", summary.state.to_string());
    println!("{}", "─".repeat(60));
}

fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// Truncate a string to max length, respecting UTF-8 boundaries.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(1)).collect();
        format!("{kept}…")
    }
}
