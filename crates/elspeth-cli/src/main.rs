#![cfg_attr(
    test,
    allow(
        clippy::panic,
        clippy::print_stdout,
        clippy::print_stderr,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::use_debug,
        clippy::dbg_macro,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
        reason = "Test-only output and panic-based assertions are permitted."
    )
)]
// crates/elspeth-cli/src/main.rs
// ============================================================================
// Module: Elspeth CLI Entry Point
// Description: Command dispatcher for pipeline validation and execution.
// Purpose: Provide a safe, fail-closed CLI over the Elspeth engine.
// Dependencies: clap, elspeth-config, elspeth-core, elspeth-plugins, elspeth-store-sqlite
// ============================================================================

//! ## Overview
//! The Elspeth CLI validates and runs configured pipelines, resolves
//! payloads by content hash, and reserves the ledger migration surface.
//! Inputs are untrusted: settings load through the fail-closed config
//! layer and every failure maps to a non-zero exit code.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use clap::ArgAction;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use elspeth_config::ElspethSettings;
use elspeth_config::FingerprintKeySource;
use elspeth_config::resolve_key_source;
use elspeth_core::Clock;
use elspeth_core::ExecutionGraph;
use elspeth_core::IdGenerator;
use elspeth_core::InMemoryRecorder;
use elspeth_core::Orchestrator;
use elspeth_core::PayloadStore;
use elspeth_core::Recorder;
use elspeth_core::RunOptions;
use elspeth_core::RunReport;
use elspeth_core::RuntimeServices;
use elspeth_core::Timestamp;
use elspeth_core::contracts::PayloadRef;
use elspeth_plugins::PluginRegistry;
use elspeth_store_sqlite::LANDSCAPE_SCHEMA_VERSION;
use elspeth_store_sqlite::SqliteLandscape;
use elspeth_store_sqlite::SqlitePayloadStore;
use thiserror::Error;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(
    name = "elspeth",
    disable_help_subcommand = true,
    disable_version_flag = true,
    arg_required_else_help = true
)]
struct Cli {
    /// Print version information and exit.
    #[arg(long = "version", action = ArgAction::SetTrue, global = true)]
    show_version: bool,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate settings and the execution graph.
    Validate(ValidateCommand),
    /// Run a configured pipeline.
    Run(RunCommand),
    /// Payload resolution utilities.
    Payload {
        /// Selected payload subcommand.
        #[command(subcommand)]
        command: PayloadCommand,
    },
    /// Ledger maintenance utilities.
    Landscape {
        /// Selected landscape subcommand.
        #[command(subcommand)]
        command: LandscapeCommand,
    },
}

/// Arguments for the `validate` command.
#[derive(Args, Debug)]
struct ValidateCommand {
    /// Settings file path.
    #[arg(short = 's', long = "settings", value_name = "PATH")]
    settings: PathBuf,
}

/// Arguments for the `run` command.
#[derive(Args, Debug)]
struct RunCommand {
    /// Settings file path.
    #[arg(short = 's', long = "settings", value_name = "PATH")]
    settings: PathBuf,
    /// Validate and report without executing.
    #[arg(long = "dry-run", conflicts_with = "execute")]
    dry_run: bool,
    /// Execute the pipeline.
    #[arg(long = "execute")]
    execute: bool,
    /// Verbose output.
    #[arg(short = 'v', long = "verbose", action = ArgAction::SetTrue)]
    verbose: bool,
}

/// Payload subcommands.
#[derive(Subcommand, Debug)]
enum PayloadCommand {
    /// Resolve a payload by content hash.
    Get(PayloadGetCommand),
}

/// Arguments for `payload get`.
#[derive(Args, Debug)]
struct PayloadGetCommand {
    /// Settings file path carrying the payload store location.
    #[arg(short = 's', long = "settings", value_name = "PATH")]
    settings: PathBuf,
    /// Content-hash reference to resolve.
    #[arg(value_name = "REF")]
    reference: String,
}

/// Landscape subcommands.
#[derive(Subcommand, Debug)]
enum LandscapeCommand {
    /// Schema migration (reserved).
    Migrate(LandscapeMigrateCommand),
}

/// Arguments for `landscape migrate`.
#[derive(Args, Debug)]
struct LandscapeMigrateCommand {
    /// Settings file path carrying the ledger location.
    #[arg(short = 's', long = "settings", value_name = "PATH")]
    settings: PathBuf,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI failure with a user-facing message.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// User-facing failure message.
    message: String,
}

impl CliError {
    /// Wraps a failure message.
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// CLI result alias.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: System Clock
// ============================================================================

/// Wall clock backed by system time.
struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |duration| i64::try_from(duration.as_millis()).unwrap_or(i64::MAX));
        Timestamp::from_unix_millis(millis)
    }
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

fn main() -> ExitCode {
    match dispatch() {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
fn dispatch() -> CliResult<ExitCode> {
    let cli = Cli::parse();

    if cli.show_version {
        write_stdout_line(&format!("elspeth {}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| CliError::new(format!("stdout: {err}")))?;
        return Ok(ExitCode::SUCCESS);
    }

    match cli.command {
        Commands::Validate(command) => command_validate(&command),
        Commands::Run(command) => command_run(&command),
        Commands::Payload {
            command: PayloadCommand::Get(command),
        } => command_payload_get(&command),
        Commands::Landscape {
            command: LandscapeCommand::Migrate(command),
        } => command_landscape_migrate(&command),
    }
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Validates settings and the execution graph.
fn command_validate(command: &ValidateCommand) -> CliResult<ExitCode> {
    let settings = ElspethSettings::load(Some(&command.settings))
        .map_err(|err| CliError::new(err.to_string()))?;
    let spec = settings.to_pipeline_spec().map_err(|err| CliError::new(err.to_string()))?;
    let ids = Arc::new(IdGenerator::new());
    let graph =
        ExecutionGraph::from_spec(&spec, &ids).map_err(|err| CliError::new(err.to_string()))?;
    graph.validate().map_err(|err| CliError::new(err.to_string()))?;
    PluginRegistry::new()
        .build_bindings(&spec)
        .map_err(|err| CliError::new(err.to_string()))?;

    write_stdout_line(&format!(
        "valid: {} nodes, {} edges",
        graph.get_nodes().len(),
        graph.get_edges().len()
    ))
    .map_err(|err| CliError::new(format!("stdout: {err}")))?;
    Ok(ExitCode::SUCCESS)
}

/// Runs a configured pipeline.
fn command_run(command: &RunCommand) -> CliResult<ExitCode> {
    let settings = ElspethSettings::load(Some(&command.settings))
        .map_err(|err| CliError::new(err.to_string()))?;
    let spec = settings.to_pipeline_spec().map_err(|err| CliError::new(err.to_string()))?;
    let ids = Arc::new(IdGenerator::new());
    let graph =
        ExecutionGraph::from_spec(&spec, &ids).map_err(|err| CliError::new(err.to_string()))?;
    graph.validate().map_err(|err| CliError::new(err.to_string()))?;
    let bindings = PluginRegistry::new()
        .build_bindings(&spec)
        .map_err(|err| CliError::new(err.to_string()))?;

    if command.dry_run || !command.execute {
        write_stdout_line(&format!(
            "dry-run: {} nodes, {} edges; pass --execute to run",
            graph.get_nodes().len(),
            graph.get_edges().len()
        ))
        .map_err(|err| CliError::new(format!("stdout: {err}")))?;
        return Ok(ExitCode::SUCCESS);
    }

    let recorder: Arc<dyn Recorder> = if settings.landscape.enabled {
        let config = settings
            .landscape
            .sqlite_config()
            .ok_or_else(|| CliError::new("landscape.url is required when enabled"))?;
        Arc::new(
            SqliteLandscape::open(&config).map_err(|err| CliError::new(err.to_string()))?,
        )
    } else {
        Arc::new(InMemoryRecorder::new())
    };
    let payloads: Option<Arc<dyn PayloadStore>> = match &settings.landscape.payload_store {
        Some(path) if settings.landscape.enabled => Some(Arc::new(
            SqlitePayloadStore::open(path).map_err(|err| CliError::new(err.to_string()))?,
        )),
        Some(_) | None => None,
    };

    let mut services = RuntimeServices::new(Arc::new(SystemClock));
    match resolve_key_source().map_err(|err| CliError::new(err.to_string()))? {
        Some(FingerprintKeySource::Direct(key)) => {
            services = services.with_fingerprint_key(key);
        }
        Some(FingerprintKeySource::KeyVault {
            url, ..
        }) => {
            return Err(CliError::new(format!(
                "fingerprint key lives in key vault {url}; resolve it into ELSPETH_FINGERPRINT_KEY"
            )));
        }
        None => {}
    }

    let options = RunOptions {
        checkpoint_enabled: settings.landscape.checkpoint.enabled,
        ..RunOptions::default()
    };
    let report = Orchestrator::new(
        graph,
        spec,
        bindings,
        recorder,
        payloads,
        services,
        options,
        ids,
    )
    .map_err(|err| CliError::new(err.to_string()))?
    .run()
    .map_err(|err| CliError::new(err.to_string()))?;

    emit_report(&report, command.verbose)?;
    Ok(ExitCode::SUCCESS)
}

/// Resolves a payload by content hash.
fn command_payload_get(command: &PayloadGetCommand) -> CliResult<ExitCode> {
    let settings = ElspethSettings::load(Some(&command.settings))
        .map_err(|err| CliError::new(err.to_string()))?;
    let Some(path) = &settings.landscape.payload_store else {
        return Err(CliError::new("landscape.payload_store is not configured"));
    };
    let store =
        SqlitePayloadStore::open(path).map_err(|err| CliError::new(err.to_string()))?;
    let reference = PayloadRef::new(command.reference.clone());
    let bytes = store.retrieve(&reference).map_err(|err| CliError::new(err.to_string()))?;
    let rendered = match serde_json::from_slice::<serde_json::Value>(&bytes) {
        Ok(value) => value.to_string(),
        Err(_) => elspeth_core::hashing::encode_binary(&bytes),
    };
    write_stdout_line(&rendered).map_err(|err| CliError::new(format!("stdout: {err}")))?;
    Ok(ExitCode::SUCCESS)
}

/// Reserved ledger migration surface.
fn command_landscape_migrate(command: &LandscapeMigrateCommand) -> CliResult<ExitCode> {
    let settings = ElspethSettings::load(Some(&command.settings))
        .map_err(|err| CliError::new(err.to_string()))?;
    let Some(config) = settings.landscape.sqlite_config() else {
        return Err(CliError::new("landscape ledger is not enabled"));
    };
    let store = SqliteLandscape::open(&config).map_err(|err| CliError::new(err.to_string()))?;
    store.check_schema_compatibility().map_err(|err| CliError::new(err.to_string()))?;
    write_stdout_line(&format!(
        "schema version {LANDSCAPE_SCHEMA_VERSION}; no migrations pending"
    ))
    .map_err(|err| CliError::new(format!("stdout: {err}")))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Writes the run report.
fn emit_report(report: &RunReport, verbose: bool) -> CliResult<()> {
    write_stdout_line(&format!("run {} finished", report.run_id))
        .map_err(|err| CliError::new(format!("stdout: {err}")))?;
    write_stdout_line(&format!("rows ingested: {}", report.rows))
        .map_err(|err| CliError::new(format!("stdout: {err}")))?;
    for (outcome, count) in &report.outcomes {
        write_stdout_line(&format!("  {}: {count}", outcome.as_str()))
            .map_err(|err| CliError::new(format!("stdout: {err}")))?;
    }
    if verbose {
        for failure in &report.cleanup_errors {
            write_stderr_line(&format!("cleanup: {failure}"))
                .map_err(|err| CliError::new(format!("stderr: {err}")))?;
        }
    }
    Ok(())
}

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Emits an error and returns the failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(&format!("error: {message}"));
    ExitCode::FAILURE
}
