use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use seed_kernel_core::store;
use seed_kernel_core::{
    diff_and_report, summarize, validate_and_report, DriftLimiter, DriftState, EventSink,
    JsonlSink, KernelConfig, Migrator, RecoveryController, RecoveryState, TracingSink,
    VersionHistory, WriteKind,
};
use seed_kernel_history_git::GitHistory;
use serde_json::Value;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const CLI_CONTRACT_VERSION: &str = "cli.v1";
const LOG_ENV: &str = "SEED_KERNEL_LOG";
const RECOVERY_STATE_SUFFIX: &str = ".recovery.json";

#[derive(Debug, Parser)]
#[command(name = "sk")]
#[command(about = "Seed Kernel CLI")]
struct Cli {
    /// JSON configuration file; defaults apply when absent.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Append kernel events as JSON lines to this file instead of the log.
    #[arg(long, global = true)]
    events: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Validate(FileArgs),
    Diff(DiffArgs),
    Status(FileArgs),
    Migrate(MigrateArgs),
    Consolidate(ConsolidateArgs),
    Recover(ControllerArgs),
    Reset(ControllerArgs),
    History(HistoryArgs),
    Mood(MoodArgs),
}

#[derive(Debug, Args)]
struct FileArgs {
    #[arg(long)]
    file: PathBuf,
}

#[derive(Debug, Args)]
struct DiffArgs {
    #[arg(long)]
    old: PathBuf,
    #[arg(long)]
    new: PathBuf,
}

#[derive(Debug, Args)]
struct MigrateArgs {
    #[arg(long)]
    file: PathBuf,
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct ControllerArgs {
    #[arg(long)]
    file: PathBuf,
    /// Recovery state file; defaults to `<file>.recovery.json`.
    #[arg(long)]
    state: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ConsolidateArgs {
    #[command(flatten)]
    target: ControllerArgs,
    #[arg(long)]
    candidate: PathBuf,
    /// Treat the candidate as a programmatic update.
    #[arg(long, default_value_t = false)]
    mechanical: bool,
}

#[derive(Debug, Args)]
struct HistoryArgs {
    #[arg(long)]
    file: PathBuf,
    #[arg(long)]
    limit: Option<usize>,
    /// Print the patch of one revision instead of the listing.
    #[arg(long, conflicts_with = "limit")]
    show: Option<String>,
}

#[derive(Debug, Args)]
struct MoodArgs {
    #[arg(long)]
    state: PathBuf,
    #[arg(long, allow_negative_numbers = true)]
    valence: f64,
    #[arg(long, allow_negative_numbers = true)]
    energy: f64,
    #[arg(long)]
    trigger: String,
}

struct Runtime {
    config: KernelConfig,
    sink: Arc<dyn EventSink>,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let layer = fmt::layer().with_target(false).with_ansi(false).with_writer(std::io::stderr);
    let _ = tracing_subscriber::registry().with(filter).with(layer).try_init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = KernelConfig::load(cli.config.as_deref()).context("failed to load config")?;
    let sink: Arc<dyn EventSink> = match cli.events {
        Some(path) => Arc::new(JsonlSink::new(path)),
        None => Arc::new(TracingSink),
    };
    let runtime = Runtime { config, sink };

    match cli.command {
        Command::Validate(args) => run_validate(&args, &runtime),
        Command::Diff(args) => run_diff(&args, &runtime),
        Command::Status(args) => run_status(&args),
        Command::Migrate(args) => run_migrate(&args, &runtime),
        Command::Consolidate(args) => run_consolidate(&args, &runtime),
        Command::Recover(args) => run_recover(&args, &runtime),
        Command::Reset(args) => run_reset(&args, &runtime),
        Command::History(args) => run_history(&args, &runtime),
        Command::Mood(args) => run_mood(&args, &runtime),
    }
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn run_validate(args: &FileArgs, runtime: &Runtime) -> Result<()> {
    let text = read_text(&args.file)?;
    let result = validate_and_report(&text, &runtime.config.validation, runtime.sink.as_ref());
    emit_json(serde_json::json!({
        "file": args.file,
        "valid": result.valid,
        "errors": result.errors,
        "warnings": result.warnings,
        "size_bytes": result.size_bytes
    }))
}

fn run_diff(args: &DiffArgs, runtime: &Runtime) -> Result<()> {
    let old = read_text(&args.old)?;
    let new = read_text(&args.new)?;
    let result = diff_and_report(&old, &new, runtime.sink.as_ref());
    emit_json(serde_json::json!({
        "changed": result.changed,
        "overall_severity": result.overall_severity,
        "block_diffs": result.block_diffs,
        "summary": result.summary
    }))
}

fn run_status(args: &FileArgs) -> Result<()> {
    let text = read_text(&args.file)?;
    emit_json(serde_json::to_value(summarize(&text))?)
}

fn run_migrate(args: &MigrateArgs, runtime: &Runtime) -> Result<()> {
    let migrator = migrator_for(&args.file, runtime);
    let text = read_text(&args.file)?;
    let plan = migrator.plan(&text)?;

    if args.dry_run {
        return emit_json(serde_json::json!({
            "dry_run": true,
            "current_version": plan.current_version,
            "target_version": plan.target_version,
            "would_apply": plan.pending_steps,
            "inferred_version": plan.inferred_version,
            "up_to_date": plan.pending_steps.is_empty()
        }));
    }

    let outcome = migrator
        .migrate_file(&args.file)
        .with_context(|| format!("failed to migrate {}", args.file.display()))?;
    emit_json(serde_json::json!({
        "dry_run": false,
        "migrated": outcome.migrated,
        "from_version": outcome.from_version,
        "to_version": outcome.to_version,
        "applied_steps": outcome.applied_steps,
        "backup_path": outcome.backup_path,
        "backup_digest": outcome.backup_digest
    }))
}

fn state_path(args: &ControllerArgs) -> PathBuf {
    args.state.clone().unwrap_or_else(|| {
        let mut path = OsString::from(args.file.as_os_str());
        path.push(RECOVERY_STATE_SUFFIX);
        PathBuf::from(path)
    })
}

fn git_history(runtime: &Runtime) -> GitHistory {
    GitHistory::new().with_timeout(runtime.config.recovery.history_timeout())
}

fn migrator_for(file: &Path, runtime: &Runtime) -> Migrator {
    Migrator::new(runtime.config.migration.backup_dir_for(file))
        .with_limits(runtime.config.validation)
}

/// Controller for `args.file`, after migrating the live document if it is
/// behind. The second value reports that migration for the command output.
fn open_controller(
    args: &ControllerArgs,
    runtime: &Runtime,
) -> Result<(RecoveryController, Value)> {
    let state: RecoveryState = store::load_json(&state_path(args))?.unwrap_or_default();
    let controller = RecoveryController::new(
        args.file.clone(),
        Arc::new(git_history(runtime)),
        Arc::clone(&runtime.sink),
    )
    .with_config(runtime.config.recovery)
    .with_limits(runtime.config.validation)
    .with_migrator(migrator_for(&args.file, runtime))
    .with_state(state);

    // A failed migration leaves the file as it was; recovery still gets a turn.
    let migration = match controller.load_live() {
        Ok(None) => Value::Null,
        Ok(Some(outcome)) => serde_json::json!({
            "migrated": true,
            "from_version": outcome.from_version,
            "to_version": outcome.to_version,
            "backup_path": outcome.backup_path,
            "backup_digest": outcome.backup_digest
        }),
        Err(err) => serde_json::json!({
            "migrated": false,
            "error": err.to_string(),
            "backup_path": err.backup_path()
        }),
    };
    Ok((controller, migration))
}

fn save_controller(
    args: &ControllerArgs,
    controller: &RecoveryController,
) -> Result<RecoveryState> {
    let state = controller.state();
    store::save_json(&state_path(args), &state)?;
    Ok(state)
}

fn run_consolidate(args: &ConsolidateArgs, runtime: &Runtime) -> Result<()> {
    let candidate = read_text(&args.candidate)?;
    let kind = if args.mechanical { WriteKind::Mechanical } else { WriteKind::Generative };
    let (controller, migration) = open_controller(&args.target, runtime)?;
    let outcome = controller.consolidate(&candidate, kind);
    let state = save_controller(&args.target, &controller)?;
    emit_json(serde_json::json!({
        "file": args.target.file,
        "migration": migration,
        "result": outcome,
        "state": state
    }))
}

fn run_recover(args: &ControllerArgs, runtime: &Runtime) -> Result<()> {
    let (controller, migration) = open_controller(args, runtime)?;
    let outcome = controller.recover();
    let state = save_controller(args, &controller)?;
    emit_json(serde_json::json!({
        "file": args.file,
        "migration": migration,
        "result": outcome,
        "state": state
    }))
}

fn run_reset(args: &ControllerArgs, runtime: &Runtime) -> Result<()> {
    let (controller, migration) = open_controller(args, runtime)?;
    let previous = controller.reset();
    let state = save_controller(args, &controller)?;
    emit_json(serde_json::json!({
        "file": args.file,
        "migration": migration,
        "previous_state": previous,
        "state": state
    }))
}

fn run_history(args: &HistoryArgs, runtime: &Runtime) -> Result<()> {
    if let Some(id) = &args.show {
        let patch = git_history(runtime)
            .revision_patch(&args.file, id)
            .with_context(|| format!("failed to show revision {id} of {}", args.file.display()))?;
        return emit_json(serde_json::json!({
            "file": args.file,
            "revision": id,
            "patch": patch
        }));
    }

    let limit = args.limit.unwrap_or(runtime.config.recovery.history_limit);
    let revisions = git_history(runtime)
        .list_revisions(&args.file, limit)
        .with_context(|| format!("failed to list revisions of {}", args.file.display()))?;
    emit_json(serde_json::json!({
        "file": args.file,
        "limit": limit,
        "revisions": revisions
    }))
}

fn run_mood(args: &MoodArgs, runtime: &Runtime) -> Result<()> {
    let drift = runtime.config.drift;
    let state = store::load_json::<DriftState>(&args.state)?
        .unwrap_or_else(|| DriftState::new(&drift));
    let limiter = DriftLimiter::new(drift, Arc::clone(&runtime.sink)).with_state(state);
    let update = limiter.update(args.valence, args.energy, &args.trigger);
    store::save_json(&args.state, &limiter.state())?;
    emit_json(serde_json::json!({
        "requested": update.requested,
        "applied": update.applied,
        "previous": update.previous,
        "state": update.state,
        "mood": update.mood,
        "clamped": update.clamped
    }))
}
