//! `pumpsync` replays pump driver reports into history and inspects it.
//!
//! # Usage
//!
//! ```
//! pumpsync ingest reports.jsonl
//! pumpsync state
//! pumpsync history --kind temporary_basal --include-invalid
//! pumpsync --config ~/.config/pumpsync/pumpsync.toml connect-new-pump
//! ```
//!
//! Settings come from the TOML file (optional) and then from `PUMPSYNC_*`
//! environment variables.

mod commands;

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use pumpsync::{IdentityGuard, PumpSync, SyncConfig};
use pumpsync_core::{alert::LogAlertSink, clock::SystemClock, treatment::TreatmentKind};
use pumpsync_store_sqlite::{SqlitePreferences, SqliteStore};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

pub(crate) type Reconciler =
  PumpSync<SqliteStore, SqlitePreferences, LogAlertSink, SystemClock>;

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "pumpsync", author, version, about = "Insulin pump history tool")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "pumpsync.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Replay JSON-lines device reports from FILE, or stdin when FILE is `-`.
  Ingest {
    #[arg(value_name = "FILE")]
    input: PathBuf,
  },
  /// Print what the pump is expected to be doing now.
  State,
  /// Print stored treatments.
  History {
    /// Restrict to a treatment kind; may be repeated.
    #[arg(long = "kind", value_parser = parse_kind)]
    kinds:           Vec<TreatmentKind>,
    /// Also list invalidated rows.
    #[arg(long)]
    include_invalid: bool,
    #[arg(long)]
    limit:           Option<usize>,
  },
  /// Forget the registered pump so the next report registers a new one.
  ConnectNewPump {
    /// Leave the old pump's running basal and extended bolus open.
    #[arg(long)]
    keep_running: bool,
  },
  /// Print the registered pump.
  Identity,
}

fn parse_kind(tag: &str) -> Result<TreatmentKind, String> {
  TreatmentKind::from_tag(tag).map_err(|e| e.to_string())
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Load configuration.
  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("PUMPSYNC"))
    .build()
    .context("failed to read config file")?;

  let sync_cfg: SyncConfig = settings
    .try_deserialize()
    .context("failed to deserialise SyncConfig")?;

  let store_path = expand_tilde(&sync_cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let guard = IdentityGuard::new(store.preferences(), LogAlertSink, SystemClock)
    .with_config(sync_cfg.guard_config());
  let sync = PumpSync::new(store, guard);

  match cli.command {
    Command::Ingest { input } => commands::ingest(&sync, &input).await,
    Command::State => commands::state(&sync, &sync_cfg).await,
    Command::History { kinds, include_invalid, limit } => {
      commands::history(&sync, kinds, include_invalid, limit).await
    }
    Command::ConnectNewPump { keep_running } => {
      commands::connect_new_pump(&sync, !keep_running).await
    }
    Command::Identity => commands::identity(&sync).await,
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
