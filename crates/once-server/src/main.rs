//! Once server binary.
//!
//! Reads `config.toml` (or the path given with `--config`), opens the SQLite
//! message store, and either serves the JSON API or runs one of the
//! migration subcommands. Only `serve` moves a legacy schema forward on its
//! own; `migrate` does it on request.
//!
//! ```text
//! once serve
//! once status
//! once migrate --to migrating
//! once backfill --batch-size 1000 --seal
//! once migrate --to fingerprint_required
//! ```

mod settings;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use once_api::AppState;
use once_core::{
  backfill::{Backfill, BackfillOptions},
  guard::GuardState,
  store::MessageStore,
};
use once_store_sqlite::{OpenOptions, SqliteStore};
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::settings::ServerConfig;

#[derive(Parser)]
#[command(author, version, about = "Once message store")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
  /// Serve the JSON API (the default).
  Serve,
  /// Print the guard state and the number of unfingerprinted messages.
  Status,
  /// Fingerprint messages stored before fingerprinting was enabled.
  Backfill {
    /// Rows per batch; defaults to `backfill_batch_size` from the config.
    #[arg(long)]
    batch_size:  Option<usize>,
    /// Stop after this many batches; a later run resumes where this one
    /// stopped.
    #[arg(long)]
    max_batches: Option<usize>,
    /// Require fingerprints on all messages once none are missing.
    #[arg(long)]
    seal:        bool,
  },
  /// Move the guard forward to the given state.
  Migrate {
    /// `no_fingerprint`, `migrating` or `fingerprint_required`.
    #[arg(long)]
    to: GuardState,
  },
}

impl Command {
  /// The guard state the store is brought to on open. Only `serve` moves
  /// the schema; the operator subcommands see it as it is.
  fn open_guard(&self) -> GuardState {
    match self {
      Command::Serve => GuardState::Migrating,
      Command::Status | Command::Backfill { .. } | Command::Migrate { .. } => {
        GuardState::NoFingerprint
      }
    }
  }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let cfg = ServerConfig::load(&cli.config)?;

  if let Some(parent) = cfg.store_path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create {parent:?}"))?;
  }

  let command = cli.command.unwrap_or(Command::Serve);
  let store = SqliteStore::open_with(&cfg.store_path, OpenOptions {
    guard:        command.open_guard(),
    busy_timeout: Duration::from_millis(cfg.busy_timeout_ms),
  })
  .await
  .with_context(|| format!("failed to open store at {:?}", cfg.store_path))?;

  match command {
    Command::Serve => serve(&cfg, store).await,
    Command::Status => {
      let state = store.guard_state().await?;
      let missing = store.count_missing_fingerprints().await?;
      println!("guard: {state}");
      println!("missing fingerprints: {missing}");
      Ok(())
    }
    Command::Backfill { batch_size, max_batches, seal } => {
      let options = BackfillOptions {
        batch_size: batch_size.unwrap_or(cfg.backfill_batch_size),
        max_batches,
      };
      backfill(&store, options, seal).await
    }
    Command::Migrate { to } => {
      let state = store
        .advance_guard(to)
        .await
        .with_context(|| format!("cannot move guard to {to}"))?;
      println!("guard: {state}");
      Ok(())
    }
  }
}

async fn serve(cfg: &ServerConfig, store: SqliteStore) -> anyhow::Result<()> {
  let state = AppState {
    store:               Arc::new(store),
    backfill_batch_size: cfg.backfill_batch_size,
  };

  let app = once_api::api_router(state);
  let address = format!("{}:{}", cfg.host, cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      let _ = tokio::signal::ctrl_c().await;
    })
    .await
    .context("server error")?;

  Ok(())
}

/// Run one backfill pass; Ctrl-C stops it after the current batch.
async fn backfill(
  store:   &SqliteStore,
  options: BackfillOptions,
  seal:    bool,
) -> anyhow::Result<()> {
  let mut backfill = Backfill::new(store, options);

  let stop = backfill.stop_signal();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      tracing::warn!("stop requested; finishing current batch");
      stop.stop();
    }
  });

  let report = if seal {
    backfill.run_and_seal().await
  } else {
    backfill.run().await
  }
  .context("backfill failed")?;

  println!("{}", serde_json::to_string_pretty(&report)?);
  if !report.complete() {
    tracing::warn!(
      remaining = report.remaining,
      "messages still lack a fingerprint; run the backfill again"
    );
  }
  Ok(())
}
