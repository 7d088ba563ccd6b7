//! `strata-ingest`: feed operation documents into a Strata archive.
//!
//! Reads `strata.toml` (or the path given with `--config`), opens the SQLite
//! archive and ingests every document named on the command line, in order.
//! One JSON outcome per operation is written to stdout.
//!
//! ```
//! strata-ingest orbit_1.json orbit_2.json
//! STRATA_STORE_PATH=/tmp/archive.db strata-ingest --config none.toml doc.json
//! ```
//!
//! Several processes may ingest into the same archive at once.

mod settings;

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::Parser;
use serde::Serialize;
use strata_core::{
  outcome::{OperationOutcome, ResultCode},
  store::TimelineStore,
};
use strata_store_sqlite::SqliteStore;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::settings::IngestConfig;

#[derive(Parser)]
#[command(author, version, about = "Ingest operation documents into a Strata archive")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "strata.toml")]
  config: PathBuf,

  /// Archive file; overrides `store_path` from the configuration.
  #[arg(short, long)]
  database: Option<PathBuf>,

  /// Operation documents to ingest.
  #[arg(required = true)]
  documents: Vec<PathBuf>,
}

/// One stdout line.
#[derive(Serialize)]
struct Report<'a> {
  document: &'a Path,
  #[serde(flatten)]
  outcome:  &'a OperationOutcome,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config.clone()).required(false))
    .add_source(config::Environment::with_prefix("STRATA"))
    .build()
    .context("failed to read config file")?;
  let cfg: IngestConfig = settings
    .try_deserialize()
    .context("failed to deserialise IngestConfig")?;

  let store_path = expand_tilde(cli.database.as_deref().unwrap_or(&cfg.store_path));
  if let Some(parent) = store_path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create {}", parent.display()))?;
  }
  let store = SqliteStore::open_with(&store_path, cfg.store_options())
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let mut rejected = 0usize;
  for document in &cli.documents {
    let raw = std::fs::read_to_string(document)
      .with_context(|| format!("failed to read {}", document.display()))?;
    let outcomes = store
      .ingest_json(raw)
      .await
      .with_context(|| format!("store failure while ingesting {}", document.display()))?;

    for outcome in &outcomes {
      if !accepted(outcome.code) {
        rejected += 1;
        tracing::warn!(
          document = %document.display(),
          index = outcome.index,
          code = %outcome.code,
          message = outcome.message.as_deref().unwrap_or_default(),
          "operation rejected"
        );
      }
      let line = serde_json::to_string(&Report { document, outcome })?;
      println!("{line}");
    }
  }

  if rejected > 0 {
    anyhow::bail!("{rejected} operation(s) rejected");
  }
  Ok(())
}

/// Re-sending a source that is already archived is not a failure.
fn accepted(code: ResultCode) -> bool {
  matches!(code, ResultCode::Ok | ResultCode::SourceAlreadyIngested)
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
