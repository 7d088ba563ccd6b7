use std::{path::PathBuf, time::Duration};

use serde::Deserialize;
use strata_store_sqlite::StoreOptions;

/// Ingestion settings, read from the config file and `STRATA_*` variables.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
  #[serde(default = "default_store_path")]
  pub store_path:      PathBuf,
  /// Milliseconds a worker waits for another worker's write lock.
  #[serde(default = "default_busy_timeout_ms")]
  pub busy_timeout_ms: u64,
}

fn default_store_path() -> PathBuf { PathBuf::from("~/.local/share/strata/archive.db") }

fn default_busy_timeout_ms() -> u64 { 30_000 }

impl IngestConfig {
  pub fn store_options(&self) -> StoreOptions {
    StoreOptions { busy_timeout: Duration::from_millis(self.busy_timeout_ms) }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_keys_fall_back_to_defaults() {
    let cfg: IngestConfig = config::Config::builder()
      .set_override("busy_timeout_ms", 500)
      .unwrap()
      .build()
      .unwrap()
      .try_deserialize()
      .unwrap();

    assert_eq!(cfg.store_path, default_store_path());
    assert_eq!(cfg.store_options().busy_timeout, Duration::from_millis(500));
  }
}
