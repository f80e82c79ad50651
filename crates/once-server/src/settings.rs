//! Runtime configuration, layered from `config.toml` and `ONCE_*`
//! environment variables.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub host:                String,
  pub port:                u16,
  pub store_path:          PathBuf,
  /// Milliseconds a writer waits on another connection's write lock.
  pub busy_timeout_ms:     u64,
  pub backfill_batch_size: usize,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:                "127.0.0.1".to_string(),
      port:                8080,
      store_path:          PathBuf::from("~/.local/share/once/messages.db"),
      busy_timeout_ms:     5_000,
      backfill_batch_size: once_core::backfill::DEFAULT_BATCH_SIZE,
    }
  }
}

impl ServerConfig {
  /// Read `path` (if it exists) and overlay `ONCE_*` environment variables.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("ONCE"))
      .build()
      .context("failed to read config file")?;

    let mut cfg: ServerConfig = settings
      .try_deserialize()
      .context("failed to deserialise ServerConfig")?;
    cfg.store_path = expand_tilde(&cfg.store_path);
    Ok(cfg)
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

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_file_yields_defaults() {
    let cfg = ServerConfig::load(Path::new("/nonexistent/once.toml")).unwrap();
    assert_eq!(cfg.port, 8080);
    assert_eq!(cfg.backfill_batch_size, once_core::backfill::DEFAULT_BATCH_SIZE);
  }

  #[test]
  fn non_home_paths_are_untouched() {
    assert_eq!(expand_tilde(Path::new("/var/db")), PathBuf::from("/var/db"));
  }
}
