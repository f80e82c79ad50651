//! Error type for `once-store-sqlite`.

use once_core::fingerprint::Fingerprint;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Core(#[from] once_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A fingerprint conflict was reported but the existing row was gone by
  /// the time it was read back (its conversation was deleted in between).
  #[error("conflicting message for fingerprint {0} vanished")]
  ConflictVanished(Fingerprint),
}

impl once_core::CoreError for Error {
  fn core(&self) -> Option<&once_core::Error> {
    match self {
      Error::Core(e) => Some(e),
      _ => None,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
