//! Error types for `once-core`.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::guard::GuardState;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown role: {0:?}")]
  UnknownRole(String),

  #[error("invalid fingerprint: {0:?}")]
  InvalidFingerprint(String),

  /// A stored row could not be decoded into fingerprint input.
  #[error("cannot fingerprint message {message_id}: {reason}")]
  Fingerprint { message_id: String, reason: String },

  #[error("operation requires guard state {required}, store is in {actual}")]
  GuardState {
    required: GuardState,
    actual:   GuardState,
  },

  #[error("guard state cannot move backwards from {from} to {to}")]
  GuardRegression { from: GuardState, to: GuardState },

  #[error("backfill incomplete: {remaining} messages still lack a fingerprint")]
  BackfillIncomplete { remaining: u64 },

  /// Rows written before fingerprinting already collide on
  /// `(conversation, content, second)`, so the fallback index cannot be built.
  #[error(
    "{groups} groups of stored messages share conversation, content and second; \
     resolve them before moving to migrating"
  )]
  LegacyDuplicates { groups: u64 },

  #[error("timestamp {0} is outside the storable years 0000-9999")]
  TimestampOutOfRange(DateTime<Utc>),

  #[error("unknown schema version: {0}")]
  UnknownSchemaVersion(i64),
}

/// Backend errors that may carry a domain [`Error`], so callers can tell a
/// refused operation from a storage failure.
pub trait CoreError {
  fn core(&self) -> Option<&Error>;
}

impl CoreError for Error {
  fn core(&self) -> Option<&Error> { Some(self) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
