//! The uniqueness guard: which fingerprint constraints are live.
//!
//! The guard moves forward exactly once per deployment:
//!
//! | State | Fingerprint column | Enforcement |
//! |-------|--------------------|-------------|
//! | [`NoFingerprint`](GuardState::NoFingerprint) | absent | none |
//! | [`Migrating`](GuardState::Migrating) | nullable | unique on non-null fingerprints, plus a partial unique fallback on `(conversation, content, second)` for null rows |
//! | [`FingerprintRequired`](GuardState::FingerprintRequired) | `NOT NULL UNIQUE` | fingerprint only; fallback retired |
//!
//! Backends persist the state as a schema version and must derive every
//! constraint decision from it.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum GuardState {
  NoFingerprint,
  Migrating,
  FingerprintRequired,
}

impl GuardState {
  pub const ALL: [GuardState; 3] = [
    GuardState::NoFingerprint,
    GuardState::Migrating,
    GuardState::FingerprintRequired,
  ];

  /// Schema version that realises this state.
  pub fn schema_version(self) -> i64 {
    match self {
      GuardState::NoFingerprint => 1,
      GuardState::Migrating => 2,
      GuardState::FingerprintRequired => 3,
    }
  }

  /// Inverse of [`schema_version`](Self::schema_version). Version 0 means an
  /// uninitialised database and yields `Ok(None)`.
  pub fn from_schema_version(version: i64) -> Result<Option<Self>> {
    match version {
      0 => Ok(None),
      1 => Ok(Some(GuardState::NoFingerprint)),
      2 => Ok(Some(GuardState::Migrating)),
      3 => Ok(Some(GuardState::FingerprintRequired)),
      other => Err(Error::UnknownSchemaVersion(other)),
    }
  }

  pub fn next(self) -> Option<Self> {
    match self {
      GuardState::NoFingerprint => Some(GuardState::Migrating),
      GuardState::Migrating => Some(GuardState::FingerprintRequired),
      GuardState::FingerprintRequired => None,
    }
  }

  /// Whether new rows are written with a fingerprint and checked against it.
  pub fn fingerprint_enforced(self) -> bool { self != GuardState::NoFingerprint }

  /// Whether stored rows may still lack a fingerprint. The backfill and its
  /// checkpoint only have work to do in such a state.
  pub fn fingerprint_nullable(self) -> bool { self == GuardState::Migrating }

  /// Whether the partial `(conversation, content, second)` index is live.
  pub fn fallback_index_live(self) -> bool { self == GuardState::Migrating }

  pub fn as_str(self) -> &'static str {
    match self {
      GuardState::NoFingerprint => "no_fingerprint",
      GuardState::Migrating => "migrating",
      GuardState::FingerprintRequired => "fingerprint_required",
    }
  }

  /// The states to step through to go from `self` to `target`, in order.
  ///
  /// Empty when already there; an error when `target` lies behind `self`.
  pub fn path_to(self, target: GuardState) -> Result<Vec<GuardState>> {
    if target < self {
      return Err(Error::GuardRegression { from: self, to: target });
    }
    let mut steps = Vec::new();
    let mut cur = self;
    while cur < target {
      let Some(next) = cur.next() else { break };
      steps.push(next);
      cur = next;
    }
    Ok(steps)
  }
}

impl fmt::Display for GuardState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for GuardState {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    GuardState::ALL
      .into_iter()
      .find(|g| g.as_str() == s)
      .ok_or_else(|| format!("unknown guard state {s:?}"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn versions_round_trip() {
    for state in GuardState::ALL {
      let back = GuardState::from_schema_version(state.schema_version()).unwrap();
      assert_eq!(back, Some(state));
    }
    assert_eq!(GuardState::from_schema_version(0).unwrap(), None);
    assert!(GuardState::from_schema_version(9).is_err());
  }

  #[test]
  fn forward_path_visits_every_step() {
    let path = GuardState::NoFingerprint
      .path_to(GuardState::FingerprintRequired)
      .unwrap();
    assert_eq!(path, vec![GuardState::Migrating, GuardState::FingerprintRequired]);
    assert!(GuardState::Migrating.path_to(GuardState::Migrating).unwrap().is_empty());
  }

  #[test]
  fn backwards_is_refused() {
    let err = GuardState::FingerprintRequired
      .path_to(GuardState::Migrating)
      .unwrap_err();
    assert!(matches!(err, Error::GuardRegression { .. }));
  }

  #[test]
  fn only_migrating_has_fallback() {
    assert!(!GuardState::NoFingerprint.fallback_index_live());
    assert!(GuardState::Migrating.fallback_index_live());
    assert!(!GuardState::FingerprintRequired.fallback_index_live());
    assert!(!GuardState::FingerprintRequired.fingerprint_nullable());
    assert!(GuardState::FingerprintRequired.fingerprint_enforced());
  }

  #[test]
  fn parses_snake_case_names() {
    assert_eq!(
      "fingerprint_required".parse::<GuardState>().unwrap(),
      GuardState::FingerprintRequired
    );
    assert!("done".parse::<GuardState>().is_err());
  }
}
