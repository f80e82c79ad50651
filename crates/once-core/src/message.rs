//! Messages and the conversations that own them.
//!
//! Messages are immutable once persisted. The only field ever written after
//! creation is the fingerprint of a row that predates fingerprinting.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Datelike as _, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, fingerprint::Fingerprint};

// ─── Role ────────────────────────────────────────────────────────────────────

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  User,
  Assistant,
  System,
}

impl Role {
  pub fn as_str(self) -> &'static str {
    match self {
      Role::User => "user",
      Role::Assistant => "assistant",
      Role::System => "system",
    }
  }
}

impl fmt::Display for Role {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Role {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "user" => Ok(Role::User),
      "assistant" => Ok(Role::Assistant),
      "system" => Ok(Role::System),
      other => Err(Error::UnknownRole(other.to_owned())),
    }
  }
}

// ─── Conversation ────────────────────────────────────────────────────────────

/// A thread of messages. Deleting a conversation deletes its messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
  pub conversation_id: Uuid,
  pub title:           Option<String>,
  pub created_at:      DateTime<Utc>,
}

// ─── Message ─────────────────────────────────────────────────────────────────

/// Input to [`MessageStore::submit`](crate::store::MessageStore::submit).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
  pub conversation_id: Uuid,
  pub role:            Role,
  pub content:         String,
  /// When the producer saw the message. The store uses "now" if absent.
  pub created_at:      Option<DateTime<Utc>>,
}

impl NewMessage {
  pub fn new(conversation_id: Uuid, role: Role, content: impl Into<String>) -> Self {
    Self {
      conversation_id,
      role,
      content: content.into(),
      created_at: None,
    }
  }

  pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
    self.created_at = Some(created_at);
    self
  }
}

/// Years a stored timestamp may carry. RFC 3339 has no form for the rest.
pub const STORABLE_YEARS: std::ops::RangeInclusive<i32> = 0..=9999;

/// Refuse a timestamp that cannot be written as a four-digit RFC 3339 year.
pub fn check_timestamp(ts: DateTime<Utc>) -> Result<DateTime<Utc>, Error> {
  if STORABLE_YEARS.contains(&ts.year()) {
    Ok(ts)
  } else {
    Err(Error::TimestampOutOfRange(ts))
  }
}

/// A persisted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
  pub message_id:      Uuid,
  pub conversation_id: Uuid,
  pub role:            Role,
  pub content:         String,
  pub created_at:      DateTime<Utc>,
  /// `None` only for rows written before fingerprinting was enabled and not
  /// yet backfilled.
  pub fingerprint:     Option<Fingerprint>,
}

/// Outcome of an idempotent submit.
///
/// `created` is `false` when an identical message was already stored; in
/// that case `message` is the row stored by the first submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
  pub message: Message,
  pub created: bool,
}

impl Submission {
  pub fn id(&self) -> Uuid { self.message.message_id }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn role_round_trips_through_str() {
    for role in [Role::User, Role::Assistant, Role::System] {
      assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
    }
  }

  #[test]
  fn timestamps_need_a_four_digit_year() {
    use chrono::TimeZone as _;

    let last = Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap();
    assert_eq!(check_timestamp(last).unwrap(), last);
    assert!(check_timestamp(Utc.with_ymd_and_hms(0, 1, 1, 0, 0, 0).unwrap()).is_ok());

    let far = Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).unwrap();
    assert!(matches!(check_timestamp(far), Err(Error::TimestampOutOfRange(t)) if t == far));
    let bce = Utc.with_ymd_and_hms(-1, 1, 1, 0, 0, 0).unwrap();
    assert!(check_timestamp(bce).is_err());
  }

  #[test]
  fn unknown_role_is_rejected() {
    let err = "robot".parse::<Role>().unwrap_err();
    assert!(matches!(err, Error::UnknownRole(r) if r == "robot"));
  }

  #[test]
  fn role_serializes_lowercase() {
    let json = serde_json::to_string(&Role::Assistant).unwrap();
    assert_eq!(json, "\"assistant\"");
  }
}
