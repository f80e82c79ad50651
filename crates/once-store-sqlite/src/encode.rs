//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 UTC with exactly six fractional digits and a `Z`
//! suffix, so the first 19 characters are the instant truncated to the second
//! and lexical order is chronological order. UUIDs are hyphenated lowercase.

use chrono::{DateTime, SecondsFormat, SubsecRound as _, Utc};
use once_core::{
  fingerprint::Fingerprint,
  message::{Conversation, Message, Role},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

/// Drop precision the column cannot hold.
pub fn storable_dt(dt: DateTime<Utc>) -> DateTime<Utc> { dt.trunc_subsecs(6) }

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a `messages` row.
#[derive(Debug)]
pub struct RawMessage {
  pub message_id:      String,
  pub conversation_id: String,
  pub role:            String,
  pub content:         String,
  pub created_at:      String,
  pub fingerprint:     Option<String>,
}

impl RawMessage {
  /// Read a row selected with `schema::message_columns`.
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      message_id:      row.get(0)?,
      conversation_id: row.get(1)?,
      role:            row.get(2)?,
      content:         row.get(3)?,
      created_at:      row.get(4)?,
      fingerprint:     row.get(5)?,
    })
  }

  pub fn into_message(self) -> Result<Message> {
    Ok(Message {
      message_id:      decode_uuid(&self.message_id)?,
      conversation_id: decode_uuid(&self.conversation_id)?,
      role:            self.role.parse::<Role>()?,
      content:         self.content,
      created_at:      decode_dt(&self.created_at)?,
      fingerprint:     self.fingerprint.map(Fingerprint::parse).transpose()?,
    })
  }
}

/// Raw strings read directly from a `conversations` row.
pub struct RawConversation {
  pub conversation_id: String,
  pub title:           Option<String>,
  pub created_at:      String,
}

impl RawConversation {
  pub fn into_conversation(self) -> Result<Conversation> {
    Ok(Conversation {
      conversation_id: decode_uuid(&self.conversation_id)?,
      title:           self.title,
      created_at:      decode_dt(&self.created_at)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone as _;

  use super::*;

  #[test]
  fn encoded_prefix_is_the_truncated_second() {
    let dt = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
      + chrono::Duration::milliseconds(400);
    let s = encode_dt(dt);
    assert_eq!(s, "2024-03-01T10:00:00.400000Z");
    assert_eq!(&s[..19], "2024-03-01T10:00:00");
  }

  #[test]
  fn storable_dt_round_trips() {
    let dt = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
    let stored = storable_dt(dt);
    assert_eq!(decode_dt(&encode_dt(stored)).unwrap(), stored);
  }
}
