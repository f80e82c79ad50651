//! The `MessageStore` trait and backfill row types.
//!
//! The trait is implemented by storage backends (e.g. `once-store-sqlite`).
//! Uniqueness is the backend's job: implementations must push it into an
//! atomic storage constraint and never into process memory.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  CoreError, Error, Result,
  fingerprint::{Fingerprint, fingerprint},
  guard::GuardState,
  message::{Conversation, Message, NewMessage, Role, Submission},
};

// ─── Backfill rows ───────────────────────────────────────────────────────────

/// Position of the backfill within a scan, as stored ordering keys.
///
/// Opaque to callers; backends compare it against their own sort order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
  pub created_at: String,
  pub message_id: String,
}

/// A stored message still lacking a fingerprint, exactly as read from
/// storage. Decoding happens per row so one bad row cannot fail a page.
#[derive(Debug, Clone)]
pub struct PendingRow {
  pub message_id:      String,
  pub conversation_id: String,
  pub role:            String,
  pub content:         String,
  pub created_at:      String,
}

impl PendingRow {
  pub fn cursor(&self) -> Cursor {
    Cursor {
      created_at: self.created_at.clone(),
      message_id: self.message_id.clone(),
    }
  }

  /// Decode the row and compute its fingerprint.
  pub fn resolve(&self) -> Result<(Uuid, Fingerprint)> {
    let fail = |reason: String| Error::Fingerprint {
      message_id: self.message_id.clone(),
      reason,
    };

    let message_id = Uuid::parse_str(&self.message_id)
      .map_err(|e| fail(format!("message id: {e}")))?;
    let conversation_id = Uuid::parse_str(&self.conversation_id)
      .map_err(|e| fail(format!("conversation id: {e}")))?;
    let role: Role = self.role.parse().map_err(|e: Error| fail(e.to_string()))?;
    let created_at = DateTime::parse_from_rfc3339(&self.created_at)
      .map(|dt| dt.with_timezone(&Utc))
      .map_err(|e| fail(format!("created_at {:?}: {e}", self.created_at)))?;

    Ok((
      message_id,
      fingerprint(conversation_id, role, &self.content, created_at),
    ))
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a message store backend.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait MessageStore: Send + Sync {
  type Error: std::error::Error + From<Error> + CoreError + Send + Sync + 'static;

  // ── Guard ─────────────────────────────────────────────────────────────

  /// The guard state currently realised by the storage schema.
  fn guard_state(
    &self,
  ) -> impl Future<Output = Result<GuardState, Self::Error>> + Send + '_;

  /// Move the guard forward to `target`, applying every intermediate step.
  ///
  /// Refuses to move backwards, and refuses
  /// [`FingerprintRequired`](GuardState::FingerprintRequired) while any row
  /// still has a null fingerprint.
  fn advance_guard(
    &self,
    target: GuardState,
  ) -> impl Future<Output = Result<GuardState, Self::Error>> + Send + '_;

  // ── Conversations ─────────────────────────────────────────────────────

  fn create_conversation(
    &self,
    title: Option<String>,
  ) -> impl Future<Output = Result<Conversation, Self::Error>> + Send + '_;

  fn get_conversation(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Conversation>, Self::Error>> + Send + '_;

  /// Delete a conversation and, by cascade, all of its messages.
  /// Returns `false` if it did not exist.
  fn delete_conversation(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  // ── Messages ──────────────────────────────────────────────────────────

  /// Persist `input` at most once.
  ///
  /// Timestamps outside [`check_timestamp`](crate::message::check_timestamp)
  /// are refused before anything is written.
  ///
  /// Computes the fingerprint, attempts the insert, and on a fingerprint
  /// uniqueness conflict returns the already-stored row with
  /// `created = false`. Any other storage failure is returned unchanged.
  fn submit(
    &self,
    input: NewMessage,
  ) -> impl Future<Output = Result<Submission, Self::Error>> + Send + '_;

  fn get_message(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Message>, Self::Error>> + Send + '_;

  fn find_by_fingerprint<'a>(
    &'a self,
    fingerprint: &'a Fingerprint,
  ) -> impl Future<Output = Result<Option<Message>, Self::Error>> + Send + 'a;

  /// All messages of a conversation ordered by creation time.
  fn list_messages(
    &self,
    conversation_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Message>, Self::Error>> + Send + '_;

  // ── Backfill primitives ───────────────────────────────────────────────

  /// Up to `limit` rows with a null fingerprint, strictly after `after` in
  /// `(created_at, message_id)` order.
  fn pending_fingerprints(
    &self,
    after: Option<Cursor>,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<PendingRow>, Self::Error>> + Send + '_;

  /// Set the fingerprint of `message_id` if it is still null.
  /// Returns whether a row was changed.
  fn set_fingerprint(
    &self,
    message_id: Uuid,
    fingerprint: Fingerprint,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn count_missing_fingerprints(
    &self,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  fn load_checkpoint(
    &self,
  ) -> impl Future<Output = Result<Option<Cursor>, Self::Error>> + Send + '_;

  fn save_checkpoint(
    &self,
    cursor: Cursor,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn clear_checkpoint(
    &self,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}

#[cfg(test)]
mod tests {
  use super::*;

  fn row(role: &str, created_at: &str) -> PendingRow {
    PendingRow {
      message_id:      Uuid::new_v4().to_string(),
      conversation_id: Uuid::new_v4().to_string(),
      role:            role.into(),
      content:         "hi".into(),
      created_at:      created_at.into(),
    }
  }

  #[test]
  fn resolve_matches_direct_fingerprint() {
    let r = row("assistant", "2024-03-01T10:00:00.250000Z");
    let (id, fp) = r.resolve().unwrap();

    let expected = fingerprint(
      Uuid::parse_str(&r.conversation_id).unwrap(),
      Role::Assistant,
      "hi",
      DateTime::parse_from_rfc3339("2024-03-01T10:00:00Z")
        .unwrap()
        .with_timezone(&Utc),
    );
    assert_eq!(id.to_string(), r.message_id);
    assert_eq!(fp, expected);
  }

  #[test]
  fn resolve_reports_undecodable_rows() {
    let err = row("robot", "2024-03-01T10:00:00Z").resolve().unwrap_err();
    assert!(matches!(err, Error::Fingerprint { .. }));

    let err = row("user", "yesterday").resolve().unwrap_err();
    assert!(matches!(err, Error::Fingerprint { ref reason, .. } if reason.contains("yesterday")));
  }
}
