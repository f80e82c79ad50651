//! [`SqliteStore`] — the SQLite implementation of [`MessageStore`].

use std::{path::Path, time::Duration};

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use once_core::{
  fingerprint::{Fingerprint, fingerprint},
  guard::GuardState,
  message::{Conversation, Message, NewMessage, Submission, check_timestamp},
  store::{Cursor, MessageStore, PendingRow},
};

use crate::{
  Error, Result,
  encode::{RawConversation, RawMessage, encode_dt, encode_uuid, storable_dt},
  schema::{self, PRAGMAS, current_guard, message_columns},
};

// ─── Options ─────────────────────────────────────────────────────────────────

/// How to open a [`SqliteStore`].
#[derive(Debug, Clone, Copy)]
pub struct OpenOptions {
  /// The schema is migrated forward to at least this state on open.
  pub guard:        GuardState,
  /// How long a writer waits for another connection's write lock.
  pub busy_timeout: Duration,
}

impl Default for OpenOptions {
  fn default() -> Self {
    Self {
      guard:        GuardState::Migrating,
      busy_timeout: Duration::from_secs(5),
    }
  }
}

// ─── SQL ─────────────────────────────────────────────────────────────────────

const INSERT_UNFINGERPRINTED: &str =
  "INSERT INTO messages (message_id, conversation_id, role, content, created_at)
   VALUES (?1, ?2, ?3, ?4, ?5)";

const INSERT_FINGERPRINTED: &str =
  "INSERT INTO messages (message_id, conversation_id, role, content, created_at, fingerprint)
   VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

// While MIGRATING, a not-yet-backfilled twin counts as already stored.
const INSERT_UNLESS_LEGACY_TWIN: &str =
  "INSERT INTO messages (message_id, conversation_id, role, content, created_at, fingerprint)
   SELECT ?1, ?2, ?3, ?4, ?5, ?6
   WHERE NOT EXISTS (
     SELECT 1 FROM messages
     WHERE fingerprint IS NULL
       AND conversation_id = ?2 AND role = ?3 AND content = ?4
       AND substr(created_at, 1, 19) = substr(?5, 1, 19)
   )";

const SELECT_EXISTING: &str =
  "SELECT message_id, conversation_id, role, content, created_at, fingerprint
   FROM messages
   WHERE fingerprint = ?6
      OR (fingerprint IS NULL
          AND conversation_id = ?2 AND role = ?3 AND content = ?4
          AND substr(created_at, 1, 19) = substr(?5, 1, 19))
   ORDER BY fingerprint IS NULL
   LIMIT 1";

/// A unique-constraint failure on the fingerprint column. Every other
/// failure, including foreign-key violations, is a real error.
fn is_fingerprint_conflict(err: &rusqlite::Error) -> bool {
  match err {
    rusqlite::Error::SqliteFailure(e, msg) => {
      e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        && msg
          .as_deref()
          .is_some_and(|m| m.contains("messages.fingerprint"))
    }
    _ => false,
  }
}

enum Inserted {
  Created,
  Existing(RawMessage),
  Vanished,
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A message store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted. Separate
/// stores opened on the same file behave as independent writers; SQLite's
/// write lock and unique indexes arbitrate between them.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path`, migrated to at least MIGRATING.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    Self::open_with(path, OpenOptions::default()).await
  }

  pub async fn open_with(path: impl AsRef<Path>, options: OpenOptions) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init(options).await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    Self::open_in_memory_with(OpenOptions::default()).await
  }

  pub async fn open_in_memory_with(options: OpenOptions) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init(options).await?;
    Ok(store)
  }

  async fn init(&self, options: OpenOptions) -> Result<()> {
    let state = self
      .conn
      .call(move |conn| {
        conn.busy_timeout(options.busy_timeout)?;
        conn.execute_batch(PRAGMAS)?;
        Ok(schema::migrate(conn, options.guard, true)?)
      })
      .await??;
    tracing::debug!(%state, "store opened");
    Ok(())
  }

  /// Run `f` with the current guard state read on the same connection.
  async fn with_guard<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&mut rusqlite::Connection, GuardState) -> rusqlite::Result<T>
      + Send
      + 'static,
  {
    let out = self
      .conn
      .call(move |conn| {
        let state = match current_guard(conn)? {
          Ok(state) => state,
          Err(e) => return Ok(Err(e)),
        };
        Ok(Ok(f(conn, state)?))
      })
      .await??;
    Ok(out)
  }

  fn require_fingerprint_column(state: GuardState) -> Result<()> {
    if state.fingerprint_enforced() {
      Ok(())
    } else {
      Err(Error::Core(once_core::Error::GuardState {
        required: GuardState::Migrating,
        actual:   state,
      }))
    }
  }

  fn require_migrating(state: GuardState) -> Result<()> {
    if state.fingerprint_nullable() {
      Ok(())
    } else {
      Err(Error::Core(once_core::Error::GuardState {
        required: GuardState::Migrating,
        actual:   state,
      }))
    }
  }

  #[cfg(test)]
  pub(crate) async fn execute_raw(&self, sql: &'static str) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute_batch(sql)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── MessageStore impl ───────────────────────────────────────────────────────

impl MessageStore for SqliteStore {
  type Error = Error;

  // ── Guard ─────────────────────────────────────────────────────────────────

  async fn guard_state(&self) -> Result<GuardState> {
    self.with_guard(|_, state| Ok(state)).await
  }

  async fn advance_guard(&self, target: GuardState) -> Result<GuardState> {
    let state = self
      .conn
      .call(move |conn| Ok(schema::migrate(conn, target, false)?))
      .await??;
    Ok(state)
  }

  // ── Conversations ─────────────────────────────────────────────────────────

  async fn create_conversation(&self, title: Option<String>) -> Result<Conversation> {
    let conversation = Conversation {
      conversation_id: Uuid::new_v4(),
      title,
      created_at: storable_dt(Utc::now()),
    };

    let id_str = encode_uuid(conversation.conversation_id);
    let at_str = encode_dt(conversation.created_at);
    let title  = conversation.title.clone();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO conversations (conversation_id, title, created_at) VALUES (?1, ?2, ?3)",
          rusqlite::params![id_str, title, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(conversation)
  }

  async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawConversation> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT conversation_id, title, created_at
               FROM conversations WHERE conversation_id = ?1",
              rusqlite::params![id_str],
              |row| {
                Ok(RawConversation {
                  conversation_id: row.get(0)?,
                  title:           row.get(1)?,
                  created_at:      row.get(2)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawConversation::into_conversation).transpose()
  }

  async fn delete_conversation(&self, id: Uuid) -> Result<bool> {
    let id_str = encode_uuid(id);

    let deleted = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM conversations WHERE conversation_id = ?1",
          rusqlite::params![id_str],
        )?)
      })
      .await?;

    Ok(deleted > 0)
  }

  // ── Messages ──────────────────────────────────────────────────────────────

  async fn submit(&self, input: NewMessage) -> Result<Submission> {
    let created_at = storable_dt(check_timestamp(
      input.created_at.unwrap_or_else(Utc::now),
    )?);
    let fp = fingerprint(input.conversation_id, input.role, &input.content, created_at);

    let mut message = Message {
      message_id:      Uuid::new_v4(),
      conversation_id: input.conversation_id,
      role:            input.role,
      content:         input.content,
      created_at,
      fingerprint:     Some(fp.clone()),
    };

    let id_str      = encode_uuid(message.message_id);
    let conv_str    = encode_uuid(message.conversation_id);
    let role_str    = message.role.as_str();
    let content     = message.content.clone();
    let at_str      = encode_dt(created_at);
    let fp_str      = fp.as_str().to_owned();

    let (state, inserted) = self
      .with_guard(move |conn, state| {
        let attempt = if !state.fingerprint_enforced() {
          conn.execute(
            INSERT_UNFINGERPRINTED,
            rusqlite::params![id_str, conv_str, role_str, content, at_str],
          )
        } else if state.fallback_index_live() {
          conn.execute(
            INSERT_UNLESS_LEGACY_TWIN,
            rusqlite::params![id_str, conv_str, role_str, content, at_str, fp_str],
          )
        } else {
          conn.execute(
            INSERT_FINGERPRINTED,
            rusqlite::params![id_str, conv_str, role_str, content, at_str, fp_str],
          )
        };

        let conflicted = match attempt {
          Ok(0) => true,
          Ok(_) => false,
          Err(e) if is_fingerprint_conflict(&e) => true,
          Err(e) => return Err(e),
        };
        if !conflicted {
          return Ok((state, Inserted::Created));
        }

        let existing = conn
          .query_row(
            SELECT_EXISTING,
            rusqlite::params![id_str, conv_str, role_str, content, at_str, fp_str],
            RawMessage::from_row,
          )
          .optional()?;
        Ok((state, existing.map_or(Inserted::Vanished, Inserted::Existing)))
      })
      .await?;

    match inserted {
      Inserted::Created => {
        if !state.fingerprint_enforced() {
          message.fingerprint = None;
        }
        Ok(Submission { message, created: true })
      }
      Inserted::Existing(raw) => {
        let existing = raw.into_message()?;
        tracing::debug!(
          fingerprint = %fp,
          existing = %existing.message_id,
          "duplicate submission resolved to existing message"
        );
        Ok(Submission { message: existing, created: false })
      }
      Inserted::Vanished => Err(Error::ConflictVanished(fp)),
    }
  }

  async fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
    let id_str = encode_uuid(id);

    let raw = self
      .with_guard(move |conn, state| {
        conn
          .query_row(
            &format!(
              "SELECT {} FROM messages WHERE message_id = ?1",
              message_columns(state)
            ),
            rusqlite::params![id_str],
            RawMessage::from_row,
          )
          .optional()
      })
      .await?;

    raw.map(RawMessage::into_message).transpose()
  }

  async fn find_by_fingerprint(&self, fingerprint: &Fingerprint) -> Result<Option<Message>> {
    let fp_str = fingerprint.as_str().to_owned();

    let raw = self
      .with_guard(move |conn, state| {
        if !state.fingerprint_enforced() {
          return Ok(None);
        }
        conn
          .query_row(
            "SELECT message_id, conversation_id, role, content, created_at, fingerprint
             FROM messages WHERE fingerprint = ?1",
            rusqlite::params![fp_str],
            RawMessage::from_row,
          )
          .optional()
      })
      .await?;

    raw.map(RawMessage::into_message).transpose()
  }

  async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
    let conv_str = encode_uuid(conversation_id);

    let raws: Vec<RawMessage> = self
      .with_guard(move |conn, state| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM messages
           WHERE conversation_id = ?1
           ORDER BY created_at, message_id",
          message_columns(state)
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![conv_str], RawMessage::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawMessage::into_message).collect()
  }

  // ── Backfill primitives ───────────────────────────────────────────────────

  async fn pending_fingerprints(
    &self,
    after: Option<Cursor>,
    limit: usize,
  ) -> Result<Vec<PendingRow>> {
    let (after_at, after_id) = match after {
      Some(c) => (Some(c.created_at), Some(c.message_id)),
      None => (None, None),
    };
    // SQLite reads a negative LIMIT as unbounded.
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    let (state, rows) = self
      .with_guard(move |conn, state| {
        if !state.fingerprint_enforced() {
          return Ok((state, Vec::new()));
        }
        let mut stmt = conn.prepare(
          "SELECT message_id, conversation_id, role, content, created_at
           FROM messages
           WHERE fingerprint IS NULL
             AND (?1 IS NULL
                  OR created_at > ?1
                  OR (created_at = ?1 AND message_id > ?2))
           ORDER BY created_at, message_id
           LIMIT ?3",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![after_at, after_id, limit], |row| {
            Ok(PendingRow {
              message_id:      row.get(0)?,
              conversation_id: row.get(1)?,
              role:            row.get(2)?,
              content:         row.get(3)?,
              created_at:      row.get(4)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok((state, rows))
      })
      .await?;

    Self::require_fingerprint_column(state)?;
    Ok(rows)
  }

  async fn set_fingerprint(&self, message_id: Uuid, fingerprint: Fingerprint) -> Result<bool> {
    let id_str = encode_uuid(message_id);
    let fp_str = String::from(fingerprint);

    let (state, changed) = self
      .with_guard(move |conn, state| {
        if !state.fingerprint_enforced() {
          return Ok((state, 0));
        }
        let changed = conn.execute(
          "UPDATE messages SET fingerprint = ?2
           WHERE message_id = ?1 AND fingerprint IS NULL",
          rusqlite::params![id_str, fp_str],
        )?;
        Ok((state, changed))
      })
      .await?;

    Self::require_fingerprint_column(state)?;
    Ok(changed > 0)
  }

  async fn count_missing_fingerprints(&self) -> Result<u64> {
    let count: i64 = self
      .with_guard(|conn, state| {
        if !state.fingerprint_enforced() {
          conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
        } else if state.fingerprint_nullable() {
          conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE fingerprint IS NULL",
            [],
            |row| row.get(0),
          )
        } else {
          Ok(0)
        }
      })
      .await?;
    Ok(count as u64)
  }

  async fn load_checkpoint(&self) -> Result<Option<Cursor>> {
    self
      .with_guard(|conn, state| {
        if !state.fingerprint_nullable() {
          return Ok(None);
        }
        conn
          .query_row(
            "SELECT created_at, message_id FROM backfill_checkpoint WHERE id = 1",
            [],
            |row| {
              Ok(Cursor {
                created_at: row.get(0)?,
                message_id: row.get(1)?,
              })
            },
          )
          .optional()
      })
      .await
  }

  async fn save_checkpoint(&self, cursor: Cursor) -> Result<()> {
    let now = encode_dt(Utc::now());

    let state = self
      .with_guard(move |conn, state| {
        if state.fingerprint_nullable() {
          conn.execute(
            "INSERT INTO backfill_checkpoint (id, created_at, message_id, updated_at)
             VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
               created_at = excluded.created_at,
               message_id = excluded.message_id,
               updated_at = excluded.updated_at",
            rusqlite::params![cursor.created_at, cursor.message_id, now],
          )?;
        }
        Ok(state)
      })
      .await?;

    Self::require_migrating(state)
  }

  async fn clear_checkpoint(&self) -> Result<()> {
    self
      .with_guard(|conn, state| {
        if state.fingerprint_nullable() {
          conn.execute("DELETE FROM backfill_checkpoint", [])?;
        }
        Ok(())
      })
      .await
  }
}
