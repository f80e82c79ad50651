//! Versioned SQL schema for the Once SQLite store.
//!
//! `PRAGMA user_version` records which [`GuardState`] the schema realises.
//! Each step runs in its own `IMMEDIATE` transaction that re-reads the
//! version, so concurrent openers never apply a step twice.

use once_core::guard::GuardState;
use rusqlite::{Connection, TransactionBehavior};

/// Per-connection settings; must run outside any transaction.
pub const PRAGMAS: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
";

/// v1 — NO_FINGERPRINT. Plain tables, no deduplication.
const V1: &str = "
CREATE TABLE IF NOT EXISTS conversations (
    conversation_id TEXT PRIMARY KEY,
    title           TEXT,
    created_at      TEXT NOT NULL
);

-- Messages are immutable. The only UPDATE ever issued fills in a
-- fingerprint that is still NULL.
CREATE TABLE IF NOT EXISTS messages (
    message_id      TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL
                    REFERENCES conversations(conversation_id) ON DELETE CASCADE,
    role            TEXT NOT NULL,   -- 'user' | 'assistant' | 'system'
    content         TEXT NOT NULL,
    created_at      TEXT NOT NULL    -- RFC 3339 UTC, microsecond precision
);

CREATE INDEX IF NOT EXISTS messages_conversation_idx
    ON messages(conversation_id, created_at);
";

/// v2 — MIGRATING. Nullable fingerprint, unique where set, plus a fallback
/// over `(conversation, content, second)` for rows not yet backfilled.
const V2: &str = "
ALTER TABLE messages ADD COLUMN fingerprint TEXT;

CREATE UNIQUE INDEX messages_fingerprint_uq
    ON messages(fingerprint)
    WHERE fingerprint IS NOT NULL;

CREATE UNIQUE INDEX messages_legacy_uq
    ON messages(conversation_id, content, substr(created_at, 1, 19))
    WHERE fingerprint IS NULL;

CREATE INDEX messages_pending_idx
    ON messages(created_at, message_id)
    WHERE fingerprint IS NULL;

-- Single-row resume point for the backfill.
CREATE TABLE backfill_checkpoint (
    id          INTEGER PRIMARY KEY CHECK (id = 1),
    created_at  TEXT NOT NULL,
    message_id  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
";

/// v3 — FINGERPRINT_REQUIRED. SQLite cannot add `NOT NULL` in place, so the
/// table is rebuilt. Dropping the old table retires both partial indexes.
const V3: &str = "
CREATE TABLE messages_v3 (
    message_id      TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL
                    REFERENCES conversations(conversation_id) ON DELETE CASCADE,
    role            TEXT NOT NULL,
    content         TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    fingerprint     TEXT NOT NULL UNIQUE
);

INSERT INTO messages_v3 (message_id, conversation_id, role, content, created_at, fingerprint)
    SELECT message_id, conversation_id, role, content, created_at, fingerprint
    FROM messages;

DROP TABLE messages;
ALTER TABLE messages_v3 RENAME TO messages;

CREATE INDEX messages_conversation_idx
    ON messages(conversation_id, created_at);

DROP TABLE backfill_checkpoint;
";

/// Row groups that would violate `messages_legacy_uq`.
const LEGACY_DUPLICATE_GROUPS: &str = "
SELECT COUNT(*) FROM (
    SELECT 1 FROM messages
    GROUP BY conversation_id, content, substr(created_at, 1, 19)
    HAVING COUNT(*) > 1
)";

fn step_sql(to: GuardState) -> &'static str {
  match to {
    GuardState::NoFingerprint => V1,
    GuardState::Migrating => V2,
    GuardState::FingerprintRequired => V3,
  }
}

/// Columns for a `messages` SELECT in the order `RawMessage::from_row`
/// reads them. Before v2 there is no fingerprint column.
pub fn message_columns(state: GuardState) -> &'static str {
  if state.fingerprint_enforced() {
    "message_id, conversation_id, role, content, created_at, fingerprint"
  } else {
    "message_id, conversation_id, role, content, created_at, NULL"
  }
}

fn user_version(conn: &Connection) -> rusqlite::Result<i64> {
  conn.pragma_query_value(None, "user_version", |row| row.get(0))
}

/// The guard state realised by the connected database.
pub fn current_guard(conn: &Connection) -> rusqlite::Result<once_core::Result<GuardState>> {
  let version = user_version(conn)?;
  Ok(
    GuardState::from_schema_version(version)
      .and_then(|s| s.ok_or(once_core::Error::UnknownSchemaVersion(version))),
  )
}

/// Bring the schema to `target`.
///
/// With `allow_ahead`, a database already past `target` is left as is;
/// otherwise that is a [`once_core::Error::GuardRegression`].
pub fn migrate(
  conn:        &mut Connection,
  target:      GuardState,
  allow_ahead: bool,
) -> rusqlite::Result<once_core::Result<GuardState>> {
  loop {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let version = user_version(&tx)?;
    let current = match GuardState::from_schema_version(version) {
      Ok(current) => current,
      Err(e) => return Ok(Err(e)),
    };

    let next = match current {
      None => GuardState::NoFingerprint,
      Some(cur) => match cur.path_to(target) {
        Ok(path) => match path.first() {
          Some(&next) => next,
          None => return Ok(Ok(cur)),
        },
        Err(_) if allow_ahead => return Ok(Ok(cur)),
        Err(e) => return Ok(Err(e)),
      },
    };

    if next.fallback_index_live() {
      let groups: i64 = tx.query_row(LEGACY_DUPLICATE_GROUPS, [], |row| row.get(0))?;
      if groups > 0 {
        return Ok(Err(once_core::Error::LegacyDuplicates { groups: groups as u64 }));
      }
    }

    if next.fingerprint_enforced() && !next.fingerprint_nullable() {
      let remaining: i64 = tx.query_row(
        "SELECT COUNT(*) FROM messages WHERE fingerprint IS NULL",
        [],
        |row| row.get(0),
      )?;
      if remaining > 0 {
        return Ok(Err(once_core::Error::BackfillIncomplete {
          remaining: remaining as u64,
        }));
      }
    }

    tx.execute_batch(step_sql(next))?;
    tx.pragma_update(None, "user_version", next.schema_version())?;
    tx.commit()?;
    tracing::info!(state = %next, "schema migrated");
  }
}
