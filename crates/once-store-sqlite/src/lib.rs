//! SQLite backend for the Once message store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Message uniqueness is enforced by
//! SQLite unique indexes; the guard state lives in `PRAGMA user_version`.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::{OpenOptions, SqliteStore};
