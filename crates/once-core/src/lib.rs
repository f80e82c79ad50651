//! Core types and trait definitions for the Once message store.
//!
//! Once persists chat messages at most once per logical message. Every
//! inbound message is reduced to a deterministic [`fingerprint::Fingerprint`],
//! and uniqueness of that fingerprint is enforced by the storage engine rather
//! than by any in-process cache.
//!
//! This crate is free of HTTP and database dependencies. Storage backends
//! implement [`store::MessageStore`]; the [`backfill`] driver works against
//! any of them.

// Native `async fn` in traits; `Send` bounds are spelled out on the returned
// futures instead.
#![allow(async_fn_in_trait)]

pub mod backfill;
pub mod error;
pub mod fingerprint;
pub mod guard;
pub mod message;
pub mod store;

pub use error::{CoreError, Error, Result};
