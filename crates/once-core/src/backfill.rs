//! Retroactive fingerprinting of rows written before fingerprints existed.
//!
//! The driver walks null-fingerprint rows in `(created_at, message_id)` order,
//! one bounded page at a time, computing each fingerprint from the row's own
//! fields and writing it back. It is safe to run concurrently with live
//! writers, to interrupt between pages, and to re-run: rows that already have
//! a fingerprint are never selected again.
//!
//! A row that cannot be decoded or written is logged and counted, never
//! fatal. It stays null, so the next pass picks it up again. A stored cursor
//! lets an interrupted pass resume where it left off; the cursor is cleared
//! whenever a pass reaches the end.

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::{Duration, Instant},
};

use serde::Serialize;

use crate::{
  Error,
  guard::GuardState,
  store::{Cursor, MessageStore},
};

/// Default page size for a backfill pass.
pub const DEFAULT_BATCH_SIZE: usize = 500;

// ─── Options and signals ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct BackfillOptions {
  pub batch_size:  usize,
  /// Stop after this many non-empty pages; the checkpoint is kept.
  pub max_batches: Option<usize>,
}

impl Default for BackfillOptions {
  fn default() -> Self {
    Self { batch_size: DEFAULT_BATCH_SIZE, max_batches: None }
  }
}

impl BackfillOptions {
  pub fn with_batch_size(batch_size: usize) -> Self {
    Self { batch_size, ..Self::default() }
  }
}

/// Cooperative stop flag, checked between pages.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
  pub fn new() -> Self { Self::default() }

  pub fn stop(&self) { self.0.store(true, Ordering::SeqCst); }

  pub fn is_stopped(&self) -> bool { self.0.load(Ordering::SeqCst) }
}

// ─── Reports ─────────────────────────────────────────────────────────────────

/// Outcome of one page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
  pub scanned:   u64,
  pub updated:   u64,
  pub failed:    u64,
  /// The pass reached the end of the null-fingerprint rows.
  pub exhausted: bool,
}

/// Outcome of a [`Backfill::run`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackfillReport {
  pub scanned:   u64,
  pub updated:   u64,
  pub failed:    u64,
  /// Null-fingerprint rows left after the run.
  pub remaining: u64,
  pub batches:   u64,
  pub elapsed:   Duration,
  /// The run ended because the stop signal was raised.
  pub stopped:   bool,
  /// The guard was advanced to `FingerprintRequired` after the run.
  pub sealed:    bool,
}

impl BackfillReport {
  /// No null-fingerprint rows remain.
  pub fn complete(&self) -> bool { self.remaining == 0 }

  fn absorb(&mut self, batch: BatchReport) {
    self.scanned += batch.scanned;
    self.updated += batch.updated;
    self.failed += batch.failed;
    if batch.scanned > 0 {
      self.batches += 1;
    }
  }
}

// ─── Driver ──────────────────────────────────────────────────────────────────

/// Backfill driver over any [`MessageStore`].
pub struct Backfill<'a, S: MessageStore> {
  store:   &'a S,
  options: BackfillOptions,
  stop:    StopSignal,
  cursor:  Option<Cursor>,
  started: bool,
  sealed:  bool,
}

impl<'a, S: MessageStore> Backfill<'a, S> {
  pub fn new(store: &'a S, options: BackfillOptions) -> Self {
    Self {
      store,
      options,
      stop: StopSignal::new(),
      cursor: None,
      started: false,
      sealed: false,
    }
  }

  /// Use an externally owned stop signal.
  pub fn with_stop(mut self, stop: StopSignal) -> Self {
    self.stop = stop;
    self
  }

  pub fn stop_signal(&self) -> StopSignal { self.stop.clone() }

  fn batch_size(&self) -> usize { self.options.batch_size.max(1) }

  async fn start(&mut self) -> Result<(), S::Error> {
    let state = self.store.guard_state().await?;
    if !state.fingerprint_enforced() {
      return Err(
        Error::GuardState {
          required: GuardState::Migrating,
          actual:   state,
        }
        .into(),
      );
    }
    if state.fingerprint_nullable() {
      self.cursor = self.store.load_checkpoint().await?;
      if let Some(cursor) = &self.cursor {
        tracing::info!(
          created_at = %cursor.created_at,
          message_id = %cursor.message_id,
          "backfill resuming from checkpoint"
        );
      }
    } else {
      self.sealed = true;
    }
    self.started = true;
    Ok(())
  }

  /// Process one page of null-fingerprint rows.
  pub async fn run_batch(&mut self) -> Result<BatchReport, S::Error> {
    if !self.started {
      self.start().await?;
    }
    if self.sealed {
      return Ok(BatchReport { exhausted: true, ..Default::default() });
    }

    let limit = self.batch_size();
    let rows = self
      .store
      .pending_fingerprints(self.cursor.clone(), limit)
      .await?;

    let mut report = BatchReport {
      scanned: rows.len() as u64,
      ..Default::default()
    };

    for row in &rows {
      let (id, fp) = match row.resolve() {
        Ok(resolved) => resolved,
        Err(e) => {
          tracing::warn!(message_id = %row.message_id, error = %e, "backfill: cannot fingerprint row");
          report.failed += 1;
          continue;
        }
      };
      match self.store.set_fingerprint(id, fp).await {
        Ok(true) => report.updated += 1,
        // Filled in by a concurrent run since the page was read.
        Ok(false) => {}
        Err(e) => {
          tracing::warn!(message_id = %row.message_id, error = %e, "backfill: cannot store fingerprint");
          report.failed += 1;
        }
      }
    }

    if rows.len() < limit {
      self.store.clear_checkpoint().await?;
      self.cursor = None;
      report.exhausted = true;
    } else if let Some(last) = rows.last() {
      let cursor = last.cursor();
      self.store.save_checkpoint(cursor.clone()).await?;
      self.cursor = Some(cursor);
    }

    tracing::debug!(
      scanned = report.scanned,
      updated = report.updated,
      failed = report.failed,
      "backfill batch done"
    );
    Ok(report)
  }

  /// Process pages until the pass is exhausted, the stop signal is raised,
  /// or `max_batches` is reached.
  pub async fn run(&mut self) -> Result<BackfillReport, S::Error> {
    let started_at = Instant::now();
    let mut report = BackfillReport::default();

    loop {
      if self.stop.is_stopped() {
        report.stopped = true;
        break;
      }
      if let Some(max) = self.options.max_batches
        && report.batches >= max as u64
      {
        break;
      }
      let batch = self.run_batch().await?;
      report.absorb(batch);
      if batch.exhausted {
        break;
      }
    }

    report.remaining = self.store.count_missing_fingerprints().await?;
    report.elapsed = started_at.elapsed();

    tracing::info!(
      scanned = report.scanned,
      updated = report.updated,
      failed = report.failed,
      remaining = report.remaining,
      elapsed_ms = report.elapsed.as_millis() as u64,
      "backfill finished"
    );
    Ok(report)
  }

  /// [`run`](Self::run), then advance the guard to
  /// [`GuardState::FingerprintRequired`] if no null rows remain.
  pub async fn run_and_seal(&mut self) -> Result<BackfillReport, S::Error> {
    let mut report = self.run().await?;
    if report.complete() && !report.stopped {
      if !self.sealed {
        self
          .store
          .advance_guard(GuardState::FingerprintRequired)
          .await?;
        self.sealed = true;
        tracing::info!("fingerprints now required for all messages");
      }
      report.sealed = true;
    }
    Ok(report)
  }
}
