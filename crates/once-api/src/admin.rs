//! Operator endpoints for the fingerprint migration.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/admin/backfill` | Body: [`BackfillBody`]; runs one backfill pass |
//! | `GET`  | `/admin/guard` | Current guard state and null-fingerprint count |
//! | `POST` | `/admin/guard` | Body: `{"state":"fingerprint_required"}`; forward only |

use axum::{Json, extract::State};
use once_core::{
  backfill::{Backfill, BackfillOptions, BackfillReport},
  guard::GuardState,
  store::MessageStore,
};
use serde::{Deserialize, Serialize};

use crate::{AppState, error::ApiError};

// ─── Backfill ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct BackfillBody {
  /// Page size; defaults to the server's configured batch size.
  pub batch_size:  Option<usize>,
  pub max_batches: Option<usize>,
  /// Advance the guard to `fingerprint_required` if the pass leaves no
  /// null fingerprints behind.
  #[serde(default)]
  pub seal:        bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackfillResponse {
  pub scanned:    u64,
  pub updated:    u64,
  pub failed:     u64,
  pub remaining:  u64,
  pub batches:    u64,
  pub elapsed_ms: u64,
  pub sealed:     bool,
}

impl From<BackfillReport> for BackfillResponse {
  fn from(r: BackfillReport) -> Self {
    Self {
      scanned:    r.scanned,
      updated:    r.updated,
      failed:     r.failed,
      remaining:  r.remaining,
      batches:    r.batches,
      elapsed_ms: r.elapsed.as_millis() as u64,
      sealed:     r.sealed,
    }
  }
}

/// `POST /admin/backfill`
pub async fn backfill<S>(
  State(state): State<AppState<S>>,
  Json(body): Json<BackfillBody>,
) -> Result<Json<BackfillResponse>, ApiError>
where
  S: MessageStore,
{
  let batch_size = body.batch_size.unwrap_or(state.backfill_batch_size);
  if batch_size == 0 {
    return Err(ApiError::BadRequest("batch_size must be positive".into()));
  }

  let guard = state.store.guard_state().await.map_err(ApiError::store)?;
  if guard == GuardState::NoFingerprint {
    return Err(ApiError::Conflict(
      "no fingerprint column yet; advance the guard to migrating first".into(),
    ));
  }

  let options = BackfillOptions { batch_size, max_batches: body.max_batches };
  let mut backfill = Backfill::new(state.store.as_ref(), options);
  let report = if body.seal {
    backfill.run_and_seal().await
  } else {
    backfill.run().await
  }
  .map_err(ApiError::store)?;

  Ok(Json(report.into()))
}

// ─── Guard ────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct GuardStatus {
  pub state:                GuardState,
  pub missing_fingerprints: u64,
}

async fn status<S: MessageStore>(store: &S) -> Result<GuardStatus, ApiError> {
  Ok(GuardStatus {
    state:                store.guard_state().await.map_err(ApiError::store)?,
    missing_fingerprints: store
      .count_missing_fingerprints()
      .await
      .map_err(ApiError::store)?,
  })
}

/// `GET /admin/guard`
pub async fn guard<S>(
  State(state): State<AppState<S>>,
) -> Result<Json<GuardStatus>, ApiError>
where
  S: MessageStore,
{
  Ok(Json(status(state.store.as_ref()).await?))
}

#[derive(Debug, Deserialize)]
pub struct AdvanceBody {
  pub state: GuardState,
}

/// `POST /admin/guard`
pub async fn advance<S>(
  State(state): State<AppState<S>>,
  Json(body): Json<AdvanceBody>,
) -> Result<Json<GuardStatus>, ApiError>
where
  S: MessageStore,
{
  let current = status(state.store.as_ref()).await?;
  if body.state < current.state {
    return Err(ApiError::Conflict(format!(
      "guard is already {}; it cannot move back to {}",
      current.state, body.state
    )));
  }
  if body.state == GuardState::FingerprintRequired
    && current.state != GuardState::FingerprintRequired
    && current.missing_fingerprints > 0
  {
    return Err(ApiError::Conflict(format!(
      "{} messages still lack a fingerprint; run the backfill first",
      current.missing_fingerprints
    )));
  }

  state
    .store
    .advance_guard(body.state)
    .await
    .map_err(ApiError::store)?;
  tracing::info!(state = %body.state, "guard advanced");

  Ok(Json(status(state.store.as_ref()).await?))
}
