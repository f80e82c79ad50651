//! Handlers for `/messages` endpoints — the ingestion boundary.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/messages` | Body: [`IngestBody`]; 201 when stored, 200 when already present |
//! | `GET`  | `/messages/:id` | 404 if not found |
//!
//! Timestamps must fall in years 0000-9999; anything else is a 400 and
//! nothing is stored. A duplicate submission differs from a fresh one only in the status code
//! and the `created` flag.

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
};
use chrono::{DateTime, Utc};
use once_core::{
  fingerprint::Fingerprint,
  message::{Message, NewMessage, Role, check_timestamp},
  store::MessageStore,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppState, error::ApiError};

// ─── Ingest ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct IngestBody {
  pub conversation_id: Uuid,
  pub role:            Role,
  pub content:         String,
  /// When the producer saw the message; defaults to the time of receipt.
  pub timestamp:       Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
  pub id:          Uuid,
  pub created:     bool,
  pub fingerprint: Option<Fingerprint>,
}

/// `POST /messages`
pub async fn ingest<S>(
  State(state): State<AppState<S>>,
  Json(body): Json<IngestBody>,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError>
where
  S: MessageStore,
{
  if let Some(ts) = body.timestamp {
    check_timestamp(ts).map_err(|e| ApiError::BadRequest(e.to_string()))?;
  }

  let conversation_id = body.conversation_id;
  state
    .store
    .get_conversation(conversation_id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| {
      ApiError::NotFound(format!("conversation {conversation_id} not found"))
    })?;

  let submission = state
    .store
    .submit(NewMessage {
      conversation_id,
      role: body.role,
      content: body.content,
      created_at: body.timestamp,
    })
    .await
    .map_err(ApiError::store)?;

  let status = if submission.created { StatusCode::CREATED } else { StatusCode::OK };
  Ok((
    status,
    Json(IngestResponse {
      id:          submission.id(),
      created:     submission.created,
      fingerprint: submission.message.fingerprint,
    }),
  ))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /messages/:id`
pub async fn get_one<S>(
  State(state): State<AppState<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Message>, ApiError>
where
  S: MessageStore,
{
  let message = state
    .store
    .get_message(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("message {id} not found")))?;
  Ok(Json(message))
}
