//! Handlers for `/conversations` endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `POST`   | `/conversations` | Body: `{"title":"..."}` (optional) |
//! | `GET`    | `/conversations/:id` | 404 if not found |
//! | `DELETE` | `/conversations/:id` | Deletes its messages too; 404 if not found |
//! | `GET`    | `/conversations/:id/messages` | Oldest first |

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use once_core::{
  message::{Conversation, Message},
  store::MessageStore,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{AppState, error::ApiError};

// ─── Create ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct CreateBody {
  pub title: Option<String>,
}

/// `POST /conversations`
pub async fn create<S>(
  State(state): State<AppState<S>>,
  Json(body): Json<CreateBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: MessageStore,
{
  let conversation = state
    .store
    .create_conversation(body.title)
    .await
    .map_err(ApiError::store)?;
  Ok((StatusCode::CREATED, Json(conversation)))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /conversations/:id`
pub async fn get_one<S>(
  State(state): State<AppState<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Conversation>, ApiError>
where
  S: MessageStore,
{
  let conversation = state
    .store
    .get_conversation(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("conversation {id} not found")))?;
  Ok(Json(conversation))
}

// ─── Delete ───────────────────────────────────────────────────────────────────

/// `DELETE /conversations/:id`
pub async fn delete_one<S>(
  State(state): State<AppState<S>>,
  Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError>
where
  S: MessageStore,
{
  if state
    .store
    .delete_conversation(id)
    .await
    .map_err(ApiError::store)?
  {
    Ok(StatusCode::NO_CONTENT)
  } else {
    Err(ApiError::NotFound(format!("conversation {id} not found")))
  }
}

// ─── Messages ─────────────────────────────────────────────────────────────────

/// `GET /conversations/:id/messages`
pub async fn messages<S>(
  State(state): State<AppState<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Vec<Message>>, ApiError>
where
  S: MessageStore,
{
  state
    .store
    .get_conversation(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("conversation {id} not found")))?;

  let messages = state
    .store
    .list_messages(id)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(messages))
}
