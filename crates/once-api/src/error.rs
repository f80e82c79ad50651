//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use once_core::CoreError;
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  /// The request is valid but the store's guard state does not allow it.
  #[error("conflict: {0}")]
  Conflict(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ApiError {
  /// Wrap a store error. Refusals the store reports from the domain layer
  /// keep their meaning; everything else is a server error.
  pub fn store<E>(e: E) -> Self
  where
    E: std::error::Error + CoreError + Send + Sync + 'static,
  {
    use once_core::Error as Core;

    let status = match e.core() {
      Some(
        Core::GuardState { .. }
        | Core::GuardRegression { .. }
        | Core::BackfillIncomplete { .. }
        | Core::LegacyDuplicates { .. },
      ) => StatusCode::CONFLICT,
      Some(Core::TimestampOutOfRange(_) | Core::UnknownRole(_)) => StatusCode::BAD_REQUEST,
      _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::CONFLICT {
      ApiError::Conflict(e.to_string())
    } else if status == StatusCode::BAD_REQUEST {
      ApiError::BadRequest(e.to_string())
    } else {
      ApiError::Store(Box::new(e))
    }
  }
}
