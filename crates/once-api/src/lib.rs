//! JSON REST API for Once.
//!
//! Exposes an axum [`Router`] backed by any [`MessageStore`]. Auth, TLS, and
//! transport concerns are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", once_api::api_router(AppState::new(store)))
//! ```

pub mod admin;
pub mod conversations;
pub mod error;
pub mod messages;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use once_core::{backfill::DEFAULT_BATCH_SIZE, store::MessageStore};
use tower_http::trace::TraceLayer;

pub use error::ApiError;

/// Shared state threaded through all handlers.
pub struct AppState<S> {
  pub store:               Arc<S>,
  /// Page size for `POST /admin/backfill` when the body names none.
  pub backfill_batch_size: usize,
}

impl<S> AppState<S> {
  pub fn new(store: Arc<S>) -> Self {
    Self { store, backfill_batch_size: DEFAULT_BATCH_SIZE }
  }
}

impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self {
      store:               Arc::clone(&self.store),
      backfill_batch_size: self.backfill_batch_size,
    }
  }
}

/// Build a fully-materialised API router.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(state: AppState<S>) -> Router<()>
where
  S: MessageStore + 'static,
{
  Router::new()
    // Conversations
    .route("/conversations", post(conversations::create::<S>))
    .route(
      "/conversations/{id}",
      get(conversations::get_one::<S>).delete(conversations::delete_one::<S>),
    )
    .route("/conversations/{id}/messages", get(conversations::messages::<S>))
    // Messages
    .route("/messages", post(messages::ingest::<S>))
    .route("/messages/{id}", get(messages::get_one::<S>))
    // Migration
    .route("/admin/backfill", post(admin::backfill::<S>))
    .route("/admin/guard", get(admin::guard::<S>).post(admin::advance::<S>))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

#[cfg(test)]
mod tests {
  use super::*;

  use axum::{
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
  };
  use once_core::{
    guard::GuardState,
    message::{NewMessage, Role},
  };
  use once_store_sqlite::{OpenOptions, SqliteStore};
  use serde_json::{Value, json};
  use tower::ServiceExt as _;
  use uuid::Uuid;

  async fn make_state() -> AppState<SqliteStore> {
    let store = SqliteStore::open_in_memory().await.unwrap();
    AppState::new(Arc::new(store))
  }

  async fn send(
    state:  &AppState<SqliteStore>,
    method: &str,
    uri:    &str,
    body:   Option<Value>,
  ) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
      Some(v) => {
        builder = builder.header(header::CONTENT_TYPE, "application/json");
        Body::from(v.to_string())
      }
      None => Body::empty(),
    };
    api_router(state.clone())
      .oneshot(builder.body(body).unwrap())
      .await
      .unwrap()
  }

  async fn json_body(resp: Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
      .await
      .unwrap();
    serde_json::from_slice(&bytes).unwrap()
  }

  async fn new_conversation(state: &AppState<SqliteStore>) -> String {
    let resp = send(state, "POST", "/conversations", Some(json!({ "title": "t" }))).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    json_body(resp).await["conversation_id"]
      .as_str()
      .unwrap()
      .to_string()
  }

  // ── Ingestion ───────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn duplicate_ingest_returns_200_with_same_id() {
    let state = make_state().await;
    let conv = new_conversation(&state).await;
    let body = json!({
      "conversation_id": conv,
      "role": "user",
      "content": "hello",
      "timestamp": "2024-03-01T10:00:00.400Z",
    });

    let first = send(&state, "POST", "/messages", Some(body.clone())).await;
    assert_eq!(first.status(), StatusCode::CREATED);
    let first = json_body(first).await;
    assert_eq!(first["created"], true);
    assert_eq!(first["fingerprint"].as_str().unwrap().len(), 64);

    let mut later = body;
    later["timestamp"] = json!("2024-03-01T10:00:00.900Z");
    let second = send(&state, "POST", "/messages", Some(later)).await;
    assert_eq!(second.status(), StatusCode::OK);
    let second = json_body(second).await;
    assert_eq!(second["created"], false);
    assert_eq!(second["id"], first["id"]);
  }

  #[tokio::test]
  async fn ingest_into_unknown_conversation_is_404() {
    let state = make_state().await;
    let resp = send(
      &state,
      "POST",
      "/messages",
      Some(json!({
        "conversation_id": Uuid::new_v4(),
        "role": "user",
        "content": "lost",
      })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(json_body(resp).await["error"].as_str().unwrap().contains("not found"));
  }

  #[tokio::test]
  async fn ingest_outside_storable_years_is_400() {
    let state = make_state().await;
    let conv = new_conversation(&state).await;

    let body = json!({
      "conversation_id": conv,
      "role": "user",
      "content": "when",
      "timestamp": "+10000-01-01T00:00:00Z",
    });
    for _ in 0..2 {
      let resp = send(&state, "POST", "/messages", Some(body.clone())).await;
      assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    let listed = send(&state, "GET", &format!("/conversations/{conv}/messages"), None).await;
    assert_eq!(listed.status(), StatusCode::OK);
    assert!(json_body(listed).await.as_array().unwrap().is_empty());
  }

  #[tokio::test]
  async fn ingest_with_unknown_role_is_rejected() {
    let state = make_state().await;
    let conv = new_conversation(&state).await;
    let resp = send(
      &state,
      "POST",
      "/messages",
      Some(json!({ "conversation_id": conv, "role": "robot", "content": "beep" })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
  }

  #[tokio::test]
  async fn get_message_by_id() {
    let state = make_state().await;
    let conv = new_conversation(&state).await;
    let created = json_body(
      send(
        &state,
        "POST",
        "/messages",
        Some(json!({ "conversation_id": conv, "role": "assistant", "content": "hi" })),
      )
      .await,
    )
    .await;

    let id = created["id"].as_str().unwrap();
    let resp = send(&state, "GET", &format!("/messages/{id}"), None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let message = json_body(resp).await;
    assert_eq!(message["role"], "assistant");
    assert_eq!(message["content"], "hi");

    let missing = send(&state, "GET", &format!("/messages/{}", Uuid::new_v4()), None).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
  }

  // ── Conversations ───────────────────────────────────────────────────────────

  #[tokio::test]
  async fn deleting_conversation_removes_messages() {
    let state = make_state().await;
    let conv = new_conversation(&state).await;
    let created = json_body(
      send(
        &state,
        "POST",
        "/messages",
        Some(json!({ "conversation_id": conv, "role": "user", "content": "bye" })),
      )
      .await,
    )
    .await;

    let listed = send(&state, "GET", &format!("/conversations/{conv}/messages"), None).await;
    assert_eq!(json_body(listed).await.as_array().unwrap().len(), 1);

    let resp = send(&state, "DELETE", &format!("/conversations/{conv}"), None).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let id = created["id"].as_str().unwrap();
    let gone = send(&state, "GET", &format!("/messages/{id}"), None).await;
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
    let again = send(&state, "DELETE", &format!("/conversations/{conv}"), None).await;
    assert_eq!(again.status(), StatusCode::NOT_FOUND);
  }

  // ── Admin ───────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn guard_status_and_forward_only_advance() {
    let state = make_state().await;

    let resp = send(&state, "GET", "/admin/guard", None).await;
    let status = json_body(resp).await;
    assert_eq!(status["state"], "migrating");
    assert_eq!(status["missing_fingerprints"], 0);

    let resp = send(
      &state,
      "POST",
      "/admin/guard",
      Some(json!({ "state": "fingerprint_required" })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["state"], "fingerprint_required");

    let resp = send(&state, "POST", "/admin/guard", Some(json!({ "state": "migrating" }))).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
  }

  #[tokio::test]
  async fn backfill_then_seal_over_http() {
    let store = SqliteStore::open_in_memory_with(OpenOptions {
      guard: GuardState::NoFingerprint,
      ..Default::default()
    })
    .await
    .unwrap();
    let c = store.create_conversation(None).await.unwrap();
    for i in 0..12 {
      store
        .submit(NewMessage::new(c.conversation_id, Role::User, format!("old {i}")))
        .await
        .unwrap();
    }
    let state = AppState::new(Arc::new(store));

    let resp = send(&state, "POST", "/admin/backfill", Some(json!({}))).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let resp = send(&state, "POST", "/admin/guard", Some(json!({ "state": "migrating" }))).await;
    assert_eq!(json_body(resp).await["missing_fingerprints"], 12);

    let resp = send(
      &state,
      "POST",
      "/admin/guard",
      Some(json!({ "state": "fingerprint_required" })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let resp = send(
      &state,
      "POST",
      "/admin/backfill",
      Some(json!({ "batch_size": 5, "seal": true })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let report = json_body(resp).await;
    assert_eq!(report["scanned"], 12);
    assert_eq!(report["updated"], 12);
    assert_eq!(report["remaining"], 0);
    assert_eq!(report["batches"], 3);
    assert_eq!(report["sealed"], true);

    let status = json_body(send(&state, "GET", "/admin/guard", None).await).await;
    assert_eq!(status["state"], "fingerprint_required");
  }

  #[tokio::test]
  async fn advancing_over_legacy_duplicates_is_409() {
    let store = SqliteStore::open_in_memory_with(OpenOptions {
      guard: GuardState::NoFingerprint,
      ..Default::default()
    })
    .await
    .unwrap();
    let c = store.create_conversation(None).await.unwrap();
    let msg = NewMessage::new(c.conversation_id, Role::User, "twice")
      .at("2024-03-01T10:00:00Z".parse().unwrap());
    store.submit(msg.clone()).await.unwrap();
    store.submit(msg).await.unwrap();
    let state = AppState::new(Arc::new(store));

    let resp = send(&state, "POST", "/admin/guard", Some(json!({ "state": "migrating" }))).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert!(json_body(resp).await["error"].as_str().unwrap().contains("resolve them"));

    let status = json_body(send(&state, "GET", "/admin/guard", None).await).await;
    assert_eq!(status["state"], "no_fingerprint");
  }

  #[tokio::test]
  async fn backfill_rejects_zero_batch_size() {
    let state = make_state().await;
    let resp = send(&state, "POST", "/admin/backfill", Some(json!({ "batch_size": 0 }))).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
  }
}
