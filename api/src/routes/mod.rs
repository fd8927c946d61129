mod auth;
mod chat;
mod courses;
mod events;
mod match_requests;
mod notes;
mod notification;
mod partners;
mod safety;
mod user;

use std::collections::HashMap;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::AppState;
use crate::db;
use crate::db::models::UserRow;
use crate::error::AppError;
use crate::realtime::{EventKind, RealtimeEvent};
use crate::types::UserId;

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .merge(auth::routes())
        .merge(user::routes())
        .merge(courses::routes())
        .merge(match_requests::routes())
        .merge(partners::routes())
        .merge(chat::routes())
        .merge(notes::routes())
        .merge(safety::routes())
        .merge(events::routes())
        .merge(notification::routes())
        .merge(notification::public_routes());

    Router::new()
        .nest("/v1", api)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Publishes a realtime event and sends the matching push notification to
/// `push_to` in the background.
pub(crate) fn notify(
    state: &AppState,
    kind: EventKind,
    recipients: &[&str],
    push_to: Vec<UserId>,
    payload: serde_json::Value,
) {
    state
        .events
        .publish(RealtimeEvent::new(kind, recipients, payload.clone()));
    if push_to.is_empty() {
        return;
    }
    let pool = state.pool.clone();
    let config = state.config.clone();
    tokio::spawn(async move {
        let mut payload = payload;
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("type".into(), kind.as_str().into());
        }
        if let Err(e) = crate::push::send_event_to_users(&pool, &config, &push_to, &payload).await
        {
            tracing::warn!("push notification failed: {e}");
        }
    });
}

/// Public profiles keyed by user id. Unknown ids are skipped.
pub(crate) async fn profiles(
    pool: &db::Db,
    ids: impl IntoIterator<Item = String>,
) -> Result<HashMap<String, serde_json::Value>, AppError> {
    let mut ids: Vec<String> = ids.into_iter().collect();
    ids.sort();
    ids.dedup();
    let users = db::users::get_users(pool, &ids).await?;
    Ok(users
        .iter()
        .map(|u: &UserRow| (u.id.clone(), u.public_profile()))
        .collect())
}

/// Payload size limits for uploads.
pub(crate) const MAX_PHOTO_SIZE: usize = 5 * 1024 * 1024;
pub(crate) const MAX_NOTE_SIZE: usize = 20 * 1024 * 1024;

/// In-memory app for driving the router in handler tests.
#[cfg(all(test, not(feature = "postgres")))]
pub(crate) mod testing {
    use std::sync::Arc;

    use axum::Router;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::AppState;
    use crate::catalog::CatalogClient;
    use crate::config::{AppConfig, CatalogConfig};
    use crate::db::{fixtures, test_pool};
    use crate::realtime::EventHub;
    use crate::storage::S3Storage;
    use crate::types::UserId;

    pub struct TestApp {
        pub state: AppState,
    }

    impl TestApp {
        pub async fn new() -> Self {
            // nothing listens on the endpoints; handlers under test never reach them
            let config = AppConfig {
                database_url: "sqlite::memory:".into(),
                listen_addr: "127.0.0.1:0".into(),
                s3_bucket: "studybuddy-test".into(),
                s3_endpoint: Some("http://127.0.0.1:9".into()),
                s3_region: "us-east-1".into(),
                vapid_public_key: None,
                vapid_private_key: None,
                session_ttl_hours: 1,
                allowed_email_domain: None,
                catalog: CatalogConfig {
                    url: "http://127.0.0.1:9/catalog".into(),
                    institution: "UVA01".into(),
                    term: "1248".into(),
                    max_pages: 1,
                    refresh_hours: 24,
                },
            };
            let state = AppState {
                pool: test_pool().await,
                storage: Arc::new(S3Storage::new(&config).await),
                events: EventHub::default(),
                catalog: CatalogClient::new(config.catalog.clone()),
                config,
            };
            Self { state }
        }

        pub fn router(&self) -> Router {
            super::build_router(self.state.clone())
        }

        /// Creates a user with a live session and returns its bearer token.
        pub async fn user(&self, id: &str, courses: &[&str]) -> (UserId, String) {
            let user_id = fixtures::user(&self.state.pool, id, courses).await;
            let token = crate::auth::start_session(&self.state.pool, &user_id, 1)
                .await
                .unwrap();
            (user_id, token)
        }

        pub async fn send(
            &self,
            method: Method,
            uri: &str,
            token: &str,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let req = Request::builder()
                .method(method)
                .uri(uri)
                .header("authorization", format!("Bearer {token}"));
            let req = match body {
                Some(body) => req
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string())),
                None => req.body(Body::empty()),
            }
            .unwrap();
            let resp = self.router().oneshot(req).await.unwrap();
            let status = resp.status();
            let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
                .await
                .unwrap();
            (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
        }

        pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
            self.send(Method::GET, uri, token, None).await
        }

        pub async fn post(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
            self.send(Method::POST, uri, token, Some(body)).await
        }

        pub async fn delete(&self, uri: &str, token: &str) -> (StatusCode, Value) {
            self.send(Method::DELETE, uri, token, None).await
        }
    }

    /// Ids of the `requests` array in a listing response.
    pub fn request_ids(body: &Value) -> Vec<String> {
        body["requests"]
            .as_array()
            .map(|rows| {
                rows.iter()
                    .filter_map(|r| r["id"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}
