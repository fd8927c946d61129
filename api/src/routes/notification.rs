use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::AppState;
use crate::auth::AuthenticatedUser;
use crate::db;
use crate::error::AppError;
use crate::types::SubscriptionId;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/notification/subscribe", post(subscribe))
        .route("/notification/unsubscribe", post(unsubscribe))
}

/// Needed by the browser before it can subscribe, so no auth.
pub fn public_routes() -> Router<AppState> {
    Router::new().route("/notification/public-key", get(get_public_key))
}

async fn get_public_key(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let key = state
        .config
        .vapid_public_key
        .as_ref()
        .ok_or_else(|| AppError::NotFound("push notifications are not configured".into()))?;
    Ok(Json(serde_json::json!({ "key": key })))
}

#[derive(Deserialize)]
struct SubscribeBody {
    endpoint: String,
    keys: SubscribeKeys,
}

#[derive(Deserialize)]
struct SubscribeKeys {
    p256dh: String,
    auth: String,
}

async fn subscribe(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Json(body): Json<SubscribeBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    if !body.endpoint.starts_with("https://") {
        return Err(AppError::BadRequest(
            "push endpoint must be an https URL".into(),
        ));
    }
    db::push::upsert_subscription(
        &state.pool,
        &SubscriptionId::new_v4(),
        &auth.user_id,
        &body.endpoint,
        &body.keys.p256dh,
        &body.keys.auth,
    )
    .await?;

    Ok(Json(serde_json::json!({ "subscribed": true })))
}

#[derive(Deserialize)]
struct UnsubscribeBody {
    endpoint: String,
}

async fn unsubscribe(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Json(body): Json<UnsubscribeBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let removed = db::push::delete_subscription(&state.pool, &auth.user_id, &body.endpoint).await?;
    Ok(Json(serde_json::json!({ "unsubscribed": removed })))
}
