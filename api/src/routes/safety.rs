use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use super::profiles;
use crate::AppState;
use crate::auth::AuthenticatedUser;
use crate::db;
use crate::error::AppError;
use crate::types::{ReportId, UserId};

const MAX_REASON_CHARS: usize = 1000;
/// Report count at which a user is flagged in the logs for review.
const REVIEW_THRESHOLD: i64 = 3;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/blocks", get(list_blocks))
        .route("/blocks/{user_id}", post(block_user).delete(unblock_user))
        .route("/reports", post(report_user))
}

async fn ensure_other_user(
    pool: &db::Db,
    me: &UserId,
    target: &UserId,
) -> Result<(), AppError> {
    if me == target {
        return Err(AppError::BadRequest("cannot target yourself".into()));
    }
    if db::users::get_user(pool, target).await?.is_none() {
        return Err(AppError::NotFound("user not found".into()));
    }
    Ok(())
}

async fn list_blocks(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let rows = db::blocks::list_blocked(&state.pool, &auth.user_id).await?;
    let profiles = profiles(&state.pool, rows.iter().map(|b| b.blocked_id.clone())).await?;
    let blocks: Vec<_> = rows
        .iter()
        .map(|b| {
            serde_json::json!({
                "user_id": b.blocked_id,
                "user": profiles.get(&b.blocked_id),
                "created_at": b.created_at,
            })
        })
        .collect();
    Ok(Json(serde_json::json!({ "blocks": blocks })))
}

/// Blocking hides both users from each other's open requests, profiles and
/// notes, and stops messages between them. Partnerships are kept.
async fn block_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    auth: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let target = UserId(user_id);
    ensure_other_user(&state.pool, &auth.user_id, &target).await?;
    let created = db::blocks::block(&state.pool, &auth.user_id, &target).await?;
    if created {
        tracing::info!(blocker = %auth.user_id, blocked = %target, "user blocked");
    }
    Ok(Json(serde_json::json!({ "blocked": true })))
}

async fn unblock_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    auth: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let target = UserId(user_id);
    let removed = db::blocks::unblock(&state.pool, &auth.user_id, &target).await?;
    Ok(Json(serde_json::json!({ "unblocked": removed })))
}

#[derive(Deserialize)]
struct ReportBody {
    user_id: String,
    reason: String,
    /// Also block the reported user.
    #[serde(default)]
    block: bool,
}

async fn report_user(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Json(body): Json<ReportBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let target = UserId(body.user_id);
    ensure_other_user(&state.pool, &auth.user_id, &target).await?;
    let reason = body.reason.trim();
    if reason.is_empty() {
        return Err(AppError::BadRequest("reason must not be empty".into()));
    }
    if reason.chars().count() > MAX_REASON_CHARS {
        return Err(AppError::BadRequest(format!(
            "reason must be at most {MAX_REASON_CHARS} characters"
        )));
    }

    let id = ReportId::new_v4();
    db::reports::create_report(&state.pool, &id, &auth.user_id, &target, reason).await?;
    if body.block {
        db::blocks::block(&state.pool, &auth.user_id, &target).await?;
    }

    let total = db::reports::count_reports_against(&state.pool, &target).await?;
    if total >= REVIEW_THRESHOLD {
        tracing::warn!(reported = %target, total, "user has reached the report review threshold");
    } else {
        tracing::info!(report_id = %id, reported = %target, "user reported");
    }

    Ok(Json(serde_json::json!({
        "id": id,
        "reported": true,
        "blocked": body.block,
    })))
}
