use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::AppState;
use crate::auth::AuthenticatedUser;
use crate::catalog;
use crate::db;
use crate::error::AppError;

const DEFAULT_LIMIT: i64 = 20;
const MAX_LIMIT: i64 = 100;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/courses", get(search_courses))
        .route("/courses/refresh", post(refresh_courses))
}

#[derive(Deserialize)]
struct CourseQuery {
    #[serde(default)]
    q: String,
    limit: Option<i64>,
}

async fn search_courses(
    State(state): State<AppState>,
    Query(query): Query<CourseQuery>,
    _auth: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let courses = db::courses::search_courses(&state.pool, &query.q, limit).await?;
    Ok(Json(serde_json::json!({ "courses": courses })))
}

async fn refresh_courses(
    State(state): State<AppState>,
    _auth: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let fetched = catalog::refresh(&state.pool, &state.catalog).await?;
    let total = db::courses::count_courses(&state.pool).await?;
    Ok(Json(serde_json::json!({ "fetched": fetched, "total": total })))
}
