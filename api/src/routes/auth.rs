use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use crate::AppState;
use crate::auth::{self, AuthenticatedUser};
use crate::db;
use crate::error::AppError;
use crate::types::{Email, UserId};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
}

#[derive(Deserialize)]
struct RegisterBody {
    email: String,
    password: String,
    #[serde(default)]
    name: String,
}

async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let email = Email::parse(&body.email, state.config.allowed_email_domain.as_deref())
        .map_err(AppError::BadRequest)?;
    auth::validate_password(&body.password)?;

    if db::users::get_user_by_email(&state.pool, email.as_str())
        .await?
        .is_some()
    {
        return Err(AppError::Conflict("email already registered".into()));
    }

    let name = match body.name.trim() {
        "" => email.local_part().to_string(),
        name => name.to_string(),
    };
    let password_hash = auth::hash_password(&body.password)?;
    let user_id = UserId::new_v4();
    db::users::create_user(
        &state.pool,
        &user_id,
        email.as_str(),
        email.local_part(),
        &password_hash,
        &name,
    )
    .await
    .map_err(|e| {
        if e.as_database_error()
            .is_some_and(|db_err| db_err.is_unique_violation())
        {
            AppError::Conflict("email already registered".into())
        } else {
            AppError::from(e)
        }
    })?;
    tracing::info!(user_id = %user_id, "user registered");

    let token = auth::start_session(&state.pool, &user_id, state.config.session_ttl_hours).await?;
    let user = db::users::get_user(&state.pool, &user_id)
        .await?
        .ok_or_else(|| AppError::Internal("registered user disappeared".into()))?;
    Ok(Json(serde_json::json!({ "token": token, "user": user })))
}

#[derive(Deserialize)]
struct LoginBody {
    email: String,
    password: String,
}

async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let invalid = || AppError::Unauthorized("invalid email or password".into());
    let email = Email::parse(&body.email, None).map_err(|_| invalid())?;
    let user = db::users::get_user_by_email(&state.pool, email.as_str())
        .await?
        .ok_or_else(invalid)?;
    if !auth::verify_password(&body.password, &user.password_hash) {
        return Err(invalid());
    }

    let user_id = UserId(user.id.clone());
    let token = auth::start_session(&state.pool, &user_id, state.config.session_ttl_hours).await?;
    Ok(Json(serde_json::json!({ "token": token, "user": user })))
}

async fn logout(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, AppError> {
    db::sessions::delete_session(&state.pool, &auth.token_hash).await?;
    Ok(Json(serde_json::json!({ "logged_out": true })))
}
