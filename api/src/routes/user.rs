use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use studybuddy_common::catalog::normalize_course_code;

use super::MAX_PHOTO_SIZE;
use crate::AppState;
use crate::auth::AuthenticatedUser;
use crate::db;
use crate::db::users::ProfileUpdate;
use crate::error::AppError;
use crate::storage;
use crate::types::UserId;

const MAX_BIO_CHARS: usize = 1000;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(get_me).delete(delete_me))
        .route("/users", get(search_users))
        .route(
            "/user/{id}/profile",
            get(get_profile).post(update_profile),
        )
        .route(
            "/user/{id}/photo",
            get(get_photo)
                .post(upload_photo)
                .layer(DefaultBodyLimit::max(MAX_PHOTO_SIZE + 1024 * 1024)),
        )
}

async fn get_me(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let user = db::users::get_user(&state.pool, &auth.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".into()))?;
    let photo_url = user.photo_url();
    let mut body = serde_json::to_value(&user)
        .map_err(|e| AppError::Internal(format!("failed to encode user: {e}")))?;
    if let Some(obj) = body.as_object_mut() {
        obj.insert("photo_url".into(), serde_json::json!(photo_url));
    }
    Ok(Json(body))
}

/// Deletes the account. Rows owned by the user cascade; stored objects are
/// removed best-effort.
async fn delete_me(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let user = db::users::get_user(&state.pool, &auth.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".into()))?;
    let notes = db::notes::list_notes_by_author(&state.pool, &auth.user_id).await?;

    db::users::delete_user(&state.pool, &auth.user_id).await?;
    tracing::info!(user_id = %auth.user_id, "user deleted");

    let mut keys: Vec<String> = notes.into_iter().map(|n| n.media_key).collect();
    keys.extend(user.photo_key);
    let storage = state.storage.clone();
    tokio::spawn(async move {
        for key in keys {
            if let Err(e) = storage.remove(&key).await {
                tracing::warn!("failed to delete object {key}: {e}");
            }
        }
    });

    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[derive(Deserialize)]
struct SearchQuery {
    course: String,
}

/// Classmates for a course, for sending direct match requests.
async fn search_users(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
    auth: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let course = normalize_course_code(&query.course)?;
    let (users, hidden) = tokio::try_join!(
        db::users::search_users_by_course(&state.pool, &course, &auth.user_id),
        db::blocks::hidden_users(&state.pool, &auth.user_id),
    )?;
    let users: Vec<_> = users
        .iter()
        .filter(|u| !hidden.contains(&u.id))
        .map(|u| u.public_profile())
        .collect();
    Ok(Json(serde_json::json!({ "users": users })))
}

async fn get_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
    auth: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let user_id = UserId(id);
    if user_id != auth.user_id
        && db::blocks::is_blocked_between(&state.pool, &auth.user_id, &user_id).await?
    {
        return Err(AppError::NotFound("user not found".into()));
    }
    let user = db::users::get_user(&state.pool, &user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".into()))?;
    let mut body = user.public_profile();
    if user_id != auth.user_id {
        let (is_partner, chat) = tokio::try_join!(
            db::partners::is_partner(&state.pool, &auth.user_id, &user_id),
            db::chat::get_chat_between(&state.pool, &auth.user_id, &user_id),
        )?;
        if let Some(obj) = body.as_object_mut() {
            obj.insert("is_partner".into(), is_partner.into());
            obj.insert("chat_id".into(), serde_json::json!(chat.map(|c| c.id)));
        }
    }
    Ok(Json(body))
}

#[derive(Deserialize)]
struct UpdateProfileBody {
    name: Option<String>,
    bio: Option<String>,
    courses: Option<Vec<String>>,
    study_times: Option<Vec<String>>,
    meeting_preference: Option<String>,
    selected_avatar: Option<String>,
}

fn normalize_courses(courses: Vec<String>) -> Result<Vec<String>, AppError> {
    let mut normalized = Vec::with_capacity(courses.len());
    for course in courses {
        let code = normalize_course_code(&course)?;
        if !normalized.contains(&code) {
            normalized.push(code);
        }
    }
    Ok(normalized)
}

async fn update_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
    auth: AuthenticatedUser,
    Json(body): Json<UpdateProfileBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let user_id = UserId(id);
    if auth.user_id != user_id {
        return Err(AppError::Forbidden("can only update own profile".into()));
    }

    let name = body.name.map(|n| n.trim().to_string());
    if name.as_deref().is_some_and(str::is_empty) {
        return Err(AppError::BadRequest("name must not be empty".into()));
    }
    if body
        .bio
        .as_deref()
        .is_some_and(|b| b.chars().count() > MAX_BIO_CHARS)
    {
        return Err(AppError::BadRequest(format!(
            "bio must be at most {MAX_BIO_CHARS} characters"
        )));
    }
    let courses = body.courses.map(normalize_courses).transpose()?;

    db::users::update_profile(
        &state.pool,
        &user_id,
        ProfileUpdate {
            name,
            bio: body.bio,
            courses,
            study_times: body.study_times,
            meeting_preference: body.meeting_preference,
            selected_avatar: body.selected_avatar,
        },
    )
    .await?;

    let user = db::users::get_user(&state.pool, &user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".into()))?;
    Ok(Json(user.public_profile()))
}

async fn upload_photo(
    State(state): State<AppState>,
    Path(id): Path<String>,
    auth: AuthenticatedUser,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, AppError> {
    let user_id = UserId(id);
    if auth.user_id != user_id {
        return Err(AppError::Forbidden("can only update own photo".into()));
    }

    let field = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("multipart error: {e}")))?
        .ok_or_else(|| AppError::BadRequest("no file field".into()))?;

    let content_type = field.content_type().unwrap_or("image/jpeg").to_string();
    if !content_type.starts_with("image/") {
        return Err(AppError::BadRequest("photo must be an image".into()));
    }
    let data = field
        .bytes()
        .await
        .map_err(|e| AppError::BadRequest(format!("failed to read file: {e}")))?;
    if data.len() > MAX_PHOTO_SIZE {
        return Err(AppError::PayloadTooLarge(
            "photo must be 5 MB or smaller".into(),
        ));
    }

    let key = storage::photo_key(user_id.as_str());
    state
        .storage
        .upload(&key, data.to_vec(), &content_type)
        .await?;
    db::users::set_photo_key(&state.pool, &user_id, &key).await?;

    Ok(Json(serde_json::json!({
        "uploaded": true,
        "photo_url": format!("/v1/user/{user_id}/photo"),
    })))
}

/// Streams the profile photo. Public so it can back an `<img>` tag.
async fn get_photo(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let user_id = UserId(id);
    let key = db::users::get_user(&state.pool, &user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".into()))?
        .photo_key
        .ok_or_else(|| AppError::NotFound("no photo set".into()))?;

    let photo = state.storage.download(&key).await?;

    Ok((
        [
            (
                header::CONTENT_TYPE,
                photo.content_type.unwrap_or_else(|| "image/jpeg".into()),
            ),
            (header::CACHE_CONTROL, "public, max-age=3600".into()),
        ],
        photo.data,
    )
        .into_response())
}
