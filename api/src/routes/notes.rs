use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::Query;
use serde::Deserialize;
use studybuddy_common::catalog::normalize_course_code;

use super::MAX_NOTE_SIZE;
use crate::AppState;
use crate::auth::AuthenticatedUser;
use crate::db;
use crate::db::models::NoteRow;
use crate::db::notes::NewNote;
use crate::error::AppError;
use crate::storage;
use crate::types::{NoteId, UserId};

const MAX_TITLE_CHARS: usize = 200;
const RATING_RANGE: std::ops::RangeInclusive<i64> = 1..=5;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/notes",
            get(list_notes)
                .post(upload_note)
                .layer(DefaultBodyLimit::max(MAX_NOTE_SIZE + 1024 * 1024)),
        )
        .route("/notes/mine", get(list_my_notes))
        .route("/notes/{id}", get(get_note).delete(delete_note))
        .route("/notes/{id}/media", get(download_note))
        .route("/notes/{id}/rating", post(rate_note))
}

fn note_json(note: &NoteRow) -> serde_json::Value {
    let mut body = serde_json::json!(note);
    if let Some(obj) = body.as_object_mut() {
        obj.insert("media_url".into(), note.media_url().into());
    }
    body
}

/// Loads a note unless its author and the viewer have blocked each other.
async fn load_note(pool: &db::Db, id: &NoteId, viewer: &UserId) -> Result<NoteRow, AppError> {
    let not_found = || AppError::NotFound("note not found".into());
    let note = db::notes::get_note(pool, id).await?.ok_or_else(not_found)?;
    let author = UserId(note.author_id.clone());
    if author != *viewer && db::blocks::is_blocked_between(pool, viewer, &author).await? {
        return Err(not_found());
    }
    Ok(note)
}

#[derive(Deserialize)]
struct NotesQuery {
    /// Repeatable: `?course=CS%202100&course=MATH%203351`.
    #[serde(default)]
    course: Vec<String>,
}

/// Notes for the requested courses, or for the user's own courses when none
/// are given.
async fn list_notes(
    State(state): State<AppState>,
    Query(query): Query<NotesQuery>,
    auth: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let courses = if query.course.is_empty() {
        db::users::get_user(&state.pool, &auth.user_id)
            .await?
            .map(|u| u.courses.0)
            .unwrap_or_default()
    } else {
        query
            .course
            .iter()
            .map(|c| normalize_course_code(c))
            .collect::<Result<Vec<_>, _>>()?
    };

    let (notes, hidden) = tokio::try_join!(
        db::notes::list_notes(&state.pool, &courses),
        db::blocks::hidden_users(&state.pool, &auth.user_id),
    )?;
    let notes: Vec<_> = notes
        .iter()
        .filter(|n| !hidden.contains(&n.author_id))
        .map(note_json)
        .collect();
    Ok(Json(serde_json::json!({ "notes": notes })))
}

async fn list_my_notes(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let notes = db::notes::list_notes_by_author(&state.pool, &auth.user_id).await?;
    let notes: Vec<_> = notes.iter().map(note_json).collect();
    Ok(Json(serde_json::json!({ "notes": notes })))
}

/// Uploads a note (multipart: `title`, `course`, `file`).
async fn upload_note(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, AppError> {
    let mut title = None;
    let mut course = None;
    let mut file = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("multipart error: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "title" | "course" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("failed to read {name}: {e}")))?;
                if name == "title" {
                    title = Some(value);
                } else {
                    course = Some(value);
                }
            }
            "file" => {
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("failed to read file: {e}")))?;
                file = Some((data, content_type));
            }
            _ => {}
        }
    }

    let title = title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::BadRequest("title is required".into()))?;
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(AppError::BadRequest(format!(
            "title must be at most {MAX_TITLE_CHARS} characters"
        )));
    }
    let course = normalize_course_code(
        course
            .as_deref()
            .ok_or_else(|| AppError::BadRequest("course is required".into()))?,
    )?;
    let (data, content_type) =
        file.ok_or_else(|| AppError::BadRequest("no file field".into()))?;
    if data.is_empty() {
        return Err(AppError::BadRequest("file is empty".into()));
    }
    if data.len() > MAX_NOTE_SIZE {
        return Err(AppError::PayloadTooLarge(
            "note must be 20 MB or smaller".into(),
        ));
    }

    let id = NoteId::new_v4();
    let key = storage::note_key(id.as_str());
    let size = data.len() as i64;
    state
        .storage
        .upload(&key, data.to_vec(), &content_type)
        .await?;

    let created = db::notes::create_note(
        &state.pool,
        &id,
        NewNote {
            author_id: &auth.user_id,
            title: &title,
            course: &course,
            media_key: &key,
            content_type: &content_type,
            size,
        },
    )
    .await;
    if let Err(e) = created {
        if let Err(cleanup) = state.storage.remove(&key).await {
            tracing::warn!("failed to remove orphaned note object {key}: {cleanup}");
        }
        return Err(e.into());
    }
    tracing::info!(note_id = %id, course = %course, size, "note uploaded");

    let note = db::notes::get_note(&state.pool, &id)
        .await?
        .ok_or_else(|| AppError::Internal("uploaded note disappeared".into()))?;
    Ok(Json(note_json(&note)))
}

async fn get_note(
    State(state): State<AppState>,
    Path(id): Path<String>,
    auth: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let note = load_note(&state.pool, &NoteId(id), &auth.user_id).await?;
    Ok(Json(note_json(&note)))
}

async fn delete_note(
    State(state): State<AppState>,
    Path(id): Path<String>,
    auth: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = NoteId(id);
    let note = load_note(&state.pool, &id, &auth.user_id).await?;
    if note.author_id != auth.user_id.as_str() {
        return Err(AppError::Forbidden("can only delete own notes".into()));
    }

    db::notes::delete_note(&state.pool, &id).await?;
    if let Err(e) = state.storage.remove(&note.media_key).await {
        tracing::warn!("failed to delete note object {}: {e}", note.media_key);
    }
    Ok(Json(serde_json::json!({ "deleted": true })))
}

async fn download_note(
    State(state): State<AppState>,
    Path(id): Path<String>,
    auth: AuthenticatedUser,
) -> Result<Response, AppError> {
    let note = load_note(&state.pool, &NoteId(id), &auth.user_id).await?;
    let file = state.storage.download(&note.media_key).await?;

    Ok(([(header::CONTENT_TYPE, note.content_type)], file.data).into_response())
}

#[derive(Deserialize)]
struct RateBody {
    rating: i64,
}

async fn rate_note(
    State(state): State<AppState>,
    Path(id): Path<String>,
    auth: AuthenticatedUser,
    Json(body): Json<RateBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = NoteId(id);
    if !RATING_RANGE.contains(&body.rating) {
        return Err(AppError::BadRequest(format!(
            "rating must be between {} and {}",
            RATING_RANGE.start(),
            RATING_RANGE.end()
        )));
    }
    let note = load_note(&state.pool, &id, &auth.user_id).await?;
    if note.author_id == auth.user_id.as_str() {
        return Err(AppError::Forbidden("cannot rate your own note".into()));
    }

    let (rating, rating_count) =
        db::notes::rate_note(&state.pool, &id, &auth.user_id, body.rating).await?;
    Ok(Json(serde_json::json!({
        "rating": rating,
        "rating_count": rating_count,
    })))
}
