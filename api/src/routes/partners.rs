use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use studybuddy_common::partner::{ConsentState, check_member, consent_state};

use super::{notify, profiles};
use crate::AppState;
use crate::auth::AuthenticatedUser;
use crate::db;
use crate::db::models::PartnerRow;
use crate::error::AppError;
use crate::realtime::{EventKind, RealtimeEvent};
use crate::types::{PartnerId, UserId};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/partners", get(list_partners))
        .route(
            "/partners/{id}/delete-request",
            post(request_partner_delete).delete(withdraw_partner_delete),
        )
}

async fn load_partner(
    pool: &db::Db,
    id: &PartnerId,
    user_id: &UserId,
) -> Result<PartnerRow, AppError> {
    let partner = db::partners::get_partner(pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("partner not found".into()))?;
    // outsiders get the same answer as for a missing row
    check_member(&partner.key(), user_id.as_str())
        .map_err(|_| AppError::NotFound("partner not found".into()))?;
    Ok(partner)
}

async fn list_partners(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let me = auth.user_id.as_str();
    let (rows, requests) = tokio::try_join!(
        db::partners::list_partners(&state.pool, &auth.user_id),
        db::partners::delete_requests_for_user(&state.pool, &auth.user_id),
    )?;
    let profiles = profiles(&state.pool, rows.iter().map(|p| p.other(me).to_string())).await?;

    let partners: Vec<_> = rows
        .iter()
        .map(|p| {
            let requested_by = requests.get(&p.id).cloned().unwrap_or_default();
            serde_json::json!({
                "id": p.id,
                "course": p.course,
                "partner": profiles.get(p.other(me)),
                "delete_requested_by_me": requested_by.iter().any(|u| u == me),
                "delete_requested_by": requested_by,
                "created_at": p.created_at,
            })
        })
        .collect();
    Ok(Json(serde_json::json!({ "partners": partners })))
}

/// Records the user's wish to end a partnership. The partnership is removed
/// once both partners have asked.
async fn request_partner_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
    auth: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = PartnerId(id);
    let partner = load_partner(&state.pool, &id, &auth.user_id).await?;
    let key = partner.key();
    let other = UserId(partner.other(auth.user_id.as_str()).to_string());

    let requested_by =
        db::partners::record_delete_request(&state.pool, &id, &auth.user_id).await?;

    let body = match consent_state(&key, &requested_by) {
        ConsentState::Pending => serde_json::json!({
            "event": "delete_requested",
            "partner_id": id,
            "course": key.course,
            "status": "pending",
            "requested_by": auth.user_id,
        }),
        ConsentState::Complete => {
            let Some(chat_deleted) = db::partners::delete_partner(&state.pool, &partner).await?
            else {
                // the other partner's request already removed it
                return Ok(Json(serde_json::json!({
                    "partner_id": id,
                    "course": key.course,
                    "status": "deleted",
                })));
            };
            tracing::info!(partner_id = %id, chat_deleted, "partnership removed");
            serde_json::json!({
                "event": "deleted",
                "partner_id": id,
                "course": key.course,
                "status": "deleted",
                "chat_deleted": chat_deleted,
            })
        }
    };

    notify(
        &state,
        EventKind::Partner,
        &[key.user_a.as_str(), key.user_b.as_str()],
        vec![other],
        body.clone(),
    );
    Ok(Json(body))
}

async fn withdraw_partner_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
    auth: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = PartnerId(id);
    let partner = load_partner(&state.pool, &id, &auth.user_id).await?;
    let key = partner.key();

    let withdrawn =
        db::partners::withdraw_delete_request(&state.pool, &id, &auth.user_id).await?;
    if withdrawn {
        state.events.publish(RealtimeEvent::new(
            EventKind::Partner,
            &[key.user_a.as_str(), key.user_b.as_str()],
            serde_json::json!({
                "event": "delete_withdrawn",
                "partner_id": id,
                "course": key.course,
            }),
        ));
    }
    Ok(Json(serde_json::json!({ "withdrawn": withdrawn })))
}
