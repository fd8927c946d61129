use std::collections::{HashMap, HashSet};

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use studybuddy_common::catalog::normalize_course_code;
use studybuddy_common::matching::{
    MatchStatus, PartnerKey, check_apply, check_respond, filter_open_requests, responder_for,
};

use super::{notify, profiles};
use crate::AppState;
use crate::auth::AuthenticatedUser;
use crate::db;
use crate::db::matching::NewMatchRequest;
use crate::db::models::MatchRequestRow;
use crate::error::AppError;
use crate::realtime::EventKind;
use crate::types::{MatchRequestId, UserId};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/match-requests", get(list_sent).post(create_request))
        .route("/match-requests/open", get(list_open))
        .route("/match-requests/incoming", get(list_incoming))
        .route("/match-requests/applied", get(list_applied))
        .route("/match-requests/{id}", delete(delete_request))
        .route("/match-requests/{id}/apply", post(apply))
        .route("/match-requests/{id}/accept", post(accept))
        .route("/match-requests/{id}/reject", post(reject))
}

fn request_json(
    row: &MatchRequestRow,
    profiles: &HashMap<String, serde_json::Value>,
) -> serde_json::Value {
    let mut body = serde_json::json!(row);
    if let Some(obj) = body.as_object_mut() {
        obj.insert(
            "sender".into(),
            profiles
                .get(&row.sender_id)
                .cloned()
                .unwrap_or(serde_json::Value::Null),
        );
        obj.insert(
            "receiver".into(),
            row.receiver_id
                .as_ref()
                .and_then(|id| profiles.get(id))
                .cloned()
                .unwrap_or(serde_json::Value::Null),
        );
    }
    body
}

async fn load_request(pool: &db::Db, id: &MatchRequestId) -> Result<MatchRequestRow, AppError> {
    db::matching::get_request(pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("match request not found".into()))
}

/// Rejects codes missing from the catalog cache. Until the first catalog
/// refresh the cache is empty and every well-formed code passes.
async fn check_known_course(pool: &db::Db, course: &str) -> Result<(), AppError> {
    if db::courses::count_courses(pool).await? > 0
        && !db::courses::course_exists(pool, course).await?
    {
        return Err(AppError::BadRequest(format!("unknown course {course}")));
    }
    Ok(())
}

#[derive(Deserialize)]
struct CreateRequestBody {
    course: String,
    /// Present for a direct request to a specific classmate.
    receiver_id: Option<String>,
    study_time: Option<String>,
    meeting_preference: Option<String>,
    bio: Option<String>,
}

/// Posts a match request. Unset details fall back to the sender's profile.
async fn create_request(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Json(body): Json<CreateRequestBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let course = normalize_course_code(&body.course)?;
    check_known_course(&state.pool, &course).await?;
    let sender = db::users::get_user(&state.pool, &auth.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".into()))?;
    let receiver = body.receiver_id.map(UserId);

    match &receiver {
        Some(receiver) => {
            let key = PartnerKey::new(auth.user_id.as_str(), receiver.as_str(), &course)?;
            if db::users::get_user(&state.pool, receiver).await?.is_none() {
                return Err(AppError::NotFound("user not found".into()));
            }
            if db::blocks::is_blocked_between(&state.pool, &auth.user_id, receiver).await? {
                return Err(AppError::Forbidden(
                    "cannot send a match request to this user".into(),
                ));
            }
            if db::partners::partner_keys(&state.pool, &auth.user_id)
                .await?
                .contains(&key)
            {
                return Err(AppError::Conflict(format!(
                    "already study partners for {course}"
                )));
            }
            if db::matching::has_pending_direct(&state.pool, &auth.user_id, receiver, &course)
                .await?
            {
                return Err(AppError::Conflict(format!(
                    "you already asked this user to study {course}"
                )));
            }
        }
        None => {
            if db::matching::has_open_request(&state.pool, &auth.user_id, &course).await? {
                return Err(AppError::Conflict(format!(
                    "you already have an open request for {course}"
                )));
            }
        }
    }

    let study_time = body
        .study_time
        .unwrap_or_else(|| sender.study_times.0.join(", "));
    let meeting_preference = body
        .meeting_preference
        .unwrap_or_else(|| sender.meeting_preference.clone());
    let bio = body.bio.unwrap_or_else(|| sender.bio.clone());

    let id = MatchRequestId::new_v4();
    db::matching::create_request(
        &state.pool,
        &id,
        NewMatchRequest {
            sender_id: &auth.user_id,
            receiver_id: receiver.as_ref(),
            course: &course,
            study_time: &study_time,
            meeting_preference: &meeting_preference,
            bio: &bio,
        },
    )
    .await?;
    let row = load_request(&state.pool, &id).await?;
    tracing::info!(request_id = %id, course = %course, direct = row.is_direct, "match request created");

    if let Some(receiver) = receiver {
        notify(
            &state,
            EventKind::MatchRequest,
            &[receiver.as_str()],
            vec![receiver.clone()],
            serde_json::json!({
                "event": "created",
                "request_id": id,
                "course": course,
                "sender_id": auth.user_id,
                "sender_name": sender.name,
            }),
        );
    }

    Ok(Json(serde_json::json!(row)))
}

/// Requests the user has sent, newest first.
async fn list_sent(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let rows = db::matching::list_sent(&state.pool, &auth.user_id).await?;
    let profiles = profiles(&state.pool, rows.iter().filter_map(|r| r.receiver_id.clone())).await?;
    let requests: Vec<_> = rows.iter().map(|r| request_json(r, &profiles)).collect();
    Ok(Json(serde_json::json!({ "requests": requests })))
}

#[derive(Deserialize)]
struct OpenQuery {
    course: Option<String>,
}

/// Open requests the user could apply to.
async fn list_open(
    State(state): State<AppState>,
    Query(query): Query<OpenQuery>,
    auth: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let course = query
        .course
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .map(normalize_course_code)
        .transpose()?;

    let (rows, hidden, partnered) = tokio::try_join!(
        db::matching::list_open(&state.pool, course.as_deref()),
        db::blocks::hidden_users(&state.pool, &auth.user_id),
        db::partners::partner_keys(&state.pool, &auth.user_id),
    )?;

    let visible: HashSet<&str> = filter_open_requests(
        rows.iter().filter_map(|r| r.view().ok()),
        auth.user_id.as_str(),
        course.as_deref(),
        &hidden,
        &partnered,
    )
    .into_iter()
    .map(|v| v.id)
    .collect();
    let rows: Vec<&MatchRequestRow> = rows
        .iter()
        .filter(|r| visible.contains(r.id.as_str()))
        .collect();

    let profiles = profiles(&state.pool, rows.iter().map(|r| r.sender_id.clone())).await?;
    let requests: Vec<_> = rows.iter().map(|r| request_json(r, &profiles)).collect();
    Ok(Json(serde_json::json!({ "requests": requests })))
}

/// Pending requests waiting on this user's accept or reject.
async fn list_incoming(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let (rows, hidden) = tokio::try_join!(
        db::matching::list_pending_involving(&state.pool, &auth.user_id),
        db::blocks::hidden_users(&state.pool, &auth.user_id),
    )?;
    let me = auth.user_id.as_str();
    let rows: Vec<&MatchRequestRow> = rows
        .iter()
        .filter(|r| {
            r.view()
                .is_ok_and(|v| responder_for(&v) == Some(me))
        })
        .filter(|r| {
            let counterpart = if r.sender_id == me {
                r.receiver_id.as_deref().unwrap_or_default()
            } else {
                r.sender_id.as_str()
            };
            !hidden.contains(counterpart)
        })
        .collect();

    let ids: Vec<String> = rows
        .iter()
        .flat_map(|r| [Some(r.sender_id.clone()), r.receiver_id.clone()])
        .flatten()
        .collect();
    let profiles = profiles(&state.pool, ids).await?;
    let requests: Vec<_> = rows.iter().map(|r| request_json(r, &profiles)).collect();
    Ok(Json(serde_json::json!({ "requests": requests })))
}

/// Open requests the user applied to, with their status, so a pending or
/// rejected application stays visible to the applicant.
async fn list_applied(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let (rows, hidden) = tokio::try_join!(
        db::matching::list_applied(&state.pool, &auth.user_id),
        db::blocks::hidden_users(&state.pool, &auth.user_id),
    )?;
    let rows: Vec<&MatchRequestRow> = rows
        .iter()
        .filter(|r| !hidden.contains(&r.sender_id))
        .collect();
    let profiles = profiles(&state.pool, rows.iter().map(|r| r.sender_id.clone())).await?;
    let requests: Vec<_> = rows.iter().map(|r| request_json(r, &profiles)).collect();
    Ok(Json(serde_json::json!({ "requests": requests })))
}

/// Claims an open request; the sender then accepts or rejects.
async fn apply(
    State(state): State<AppState>,
    Path(id): Path<String>,
    auth: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = MatchRequestId(id);
    let row = load_request(&state.pool, &id).await?;
    let view = row.view()?;
    check_apply(&view, auth.user_id.as_str())?;

    let sender = UserId(row.sender_id.clone());
    if db::blocks::is_blocked_between(&state.pool, &auth.user_id, &sender).await? {
        return Err(AppError::NotFound("match request not found".into()));
    }
    let key = PartnerKey::new(auth.user_id.as_str(), &row.sender_id, &row.course)?;
    if db::partners::partner_keys(&state.pool, &auth.user_id)
        .await?
        .contains(&key)
    {
        return Err(AppError::Conflict(format!(
            "already study partners for {}",
            row.course
        )));
    }

    if !db::matching::apply(&state.pool, &id, &auth.user_id).await? {
        return Err(AppError::Conflict("match request is no longer open".into()));
    }

    notify(
        &state,
        EventKind::MatchRequest,
        &[sender.as_str()],
        vec![sender.clone()],
        serde_json::json!({
            "event": "applied",
            "request_id": id,
            "course": row.course,
            "applicant_id": auth.user_id,
        }),
    );

    let row = load_request(&state.pool, &id).await?;
    Ok(Json(serde_json::json!(row)))
}

async fn accept(
    State(state): State<AppState>,
    Path(id): Path<String>,
    auth: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = MatchRequestId(id);
    let row = load_request(&state.pool, &id).await?;
    let view = row.view()?;
    check_respond(&view, auth.user_id.as_str())?;

    let receiver = view
        .receiver_id
        .ok_or_else(|| AppError::Conflict("nobody has applied to this match request yet".into()))?;
    let key = PartnerKey::new(view.sender_id, receiver, view.course)?;
    let other = UserId(key.other(auth.user_id.as_str()).unwrap_or_default().to_string());
    if db::blocks::is_blocked_between(&state.pool, &auth.user_id, &other).await? {
        return Err(AppError::Forbidden(
            "cannot partner with a blocked user".into(),
        ));
    }

    let accepted = db::matching::accept_request(&state.pool, &id, &key)
        .await?
        .ok_or_else(|| AppError::Conflict("match request is no longer pending".into()))?;
    tracing::info!(
        request_id = %id,
        partner_id = %accepted.partner_id,
        chat_id = %accepted.chat_id,
        "match request accepted"
    );

    let body = serde_json::json!({
        "event": "accepted",
        "request_id": id,
        "partner_id": accepted.partner_id,
        "chat_id": accepted.chat_id,
        "course": key.course,
    });
    notify(
        &state,
        EventKind::Partner,
        &[key.user_a.as_str(), key.user_b.as_str()],
        vec![other],
        body.clone(),
    );

    Ok(Json(body))
}

async fn reject(
    State(state): State<AppState>,
    Path(id): Path<String>,
    auth: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = MatchRequestId(id);
    let row = load_request(&state.pool, &id).await?;
    let view = row.view()?;
    check_respond(&view, auth.user_id.as_str())?;

    if !db::matching::set_status(&state.pool, &id, MatchStatus::Rejected).await? {
        return Err(AppError::Conflict("match request is no longer pending".into()));
    }

    let counterpart = if row.sender_id == auth.user_id.as_str() {
        row.receiver_id.clone()
    } else {
        Some(row.sender_id.clone())
    };
    if let Some(counterpart) = counterpart {
        notify(
            &state,
            EventKind::MatchRequest,
            &[counterpart.as_str()],
            vec![UserId(counterpart.clone())],
            serde_json::json!({
                "event": "rejected",
                "request_id": id,
                "course": row.course,
            }),
        );
    }

    let row = load_request(&state.pool, &id).await?;
    Ok(Json(serde_json::json!(row)))
}

/// Withdraws a request the user sent.
async fn delete_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
    auth: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = MatchRequestId(id);
    if !db::matching::delete_request(&state.pool, &id, &auth.user_id).await? {
        return Err(AppError::NotFound("match request not found".into()));
    }
    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[cfg(all(test, not(feature = "postgres")))]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;
    use studybuddy_common::catalog::Course;

    use super::super::testing::{TestApp, request_ids};
    use crate::db;
    use crate::db::fixtures;

    async fn open_request(app: &TestApp, token: &str, course: &str) -> String {
        let (status, body) = app
            .post("/v1/match-requests", token, json!({ "course": course }))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["id"].as_str().unwrap().to_string()
    }

    async fn direct_request(app: &TestApp, token: &str, to: &str, course: &str) -> String {
        let (status, body) = app
            .post(
                "/v1/match-requests",
                token,
                json!({ "course": course, "receiver_id": to }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn open_list_shows_every_eligible_classmate() {
        let app = TestApp::new().await;
        let (alice, alice_token) = app.user("alice", &["CS 2100"]).await;
        let mut ids = Vec::new();
        for name in ["bob", "carol", "dave"] {
            let (_, token) = app.user(name, &["CS 2100"]).await;
            ids.push(open_request(&app, &token, "CS 2100").await);
        }
        open_request(&app, &alice_token, "CS 2100").await;

        let (status, body) = app
            .get("/v1/match-requests/open?course=cs2100", &alice_token)
            .await;
        assert_eq!(status, StatusCode::OK);
        let mut listed = request_ids(&body);
        listed.sort();
        ids.sort();
        assert_eq!(listed, ids);

        // blocked and already-partnered senders drop out
        let carol = crate::types::UserId("carol".into());
        let dave = crate::types::UserId("dave".into());
        db::blocks::block(&app.state.pool, &carol, &alice).await.unwrap();
        fixtures::partner_up(&app.state.pool, &alice, &dave, "CS 2100").await;
        let (_, body) = app
            .get("/v1/match-requests/open?course=CS%202100", &alice_token)
            .await;
        let listed = request_ids(&body);
        assert_eq!(listed.len(), 1);
        assert_eq!(body["requests"][0]["sender_id"], "bob");
    }

    #[tokio::test]
    async fn duplicate_requests_conflict() {
        let app = TestApp::new().await;
        let (_, alice) = app.user("alice", &["CS 2100"]).await;
        let (bob, _) = app.user("bob", &["CS 2100"]).await;

        open_request(&app, &alice, "CS 2100").await;
        let (status, _) = app
            .post("/v1/match-requests", &alice, json!({ "course": "cs 2100" }))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        direct_request(&app, &alice, bob.as_str(), "CS 2100").await;
        let (status, _) = app
            .post(
                "/v1/match-requests",
                &alice,
                json!({ "course": "CS 2100", "receiver_id": "bob" }),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, sent) = app.get("/v1/match-requests", &alice).await;
        assert_eq!(request_ids(&sent).len(), 2);
    }

    #[tokio::test]
    async fn direct_request_to_existing_partner_conflicts() {
        let app = TestApp::new().await;
        let (alice, alice_token) = app.user("alice", &[]).await;
        let (bob, _) = app.user("bob", &[]).await;
        fixtures::partner_up(&app.state.pool, &bob, &alice, "CS 3140").await;

        let (status, _) = app
            .post(
                "/v1/match-requests",
                &alice_token,
                json!({ "course": "CS 3140", "receiver_id": "bob" }),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        // another course is fine
        direct_request(&app, &alice_token, bob.as_str(), "CS 2100").await;

        let (status, _) = app
            .post(
                "/v1/match-requests",
                &alice_token,
                json!({ "course": "CS 2100", "receiver_id": "nobody" }),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn courses_outside_the_catalog_are_rejected() {
        let app = TestApp::new().await;
        let (_, alice) = app.user("alice", &[]).await;
        db::courses::replace_courses(
            &app.state.pool,
            &[Course {
                code: "CS 2100".into(),
                title: "Data Structures and Algorithms 1".into(),
            }],
        )
        .await
        .unwrap();

        let (status, _) = app
            .post("/v1/match-requests", &alice, json!({ "course": "CS 9999" }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        open_request(&app, &alice, "CS 2100").await;
    }

    #[tokio::test]
    async fn only_the_responder_may_accept_or_reject() {
        let app = TestApp::new().await;
        let (_, alice) = app.user("alice", &[]).await;
        let (_, bob) = app.user("bob", &[]).await;
        let (_, carol) = app.user("carol", &[]).await;

        let direct = direct_request(&app, &alice, "bob", "CS 2100").await;
        for token in [&alice, &carol] {
            let (status, _) = app
                .post(&format!("/v1/match-requests/{direct}/accept"), token, json!({}))
                .await;
            assert_eq!(status, StatusCode::FORBIDDEN);
        }
        let (status, body) = app
            .post(&format!("/v1/match-requests/{direct}/accept"), &bob, json!({}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["chat_id"].is_string());
        let (status, _) = app
            .post(&format!("/v1/match-requests/{direct}/reject"), &bob, json!({}))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        // on an open request the sender answers the applicant
        let open = open_request(&app, &bob, "CS 3140").await;
        let (status, _) = app
            .post(&format!("/v1/match-requests/{open}/accept"), &bob, json!({}))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, _) = app
            .post(&format!("/v1/match-requests/{open}/apply"), &carol, json!({}))
            .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = app
            .post(&format!("/v1/match-requests/{open}/reject"), &carol, json!({}))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, body) = app
            .post(&format!("/v1/match-requests/{open}/reject"), &bob, json!({}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "rejected");
    }

    #[tokio::test]
    async fn blocked_pair_cannot_be_accepted() {
        let app = TestApp::new().await;
        let (alice, alice_token) = app.user("alice", &[]).await;
        let (bob, bob_token) = app.user("bob", &[]).await;

        let id = direct_request(&app, &alice_token, bob.as_str(), "CS 2100").await;
        db::blocks::block(&app.state.pool, &alice, &bob).await.unwrap();

        let (status, _) = app
            .post(&format!("/v1/match-requests/{id}/accept"), &bob_token, json!({}))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(!db::partners::is_partner(&app.state.pool, &alice, &bob).await.unwrap());
    }

    #[tokio::test]
    async fn incoming_and_applied_lists() {
        let app = TestApp::new().await;
        let (alice, alice_token) = app.user("alice", &[]).await;
        let (bob, bob_token) = app.user("bob", &[]).await;
        let (_, carol_token) = app.user("carol", &[]).await;

        let direct = direct_request(&app, &alice_token, bob.as_str(), "CS 2100").await;
        let open = open_request(&app, &carol_token, "CS 3140").await;
        app.post(&format!("/v1/match-requests/{open}/apply"), &bob_token, json!({}))
            .await;

        let (_, incoming) = app.get("/v1/match-requests/incoming", &bob_token).await;
        assert_eq!(request_ids(&incoming), vec![direct.clone()]);
        let (_, incoming) = app.get("/v1/match-requests/incoming", &carol_token).await;
        assert_eq!(request_ids(&incoming), vec![open.clone()]);
        let (_, incoming) = app.get("/v1/match-requests/incoming", &alice_token).await;
        assert!(request_ids(&incoming).is_empty());

        let (_, applied) = app.get("/v1/match-requests/applied", &bob_token).await;
        assert_eq!(request_ids(&applied), vec![open.clone()]);
        assert_eq!(applied["requests"][0]["status"], "pending");

        app.post(&format!("/v1/match-requests/{open}/reject"), &carol_token, json!({}))
            .await;
        let (_, applied) = app.get("/v1/match-requests/applied", &bob_token).await;
        assert_eq!(applied["requests"][0]["status"], "rejected");

        db::blocks::block(&app.state.pool, &bob, &alice).await.unwrap();
        let (_, incoming) = app.get("/v1/match-requests/incoming", &bob_token).await;
        assert!(request_ids(&incoming).is_empty());
    }
}
