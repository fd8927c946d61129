use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use super::{notify, profiles};
use crate::AppState;
use crate::auth::AuthenticatedUser;
use crate::db;
use crate::db::models::ChatRow;
use crate::error::AppError;
use crate::realtime::{EventKind, RealtimeEvent};
use crate::types::{ChatId, MessageId, UserId};

const MAX_MESSAGE_CHARS: usize = 2000;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/chat", get(list_chats))
        .route("/chat/unread", get(unread_counts))
        .route("/chat/{chat_id}", get(get_chat))
        .route(
            "/chat/{chat_id}/message",
            get(get_messages).post(post_message),
        )
        .route("/chat/{chat_id}/read", post(mark_read))
}

/// Loads a chat the user takes part in. Other users get 403.
async fn load_chat(pool: &db::Db, chat_id: &ChatId, user_id: &UserId) -> Result<ChatRow, AppError> {
    let chat = db::chat::get_chat(pool, chat_id)
        .await?
        .ok_or_else(|| AppError::NotFound("chat not found".into()))?;
    if !db::chat::is_participant(pool, chat_id, user_id).await? {
        return Err(AppError::Forbidden("not a member of this chat".into()));
    }
    Ok(chat)
}

/// Chats with partner profile, last message and unread count, most recently
/// active first.
async fn list_chats(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let me = auth.user_id.as_str();
    let (chats, blocked) = tokio::try_join!(
        db::chat::list_user_chats(&state.pool, &auth.user_id),
        db::blocks::blocked_by(&state.pool, &auth.user_id),
    )?;
    let profiles = profiles(&state.pool, chats.iter().map(|c| c.other(me).to_string())).await?;

    let mut entries = Vec::with_capacity(chats.len());
    for chat in &chats {
        let chat_id = ChatId(chat.id.clone());
        let (last, unread) = tokio::try_join!(
            db::messages::last_message(&state.pool, &chat_id),
            db::chat::unread_count(&state.pool, &chat_id, &auth.user_id, &blocked),
        )?;
        entries.push((chat, last, unread));
    }
    entries.sort_by(|(a, a_last, _), (b, b_last, _)| {
        let a_at = a_last.as_ref().map_or(&a.created_at, |m| &m.sent_at);
        let b_at = b_last.as_ref().map_or(&b.created_at, |m| &m.sent_at);
        b_at.cmp(a_at)
    });

    let chats: Vec<_> = entries
        .into_iter()
        .map(|(chat, last, unread)| {
            let other = chat.other(me);
            serde_json::json!({
                "id": chat.id,
                "partner_id": other,
                "partner": profiles.get(other),
                "shared_courses": chat.shared_courses,
                "last_message": last,
                "unread": unread,
                "blocked": blocked.contains(other),
                "created_at": chat.created_at,
            })
        })
        .collect();
    Ok(Json(serde_json::json!({ "chats": chats })))
}

/// Unread counts per chat plus their total, for badges.
async fn unread_counts(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let (chats, blocked) = tokio::try_join!(
        db::chat::list_user_chats(&state.pool, &auth.user_id),
        db::blocks::blocked_by(&state.pool, &auth.user_id),
    )?;
    let mut per_chat = HashMap::with_capacity(chats.len());
    for chat in chats {
        let chat_id = ChatId(chat.id);
        let unread = db::chat::unread_count(&state.pool, &chat_id, &auth.user_id, &blocked).await?;
        per_chat.insert(chat_id.0, unread);
    }
    let total: usize = per_chat.values().sum();
    Ok(Json(serde_json::json!({ "total": total, "chats": per_chat })))
}

async fn get_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    auth: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let chat_id = ChatId(chat_id);
    let chat = load_chat(&state.pool, &chat_id, &auth.user_id).await?;
    let participants = db::chat::get_participants(&state.pool, &chat_id).await?;
    let other = chat.other(auth.user_id.as_str());
    let partner = db::users::get_user(&state.pool, &UserId(other.to_string()))
        .await?
        .map(|u| u.public_profile());

    Ok(Json(serde_json::json!({
        "id": chat.id,
        "participants": participants,
        "partner": partner,
        "shared_courses": chat.shared_courses,
        "created_at": chat.created_at,
    })))
}

#[derive(Deserialize)]
struct MessageQuery {
    #[serde(default = "default_from")]
    from: i64,
    #[serde(default)]
    until: i64,
}
fn default_from() -> i64 {
    -50
}

/// Message window by negative offsets from the newest message. Messages
/// from users the reader blocked are left out of both the window and
/// `total`.
async fn get_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Query(query): Query<MessageQuery>,
    auth: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let chat_id = ChatId(chat_id);
    load_chat(&state.pool, &chat_id, &auth.user_id).await?;

    let (messages, total) = db::messages::get_messages(
        &state.pool,
        &chat_id,
        &auth.user_id,
        query.from,
        query.until,
    )
    .await?;

    Ok(Json(serde_json::json!({
        "messages": messages,
        "total": total,
    })))
}

#[derive(Deserialize)]
struct PostMessageBody {
    text: String,
}

async fn post_message(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    auth: AuthenticatedUser,
    Json(body): Json<PostMessageBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let chat_id = ChatId(chat_id);
    let chat = load_chat(&state.pool, &chat_id, &auth.user_id).await?;

    let text = body.text.trim();
    if text.is_empty() {
        return Err(AppError::BadRequest("message must not be empty".into()));
    }
    if text.chars().count() > MAX_MESSAGE_CHARS {
        return Err(AppError::PayloadTooLarge(format!(
            "message must be at most {MAX_MESSAGE_CHARS} characters"
        )));
    }

    let other = UserId(chat.other(auth.user_id.as_str()).to_string());
    if db::blocks::is_blocked_between(&state.pool, &auth.user_id, &other).await? {
        return Err(AppError::Forbidden(
            "cannot send messages to this user".into(),
        ));
    }

    let message = db::messages::create_message(
        &state.pool,
        &MessageId::new_v4(),
        &chat_id,
        &auth.user_id,
        text,
    )
    .await?;

    let payload = serde_json::json!(message);
    notify(
        &state,
        EventKind::Message,
        &[chat.user_a.as_str(), chat.user_b.as_str()],
        Vec::new(),
        payload.clone(),
    );
    {
        let pool = state.pool.clone();
        let config = state.config.clone();
        let message = message.clone();
        tokio::spawn(async move {
            if let Err(e) =
                crate::push::send_message_notification(&pool, &config, &other, &message).await
            {
                tracing::warn!("push notification failed: {e}");
            }
        });
    }

    Ok(Json(payload))
}

async fn mark_read(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    auth: AuthenticatedUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let chat_id = ChatId(chat_id);
    let chat = load_chat(&state.pool, &chat_id, &auth.user_id).await?;
    db::chat::mark_read(&state.pool, &chat_id, &auth.user_id).await?;

    state.events.publish(RealtimeEvent::new(
        EventKind::Read,
        &[chat.user_a.as_str(), chat.user_b.as_str()],
        serde_json::json!({ "chat_id": chat_id, "user_id": auth.user_id }),
    ));
    Ok(Json(serde_json::json!({ "read": true })))
}

#[cfg(all(test, not(feature = "postgres")))]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use super::super::testing::TestApp;
    use crate::db;
    use crate::db::fixtures;

    #[tokio::test]
    async fn blocked_senders_vanish_from_history_and_totals() {
        let app = TestApp::new().await;
        let (alice, alice_token) = app.user("alice", &[]).await;
        let (bob, bob_token) = app.user("bob", &[]).await;
        let chat_id = fixtures::chat(&app.state.pool, &alice, &bob).await;
        let uri = format!("/v1/chat/{chat_id}/message");

        for text in ["hi", "library at 7?"] {
            let (status, _) = app.post(&uri, &bob_token, json!({ "text": text })).await;
            assert_eq!(status, StatusCode::OK);
        }
        app.post(&uri, &alice_token, json!({ "text": "sure" })).await;

        let (_, body) = app.get(&uri, &alice_token).await;
        assert_eq!(body["total"], 4);

        db::blocks::block(&app.state.pool, &alice, &bob).await.unwrap();
        let (status, body) = app.get(&format!("{uri}?from=-50"), &alice_token).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);
        let senders: Vec<_> = body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["sender_id"].clone())
            .collect();
        assert_eq!(senders, vec![serde_json::Value::Null, json!("alice")]);

        let (status, _) = app.post(&uri, &bob_token, json!({ "text": "hello?" })).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unread_follows_read_marker() {
        let app = TestApp::new().await;
        let (alice, alice_token) = app.user("alice", &[]).await;
        let (bob, bob_token) = app.user("bob", &[]).await;
        let chat_id = fixtures::chat(&app.state.pool, &alice, &bob).await;
        let uri = format!("/v1/chat/{chat_id}/message");

        app.post(&uri, &bob_token, json!({ "text": "ping" })).await;
        let (_, unread) = app.get("/v1/chat/unread", &alice_token).await;
        assert_eq!(unread["total"], 1);
        assert_eq!(unread["chats"][chat_id.as_str()], 1);

        let (status, _) = app
            .post(&format!("/v1/chat/{chat_id}/read"), &alice_token, json!({}))
            .await;
        assert_eq!(status, StatusCode::OK);
        app.post(&uri, &bob_token, json!({ "text": "pong" })).await;

        let (_, chats) = app.get("/v1/chat", &alice_token).await;
        assert_eq!(chats["chats"][0]["unread"], 1);
        assert_eq!(chats["chats"][0]["last_message"]["text"], "pong");
    }

    #[tokio::test]
    async fn outsiders_cannot_read_or_post() {
        let app = TestApp::new().await;
        let (alice, _) = app.user("alice", &[]).await;
        let (bob, _) = app.user("bob", &[]).await;
        let (_, carol) = app.user("carol", &[]).await;
        let chat_id = fixtures::chat(&app.state.pool, &alice, &bob).await;
        let uri = format!("/v1/chat/{chat_id}/message");

        assert_eq!(app.get(&uri, &carol).await.0, StatusCode::FORBIDDEN);
        assert_eq!(
            app.post(&uri, &carol, json!({ "text": "hi" })).await.0,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            app.get("/v1/chat/missing", &carol).await.0,
            StatusCode::NOT_FOUND
        );
    }
}
