use std::collections::HashSet;

use studybuddy_common::matching::ordered_pair;
use studybuddy_common::unread::{MessageView, count_unread};

use super::models::{ChatParticipantRow, ChatRow};
use super::{Db, sql};
use crate::types::{ChatId, UserId};

#[tracing::instrument(skip(pool), err)]
pub async fn get_chat(pool: &Db, chat_id: &ChatId) -> Result<Option<ChatRow>, sqlx::Error> {
    let q = sql("SELECT * FROM chats WHERE id = ?");
    sqlx::query_as::<_, ChatRow>(&q)
        .bind(chat_id.as_str())
        .fetch_optional(pool)
        .await
}

#[tracing::instrument(skip(pool), err)]
pub async fn get_chat_between(
    pool: &Db,
    a: &UserId,
    b: &UserId,
) -> Result<Option<ChatRow>, sqlx::Error> {
    let (user_a, user_b) = ordered_pair(a.as_str(), b.as_str());
    let q = sql("SELECT * FROM chats WHERE user_a = ? AND user_b = ?");
    sqlx::query_as::<_, ChatRow>(&q)
        .bind(user_a)
        .bind(user_b)
        .fetch_optional(pool)
        .await
}

#[tracing::instrument(skip(pool), err)]
pub async fn list_user_chats(pool: &Db, user_id: &UserId) -> Result<Vec<ChatRow>, sqlx::Error> {
    let q = sql("SELECT c.* FROM chats c
         INNER JOIN chat_participants p ON c.id = p.chat_id
         WHERE p.user_id = ?
         ORDER BY c.created_at DESC");
    sqlx::query_as::<_, ChatRow>(&q)
        .bind(user_id.as_str())
        .fetch_all(pool)
        .await
}

#[tracing::instrument(skip(pool), err)]
pub async fn get_participants(
    pool: &Db,
    chat_id: &ChatId,
) -> Result<Vec<ChatParticipantRow>, sqlx::Error> {
    let q = sql("SELECT * FROM chat_participants WHERE chat_id = ?");
    sqlx::query_as::<_, ChatParticipantRow>(&q)
        .bind(chat_id.as_str())
        .fetch_all(pool)
        .await
}

#[tracing::instrument(skip(pool), err)]
pub async fn get_participant(
    pool: &Db,
    chat_id: &ChatId,
    user_id: &UserId,
) -> Result<Option<ChatParticipantRow>, sqlx::Error> {
    let q = sql("SELECT * FROM chat_participants WHERE chat_id = ? AND user_id = ?");
    sqlx::query_as::<_, ChatParticipantRow>(&q)
        .bind(chat_id.as_str())
        .bind(user_id.as_str())
        .fetch_optional(pool)
        .await
}

#[tracing::instrument(skip(pool), err)]
pub async fn is_participant(
    pool: &Db,
    chat_id: &ChatId,
    user_id: &UserId,
) -> Result<bool, sqlx::Error> {
    let q = sql("SELECT 1 FROM chat_participants WHERE chat_id = ? AND user_id = ?");
    let row: Option<(i32,)> = sqlx::query_as(&q)
        .bind(chat_id.as_str())
        .bind(user_id.as_str())
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

/// Moves the reader's mark to the newest message in the chat.
///
/// The mark is a message `seq`, so anything inserted after this statement
/// stays unread no matter how close in time it lands.
#[tracing::instrument(skip(pool), err)]
pub async fn mark_read(pool: &Db, chat_id: &ChatId, user_id: &UserId) -> Result<bool, sqlx::Error> {
    let q = sql("UPDATE chat_participants
         SET last_read_seq = COALESCE((SELECT MAX(seq) FROM messages WHERE chat_id = ?), last_read_seq)
         WHERE chat_id = ? AND user_id = ?");
    let result = sqlx::query(&q)
        .bind(chat_id.as_str())
        .bind(chat_id.as_str())
        .bind(user_id.as_str())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Unread messages for `user_id` in one chat, ignoring system messages and
/// senders in `blocked`.
#[tracing::instrument(skip(pool, blocked), err)]
pub async fn unread_count(
    pool: &Db,
    chat_id: &ChatId,
    user_id: &UserId,
    blocked: &HashSet<String>,
) -> Result<usize, sqlx::Error> {
    let Some(participant) = get_participant(pool, chat_id, user_id).await? else {
        return Ok(0);
    };
    let last_read = participant.last_read_seq;
    let messages = super::messages::get_messages_since(pool, chat_id, last_read).await?;
    Ok(count_unread(
        messages.iter().map(|m| MessageView {
            sender_id: m.sender_id.as_deref(),
            seq: m.seq,
        }),
        user_id.as_str(),
        last_read,
        blocked,
    ))
}
