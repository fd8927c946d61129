use super::models::MessageRow;
use super::{Db, now, sql};
use crate::types::{ChatId, MessageId, UserId};

/// Messages `viewer` may see: system messages and anything not sent by a
/// user they blocked.
const VISIBLE_TO: &str = "(sender_id IS NULL OR sender_id NOT IN
         (SELECT blocked_id FROM blocks WHERE blocker_id = ?))";

#[tracing::instrument(skip(pool, text), err)]
pub async fn create_message(
    pool: &Db,
    id: &MessageId,
    chat_id: &ChatId,
    sender_id: &UserId,
    text: &str,
) -> Result<MessageRow, sqlx::Error> {
    let sent_at = now();
    let q = sql("INSERT INTO messages (id, chat_id, sender_id, text, sent_at) VALUES (?, ?, ?, ?, ?)
         RETURNING seq");
    let (seq,): (i64,) = sqlx::query_as(&q)
        .bind(id.as_str())
        .bind(chat_id.as_str())
        .bind(sender_id.as_str())
        .bind(text)
        .bind(&sent_at)
        .fetch_one(pool)
        .await?;
    Ok(MessageRow {
        seq,
        id: id.to_string(),
        chat_id: chat_id.to_string(),
        sender_id: Some(sender_id.to_string()),
        text: text.to_string(),
        sent_at,
    })
}

/// Page through the messages `viewer` can see, in send order.
/// `from` and `until` are negative offsets from the newest visible message:
/// from=-30, until=-10 returns the 30th newest up to (excluding) the 10th newest.
/// The returned total also counts visible messages only.
#[tracing::instrument(skip(pool), err)]
pub async fn get_messages(
    pool: &Db,
    chat_id: &ChatId,
    viewer: &UserId,
    from: i64,
    until: i64,
) -> Result<(Vec<MessageRow>, i64), sqlx::Error> {
    let q = sql(&format!(
        "SELECT COUNT(*) FROM messages WHERE chat_id = ? AND {VISIBLE_TO}"
    ))
    .into_owned();
    let total: (i64,) = sqlx::query_as(&q)
        .bind(chat_id.as_str())
        .bind(viewer.as_str())
        .fetch_one(pool)
        .await?;
    let total = total.0;

    // from=-30 => skip = total - 30, until=-10 => limit = 30 - 10 = 20
    let skip = (total + from).max(0);
    let limit = ((total + until).max(0) - skip).max(0);

    let q = sql(&format!(
        "SELECT * FROM messages WHERE chat_id = ? AND {VISIBLE_TO}
         ORDER BY seq ASC
         LIMIT ? OFFSET ?"
    ))
    .into_owned();
    let messages = sqlx::query_as::<_, MessageRow>(&q)
        .bind(chat_id.as_str())
        .bind(viewer.as_str())
        .bind(limit)
        .bind(skip)
        .fetch_all(pool)
        .await?;

    Ok((messages, total))
}

/// Messages after sequence number `since` (all messages when `None`).
#[tracing::instrument(skip(pool), err)]
pub async fn get_messages_since(
    pool: &Db,
    chat_id: &ChatId,
    since: Option<i64>,
) -> Result<Vec<MessageRow>, sqlx::Error> {
    let q = sql("SELECT * FROM messages WHERE chat_id = ? AND seq > ?
         ORDER BY seq ASC");
    sqlx::query_as::<_, MessageRow>(&q)
        .bind(chat_id.as_str())
        .bind(since.unwrap_or(0))
        .fetch_all(pool)
        .await
}

#[tracing::instrument(skip(pool), err)]
pub async fn last_message(pool: &Db, chat_id: &ChatId) -> Result<Option<MessageRow>, sqlx::Error> {
    let q = sql("SELECT * FROM messages WHERE chat_id = ? ORDER BY seq DESC LIMIT 1");
    sqlx::query_as::<_, MessageRow>(&q)
        .bind(chat_id.as_str())
        .fetch_optional(pool)
        .await
}

#[cfg(all(test, not(feature = "postgres")))]
mod tests {
    use super::*;
    use crate::db::{blocks, fixtures, test_pool};

    #[tokio::test]
    async fn paging_skips_blocked_senders() {
        let pool = test_pool().await;
        let alice = fixtures::user(&pool, "alice", &[]).await;
        let bob = fixtures::user(&pool, "bob", &[]).await;
        let chat_id = fixtures::chat(&pool, &alice, &bob).await;

        for text in ["one", "two", "three"] {
            create_message(&pool, &MessageId::new_v4(), &chat_id, &bob, text)
                .await
                .unwrap();
        }
        create_message(&pool, &MessageId::new_v4(), &chat_id, &alice, "mine")
            .await
            .unwrap();

        let (all, total) = get_messages(&pool, &chat_id, &alice, -50, 0).await.unwrap();
        // the system message from acceptance comes first
        assert_eq!(total, 5);
        assert!(all[0].sender_id.is_none());
        assert!(all.windows(2).all(|w| w[0].seq < w[1].seq));

        blocks::block(&pool, &alice, &bob).await.unwrap();
        let (visible, total) = get_messages(&pool, &chat_id, &alice, -50, 0).await.unwrap();
        assert_eq!(total, 2);
        let texts: Vec<&str> = visible.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts[1], "mine");

        let (newest, _) = get_messages(&pool, &chat_id, &alice, -1, 0).await.unwrap();
        assert_eq!(newest.len(), 1);
        assert_eq!(newest[0].text, "mine");

        // bob still sees everything
        let (_, total) = get_messages(&pool, &chat_id, &bob, -50, 0).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(last_message(&pool, &chat_id).await.unwrap().unwrap().text, "mine");
    }
}
