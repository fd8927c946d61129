use std::collections::HashSet;

use super::models::BlockRow;
use super::{Db, sql};
use crate::types::UserId;

#[tracing::instrument(skip(pool), err)]
pub async fn block(pool: &Db, blocker: &UserId, blocked: &UserId) -> Result<bool, sqlx::Error> {
    let q = sql(
        "INSERT INTO blocks (blocker_id, blocked_id) VALUES (?, ?) ON CONFLICT (blocker_id, blocked_id) DO NOTHING",
    );
    let result = sqlx::query(&q)
        .bind(blocker.as_str())
        .bind(blocked.as_str())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[tracing::instrument(skip(pool), err)]
pub async fn unblock(pool: &Db, blocker: &UserId, blocked: &UserId) -> Result<bool, sqlx::Error> {
    let q = sql("DELETE FROM blocks WHERE blocker_id = ? AND blocked_id = ?");
    let result = sqlx::query(&q)
        .bind(blocker.as_str())
        .bind(blocked.as_str())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[tracing::instrument(skip(pool), err)]
pub async fn list_blocked(pool: &Db, blocker: &UserId) -> Result<Vec<BlockRow>, sqlx::Error> {
    let q = sql("SELECT * FROM blocks WHERE blocker_id = ? ORDER BY created_at DESC");
    sqlx::query_as::<_, BlockRow>(&q)
        .bind(blocker.as_str())
        .fetch_all(pool)
        .await
}

/// Users `user_id` has blocked.
#[tracing::instrument(skip(pool), err)]
pub async fn blocked_by(pool: &Db, user_id: &UserId) -> Result<HashSet<String>, sqlx::Error> {
    let q = sql("SELECT blocked_id FROM blocks WHERE blocker_id = ?");
    let rows: Vec<(String,)> = sqlx::query_as(&q)
        .bind(user_id.as_str())
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Users hidden from `user_id`: blocked by them or blocking them.
#[tracing::instrument(skip(pool), err)]
pub async fn hidden_users(pool: &Db, user_id: &UserId) -> Result<HashSet<String>, sqlx::Error> {
    let q = sql("SELECT blocked_id FROM blocks WHERE blocker_id = ?
         UNION
         SELECT blocker_id FROM blocks WHERE blocked_id = ?");
    let rows: Vec<(String,)> = sqlx::query_as(&q)
        .bind(user_id.as_str())
        .bind(user_id.as_str())
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

#[tracing::instrument(skip(pool), err)]
pub async fn is_blocked_between(pool: &Db, a: &UserId, b: &UserId) -> Result<bool, sqlx::Error> {
    let q = sql("SELECT 1 FROM blocks
         WHERE (blocker_id = ? AND blocked_id = ?) OR (blocker_id = ? AND blocked_id = ?)");
    let row: Option<(i32,)> = sqlx::query_as(&q)
        .bind(a.as_str())
        .bind(b.as_str())
        .bind(b.as_str())
        .bind(a.as_str())
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}
