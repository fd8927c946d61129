use super::{Db, now, sql, timestamp};
use crate::types::UserId;

#[tracing::instrument(skip(pool, token_hash), err)]
pub async fn create_session(
    pool: &Db,
    token_hash: &str,
    user_id: &UserId,
    expires_at: chrono::DateTime<chrono::Utc>,
) -> Result<(), sqlx::Error> {
    let q = sql("INSERT INTO sessions (token_hash, user_id, expires_at) VALUES (?, ?, ?)");
    sqlx::query(&q)
        .bind(token_hash)
        .bind(user_id.as_str())
        .bind(timestamp(expires_at))
        .execute(pool)
        .await?;
    Ok(())
}

/// Returns the owner of an unexpired session.
#[tracing::instrument(skip(pool, token_hash), err)]
pub async fn get_session_user(pool: &Db, token_hash: &str) -> Result<Option<UserId>, sqlx::Error> {
    let q = sql("SELECT user_id FROM sessions WHERE token_hash = ? AND expires_at > ?");
    let row: Option<(String,)> = sqlx::query_as(&q)
        .bind(token_hash)
        .bind(now())
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(id,)| UserId(id)))
}

#[tracing::instrument(skip(pool, token_hash), err)]
pub async fn delete_session(pool: &Db, token_hash: &str) -> Result<bool, sqlx::Error> {
    let q = sql("DELETE FROM sessions WHERE token_hash = ?");
    let result = sqlx::query(&q).bind(token_hash).execute(pool).await?;
    Ok(result.rows_affected() > 0)
}

/// Deletes expired sessions and returns how many were removed.
#[tracing::instrument(skip(pool), err)]
pub async fn delete_expired_sessions(pool: &Db) -> Result<u64, sqlx::Error> {
    let q = sql("DELETE FROM sessions WHERE expires_at < ?");
    let result = sqlx::query(&q).bind(now()).execute(pool).await?;
    Ok(result.rows_affected())
}
