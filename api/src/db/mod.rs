pub mod blocks;
pub mod chat;
pub mod courses;
pub mod matching;
pub mod messages;
pub mod models;
pub mod notes;
pub mod partners;
pub mod push;
pub mod reports;
pub mod sessions;
pub mod users;

use models::Timestamp;

#[cfg(not(feature = "postgres"))]
pub type Db = sqlx::SqlitePool;
#[cfg(feature = "postgres")]
pub type Db = sqlx::PgPool;

/// Rewrites `?` placeholders into PostgreSQL's `$1, $2, ...`.
/// SQLite builds return the query untouched.
#[cfg(not(feature = "postgres"))]
pub(crate) fn sql(query: &str) -> std::borrow::Cow<'_, str> {
    std::borrow::Cow::Borrowed(query)
}

#[cfg(feature = "postgres")]
pub(crate) fn sql(query: &str) -> std::borrow::Cow<'_, str> {
    use std::fmt::Write;
    let mut result = String::with_capacity(query.len() + 16);
    let mut idx = 0u32;
    let mut in_literal = false;
    for ch in query.chars() {
        match ch {
            '\'' => {
                in_literal = !in_literal;
                result.push(ch);
            }
            '?' if !in_literal => {
                idx += 1;
                let _ = write!(result, "${idx}");
            }
            _ => result.push(ch),
        }
    }
    std::borrow::Cow::Owned(result)
}

/// Converts a UTC instant into the column representation.
/// SQLite stores text in the same shape as the column defaults so that
/// string comparison follows time order.
#[cfg(not(feature = "postgres"))]
pub(crate) fn timestamp(t: chrono::DateTime<chrono::Utc>) -> Timestamp {
    t.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

#[cfg(feature = "postgres")]
pub(crate) fn timestamp(t: chrono::DateTime<chrono::Utc>) -> Timestamp {
    t
}

pub(crate) fn now() -> Timestamp {
    timestamp(chrono::Utc::now())
}

pub async fn connect(url: &str) -> Result<Db, sqlx::Error> {
    #[cfg(not(feature = "postgres"))]
    {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        Ok(pool)
    }
    #[cfg(feature = "postgres")]
    {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        Ok(pool)
    }
}

pub async fn migrate(pool: &Db) -> Result<(), sqlx::migrate::MigrateError> {
    #[cfg(not(feature = "postgres"))]
    {
        sqlx::migrate!("./migrations/sqlite").run(pool).await?;
    }
    #[cfg(feature = "postgres")]
    {
        sqlx::migrate!("./migrations/postgres").run(pool).await?;
    }
    Ok(())
}

/// Single-connection in-memory database with the schema applied.
#[cfg(all(test, not(feature = "postgres")))]
pub(crate) async fn test_pool() -> Db {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    migrate(&pool).await.unwrap();
    pool
}
