use super::models::NoteRow;
use super::{Db, sql};
use crate::types::{NoteId, UserId};

#[derive(Debug, Clone, Copy)]
pub struct NewNote<'a> {
    pub author_id: &'a UserId,
    pub title: &'a str,
    pub course: &'a str,
    pub media_key: &'a str,
    pub content_type: &'a str,
    pub size: i64,
}

#[tracing::instrument(skip(pool), err)]
pub async fn create_note(pool: &Db, id: &NoteId, note: NewNote<'_>) -> Result<(), sqlx::Error> {
    let q = sql("INSERT INTO notes (id, author_id, title, course, media_key, content_type, size)
         VALUES (?, ?, ?, ?, ?, ?, ?)");
    sqlx::query(&q)
        .bind(id.as_str())
        .bind(note.author_id.as_str())
        .bind(note.title)
        .bind(note.course)
        .bind(note.media_key)
        .bind(note.content_type)
        .bind(note.size)
        .execute(pool)
        .await?;
    Ok(())
}

#[tracing::instrument(skip(pool), err)]
pub async fn get_note(pool: &Db, id: &NoteId) -> Result<Option<NoteRow>, sqlx::Error> {
    let q = sql("SELECT * FROM notes WHERE id = ?");
    sqlx::query_as::<_, NoteRow>(&q)
        .bind(id.as_str())
        .fetch_optional(pool)
        .await
}

/// Newest first. An empty `courses` slice lists every note.
#[tracing::instrument(skip(pool), err)]
pub async fn list_notes(pool: &Db, courses: &[String]) -> Result<Vec<NoteRow>, sqlx::Error> {
    if courses.is_empty() {
        let q = sql("SELECT * FROM notes ORDER BY created_at DESC");
        return sqlx::query_as::<_, NoteRow>(&q).fetch_all(pool).await;
    }
    let placeholders = vec!["?"; courses.len()].join(", ");
    let q = format!("SELECT * FROM notes WHERE course IN ({placeholders}) ORDER BY created_at DESC");
    let q = sql(&q);
    let mut query = sqlx::query_as::<_, NoteRow>(&q);
    for course in courses {
        query = query.bind(course);
    }
    query.fetch_all(pool).await
}

#[tracing::instrument(skip(pool), err)]
pub async fn list_notes_by_author(
    pool: &Db,
    author_id: &UserId,
) -> Result<Vec<NoteRow>, sqlx::Error> {
    let q = sql("SELECT * FROM notes WHERE author_id = ? ORDER BY created_at DESC");
    sqlx::query_as::<_, NoteRow>(&q)
        .bind(author_id.as_str())
        .fetch_all(pool)
        .await
}

/// Stores the user's rating (replacing an earlier one) and refreshes the
/// note's average. Returns `(rating, rating_count)`.
#[tracing::instrument(skip(pool), err)]
pub async fn rate_note(
    pool: &Db,
    id: &NoteId,
    user_id: &UserId,
    value: i64,
) -> Result<(f64, i64), sqlx::Error> {
    let mut tx = pool.begin().await?;

    let q = sql("INSERT INTO note_ratings (note_id, user_id, value) VALUES (?, ?, ?)
         ON CONFLICT (note_id, user_id) DO UPDATE SET value = excluded.value");
    sqlx::query(&q)
        .bind(id.as_str())
        .bind(user_id.as_str())
        .bind(value)
        .execute(&mut *tx)
        .await?;

    let q = sql("SELECT value FROM note_ratings WHERE note_id = ?");
    let values: Vec<(i64,)> = sqlx::query_as(&q)
        .bind(id.as_str())
        .fetch_all(&mut *tx)
        .await?;
    let count = values.len() as i64;
    let rating = if count == 0 {
        0.0
    } else {
        values.iter().map(|(v,)| *v as f64).sum::<f64>() / count as f64
    };

    let q = sql("UPDATE notes SET rating = ?, rating_count = ? WHERE id = ?");
    sqlx::query(&q)
        .bind(rating)
        .bind(count)
        .bind(id.as_str())
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok((rating, count))
}

#[tracing::instrument(skip(pool), err)]
pub async fn delete_note(pool: &Db, id: &NoteId) -> Result<bool, sqlx::Error> {
    let q = sql("DELETE FROM notes WHERE id = ?");
    let result = sqlx::query(&q).bind(id.as_str()).execute(pool).await?;
    Ok(result.rows_affected() > 0)
}
