use sqlx::types::Json;

use super::models::UserRow;
use super::{Db, now, sql};
use crate::types::UserId;

#[tracing::instrument(skip(pool, password_hash), err)]
pub async fn create_user(
    pool: &Db,
    id: &UserId,
    email: &str,
    computing_id: &str,
    password_hash: &str,
    name: &str,
) -> Result<(), sqlx::Error> {
    let q = sql(
        "INSERT INTO users (id, email, computing_id, password_hash, name) VALUES (?, ?, ?, ?, ?)",
    );
    sqlx::query(&q)
        .bind(id.as_str())
        .bind(email)
        .bind(computing_id)
        .bind(password_hash)
        .bind(name)
        .execute(pool)
        .await?;
    Ok(())
}

#[tracing::instrument(skip(pool), err)]
pub async fn get_user(pool: &Db, id: &UserId) -> Result<Option<UserRow>, sqlx::Error> {
    let q = sql("SELECT * FROM users WHERE id = ?");
    sqlx::query_as::<_, UserRow>(&q)
        .bind(id.as_str())
        .fetch_optional(pool)
        .await
}

#[tracing::instrument(skip(pool), err)]
pub async fn get_user_by_email(pool: &Db, email: &str) -> Result<Option<UserRow>, sqlx::Error> {
    let q = sql("SELECT * FROM users WHERE email = ?");
    sqlx::query_as::<_, UserRow>(&q)
        .bind(email)
        .fetch_optional(pool)
        .await
}

#[tracing::instrument(skip(pool, ids), err)]
pub async fn get_users(pool: &Db, ids: &[String]) -> Result<Vec<UserRow>, sqlx::Error> {
    let mut users = Vec::with_capacity(ids.len());
    let q = sql("SELECT * FROM users WHERE id = ?");
    for id in ids {
        if let Some(user) = sqlx::query_as::<_, UserRow>(&q)
            .bind(id)
            .fetch_optional(pool)
            .await?
        {
            users.push(user);
        }
    }
    Ok(users)
}

/// Fields a user may change on their own profile. `None` keeps the stored value.
#[derive(Debug, Default, Clone)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub bio: Option<String>,
    pub courses: Option<Vec<String>>,
    pub study_times: Option<Vec<String>>,
    pub meeting_preference: Option<String>,
    pub selected_avatar: Option<String>,
}

#[tracing::instrument(skip(pool), err)]
pub async fn update_profile(
    pool: &Db,
    user_id: &UserId,
    update: ProfileUpdate,
) -> Result<bool, sqlx::Error> {
    let q = sql("UPDATE users SET
            name = COALESCE(?, name),
            bio = COALESCE(?, bio),
            courses = COALESCE(?, courses),
            study_times = COALESCE(?, study_times),
            meeting_preference = COALESCE(?, meeting_preference),
            selected_avatar = COALESCE(?, selected_avatar),
            updated_at = ?
         WHERE id = ?");
    let result = sqlx::query(&q)
        .bind(update.name)
        .bind(update.bio)
        .bind(update.courses.map(Json))
        .bind(update.study_times.map(Json))
        .bind(update.meeting_preference)
        .bind(update.selected_avatar)
        .bind(now())
        .bind(user_id.as_str())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[tracing::instrument(skip(pool), err)]
pub async fn set_photo_key(
    pool: &Db,
    user_id: &UserId,
    photo_key: &str,
) -> Result<bool, sqlx::Error> {
    let q = sql("UPDATE users SET photo_key = ?, updated_at = ? WHERE id = ?");
    let result = sqlx::query(&q)
        .bind(photo_key)
        .bind(now())
        .bind(user_id.as_str())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[tracing::instrument(skip(pool), err)]
pub async fn delete_user(pool: &Db, id: &UserId) -> Result<bool, sqlx::Error> {
    let q = sql("DELETE FROM users WHERE id = ?");
    let result = sqlx::query(&q).bind(id.as_str()).execute(pool).await?;
    Ok(result.rows_affected() > 0)
}

/// Users (other than `exclude`) who list `course` on their profile.
#[tracing::instrument(skip(pool), err)]
pub async fn search_users_by_course(
    pool: &Db,
    course: &str,
    exclude: &UserId,
) -> Result<Vec<UserRow>, sqlx::Error> {
    #[cfg(not(feature = "postgres"))]
    let q = sql("SELECT * FROM users
         WHERE id != ? AND EXISTS (SELECT 1 FROM json_each(users.courses) WHERE value = ?)
         ORDER BY name ASC");
    #[cfg(feature = "postgres")]
    let q = sql("SELECT * FROM users
         WHERE id != ? AND jsonb_exists(courses, ?)
         ORDER BY name ASC");
    sqlx::query_as::<_, UserRow>(&q)
        .bind(exclude.as_str())
        .bind(course)
        .fetch_all(pool)
        .await
}
