use studybuddy_common::catalog::Course;

use super::models::CourseRow;
use super::{Db, now, sql};

/// Upserts the catalog and drops courses that disappeared from it.
#[tracing::instrument(skip(pool, courses), fields(count = courses.len()), err)]
pub async fn replace_courses(pool: &Db, courses: &[Course]) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    let refreshed_at = now();

    let q = sql("INSERT INTO courses (code, title, updated_at) VALUES (?, ?, ?)
         ON CONFLICT (code) DO UPDATE SET title = excluded.title, updated_at = excluded.updated_at");
    for course in courses {
        sqlx::query(&q)
            .bind(&course.code)
            .bind(&course.title)
            .bind(&refreshed_at)
            .execute(&mut *tx)
            .await?;
    }

    let q = sql("DELETE FROM courses WHERE updated_at < ?");
    sqlx::query(&q)
        .bind(&refreshed_at)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Case-insensitive prefix search on the code, substring search on the title.
#[tracing::instrument(skip(pool), err)]
pub async fn search_courses(
    pool: &Db,
    query: &str,
    limit: i64,
) -> Result<Vec<CourseRow>, sqlx::Error> {
    let needle = query.trim().to_ascii_uppercase();
    let q = sql("SELECT code, title FROM courses
         WHERE UPPER(code) LIKE ? OR UPPER(title) LIKE ?
         ORDER BY code ASC
         LIMIT ?");
    sqlx::query_as::<_, CourseRow>(&q)
        .bind(format!("{needle}%"))
        .bind(format!("%{needle}%"))
        .bind(limit)
        .fetch_all(pool)
        .await
}

#[tracing::instrument(skip(pool), err)]
pub async fn course_exists(pool: &Db, code: &str) -> Result<bool, sqlx::Error> {
    let q = sql("SELECT 1 FROM courses WHERE code = ?");
    let row: Option<(i32,)> = sqlx::query_as(&q).bind(code).fetch_optional(pool).await?;
    Ok(row.is_some())
}

#[tracing::instrument(skip(pool), err)]
pub async fn count_courses(pool: &Db) -> Result<i64, sqlx::Error> {
    let q = sql("SELECT COUNT(*) FROM courses");
    let (count,): (i64,) = sqlx::query_as(&q).fetch_one(pool).await?;
    Ok(count)
}
