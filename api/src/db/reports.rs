use super::{Db, sql};
use crate::types::{ReportId, UserId};

#[tracing::instrument(skip(pool, reason), err)]
pub async fn create_report(
    pool: &Db,
    id: &ReportId,
    reporter: &UserId,
    reported: &UserId,
    reason: &str,
) -> Result<(), sqlx::Error> {
    let q = sql("INSERT INTO reports (id, reporter_id, reported_id, reason) VALUES (?, ?, ?, ?)");
    sqlx::query(&q)
        .bind(id.as_str())
        .bind(reporter.as_str())
        .bind(reported.as_str())
        .bind(reason)
        .execute(pool)
        .await?;
    Ok(())
}

#[tracing::instrument(skip(pool), err)]
pub async fn count_reports_against(pool: &Db, reported: &UserId) -> Result<i64, sqlx::Error> {
    let q = sql("SELECT COUNT(*) FROM reports WHERE reported_id = ?");
    let (count,): (i64,) = sqlx::query_as(&q)
        .bind(reported.as_str())
        .fetch_one(pool)
        .await?;
    Ok(count)
}
