use super::models::PushSubscriptionRow;
use super::{Db, sql};
use crate::types::{SubscriptionId, UserId};

#[tracing::instrument(skip(pool, p256dh, auth), err)]
pub async fn upsert_subscription(
    pool: &Db,
    id: &SubscriptionId,
    user_id: &UserId,
    endpoint: &str,
    p256dh: &str,
    auth: &str,
) -> Result<(), sqlx::Error> {
    // Same endpoint + user updates the keys; one device may serve several accounts.
    let q = sql(
        "INSERT INTO push_subscriptions (id, user_id, endpoint, p256dh, auth)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(endpoint, user_id) DO UPDATE SET
            p256dh = excluded.p256dh,
            auth = excluded.auth",
    );
    sqlx::query(&q)
        .bind(id.as_str())
        .bind(user_id.as_str())
        .bind(endpoint)
        .bind(p256dh)
        .bind(auth)
        .execute(pool)
        .await?;
    Ok(())
}

#[tracing::instrument(skip(pool), err)]
pub async fn get_subscriptions_for_user(
    pool: &Db,
    user_id: &UserId,
) -> Result<Vec<PushSubscriptionRow>, sqlx::Error> {
    let q = sql("SELECT * FROM push_subscriptions WHERE user_id = ?");
    sqlx::query_as::<_, PushSubscriptionRow>(&q)
        .bind(user_id.as_str())
        .fetch_all(pool)
        .await
}

#[tracing::instrument(skip(pool), err)]
pub async fn delete_subscription_by_endpoint(pool: &Db, endpoint: &str) -> Result<(), sqlx::Error> {
    let q = sql("DELETE FROM push_subscriptions WHERE endpoint = ?");
    sqlx::query(&q).bind(endpoint).execute(pool).await?;
    Ok(())
}

#[tracing::instrument(skip(pool), err)]
pub async fn delete_subscription(
    pool: &Db,
    user_id: &UserId,
    endpoint: &str,
) -> Result<bool, sqlx::Error> {
    let q = sql("DELETE FROM push_subscriptions WHERE user_id = ? AND endpoint = ?");
    let result = sqlx::query(&q)
        .bind(user_id.as_str())
        .bind(endpoint)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(all(test, not(feature = "postgres")))]
mod tests {
    use super::*;
    use crate::db::{fixtures, test_pool};

    #[tokio::test]
    async fn upsert_replaces_keys_for_same_endpoint() {
        let pool = test_pool().await;
        let alice = fixtures::user(&pool, "alice", &[]).await;
        let endpoint = "https://push.example.com/abc";

        upsert_subscription(&pool, &SubscriptionId::new_v4(), &alice, endpoint, "k1", "a1")
            .await
            .unwrap();
        upsert_subscription(&pool, &SubscriptionId::new_v4(), &alice, endpoint, "k2", "a2")
            .await
            .unwrap();

        let subs = get_subscriptions_for_user(&pool, &alice).await.unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].p256dh, "k2");

        assert!(delete_subscription(&pool, &alice, endpoint).await.unwrap());
        assert!(get_subscriptions_for_user(&pool, &alice).await.unwrap().is_empty());
    }
}
