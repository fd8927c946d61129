use std::collections::{HashMap, HashSet};

use sqlx::types::Json;
use studybuddy_common::matching::PartnerKey;

use super::models::{ChatRow, PartnerRow};
use super::{Db, sql};
use crate::types::{PartnerId, UserId};

#[tracing::instrument(skip(pool), err)]
pub async fn list_partners(pool: &Db, user_id: &UserId) -> Result<Vec<PartnerRow>, sqlx::Error> {
    let q = sql("SELECT * FROM partners WHERE user_a = ? OR user_b = ? ORDER BY created_at DESC");
    sqlx::query_as::<_, PartnerRow>(&q)
        .bind(user_id.as_str())
        .bind(user_id.as_str())
        .fetch_all(pool)
        .await
}

/// Every (pair, course) the user currently partners on.
#[tracing::instrument(skip(pool), err)]
pub async fn partner_keys(pool: &Db, user_id: &UserId) -> Result<HashSet<PartnerKey>, sqlx::Error> {
    Ok(list_partners(pool, user_id)
        .await?
        .iter()
        .map(PartnerRow::key)
        .collect())
}

#[tracing::instrument(skip(pool), err)]
pub async fn get_partner(pool: &Db, id: &PartnerId) -> Result<Option<PartnerRow>, sqlx::Error> {
    let q = sql("SELECT * FROM partners WHERE id = ?");
    sqlx::query_as::<_, PartnerRow>(&q)
        .bind(id.as_str())
        .fetch_optional(pool)
        .await
}

#[tracing::instrument(skip(pool), err)]
pub async fn is_partner(pool: &Db, a: &UserId, b: &UserId) -> Result<bool, sqlx::Error> {
    let q = sql("SELECT 1 FROM partners WHERE (user_a = ? AND user_b = ?) OR (user_a = ? AND user_b = ?)");
    let row: Option<(i32,)> = sqlx::query_as(&q)
        .bind(a.as_str())
        .bind(b.as_str())
        .bind(b.as_str())
        .bind(a.as_str())
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

/// Records that `user_id` wants the partnership to end and returns every
/// user who has asked so far.
///
/// Each request is its own row, so two partners asking at the same moment
/// never overwrite each other. The read runs after the insert committed,
/// which means at least one of two concurrent callers sees both requests.
#[tracing::instrument(skip(pool), err)]
pub async fn record_delete_request(
    pool: &Db,
    id: &PartnerId,
    user_id: &UserId,
) -> Result<Vec<String>, sqlx::Error> {
    let q = sql("INSERT INTO partner_delete_requests (partner_id, user_id) VALUES (?, ?)
         ON CONFLICT (partner_id, user_id) DO NOTHING");
    sqlx::query(&q)
        .bind(id.as_str())
        .bind(user_id.as_str())
        .execute(pool)
        .await?;
    delete_requests(pool, id).await
}

/// Returns whether the user had an outstanding request.
#[tracing::instrument(skip(pool), err)]
pub async fn withdraw_delete_request(
    pool: &Db,
    id: &PartnerId,
    user_id: &UserId,
) -> Result<bool, sqlx::Error> {
    let q = sql("DELETE FROM partner_delete_requests WHERE partner_id = ? AND user_id = ?");
    let result = sqlx::query(&q)
        .bind(id.as_str())
        .bind(user_id.as_str())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[tracing::instrument(skip(pool), err)]
pub async fn delete_requests(pool: &Db, id: &PartnerId) -> Result<Vec<String>, sqlx::Error> {
    let q = sql("SELECT user_id FROM partner_delete_requests WHERE partner_id = ? ORDER BY created_at ASC");
    let rows: Vec<(String,)> = sqlx::query_as(&q)
        .bind(id.as_str())
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|(user,)| user).collect())
}

/// Outstanding delete requests on every partnership of `user_id`, keyed by
/// partner id.
#[tracing::instrument(skip(pool), err)]
pub async fn delete_requests_for_user(
    pool: &Db,
    user_id: &UserId,
) -> Result<HashMap<String, Vec<String>>, sqlx::Error> {
    let q = sql("SELECT r.partner_id, r.user_id FROM partner_delete_requests r
         INNER JOIN partners p ON p.id = r.partner_id
         WHERE p.user_a = ? OR p.user_b = ?
         ORDER BY r.created_at ASC");
    let rows: Vec<(String, String)> = sqlx::query_as(&q)
        .bind(user_id.as_str())
        .bind(user_id.as_str())
        .fetch_all(pool)
        .await?;
    let mut requests: HashMap<String, Vec<String>> = HashMap::new();
    for (partner_id, user) in rows {
        requests.entry(partner_id).or_default().push(user);
    }
    Ok(requests)
}

/// Removes a partnership and keeps the pair's chat consistent with it.
///
/// The course leaves the chat's shared courses; when no partnership remains
/// between the two users the chat and its messages are deleted.
/// Returns whether the chat was deleted, or `None` when the partnership was
/// already gone.
#[tracing::instrument(skip(pool), err)]
pub async fn delete_partner(pool: &Db, partner: &PartnerRow) -> Result<Option<bool>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let q = sql("DELETE FROM partners WHERE id = ?");
    let deleted = sqlx::query(&q)
        .bind(&partner.id)
        .execute(&mut *tx)
        .await?;
    if deleted.rows_affected() == 0 {
        return Ok(None);
    }

    let q = sql("SELECT COUNT(*) FROM partners WHERE user_a = ? AND user_b = ?");
    let (remaining,): (i64,) = sqlx::query_as(&q)
        .bind(&partner.user_a)
        .bind(&partner.user_b)
        .fetch_one(&mut *tx)
        .await?;

    let q = sql("SELECT * FROM chats WHERE user_a = ? AND user_b = ?");
    let chat = sqlx::query_as::<_, ChatRow>(&q)
        .bind(&partner.user_a)
        .bind(&partner.user_b)
        .fetch_optional(&mut *tx)
        .await?;

    let mut chat_deleted = false;
    if let Some(chat) = chat {
        if remaining == 0 {
            let q = sql("DELETE FROM chats WHERE id = ?");
            sqlx::query(&q).bind(&chat.id).execute(&mut *tx).await?;
            chat_deleted = true;
        } else {
            let courses: Vec<String> = chat
                .shared_courses
                .0
                .into_iter()
                .filter(|c| *c != partner.course)
                .collect();
            let q = sql("UPDATE chats SET shared_courses = ? WHERE id = ?");
            sqlx::query(&q)
                .bind(Json(courses))
                .bind(&chat.id)
                .execute(&mut *tx)
                .await?;
        }
    }

    tx.commit().await?;
    Ok(Some(chat_deleted))
}

#[cfg(all(test, not(feature = "postgres")))]
mod tests {
    use studybuddy_common::partner::{ConsentState, consent_state};

    use super::*;
    use crate::db::{chat, fixtures, test_pool};

    #[tokio::test]
    async fn chat_survives_until_last_partnership_ends() {
        let pool = test_pool().await;
        let alice = fixtures::user(&pool, "alice", &[]).await;
        let bob = fixtures::user(&pool, "bob", &[]).await;
        fixtures::partner_up(&pool, &alice, &bob, "CS 2100").await;
        fixtures::partner_up(&pool, &bob, &alice, "CS 3140").await;

        assert!(is_partner(&pool, &bob, &alice).await.unwrap());
        let keys = partner_keys(&pool, &alice).await.unwrap();
        assert!(keys.contains(&PartnerKey::new("bob", "alice", "CS 3140").unwrap()));

        let rows = list_partners(&pool, &alice).await.unwrap();
        let cs2100 = rows.iter().find(|p| p.course == "CS 2100").unwrap();
        assert_eq!(delete_partner(&pool, cs2100).await.unwrap(), Some(false));
        // a second delete finds nothing
        assert_eq!(delete_partner(&pool, cs2100).await.unwrap(), None);

        let chats = chat::list_user_chats(&pool, &alice).await.unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].shared_courses.0, vec!["CS 3140".to_string()]);

        let rows = list_partners(&pool, &alice).await.unwrap();
        assert_eq!(delete_partner(&pool, &rows[0]).await.unwrap(), Some(true));
        assert!(chat::list_user_chats(&pool, &alice).await.unwrap().is_empty());
        assert!(!is_partner(&pool, &alice, &bob).await.unwrap());
    }

    #[tokio::test]
    async fn delete_requests_are_recorded_per_user() {
        let pool = test_pool().await;
        let alice = fixtures::user(&pool, "alice", &[]).await;
        let bob = fixtures::user(&pool, "bob", &[]).await;
        let accepted = fixtures::partner_up(&pool, &alice, &bob, "CS 2100").await;
        let id = accepted.partner_id;

        assert_eq!(
            record_delete_request(&pool, &id, &alice).await.unwrap(),
            vec!["alice".to_string()]
        );
        // asking twice keeps one entry
        assert_eq!(record_delete_request(&pool, &id, &alice).await.unwrap().len(), 1);

        let by_partner = delete_requests_for_user(&pool, &bob).await.unwrap();
        assert_eq!(by_partner[id.as_str()], vec!["alice".to_string()]);

        assert!(withdraw_delete_request(&pool, &id, &alice).await.unwrap());
        assert!(!withdraw_delete_request(&pool, &id, &alice).await.unwrap());
        assert!(delete_requests(&pool, &id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn simultaneous_delete_requests_both_count() {
        let pool = test_pool().await;
        let alice = fixtures::user(&pool, "alice", &[]).await;
        let bob = fixtures::user(&pool, "bob", &[]).await;
        let accepted = fixtures::partner_up(&pool, &alice, &bob, "CS 2100").await;
        let id = accepted.partner_id;

        // both sides load the row before either request lands
        let seen_by_alice = get_partner(&pool, &id).await.unwrap().unwrap();
        let seen_by_bob = get_partner(&pool, &id).await.unwrap().unwrap();

        let (for_alice, for_bob) = tokio::join!(
            record_delete_request(&pool, &id, &alice),
            record_delete_request(&pool, &id, &bob),
        );
        let states = [
            consent_state(&seen_by_alice.key(), &for_alice.unwrap()),
            consent_state(&seen_by_bob.key(), &for_bob.unwrap()),
        ];
        assert!(states.contains(&ConsentState::Complete));

        assert_eq!(delete_partner(&pool, &seen_by_bob).await.unwrap(), Some(true));
        assert!(get_partner(&pool, &id).await.unwrap().is_none());
        // the requests go with the partnership
        assert!(delete_requests(&pool, &id).await.unwrap().is_empty());
    }
}
