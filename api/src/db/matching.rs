use sqlx::types::Json;
use studybuddy_common::matching::{MatchStatus, PartnerKey};

use super::models::{ChatRow, MatchRequestRow};
use super::{Db, now, sql};
use crate::types::{ChatId, MatchRequestId, MessageId, PartnerId, UserId};

#[derive(Debug, Clone, Copy)]
pub struct NewMatchRequest<'a> {
    pub sender_id: &'a UserId,
    /// Set for direct requests; open requests start without a receiver.
    pub receiver_id: Option<&'a UserId>,
    pub course: &'a str,
    pub study_time: &'a str,
    pub meeting_preference: &'a str,
    pub bio: &'a str,
}

#[tracing::instrument(skip(pool), err)]
pub async fn create_request(
    pool: &Db,
    id: &MatchRequestId,
    req: NewMatchRequest<'_>,
) -> Result<(), sqlx::Error> {
    let q = sql("INSERT INTO match_requests
            (id, sender_id, receiver_id, course, study_time, meeting_preference, bio, is_direct)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)");
    sqlx::query(&q)
        .bind(id.as_str())
        .bind(req.sender_id.as_str())
        .bind(req.receiver_id.map(UserId::as_str))
        .bind(req.course)
        .bind(req.study_time)
        .bind(req.meeting_preference)
        .bind(req.bio)
        .bind(req.receiver_id.is_some())
        .execute(pool)
        .await?;
    Ok(())
}

#[tracing::instrument(skip(pool), err)]
pub async fn get_request(
    pool: &Db,
    id: &MatchRequestId,
) -> Result<Option<MatchRequestRow>, sqlx::Error> {
    let q = sql("SELECT * FROM match_requests WHERE id = ?");
    sqlx::query_as::<_, MatchRequestRow>(&q)
        .bind(id.as_str())
        .fetch_optional(pool)
        .await
}

/// Pending requests without a receiver, optionally for one course.
#[tracing::instrument(skip(pool), err)]
pub async fn list_open(
    pool: &Db,
    course: Option<&str>,
) -> Result<Vec<MatchRequestRow>, sqlx::Error> {
    let q = sql("SELECT * FROM match_requests
         WHERE status = 'pending' AND receiver_id IS NULL AND (? IS NULL OR course = ?)
         ORDER BY created_at DESC");
    sqlx::query_as::<_, MatchRequestRow>(&q)
        .bind(course)
        .bind(course)
        .fetch_all(pool)
        .await
}

#[tracing::instrument(skip(pool), err)]
pub async fn list_sent(pool: &Db, sender: &UserId) -> Result<Vec<MatchRequestRow>, sqlx::Error> {
    let q = sql("SELECT * FROM match_requests WHERE sender_id = ? ORDER BY created_at DESC");
    sqlx::query_as::<_, MatchRequestRow>(&q)
        .bind(sender.as_str())
        .fetch_all(pool)
        .await
}

/// Pending requests where the user is sender or receiver.
#[tracing::instrument(skip(pool), err)]
pub async fn list_pending_involving(
    pool: &Db,
    user_id: &UserId,
) -> Result<Vec<MatchRequestRow>, sqlx::Error> {
    let q = sql("SELECT * FROM match_requests
         WHERE status = 'pending' AND (sender_id = ? OR receiver_id = ?)
         ORDER BY updated_at DESC");
    sqlx::query_as::<_, MatchRequestRow>(&q)
        .bind(user_id.as_str())
        .bind(user_id.as_str())
        .fetch_all(pool)
        .await
}

#[tracing::instrument(skip(pool), err)]
pub async fn has_open_request(
    pool: &Db,
    sender: &UserId,
    course: &str,
) -> Result<bool, sqlx::Error> {
    let q = sql("SELECT 1 FROM match_requests
         WHERE sender_id = ? AND course = ? AND status = 'pending' AND receiver_id IS NULL");
    let row: Option<(i32,)> = sqlx::query_as(&q)
        .bind(sender.as_str())
        .bind(course)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

/// Whether `sender` already has a pending direct request to `receiver` for
/// the course.
#[tracing::instrument(skip(pool), err)]
pub async fn has_pending_direct(
    pool: &Db,
    sender: &UserId,
    receiver: &UserId,
    course: &str,
) -> Result<bool, sqlx::Error> {
    let q = sql("SELECT 1 FROM match_requests
         WHERE sender_id = ? AND receiver_id = ? AND course = ? AND status = 'pending' AND is_direct = ?");
    let row: Option<(i32,)> = sqlx::query_as(&q)
        .bind(sender.as_str())
        .bind(receiver.as_str())
        .bind(course)
        .bind(true)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

/// Open requests `applicant` has claimed, in any status.
#[tracing::instrument(skip(pool), err)]
pub async fn list_applied(
    pool: &Db,
    applicant: &UserId,
) -> Result<Vec<MatchRequestRow>, sqlx::Error> {
    let q = sql("SELECT * FROM match_requests
         WHERE receiver_id = ? AND is_direct = ?
         ORDER BY updated_at DESC");
    sqlx::query_as::<_, MatchRequestRow>(&q)
        .bind(applicant.as_str())
        .bind(false)
        .fetch_all(pool)
        .await
}

/// Claims an open request. Returns false when someone else got there first.
#[tracing::instrument(skip(pool), err)]
pub async fn apply(
    pool: &Db,
    id: &MatchRequestId,
    applicant: &UserId,
) -> Result<bool, sqlx::Error> {
    let q = sql("UPDATE match_requests SET receiver_id = ?, updated_at = ?
         WHERE id = ? AND receiver_id IS NULL AND status = 'pending'");
    let result = sqlx::query(&q)
        .bind(applicant.as_str())
        .bind(now())
        .bind(id.as_str())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Moves a pending request to `status`. Returns false if it was not pending.
#[tracing::instrument(skip(pool), err)]
pub async fn set_status(
    pool: &Db,
    id: &MatchRequestId,
    status: MatchStatus,
) -> Result<bool, sqlx::Error> {
    let q = sql(
        "UPDATE match_requests SET status = ?, updated_at = ? WHERE id = ? AND status = 'pending'",
    );
    let result = sqlx::query(&q)
        .bind(status.as_str())
        .bind(now())
        .bind(id.as_str())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Deletes a request owned by `sender`.
#[tracing::instrument(skip(pool), err)]
pub async fn delete_request(
    pool: &Db,
    id: &MatchRequestId,
    sender: &UserId,
) -> Result<bool, sqlx::Error> {
    let q = sql("DELETE FROM match_requests WHERE id = ? AND sender_id = ?");
    let result = sqlx::query(&q)
        .bind(id.as_str())
        .bind(sender.as_str())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[derive(Debug, Clone)]
pub struct Accepted {
    pub partner_id: PartnerId,
    pub chat_id: ChatId,
    pub key: PartnerKey,
}

/// Accepts a pending request and links the two users.
///
/// In one transaction: marks the request accepted, creates the partner row
/// unless the pair already partners on that course, creates the pair's chat
/// or adds the course to its shared courses, and posts a system message.
/// Returns `None` when the request was no longer pending.
#[tracing::instrument(skip(pool), err)]
pub async fn accept_request(
    pool: &Db,
    id: &MatchRequestId,
    key: &PartnerKey,
) -> Result<Option<Accepted>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let at = now();

    let q = sql("UPDATE match_requests SET status = 'accepted', updated_at = ?
         WHERE id = ? AND status = 'pending'");
    let updated = sqlx::query(&q)
        .bind(&at)
        .bind(id.as_str())
        .execute(&mut *tx)
        .await?;
    if updated.rows_affected() == 0 {
        return Ok(None);
    }

    let q = sql("INSERT INTO partners (id, user_a, user_b, course) VALUES (?, ?, ?, ?)
         ON CONFLICT (user_a, user_b, course) DO NOTHING");
    sqlx::query(&q)
        .bind(PartnerId::new_v4().as_str())
        .bind(&key.user_a)
        .bind(&key.user_b)
        .bind(&key.course)
        .execute(&mut *tx)
        .await?;

    let q = sql("SELECT id FROM partners WHERE user_a = ? AND user_b = ? AND course = ?");
    let (partner_id,): (String,) = sqlx::query_as(&q)
        .bind(&key.user_a)
        .bind(&key.user_b)
        .bind(&key.course)
        .fetch_one(&mut *tx)
        .await?;

    let q = sql("SELECT * FROM chats WHERE user_a = ? AND user_b = ?");
    let existing = sqlx::query_as::<_, ChatRow>(&q)
        .bind(&key.user_a)
        .bind(&key.user_b)
        .fetch_optional(&mut *tx)
        .await?;

    let chat_id = match existing {
        Some(chat) => {
            let mut courses = chat.shared_courses.0;
            if !courses.contains(&key.course) {
                courses.push(key.course.clone());
                let q = sql("UPDATE chats SET shared_courses = ? WHERE id = ?");
                sqlx::query(&q)
                    .bind(Json(courses))
                    .bind(&chat.id)
                    .execute(&mut *tx)
                    .await?;
            }
            ChatId(chat.id)
        }
        None => {
            let chat_id = ChatId::new_v4();
            let q = sql("INSERT INTO chats (id, user_a, user_b, shared_courses) VALUES (?, ?, ?, ?)");
            sqlx::query(&q)
                .bind(chat_id.as_str())
                .bind(&key.user_a)
                .bind(&key.user_b)
                .bind(Json(vec![key.course.clone()]))
                .execute(&mut *tx)
                .await?;
            let q = sql("INSERT INTO chat_participants (chat_id, user_id) VALUES (?, ?)");
            for member in [&key.user_a, &key.user_b] {
                sqlx::query(&q)
                    .bind(chat_id.as_str())
                    .bind(member)
                    .execute(&mut *tx)
                    .await?;
            }
            chat_id
        }
    };

    let q = sql("INSERT INTO messages (id, chat_id, sender_id, text, sent_at) VALUES (?, ?, NULL, ?, ?)");
    sqlx::query(&q)
        .bind(MessageId::new_v4().as_str())
        .bind(chat_id.as_str())
        .bind(format!("You are now study partners for {}.", key.course))
        .bind(&at)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(Some(Accepted {
        partner_id: PartnerId(partner_id),
        chat_id,
        key: key.clone(),
    }))
}

#[cfg(all(test, not(feature = "postgres")))]
mod tests {
    use std::collections::HashSet;

    use studybuddy_common::matching::filter_open_requests;

    use super::*;
    use crate::db::{chat, fixtures, messages, partners, test_pool};

    async fn open_request(pool: &Db, sender: &UserId, course: &str) -> MatchRequestId {
        let id = MatchRequestId::new_v4();
        create_request(
            pool,
            &id,
            NewMatchRequest {
                sender_id: sender,
                receiver_id: None,
                course,
                study_time: "Tue 7pm",
                meeting_preference: "in person",
                bio: "",
            },
        )
        .await
        .unwrap();
        id
    }

    #[tokio::test]
    async fn open_list_contains_every_other_pending_request() {
        let pool = test_pool().await;
        let alice = fixtures::user(&pool, "alice", &["CS 2100"]).await;
        let mut others = Vec::new();
        for name in ["bob", "carol", "dave"] {
            let user = fixtures::user(&pool, name, &["CS 2100"]).await;
            open_request(&pool, &user, "CS 2100").await;
            others.push(user);
        }
        open_request(&pool, &alice, "CS 2100").await;
        open_request(&pool, &others[0], "MATH 3351").await;

        let rows = list_open(&pool, Some("CS 2100")).await.unwrap();
        assert_eq!(rows.len(), 4);
        let views = rows.iter().map(|r| r.view().unwrap());
        let visible = filter_open_requests(
            views,
            alice.as_str(),
            Some("CS 2100"),
            &HashSet::new(),
            &HashSet::new(),
        );
        assert_eq!(visible.len(), 3);
        assert!(visible.iter().all(|r| r.sender_id != "alice"));

        assert_eq!(list_open(&pool, None).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn apply_claims_request_once() {
        let pool = test_pool().await;
        let bob = fixtures::user(&pool, "bob", &[]).await;
        let alice = fixtures::user(&pool, "alice", &[]).await;
        let carol = fixtures::user(&pool, "carol", &[]).await;
        let id = open_request(&pool, &bob, "CS 2100").await;

        assert!(has_open_request(&pool, &bob, "CS 2100").await.unwrap());
        assert!(apply(&pool, &id, &alice).await.unwrap());
        assert!(!apply(&pool, &id, &carol).await.unwrap());
        assert!(!has_open_request(&pool, &bob, "CS 2100").await.unwrap());

        let row = get_request(&pool, &id).await.unwrap().unwrap();
        assert_eq!(row.receiver_id.as_deref(), Some("alice"));
        assert!(list_open(&pool, None).await.unwrap().is_empty());
        assert_eq!(
            list_pending_involving(&pool, &alice).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn accept_creates_one_partner_and_one_chat() {
        let pool = test_pool().await;
        let alice = fixtures::user(&pool, "alice", &[]).await;
        let bob = fixtures::user(&pool, "bob", &[]).await;

        let first = open_request(&pool, &bob, "CS 2100").await;
        apply(&pool, &first, &alice).await.unwrap();
        let key = PartnerKey::new("bob", "alice", "CS 2100").unwrap();
        let accepted = accept_request(&pool, &first, &key).await.unwrap().unwrap();

        // accepting again is a no-op
        assert!(accept_request(&pool, &first, &key).await.unwrap().is_none());

        let second = open_request(&pool, &alice, "CS 3140").await;
        apply(&pool, &second, &bob).await.unwrap();
        let key2 = PartnerKey::new("alice", "bob", "CS 3140").unwrap();
        let accepted2 = accept_request(&pool, &second, &key2)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(accepted.chat_id, accepted2.chat_id);
        assert_ne!(accepted.partner_id, accepted2.partner_id);

        let partners = partners::list_partners(&pool, &alice).await.unwrap();
        assert_eq!(partners.len(), 2);

        let chats = chat::list_user_chats(&pool, &bob).await.unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(
            chats[0].shared_courses.0,
            vec!["CS 2100".to_string(), "CS 3140".to_string()]
        );

        let (msgs, total) = messages::get_messages(&pool, &accepted.chat_id, &alice, -50, 0)
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert!(msgs.iter().all(|m| m.sender_id.is_none()));
    }

    #[tokio::test]
    async fn applied_requests_keep_their_status() {
        let pool = test_pool().await;
        let bob = fixtures::user(&pool, "bob", &[]).await;
        let carol = fixtures::user(&pool, "carol", &[]).await;
        let alice = fixtures::user(&pool, "alice", &[]).await;
        let first = open_request(&pool, &bob, "CS 2100").await;
        let second = open_request(&pool, &carol, "CS 2100").await;
        open_request(&pool, &carol, "MATH 3351").await;

        apply(&pool, &first, &alice).await.unwrap();
        apply(&pool, &second, &alice).await.unwrap();
        set_status(&pool, &second, MatchStatus::Rejected).await.unwrap();

        let applied = list_applied(&pool, &alice).await.unwrap();
        assert_eq!(applied.len(), 2);
        let status_of = |id: &MatchRequestId| {
            applied
                .iter()
                .find(|r| r.id == id.as_str())
                .map(|r| r.status.clone())
        };
        assert_eq!(status_of(&first).as_deref(), Some("pending"));
        assert_eq!(status_of(&second).as_deref(), Some("rejected"));
        assert!(list_applied(&pool, &bob).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pending_direct_requests_are_detected() {
        let pool = test_pool().await;
        let alice = fixtures::user(&pool, "alice", &[]).await;
        let bob = fixtures::user(&pool, "bob", &[]).await;
        let id = MatchRequestId::new_v4();
        create_request(
            &pool,
            &id,
            NewMatchRequest {
                sender_id: &alice,
                receiver_id: Some(&bob),
                course: "CS 2100",
                study_time: "",
                meeting_preference: "",
                bio: "",
            },
        )
        .await
        .unwrap();

        assert!(has_pending_direct(&pool, &alice, &bob, "CS 2100").await.unwrap());
        assert!(!has_pending_direct(&pool, &bob, &alice, "CS 2100").await.unwrap());
        assert!(!has_pending_direct(&pool, &alice, &bob, "CS 3140").await.unwrap());
        // direct requests are not open requests
        assert!(!has_open_request(&pool, &alice, "CS 2100").await.unwrap());
        assert!(list_applied(&pool, &bob).await.unwrap().is_empty());

        set_status(&pool, &id, MatchStatus::Rejected).await.unwrap();
        assert!(!has_pending_direct(&pool, &alice, &bob, "CS 2100").await.unwrap());
    }

    #[tokio::test]
    async fn reject_and_delete() {
        let pool = test_pool().await;
        let bob = fixtures::user(&pool, "bob", &[]).await;
        let alice = fixtures::user(&pool, "alice", &[]).await;
        let id = open_request(&pool, &bob, "CS 2100").await;

        assert!(set_status(&pool, &id, MatchStatus::Rejected).await.unwrap());
        assert!(!set_status(&pool, &id, MatchStatus::Accepted).await.unwrap());
        assert_eq!(list_sent(&pool, &bob).await.unwrap()[0].status, "rejected");

        assert!(!delete_request(&pool, &id, &alice).await.unwrap());
        assert!(delete_request(&pool, &id, &bob).await.unwrap());
        assert!(get_request(&pool, &id).await.unwrap().is_none());
    }
}
