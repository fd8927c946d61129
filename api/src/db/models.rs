use serde::Serialize;
use sqlx::types::Json;
use studybuddy_common::error::StudyError;
use studybuddy_common::matching::{PartnerKey, RequestView};

/// SQLite stores timestamps as TEXT, so they surface as `String`;
/// PostgreSQL uses TIMESTAMPTZ and the chrono type.
#[cfg(not(feature = "postgres"))]
pub type Timestamp = String;
#[cfg(feature = "postgres")]
pub type Timestamp = chrono::DateTime<chrono::Utc>;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub computing_id: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: String,
    pub bio: String,
    pub courses: Json<Vec<String>>,
    pub study_times: Json<Vec<String>>,
    pub meeting_preference: String,
    pub selected_avatar: Option<String>,
    #[serde(skip_serializing)]
    pub photo_key: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl UserRow {
    pub fn photo_url(&self) -> Option<String> {
        self.photo_key
            .as_ref()
            .map(|_| format!("/v1/user/{}/photo", self.id))
    }

    /// Public profile shape. Email stays private to the owner.
    pub fn public_profile(&self) -> serde_json::Value {
        serde_json::json!({
            "uid": self.id,
            "name": self.name,
            "computing_id": self.computing_id,
            "bio": self.bio,
            "courses": self.courses,
            "study_times": self.study_times,
            "meeting_preference": self.meeting_preference,
            "selected_avatar": self.selected_avatar,
            "photo_url": self.photo_url(),
        })
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MatchRequestRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: Option<String>,
    pub course: String,
    pub study_time: String,
    pub meeting_preference: String,
    pub bio: String,
    pub status: String,
    pub is_direct: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl MatchRequestRow {
    pub fn view(&self) -> Result<RequestView<'_>, StudyError> {
        Ok(RequestView {
            id: &self.id,
            sender_id: &self.sender_id,
            receiver_id: self.receiver_id.as_deref(),
            course: &self.course,
            status: self.status.parse()?,
            is_direct: self.is_direct,
        })
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PartnerRow {
    pub id: String,
    pub user_a: String,
    pub user_b: String,
    pub course: String,
    pub created_at: Timestamp,
}

impl PartnerRow {
    pub fn key(&self) -> PartnerKey {
        PartnerKey {
            user_a: self.user_a.clone(),
            user_b: self.user_b.clone(),
            course: self.course.clone(),
        }
    }

    pub fn other(&self, user_id: &str) -> &str {
        if self.user_a == user_id {
            &self.user_b
        } else {
            &self.user_a
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ChatRow {
    pub id: String,
    pub user_a: String,
    pub user_b: String,
    pub shared_courses: Json<Vec<String>>,
    pub created_at: Timestamp,
}

impl ChatRow {
    pub fn other(&self, user_id: &str) -> &str {
        if self.user_a == user_id {
            &self.user_b
        } else {
            &self.user_a
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ChatParticipantRow {
    pub chat_id: String,
    pub user_id: String,
    /// Highest message `seq` the user has seen; `None` until they open the chat.
    pub last_read_seq: Option<i64>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MessageRow {
    /// Insertion order within the whole table.
    pub seq: i64,
    pub id: String,
    pub chat_id: String,
    /// `None` for system messages.
    pub sender_id: Option<String>,
    pub text: String,
    pub sent_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct NoteRow {
    pub id: String,
    pub author_id: String,
    pub title: String,
    pub course: String,
    #[serde(skip_serializing)]
    pub media_key: String,
    pub content_type: String,
    pub size: i64,
    pub rating: f64,
    pub rating_count: i64,
    pub created_at: Timestamp,
}

impl NoteRow {
    pub fn media_url(&self) -> String {
        format!("/v1/notes/{}/media", self.id)
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct BlockRow {
    pub blocker_id: String,
    pub blocked_id: String,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CourseRow {
    pub code: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PushSubscriptionRow {
    pub id: String,
    pub user_id: String,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    pub created_at: Timestamp,
}
