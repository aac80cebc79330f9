use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// Ids are opaque UUID strings; the store never interprets them.
pub type Id = String;

pub fn new_id() -> Id {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: Id,
    pub role: Role,
    pub email: String,
    #[serde(skip_serializing, default)]
    #[schema(skip)]
    pub credential_hash: String, // owned by the external auth service, never exposed
    pub credits: i64,
    pub name: String,
    pub university: Option<String>,
    pub department: Option<String>,
    pub anon_id: String, // display alias, distinct from `id`
    pub reg_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewUser {
    pub id: Id,
    pub role: Role,
    pub email: String,
    pub credential_hash: String,
    pub name: String,
    pub university: Option<String>,
    pub department: Option<String>,
    pub anon_id: String,
    pub reg_number: Option<String>,
}

/// Public projection used by connection / pending / suggestion listings.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserSummary {
    pub id: Id,
    pub anon_id: String,
    pub name: String,
    pub role: Role,
}

impl From<&User> for UserSummary {
    fn from(u: &User) -> Self {
        Self { id: u.id.clone(), anon_id: u.anon_id.clone(), name: u.name.clone(), role: u.role }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FollowRequest {
    pub id: Id,
    pub from: Id,
    pub to: Id,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
}

/// A realized, symmetric relationship. Invariant: `user1 <= user2`
/// (canonical order), so pair uniqueness is checkable without direction
/// games.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Connection {
    pub id: Id,
    pub user1: Id,
    pub user2: Id,
    pub created_at: DateTime<Utc>,
}

impl Connection {
    /// Canonical unordered pair for {a, b}.
    pub fn pair(a: &str, b: &str) -> (String, String) {
        if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        }
    }

    pub fn links(&self, user: &str) -> bool {
        self.user1 == user || self.user2 == user
    }

    /// The other side of the connection, if `user` is part of it.
    pub fn peer_of(&self, user: &str) -> Option<&str> {
        if self.user1 == user {
            Some(&self.user2)
        } else if self.user2 == user {
            Some(&self.user1)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Answer {
    pub id: Id,
    pub text: String,
    pub posted_by: String,
    pub user_id: Id,
    pub is_anonymous: bool,
    pub accepted: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Post {
    pub id: Id,
    pub question: String,
    pub posted_by: String, // anon_id when anonymous, display name otherwise
    pub user_id: Id,
    pub is_anonymous: bool,
    pub likes: i64,
    pub answers: Vec<Answer>, // append-only, except for the acceptance flag
    pub accepted_answer_id: Option<Id>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewQuestion {
    pub question: String,
    #[serde(default = "default_true")]
    pub is_anonymous: bool,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewAnswer {
    pub text: String,
    #[serde(default = "default_true")]
    pub is_anonymous: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PostFilter {
    #[default]
    Recent,
    Mine,
    Connections,
}

pub const BADGE_ACCEPTED_ANSWER: &str = "Accepted Answer";

/// Immutable audit record of one credit award.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Badge {
    pub id: Id,
    pub user_id: Id,
    #[serde(rename = "type")]
    pub kind: String,
    pub points: i64,
    pub post_id: Id,
    pub answer_id: Id,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Message {
    pub id: Id,
    pub sender_id: Id,
    pub receiver_id: Id,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Group {
    pub id: Id,
    pub name: String,
    pub description: String,
    pub profile_pic: String,
    pub is_private: bool,
    #[serde(skip_serializing, default)]
    #[schema(skip)]
    pub created_by: Id, // hidden from clients for anonymity
    pub members: Vec<Id>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewGroup {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub profile_pic: String,
    #[serde(default)]
    pub is_private: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GroupMessage {
    pub id: Id,
    pub group_id: Id,
    pub sender_id: Option<Id>, // None for system notices
    pub sender_anon_id: Option<String>,
    pub text: String,
    pub system: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MoodEntry {
    pub id: Id,
    pub user_id: Id,
    pub mood: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Grade {
    pub id: Id,
    pub reg_number: String,
    pub subject: String,
    pub marks: String, // kept verbatim; the source never parsed marks numerically
    pub teacher_name: String,
    pub file_name: String,
    pub date: String,
    pub semester: String,
    pub department: String,
    pub test_type: String,
    pub uploaded_at: DateTime<Utc>,
}
