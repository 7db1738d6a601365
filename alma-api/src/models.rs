use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::schema::{conversations, messages, otps, pre_verified_users, users};

// --- Users ---

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub enrollment_no: String,
    pub email: String,
    pub name: String,
    pub role: String,
    pub avatar_url: Option<String>,
    pub cover_url: Option<String>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub username: String,
    pub enrollment_no: String,
    pub email: String,
    pub name: String,
    pub role: String,
}

/// Fields safe to show to other members.
#[derive(Debug, Serialize, Clone)]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub name: String,
    pub role: String,
    pub avatar_url: Option<String>,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            name: user.name.clone(),
            role: user.role.clone(),
            avatar_url: user.avatar_url.clone(),
        }
    }
}

// --- Pre-verified roster ---

#[derive(Debug, Queryable, Identifiable, Serialize)]
#[diesel(table_name = pre_verified_users)]
pub struct PreVerifiedUser {
    pub id: Uuid,
    pub enrollment_no: String,
    pub email: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

// --- One-time passcodes ---

#[derive(Debug, Queryable, Identifiable)]
#[diesel(table_name = otps)]
pub struct Otp {
    pub id: Uuid,
    pub email: String,
    pub code: String,
    pub purpose: String,
    pub consumed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = otps)]
pub struct NewOtp {
    pub email: String,
    pub code: String,
    pub purpose: String,
}

// --- Conversations ---

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = conversations)]
pub struct Conversation {
    pub id: Uuid,
    pub user_a: Uuid,
    pub user_b: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn has_participant(&self, user_id: Uuid) -> bool {
        self.user_a == user_id || self.user_b == user_id
    }

    pub fn other_participant(&self, user_id: Uuid) -> Uuid {
        if self.user_a == user_id {
            self.user_b
        } else {
            self.user_a
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = conversations)]
pub struct NewConversation {
    pub user_a: Uuid,
    pub user_b: Uuid,
}

// --- Messages ---

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = messages)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
}
