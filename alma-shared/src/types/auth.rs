use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Student,
    Alumni,
    Faculty,
    Admin,
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserRole::Student => write!(f, "student"),
            UserRole::Alumni => write!(f, "alumni"),
            UserRole::Faculty => write!(f, "faculty"),
            UserRole::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "student" => Ok(UserRole::Student),
            "alumni" => Ok(UserRole::Alumni),
            "faculty" => Ok(UserRole::Faculty),
            "admin" => Ok(UserRole::Admin),
            _ => Err(format!("unknown role: {s}")),
        }
    }
}

/// Server-side session record, stored by token in the shared session store.
///
/// Two mutually exclusive shapes share this struct: a pending session carries
/// only the email being verified (`user_id` is None); a verified session
/// carries the user id plus cached display fields. The transition from pending
/// to verified is one-way within a login episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub email: String,
    pub user_id: Option<Uuid>,
    pub username: Option<String>,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub role: Option<UserRole>,
}

impl SessionData {
    pub fn pending(email: &str) -> Self {
        Self {
            email: email.to_string(),
            user_id: None,
            username: None,
            name: None,
            avatar_url: None,
            role: None,
        }
    }

    pub fn is_verified(&self) -> bool {
        self.user_id.is_some()
    }

    pub fn verify(
        &mut self,
        user_id: Uuid,
        username: &str,
        name: &str,
        avatar_url: Option<String>,
        role: UserRole,
    ) {
        self.user_id = Some(user_id);
        self.username = Some(username.to_string());
        self.name = Some(name.to_string());
        self.avatar_url = avatar_url;
        self.role = Some(role);
    }
}

/// Fully authenticated caller, extracted from a verified session.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
    pub role: UserRole,
}

/// Caller in the signup window: email bound to the session, no user yet.
#[derive(Debug, Clone)]
pub struct OnboardingUser {
    pub email: String,
    pub token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_session_has_no_identity() {
        let session = SessionData::pending("grad@alumni.edu");
        assert!(!session.is_verified());
        assert_eq!(session.email, "grad@alumni.edu");
        assert!(session.username.is_none());
    }

    #[test]
    fn verify_binds_user_identity() {
        let mut session = SessionData::pending("grad@alumni.edu");
        let id = Uuid::new_v4();
        session.verify(id, "newgrad", "New Grad", None, UserRole::Alumni);

        assert!(session.is_verified());
        assert_eq!(session.user_id, Some(id));
        assert_eq!(session.username.as_deref(), Some("newgrad"));
        assert_eq!(session.role, Some(UserRole::Alumni));
    }

    #[test]
    fn role_round_trips_through_strings() {
        for role in [UserRole::Student, UserRole::Alumni, UserRole::Faculty, UserRole::Admin] {
            let parsed: UserRole = role.to_string().parse().unwrap();
            assert_eq!(parsed, role);
        }
        assert!("staff".parse::<UserRole>().is_err());
    }
}
