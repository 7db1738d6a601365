use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use alma_shared::errors::{is_unique_violation, AppError, AppResult, ErrorCode};
use alma_shared::types::auth::{OnboardingUser, SessionData, UserRole};
use alma_shared::types::ApiResponse;

use crate::models::{NewUser, PreVerifiedUser, User};
use crate::schema::{pre_verified_users, users};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct OnboardingDetails {
    pub email: String,
    pub enrollment_no: String,
    pub role: String,
}

/// Handle syntax: 3-20 chars, lowercase letters, digits, `_`, `.`.
pub fn valid_username(username: &str) -> bool {
    (3..=20).contains(&username.len())
        && username
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '.')
}

fn roster_entry(
    conn: &mut diesel::pg::PgConnection,
    email: &str,
) -> AppResult<PreVerifiedUser> {
    pre_verified_users::table
        .filter(pre_verified_users::email.eq(email))
        .first(conn)
        .map_err(|_| AppError::not_found("no invitation for this email"))
}

pub async fn onboarding_details(
    user: OnboardingUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<OnboardingDetails>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    let entry = roster_entry(&mut conn, &user.email)?;

    Ok(Json(ApiResponse::ok(OnboardingDetails {
        email: entry.email,
        enrollment_no: entry.enrollment_no,
        role: entry.role,
    })))
}

#[derive(Debug, Deserialize)]
pub struct UsernameQuery {
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub available: bool,
}

pub async fn username_available(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UsernameQuery>,
) -> AppResult<Json<ApiResponse<AvailabilityResponse>>> {
    let username = query.username.trim().to_lowercase();

    if !valid_username(&username) {
        return Ok(Json(ApiResponse::ok(AvailabilityResponse { available: false })));
    }

    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    let taken: bool = users::table
        .filter(users::username.eq(&username))
        .count()
        .get_result::<i64>(&mut conn)
        .map(|c| c > 0)?;

    Ok(Json(ApiResponse::ok(AvailabilityResponse { available: !taken })))
}

#[derive(Debug, Deserialize)]
pub struct CreateProfileRequest {
    pub username: String,
    pub name: String,
}

pub async fn create_profile(
    user: OnboardingUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateProfileRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<User>>)> {
    let username = req.username.trim().to_lowercase();
    if !valid_username(&username) {
        return Err(AppError::new(
            ErrorCode::ValidationError,
            "username must be 3-20 characters: a-z, 0-9, '_', '.'",
        ));
    }

    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::new(ErrorCode::ValidationError, "name is required"));
    }

    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    let entry = roster_entry(&mut conn, &user.email)?;

    let new_user = NewUser {
        username: username.clone(),
        enrollment_no: entry.enrollment_no,
        email: entry.email,
        name: name.to_string(),
        role: entry.role,
    };

    let created: User = match diesel::insert_into(users::table)
        .values(&new_user)
        .get_result(&mut conn)
    {
        Ok(user) => user,
        // Covers both a taken handle and two pending sessions racing on the
        // same invitation; either way the caller lost to an earlier insert.
        Err(err) if is_unique_violation(&err) => {
            return Err(AppError::new(
                ErrorCode::UsernameTaken,
                "username or account already taken",
            ));
        }
        Err(err) => return Err(AppError::Database(err)),
    };

    let mut data = SessionData::pending(&created.email);
    let role = created.role.parse().unwrap_or(UserRole::Student);
    data.verify(
        created.id,
        &created.username,
        &created.name,
        created.avatar_url.clone(),
        role,
    );
    state
        .sessions
        .set(&user.token, &data, state.session_ttl())
        .await?;

    tracing::info!(user_id = %created.id, username = %created.username, "profile created");

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(created))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_rules() {
        assert!(valid_username("newgrad"));
        assert!(valid_username("new_grad.07"));
        assert!(valid_username("abc"));

        assert!(!valid_username("ab"));
        assert!(!valid_username("a".repeat(21).as_str()));
        assert!(!valid_username("NewGrad"));
        assert!(!valid_username("new grad"));
        assert!(!valid_username("grad!"));
        assert!(!valid_username(""));
    }
}
