use axum::extract::State;
use axum::Json;
use axum_extra::extract::CookieJar;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use alma_shared::errors::{AppError, AppResult, ErrorCode};
use alma_shared::session::SESSION_COOKIE;
use alma_shared::types::auth::UserRole;
use alma_shared::types::ApiResponse;

use crate::models::User;
use crate::routes::login::LoginStatus;
use crate::schema::users;
use crate::services::otp;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyRequest {
    #[validate(length(equal = 6, message = "code must be 6 digits"))]
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub status: LoginStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

pub async fn verify(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<VerifyRequest>,
) -> AppResult<Json<ApiResponse<VerifyResponse>>> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let token = jar
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or_else(|| AppError::new(ErrorCode::NoPendingLogin, "no login in progress"))?;

    let session = state
        .sessions
        .get(&token)
        .await?
        .filter(|s| !s.is_verified())
        .ok_or_else(|| AppError::new(ErrorCode::NoPendingLogin, "no login in progress"))?;

    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    // One conditional update; a wrong, expired, or already-used code is
    // indistinguishable to the caller.
    otp::consume_passcode(&mut conn, &session.email, otp::LOGIN_PURPOSE, req.code.trim())?;

    let user: Option<User> = users::table
        .filter(users::email.eq(&session.email))
        .first(&mut conn)
        .optional()?;

    match user {
        Some(user) => {
            diesel::update(users::table.find(user.id))
                .set(users::last_login_at.eq(Some(chrono::Utc::now())))
                .execute(&mut conn)?;

            let mut data = session;
            let role = user.role.parse().unwrap_or(UserRole::Student);
            data.verify(user.id, &user.username, &user.name, user.avatar_url.clone(), role);
            state
                .sessions
                .set(&token, &data, state.session_ttl())
                .await?;

            tracing::info!(user_id = %user.id, "login verified");

            Ok(Json(ApiResponse::ok(VerifyResponse {
                status: LoginStatus::Login,
                user: Some(user),
                email: None,
            })))
        }
        None => {
            // Roster member without an account: the pending session survives
            // until profile creation completes.
            tracing::info!(email = %session.email, "passcode verified, signup required");

            Ok(Json(ApiResponse::ok(VerifyResponse {
                status: LoginStatus::SignupRequired,
                user: None,
                email: Some(session.email),
            })))
        }
    }
}
