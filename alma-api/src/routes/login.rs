use axum::extract::State;
use axum::Json;
use axum_extra::extract::CookieJar;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use alma_shared::errors::{AppError, AppResult};
use alma_shared::session::generate_token;
use alma_shared::types::auth::SessionData;
use alma_shared::types::ApiResponse;

use crate::models::{PreVerifiedUser, User};
use crate::routes::session_cookie;
use crate::schema::{pre_verified_users, users};
use crate::services::otp;
use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoginStatus {
    Login,
    SignupRequired,
}

#[derive(Debug, Deserialize, Validate)]
pub struct InitiateLoginRequest {
    #[validate(length(min = 1, max = 255, message = "identifier is required"))]
    pub identifier: String,
}

#[derive(Debug, Serialize)]
pub struct LoginBranch {
    pub status: LoginStatus,
    pub email: String,
}

/// Resolves an identifier to the address a passcode should go to. Members
/// match on username, email, or enrollment number; roster entries on email or
/// enrollment number. An identifier known to neither store is a plain 404.
pub fn resolve_identifier(conn: &mut PgConnection, identifier: &str) -> AppResult<LoginBranch> {
    let lowered = identifier.trim().to_lowercase();
    let enrollment = identifier.trim().to_uppercase();

    let user: Option<User> = users::table
        .filter(
            users::username
                .eq(&lowered)
                .or(users::email.eq(&lowered))
                .or(users::enrollment_no.eq(&enrollment)),
        )
        .first(conn)
        .optional()?;

    if let Some(user) = user {
        return Ok(LoginBranch {
            status: LoginStatus::Login,
            email: user.email,
        });
    }

    let invitation: Option<PreVerifiedUser> = pre_verified_users::table
        .filter(
            pre_verified_users::email
                .eq(&lowered)
                .or(pre_verified_users::enrollment_no.eq(&enrollment)),
        )
        .first(conn)
        .optional()?;

    if let Some(entry) = invitation {
        return Ok(LoginBranch {
            status: LoginStatus::SignupRequired,
            email: entry.email,
        });
    }

    Err(AppError::not_found("no account or invitation for this identifier"))
}

pub async fn initiate_login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<InitiateLoginRequest>,
) -> AppResult<(CookieJar, Json<ApiResponse<LoginBranch>>)> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    let branch = resolve_identifier(&mut conn, &req.identifier)?;
    let code = otp::issue_passcode(&mut conn, &branch.email, otp::LOGIN_PURPOSE)?;

    // Delivery failure fails the whole initiation; a success response is a
    // promise that a code is on its way.
    state.mailer.send_passcode(&branch.email, &code).await?;

    let token = generate_token();
    let session = SessionData::pending(&branch.email);
    state
        .sessions
        .set(&token, &session, state.session_ttl())
        .await?;

    tracing::info!(email = %branch.email, status = ?branch.status, "login passcode issued");

    let jar = jar.add(session_cookie(&token, state.config.session_ttl_secs));
    Ok((jar, Json(ApiResponse::ok(branch))))
}
