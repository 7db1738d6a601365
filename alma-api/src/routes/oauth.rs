use axum::extract::State;
use axum::Json;
use axum_extra::extract::CookieJar;
use diesel::prelude::*;
use serde::Deserialize;
use std::sync::Arc;

use alma_shared::errors::{AppError, AppResult, ErrorCode};
use alma_shared::session::generate_token;
use alma_shared::types::auth::{SessionData, UserRole};
use alma_shared::types::ApiResponse;

use crate::models::{PreVerifiedUser, User};
use crate::routes::login::LoginStatus;
use crate::routes::session_cookie;
use crate::routes::verify::VerifyResponse;
use crate::schema::{pre_verified_users, users};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct GoogleOAuthRequest {
    pub code: String,
}

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    email: String,
}

/// Delegated login through Google. The verified email drives the same branch
/// logic as passcode verification: an existing member gets a verified session,
/// a roster-only email gets a pending session and must finish signup (a handle
/// has to be chosen), and an unknown email gets one generic refusal.
pub async fn google_oauth(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<GoogleOAuthRequest>,
) -> AppResult<(CookieJar, Json<ApiResponse<VerifyResponse>>)> {
    let client = reqwest::Client::new();
    let token_response = client
        .post("https://oauth2.googleapis.com/token")
        .form(&[
            ("code", req.code.as_str()),
            ("client_id", &state.config.google_client_id),
            ("client_secret", &state.config.google_client_secret),
            ("redirect_uri", &state.config.google_redirect_uri),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await
        .map_err(|e| AppError::new(ErrorCode::OAuthError, format!("google token exchange failed: {e}")))?;

    if !token_response.status().is_success() {
        let body = token_response.text().await.unwrap_or_default();
        tracing::warn!(body = %body, "google token exchange rejected");
        return Err(AppError::new(ErrorCode::OAuthError, "google sign-in failed"));
    }

    let google_token: GoogleTokenResponse = token_response
        .json()
        .await
        .map_err(|e| AppError::new(ErrorCode::OAuthError, format!("invalid token response: {e}")))?;

    let user_info_response = client
        .get("https://www.googleapis.com/oauth2/v3/userinfo")
        .bearer_auth(&google_token.access_token)
        .send()
        .await
        .map_err(|e| AppError::new(ErrorCode::OAuthError, format!("google userinfo failed: {e}")))?;

    let google_user: GoogleUserInfo = user_info_response
        .json()
        .await
        .map_err(|e| AppError::new(ErrorCode::OAuthError, format!("invalid userinfo response: {e}")))?;

    let email = google_user.email.to_lowercase();
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    let user: Option<User> = users::table
        .filter(users::email.eq(&email))
        .first(&mut conn)
        .optional()?;

    if let Some(user) = user {
        diesel::update(users::table.find(user.id))
            .set(users::last_login_at.eq(Some(chrono::Utc::now())))
            .execute(&mut conn)?;

        let mut data = SessionData::pending(&user.email);
        let role = user.role.parse().unwrap_or(UserRole::Student);
        data.verify(user.id, &user.username, &user.name, user.avatar_url.clone(), role);

        let token = generate_token();
        state
            .sessions
            .set(&token, &data, state.session_ttl())
            .await?;

        tracing::info!(user_id = %user.id, "google login");

        let jar = jar.add(session_cookie(&token, state.config.session_ttl_secs));
        return Ok((
            jar,
            Json(ApiResponse::ok(VerifyResponse {
                status: LoginStatus::Login,
                user: Some(user),
                email: None,
            })),
        ));
    }

    let invitation: Option<PreVerifiedUser> = pre_verified_users::table
        .filter(pre_verified_users::email.eq(&email))
        .first(&mut conn)
        .optional()?;

    match invitation {
        Some(entry) => {
            // Never create the user here; signup must go through profile
            // creation so a handle is chosen.
            let token = generate_token();
            let session = SessionData::pending(&entry.email);
            state
                .sessions
                .set(&token, &session, state.session_ttl())
                .await?;

            tracing::info!(email = %entry.email, "google login, signup required");

            let jar = jar.add(session_cookie(&token, state.config.session_ttl_secs));
            Ok((
                jar,
                Json(ApiResponse::ok(VerifyResponse {
                    status: LoginStatus::SignupRequired,
                    user: None,
                    email: Some(entry.email),
                })),
            ))
        }
        // Deliberately vague: this channel must not reveal who is enrolled.
        None => Err(AppError::unauthorized("could not sign you in")),
    }
}
