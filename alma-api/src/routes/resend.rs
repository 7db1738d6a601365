use axum::extract::State;
use axum::Json;
use axum_extra::extract::CookieJar;
use std::sync::Arc;

use alma_shared::errors::{AppError, AppResult, ErrorCode};
use alma_shared::session::SESSION_COOKIE;
use alma_shared::types::ApiResponse;

use crate::routes::login::{resolve_identifier, LoginBranch};
use crate::services::otp;
use crate::AppState;

pub async fn resend_code(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> AppResult<Json<ApiResponse<LoginBranch>>> {
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

    let rate_key = format!("otp:rate:{}", session.email);
    // Fails open when redis is down, but not silently.
    let allowed = state
        .redis
        .rate_limit_check(&rate_key, 1, 60)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "rate limiter unavailable, allowing resend");
            true
        });
    if !allowed {
        return Err(AppError::new(
            ErrorCode::EmailRateLimited,
            "please wait before requesting a new code",
        ));
    }

    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    // Reruns the initiation branch keyed by the session's own email, so a
    // pending caller cannot probe arbitrary identifiers.
    let branch = resolve_identifier(&mut conn, &session.email)?;
    let code = otp::issue_passcode(&mut conn, &branch.email, otp::LOGIN_PURPOSE)?;
    state.mailer.send_passcode(&branch.email, &code).await?;

    tracing::info!(email = %branch.email, "login passcode reissued");

    Ok(Json(ApiResponse::ok(branch)))
}
