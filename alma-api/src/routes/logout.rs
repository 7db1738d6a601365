use axum::extract::State;
use axum::Json;
use axum_extra::extract::CookieJar;
use std::sync::Arc;

use alma_shared::errors::AppResult;
use alma_shared::session::SESSION_COOKIE;
use alma_shared::types::ApiResponse;

use crate::routes::expired_session_cookie;
use crate::AppState;

pub async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<ApiResponse<&'static str>>)> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.sessions.destroy(cookie.value()).await?;
    }

    let jar = jar.add(expired_session_cookie());
    Ok((jar, Json(ApiResponse::ok("logged out"))))
}
