use axum::extract::State;
use axum::Json;
use diesel::prelude::*;
use std::sync::Arc;

use alma_shared::errors::{AppError, AppResult};
use alma_shared::types::auth::AuthUser;
use alma_shared::types::ApiResponse;

use crate::models::User;
use crate::schema::users;
use crate::AppState;

pub async fn me(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<User>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    let record: User = users::table
        .find(user.id)
        .first(&mut conn)
        .map_err(|_| AppError::not_found("user not found"))?;

    Ok(Json(ApiResponse::ok(record)))
}
