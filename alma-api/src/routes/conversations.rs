use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use alma_shared::errors::{AppError, AppResult, ErrorCode};
use alma_shared::types::auth::AuthUser;
use alma_shared::types::ApiResponse;

use crate::models::{Conversation, Message, PublicUser, User};
use crate::schema::{conversations, messages, users};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ConversationPreview {
    pub id: Uuid,
    pub participant: PublicUser,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// GET /conversations - the caller's conversations, most recent activity first
pub async fn list_conversations(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<ConversationPreview>>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    let convs: Vec<Conversation> = conversations::table
        .filter(
            conversations::user_a
                .eq(auth_user.id)
                .or(conversations::user_b.eq(auth_user.id)),
        )
        .order(conversations::updated_at.desc())
        .load(&mut conn)?;

    if convs.is_empty() {
        return Ok(Json(ApiResponse::ok(vec![])));
    }

    let partner_ids: Vec<Uuid> = convs
        .iter()
        .map(|c| c.other_participant(auth_user.id))
        .collect();
    let partners: Vec<User> = users::table
        .filter(users::id.eq_any(&partner_ids))
        .load(&mut conn)?;

    let mut previews = Vec::with_capacity(convs.len());
    for conv in convs {
        let partner_id = conv.other_participant(auth_user.id);
        let Some(partner) = partners.iter().find(|u| u.id == partner_id) else {
            continue;
        };

        let last: Option<Message> = messages::table
            .filter(messages::conversation_id.eq(conv.id))
            .order(messages::created_at.desc())
            .first(&mut conn)
            .optional()?;

        previews.push(ConversationPreview {
            id: conv.id,
            participant: PublicUser::from(partner),
            last_message: last.as_ref().map(|m| m.content.clone()),
            last_message_at: last.map(|m| m.created_at),
            updated_at: conv.updated_at,
        });
    }

    Ok(Json(ApiResponse::ok(previews)))
}

/// GET /conversations/:id/messages - full history, oldest first
pub async fn list_messages(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Vec<Message>>>> {
    let mut conn = state.db.get().map_err(|e| AppError::internal(e.to_string()))?;

    let conversation: Conversation = conversations::table
        .find(conversation_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::new(ErrorCode::ConversationNotFound, "conversation not found"))?;

    if !conversation.has_participant(auth_user.id) {
        return Err(AppError::new(
            ErrorCode::NotParticipant,
            "you are not part of this conversation",
        ));
    }

    let items: Vec<Message> = messages::table
        .filter(messages::conversation_id.eq(conversation_id))
        .order(messages::created_at.asc())
        .load(&mut conn)?;

    Ok(Json(ApiResponse::ok(items)))
}
