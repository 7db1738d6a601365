use std::sync::Arc;

use axum::http::header::COOKIE;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use socketioxide::extract::{Data, SocketRef};
use uuid::Uuid;

use alma_shared::errors::{AppError, AppResult};
use alma_shared::session::SESSION_COOKIE;

use crate::services::chat;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

impl ErrorPayload {
    fn from_error(err: &AppError) -> Self {
        match err {
            AppError::Known { code, message, .. } => Self {
                code: code.code().to_string(),
                message: message.clone(),
            },
            _ => Self {
                code: "E0001".to_string(),
                message: "internal server error".to_string(),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct SendMessagePayload {
    content: String,
    recipient_id: Uuid,
}

fn get_user_id(socket: &SocketRef) -> Option<Uuid> {
    socket.extensions.get::<Uuid>()
}

pub async fn on_connect_with_state(socket: SocketRef, state: Arc<AppState>) {
    match authenticate_socket(&socket, &state).await {
        Ok(user_id) => {
            socket.extensions.insert(user_id);
            state.groups.add(user_id, socket.id);
            tracing::info!(user_id = %user_id, sid = %socket.id, "socket connected");
            let _ = socket.emit("connected", &serde_json::json!({ "user_id": user_id }));
        }
        Err(msg) => {
            // The transport stays open, but without delivery-group membership
            // the socket can neither send nor receive messages.
            tracing::warn!(error = %msg, sid = %socket.id, "socket auth failed");
            let _ = socket.emit(
                "error",
                &ErrorPayload {
                    code: "E0004".into(),
                    message: msg,
                },
            );
        }
    }

    socket.on("message", {
        let state = state.clone();
        move |socket: SocketRef, Data::<SendMessagePayload>(payload)| {
            let state = state.clone();
            async move {
                on_message(socket, payload, &state).await;
            }
        }
    });

    socket.on_disconnect({
        let state = state.clone();
        move |socket: SocketRef| {
            let state = state.clone();
            async move {
                // Runs on abnormal termination too, so a dying connection
                // always leaves its delivery group.
                if let Some(user_id) = get_user_id(&socket) {
                    state.groups.remove(user_id, socket.id);
                    tracing::info!(user_id = %user_id, sid = %socket.id, "socket disconnected");
                }
            }
        }
    });
}

async fn on_message(socket: SocketRef, payload: SendMessagePayload, state: &Arc<AppState>) {
    let Some(sender_id) = get_user_id(&socket) else {
        let _ = socket.emit(
            "error",
            &ErrorPayload {
                code: "E0004".into(),
                message: "not authenticated".into(),
            },
        );
        return;
    };

    match send_private_message(state, sender_id, payload.recipient_id, &payload.content).await {
        Ok(()) => {}
        Err(err) => {
            tracing::warn!(sender_id = %sender_id, error = %err, "message rejected");
            let _ = socket.emit("error", &ErrorPayload::from_error(&err));
        }
    }
}

/// Persists the message, then pushes it to every live connection of both
/// participants. Persistence is durable; the live push is best-effort, so an
/// offline recipient still sees the message on the next conversation fetch.
async fn send_private_message(
    state: &Arc<AppState>,
    sender_id: Uuid,
    recipient_id: Uuid,
    content: &str,
) -> AppResult<()> {
    let content = content.trim().to_string();
    if content.is_empty() {
        return Err(AppError::new(
            alma_shared::ErrorCode::EmptyMessage,
            "message content must not be empty",
        ));
    }

    let db = state.db.clone();
    let message = tokio::task::spawn_blocking(move || -> AppResult<crate::models::Message> {
        let mut conn = db.get().map_err(|e| AppError::internal(e.to_string()))?;
        let conversation = chat::get_or_create_conversation(&mut conn, sender_id, recipient_id)?;
        chat::append_message(&mut conn, &conversation, sender_id, &content)
    })
    .await
    .map_err(|e| AppError::internal(format!("message persistence task failed: {e}")))??;

    let event = serde_json::json!({
        "id": message.id,
        "conversation_id": message.conversation_id,
        "sender_id": message.sender_id,
        "content": message.content,
        "created_at": message.created_at,
    });
    let signal = serde_json::json!({ "conversation_id": message.conversation_id });

    // The sender's own other connections get the echo too; the payload carries
    // sender_id so clients do not count their own messages as unread.
    for user_id in [sender_id, recipient_id] {
        for sid in state.groups.snapshot(user_id) {
            if let Some(peer) = state.io.get_socket(sid) {
                let _ = peer.emit("message", &event);
                let _ = peer.emit("conversations-updated", &signal);
            }
        }
    }

    Ok(())
}

fn cookie_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == SESSION_COOKIE).then(|| value.to_string())
    })
}

/// Same session lookup the HTTP layer performs, against the same store. The
/// handshake carries the session cookie; a bare `?token=` query works for
/// clients that cannot attach cookies to the upgrade request.
async fn authenticate_socket(socket: &SocketRef, state: &Arc<AppState>) -> Result<Uuid, String> {
    let parts = socket.req_parts();

    let token = cookie_token(&parts.headers).or_else(|| {
        parts.uri.query().unwrap_or_default().split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (key == "token").then(|| value.to_string())
        })
    });
    let token = token.ok_or_else(|| "missing session token".to_string())?;

    let session = state
        .sessions
        .get(&token)
        .await
        .map_err(|e| format!("session store unavailable: {e}"))?
        .ok_or_else(|| "invalid or expired session".to_string())?;

    session
        .user_id
        .ok_or_else(|| "login not completed".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn cookie_token_finds_the_session_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; alma_session=abc123; lang=en"),
        );
        assert_eq!(cookie_token(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn cookie_token_ignores_other_cookies() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; lang=en"));
        assert_eq!(cookie_token(&headers), None);

        let empty = HeaderMap::new();
        assert_eq!(cookie_token(&empty), None);
    }
}
