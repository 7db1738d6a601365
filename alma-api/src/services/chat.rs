use diesel::pg::PgConnection;
use diesel::prelude::*;
use uuid::Uuid;

use alma_shared::errors::{is_unique_violation, AppError, AppResult, ErrorCode};

use crate::models::{Conversation, Message, NewConversation, NewMessage};
use crate::schema::{conversations, messages};

/// Order-independent identity of a two-party conversation: the pair sorted
/// ascending. Self-conversations are rejected outright.
pub fn canonical_pair(a: Uuid, b: Uuid) -> AppResult<(Uuid, Uuid)> {
    if a == b {
        return Err(AppError::bad_request("cannot message yourself"));
    }
    if a < b {
        Ok((a, b))
    } else {
        Ok((b, a))
    }
}

/// Fetches the conversation for an unordered pair, creating it on first use.
///
/// Concurrent creators race on the unique (user_a, user_b) index; the loser's
/// insert fails with a unique violation and the winner's row is returned, so
/// the call is idempotent from either argument order.
pub fn get_or_create_conversation(
    conn: &mut PgConnection,
    a: Uuid,
    b: Uuid,
) -> AppResult<Conversation> {
    let (lo, hi) = canonical_pair(a, b)?;

    let existing = conversations::table
        .filter(conversations::user_a.eq(lo))
        .filter(conversations::user_b.eq(hi))
        .first::<Conversation>(conn)
        .optional()?;

    if let Some(conversation) = existing {
        return Ok(conversation);
    }

    let insert = diesel::insert_into(conversations::table)
        .values(&NewConversation { user_a: lo, user_b: hi })
        .get_result::<Conversation>(conn);

    match insert {
        Ok(conversation) => Ok(conversation),
        Err(err) if is_unique_violation(&err) => {
            let winner = conversations::table
                .filter(conversations::user_a.eq(lo))
                .filter(conversations::user_b.eq(hi))
                .first::<Conversation>(conn)?;
            Ok(winner)
        }
        Err(err) => Err(AppError::Database(err)),
    }
}

/// Persists a message and bumps the conversation's recency timestamp in one
/// transaction. The participant check is defense in depth; the delivery path
/// already authenticates the sender.
pub fn append_message(
    conn: &mut PgConnection,
    conversation: &Conversation,
    sender_id: Uuid,
    content: &str,
) -> AppResult<Message> {
    if !conversation.has_participant(sender_id) {
        return Err(AppError::new(
            ErrorCode::NotParticipant,
            "sender is not part of this conversation",
        ));
    }

    let conversation_id = conversation.id;
    let message = conn.transaction::<Message, diesel::result::Error, _>(|conn| {
        let message: Message = diesel::insert_into(messages::table)
            .values(&NewMessage {
                conversation_id,
                sender_id,
                content: content.to_string(),
            })
            .get_result(conn)?;

        diesel::update(conversations::table.find(conversation_id))
            .set(conversations::updated_at.eq(message.created_at))
            .execute(conn)?;

        Ok(message)
    })?;

    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_pair_is_order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let forward = canonical_pair(a, b).unwrap();
        let backward = canonical_pair(b, a).unwrap();

        assert_eq!(forward, backward);
        assert!(forward.0 < forward.1);
    }

    #[test]
    fn canonical_pair_rejects_self() {
        let a = Uuid::new_v4();
        assert!(canonical_pair(a, a).is_err());
    }

    #[test]
    fn participant_checks_cover_both_sides() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let (lo, hi) = canonical_pair(a, b).unwrap();
        let now = chrono::Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            user_a: lo,
            user_b: hi,
            created_at: now,
            updated_at: now,
        };

        assert!(conversation.has_participant(a));
        assert!(conversation.has_participant(b));
        assert!(!conversation.has_participant(Uuid::new_v4()));
        assert_eq!(conversation.other_participant(a), b);
        assert_eq!(conversation.other_participant(b), a);
    }
}
