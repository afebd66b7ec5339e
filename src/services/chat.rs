use std::sync::Arc;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{ChatMessage, LiveEvent, User};
use crate::state::AppState;

pub const MAX_MESSAGE_CHARS: usize = 4000;

pub fn open_conversation(
    state: &AppState,
    user: &User,
    other_user_id: &str,
) -> Result<String, AppError> {
    if other_user_id == user.id {
        return Err(AppError::field("user_id", "cannot message yourself"));
    }
    let db = state.db();
    if queries::get_user(&db, other_user_id)?.is_none() {
        return Err(AppError::NotFound("user".to_string()));
    }
    Ok(queries::get_or_create_conversation(&db, &user.id, other_user_id)?)
}

pub fn counterpart(state: &AppState, user: &User, conversation_id: &str) -> Result<String, AppError> {
    let participants = {
        let db = state.db();
        queries::get_conversation_participants(&db, conversation_id)?
    };
    match participants {
        Some((a, b)) if a == user.id => Ok(b),
        Some((a, b)) if b == user.id => Ok(a),
        _ => Err(AppError::NotFound("conversation".to_string())),
    }
}

pub fn send_message(
    state: &Arc<AppState>,
    user: &User,
    conversation_id: &str,
    body: &str,
) -> Result<ChatMessage, AppError> {
    let body = body.trim();
    if body.is_empty() {
        return Err(AppError::field("body", "message cannot be empty"));
    }
    if body.chars().count() > MAX_MESSAGE_CHARS {
        return Err(AppError::field(
            "body",
            format!("message is longer than {MAX_MESSAGE_CHARS} characters"),
        ));
    }

    let recipient = counterpart(state, user, conversation_id)?;
    let message = {
        let db = state.db();
        queries::insert_message(&db, conversation_id, &user.id, &recipient, body)?
    };
    tracing::debug!(conversation_id, message_id = message.id, "message sent");

    // No receivers is fine
    let _ = state.events_tx.send(LiveEvent::Message(message.clone()));
    Ok(message)
}
