use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::queries;
use crate::errors::AppError;
use crate::handlers::auth::authenticate;
use crate::models::{ChatMessage, ConversationSummary};
use crate::services::chat;
use crate::state::AppState;

// GET /api/conversations
pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<ConversationSummary>>, AppError> {
    let user = authenticate(&state, &headers)?;
    let db = state.db();
    Ok(Json(queries::list_conversations(&db, &user.id)?))
}

#[derive(Deserialize)]
pub struct StartConversationRequest {
    pub user_id: String,
}

// POST /api/conversations
pub async fn start_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<StartConversationRequest>,
) -> Result<Json<Value>, AppError> {
    let user = authenticate(&state, &headers)?;
    let id = chat::open_conversation(&state, &user, body.user_id.trim())?;
    Ok(Json(json!({ "id": id })))
}

#[derive(Deserialize)]
pub struct MessagesQuery {
    pub limit: Option<i64>,
}

// GET /api/conversations/:id/messages
pub async fn get_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Vec<ChatMessage>>, AppError> {
    let user = authenticate(&state, &headers)?;
    chat::counterpart(&state, &user, &id)?;
    let limit = query.limit.unwrap_or(100).clamp(1, 500);
    let db = state.db();
    Ok(Json(queries::list_messages(&db, &id, limit)?))
}

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub body: String,
}

// POST /api/conversations/:id/messages
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<ChatMessage>), AppError> {
    let user = authenticate(&state, &headers)?;
    let message = chat::send_message(&state, &user, &id, &body.body)?;
    Ok((StatusCode::CREATED, Json(message)))
}

// POST /api/conversations/:id/read
pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let user = authenticate(&state, &headers)?;
    chat::counterpart(&state, &user, &id)?;
    let db = state.db();
    let updated = queries::mark_conversation_read(&db, &id, &user.id)?;
    Ok(Json(json!({"ok": true, "updated": updated})))
}
