use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::{self, queries};
use crate::errors::{AppError, Validator};
use crate::handlers::auth::authenticate;
use crate::models::User;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
}

// POST /api/users
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let email = body.email.trim().to_lowercase();
    let full_name = body.full_name.trim().to_string();
    let phone = body
        .phone
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty());

    Validator::new()
        .check(email.contains('@') && email.len() >= 3, "email", "must be a valid email address")
        .check(!full_name.is_empty(), "full_name", "required")
        .check(
            phone.as_deref().map_or(true, |p| p.starts_with('+') && p.len() > 7),
            "phone",
            "must be in E.164 format",
        )
        .finish()?;

    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        email,
        full_name,
        phone,
        api_token: format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple()),
        is_admin: false,
        created_at: db::now(),
    };

    {
        let db = state.db();
        if queries::email_taken(&db, &user.email)? {
            return Err(AppError::Conflict("email already registered".to_string()));
        }
        queries::create_user(&db, &user)?;
    }
    tracing::info!(user_id = %user.id, "user registered");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "user": user, "api_token": user.api_token })),
    ))
}

// GET /api/me
pub async fn me(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let user = authenticate(&state, &headers)?;
    let practitioner = {
        let db = state.db();
        queries::get_practitioner_by_user(&db, &user.id)?
    };
    Ok(Json(json!({ "user": user, "practitioner": practitioner })))
}
