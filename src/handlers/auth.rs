use axum::http::HeaderMap;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{Practitioner, User};
use crate::state::AppState;

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

pub fn user_for_token(state: &AppState, token: &str) -> Result<User, AppError> {
    let db = state.db();
    queries::get_user_by_token(&db, token)?.ok_or(AppError::Unauthorized)
}

pub fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<User, AppError> {
    let token = bearer_token(headers).ok_or(AppError::Unauthorized)?;
    user_for_token(state, token)
}

pub fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let token = bearer_token(headers).ok_or(AppError::Unauthorized)?;
    if token == state.config.admin_token {
        return Ok(());
    }
    let user = user_for_token(state, token)?;
    if user.is_admin {
        Ok(())
    } else {
        Err(AppError::Forbidden("admin only".to_string()))
    }
}

pub fn require_practitioner(state: &AppState, user: &User) -> Result<Practitioner, AppError> {
    let db = state.db();
    queries::get_practitioner_by_user(&db, &user.id)?
        .ok_or_else(|| AppError::Forbidden("practitioner profile required".to_string()))
}
