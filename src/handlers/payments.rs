use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::queries;
use crate::errors::{AppError, Validator};
use crate::handlers::auth::{authenticate, require_admin, require_practitioner};
use crate::models::{EarningsBalance, Payout};
use crate::services::earnings;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

impl LimitQuery {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 500)
    }
}

// GET /api/credits
pub async fn get_credits(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Value>, AppError> {
    let user = authenticate(&state, &headers)?;
    let db = state.db();
    let balance = queries::credit_balance(&db, &user.id)?;
    let transactions = queries::list_credit_transactions(&db, &user.id, query.limit())?;
    Ok(Json(json!({
        "balance_cents": balance,
        "transactions": transactions,
    })))
}

#[derive(Deserialize)]
pub struct GrantCreditsRequest {
    pub user_id: String,
    pub amount_cents: i64,
    pub description: Option<String>,
}

// POST /api/admin/credits
pub async fn grant_credits(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<GrantCreditsRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_admin(&state, &headers)?;
    Validator::new()
        .check(body.amount_cents != 0, "amount_cents", "must not be zero")
        .finish()?;

    let db = state.db();
    if queries::get_user(&db, &body.user_id)?.is_none() {
        return Err(AppError::NotFound("user".to_string()));
    }
    let balance = queries::credit_balance(&db, &body.user_id)?;
    if balance + body.amount_cents < 0 {
        return Err(AppError::field("amount_cents", "balance cannot go negative"));
    }
    let id = queries::insert_credit_transaction(
        &db,
        &body.user_id,
        body.amount_cents,
        "adjustment",
        None,
        body.description.as_deref(),
    )?;
    tracing::info!(user_id = %body.user_id, amount = body.amount_cents, "credits adjusted");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": id,
            "balance_cents": balance + body.amount_cents,
        })),
    ))
}

// GET /api/earnings
pub async fn get_earnings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<EarningsBalance>, AppError> {
    let user = authenticate(&state, &headers)?;
    let practitioner = require_practitioner(&state, &user)?;
    let db = state.db();
    Ok(Json(queries::earnings_balance(&db, &practitioner.id)?))
}

// GET /api/earnings/transactions
pub async fn list_earnings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Value>, AppError> {
    let user = authenticate(&state, &headers)?;
    let practitioner = require_practitioner(&state, &user)?;
    let db = state.db();
    let transactions = queries::list_earnings(&db, &practitioner.id, query.limit())?;
    Ok(Json(json!(transactions)))
}

// GET /api/payouts
pub async fn list_payouts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<Payout>>, AppError> {
    let user = authenticate(&state, &headers)?;
    let practitioner = require_practitioner(&state, &user)?;
    let db = state.db();
    Ok(Json(queries::list_payouts(&db, &practitioner.id, query.limit())?))
}

// POST /api/payouts
pub async fn request_payout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<Payout>), AppError> {
    let user = authenticate(&state, &headers)?;
    let practitioner = require_practitioner(&state, &user)?;
    let payout = earnings::request_payout(&state, &practitioner).await?;
    Ok((StatusCode::CREATED, Json(payout)))
}
