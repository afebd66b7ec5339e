use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use crate::db::{self, queries};
use crate::errors::AppError;
use crate::handlers::auth::require_admin;
use crate::models::{Practitioner, Tier, WorkflowRun};
use crate::services::reminders::{self, TickReport};
use crate::state::AppState;

// GET /api/workflows/:subject_id
pub async fn get_workflows(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(subject_id): Path<String>,
) -> Result<Json<Vec<WorkflowRun>>, AppError> {
    require_admin(&state, &headers)?;
    let db = state.db();
    Ok(Json(queries::list_workflow_runs(&db, &subject_id)?))
}

#[derive(Deserialize)]
pub struct UpdateTierRequest {
    pub tier: String,
}

// PATCH /api/admin/practitioners/:id
pub async fn update_practitioner_tier(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<UpdateTierRequest>,
) -> Result<Json<Practitioner>, AppError> {
    require_admin(&state, &headers)?;
    let tier = match body.tier.as_str() {
        "basic" | "professional" | "premium" => Tier::parse(&body.tier),
        _ => return Err(AppError::field("tier", "must be basic, professional or premium")),
    };

    let db = state.db();
    let mut practitioner = queries::get_practitioner(&db, &id)?
        .ok_or_else(|| AppError::NotFound("practitioner".to_string()))?;
    practitioner.tier = tier;
    queries::save_practitioner(&db, &practitioner)?;
    tracing::info!(practitioner_id = %id, tier = tier.as_str(), "practitioner tier changed");
    Ok(Json(practitioner))
}

// POST /api/admin/scheduler/tick
pub async fn run_scheduler_tick(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<TickReport>, AppError> {
    require_admin(&state, &headers)?;
    Ok(Json(reminders::tick(&state, db::now()).await))
}
