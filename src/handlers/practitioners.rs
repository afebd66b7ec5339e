use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::{self, queries};
use crate::errors::{AppError, Validator};
use crate::handlers::auth::{authenticate, require_practitioner};
use crate::models::{Availability, Practitioner, ServiceType, Tier};
use crate::services::{calendar, scheduling};
use crate::state::AppState;

const MAX_BUFFER_MINUTES: i32 = 240;

fn availability_json(value: &Value) -> Result<Option<String>, AppError> {
    if value.is_null() {
        return Ok(None);
    }
    let raw = value.to_string();
    Availability::from_json(&raw).map_err(|e| AppError::field("availability", e.to_string()))?;
    Ok(Some(raw))
}

#[derive(Deserialize)]
pub struct CreatePractitionerRequest {
    pub display_name: String,
    pub bio: Option<String>,
    pub timezone: Option<String>,
    #[serde(default)]
    pub availability: Value,
    pub buffer_minutes: Option<i32>,
    pub payout_account_id: Option<String>,
}

// POST /api/practitioners
pub async fn create_practitioner(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreatePractitionerRequest>,
) -> Result<(StatusCode, Json<Practitioner>), AppError> {
    let user = authenticate(&state, &headers)?;
    let display_name = body.display_name.trim().to_string();
    let buffer = body.buffer_minutes.unwrap_or(0);

    Validator::new()
        .check(!display_name.is_empty(), "display_name", "required")
        .check(
            (0..=MAX_BUFFER_MINUTES).contains(&buffer),
            "buffer_minutes",
            "must be between 0 and 240",
        )
        .finish()?;
    let availability = availability_json(&body.availability)?;

    let practitioner = Practitioner {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user.id.clone(),
        display_name,
        bio: body.bio,
        tier: Tier::Basic,
        timezone: body.timezone.unwrap_or_else(|| "UTC".to_string()),
        availability,
        buffer_minutes: buffer,
        payout_account_id: body.payout_account_id,
        is_active: true,
    };

    {
        let db = state.db();
        if queries::get_practitioner_by_user(&db, &user.id)?.is_some() {
            return Err(AppError::Conflict("practitioner profile already exists".to_string()));
        }
        queries::save_practitioner(&db, &practitioner)?;
    }
    tracing::info!(practitioner_id = %practitioner.id, user_id = %user.id, "practitioner onboarded");

    Ok((StatusCode::CREATED, Json(practitioner)))
}

#[derive(Deserialize)]
pub struct UpdatePractitionerRequest {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub timezone: Option<String>,
    pub availability: Option<Value>,
    pub buffer_minutes: Option<i32>,
    pub payout_account_id: Option<String>,
    pub is_active: Option<bool>,
}

// PATCH /api/practitioners/me
pub async fn update_me(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<UpdatePractitionerRequest>,
) -> Result<Json<Practitioner>, AppError> {
    let user = authenticate(&state, &headers)?;
    let mut practitioner = require_practitioner(&state, &user)?;

    if let Some(name) = body.display_name {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::field("display_name", "required"));
        }
        practitioner.display_name = name;
    }
    if let Some(bio) = body.bio {
        practitioner.bio = Some(bio).filter(|b| !b.trim().is_empty());
    }
    if let Some(timezone) = body.timezone {
        practitioner.timezone = timezone;
    }
    if let Some(availability) = body.availability {
        practitioner.availability = availability_json(&availability)?;
    }
    if let Some(buffer) = body.buffer_minutes {
        if !(0..=MAX_BUFFER_MINUTES).contains(&buffer) {
            return Err(AppError::field("buffer_minutes", "must be between 0 and 240"));
        }
        practitioner.buffer_minutes = buffer;
    }
    if let Some(account) = body.payout_account_id {
        practitioner.payout_account_id = Some(account).filter(|a| !a.trim().is_empty());
    }
    if let Some(active) = body.is_active {
        practitioner.is_active = active;
    }

    {
        let db = state.db();
        queries::save_practitioner(&db, &practitioner)?;
    }
    Ok(Json(practitioner))
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

// GET /api/practitioners
pub async fn list_practitioners(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Practitioner>>, AppError> {
    authenticate(&state, &headers)?;
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let practitioners = {
        let db = state.db();
        queries::list_practitioners(&db, limit)?
    };
    Ok(Json(practitioners))
}

// GET /api/practitioners/:id
pub async fn get_practitioner(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    authenticate(&state, &headers)?;
    let db = state.db();
    let practitioner = queries::get_practitioner(&db, &id)?
        .ok_or_else(|| AppError::NotFound("practitioner".to_string()))?;
    let services = queries::list_services(&db, Some(&practitioner.id), None)?;
    let hours = practitioner.parsed_availability().to_human_readable();
    Ok(Json(json!({
        "practitioner": practitioner,
        "services": services,
        "working_hours": hours,
    })))
}

#[derive(Deserialize)]
pub struct SlotsQuery {
    pub date: NaiveDate,
    pub service_id: String,
}

// GET /api/practitioners/:id/slots?date=&service_id=
pub async fn open_slots(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<Value>, AppError> {
    authenticate(&state, &headers)?;
    let db = state.db();
    let practitioner = queries::get_practitioner(&db, &id)?
        .ok_or_else(|| AppError::NotFound("practitioner".to_string()))?;
    let service = queries::get_service(&db, &query.service_id)?
        .filter(|s| s.practitioner_id == practitioner.id)
        .ok_or_else(|| AppError::NotFound("service".to_string()))?;
    if !matches!(service.service_type, ServiceType::Session | ServiceType::Package) {
        return Err(AppError::field(
            "service_id",
            "group services are booked by session",
        ));
    }

    let slots = scheduling::open_slots(
        &db,
        &practitioner,
        query.date,
        service.duration_minutes as i64,
        &db::now(),
    )?;
    Ok(Json(json!({
        "date": query.date,
        "duration_minutes": service.duration_minutes,
        "slots": slots,
    })))
}

// GET /api/practitioners/me/calendar-token
pub async fn calendar_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let user = authenticate(&state, &headers)?;
    let practitioner = require_practitioner(&state, &user)?;
    let token = calendar::feed_token(&state.config.calendar_feed_secret, &practitioner.id)?;
    let url = calendar::feed_url(&state.config.public_base_url, &practitioner.id, &token);
    Ok(Json(json!({ "token": token, "url": url })))
}
