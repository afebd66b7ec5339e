use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::db::{self, queries};
use crate::errors::{AppError, Validator};
use crate::handlers::auth::{authenticate, require_practitioner};
use crate::models::{Service, ServiceSession, ServiceType};
use crate::services::scheduling::validate_booking_time;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateServiceRequest {
    pub name: String,
    pub description: Option<String>,
    pub service_type: String,
    pub price_cents: i64,
    pub currency: Option<String>,
    pub duration_minutes: i32,
    pub max_participants: Option<i32>,
    pub sessions_included: Option<i32>,
}

// POST /api/services
pub async fn create_service(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateServiceRequest>,
) -> Result<(StatusCode, Json<Service>), AppError> {
    let user = authenticate(&state, &headers)?;
    let practitioner = require_practitioner(&state, &user)?;

    let name = body.name.trim().to_string();
    let service_type = ServiceType::parse(&body.service_type);
    let max_participants = match service_type {
        Some(t) if t.is_group() => body.max_participants.unwrap_or(10),
        _ => 1,
    };
    let sessions_included = match service_type {
        Some(ServiceType::Package) => body.sessions_included.unwrap_or(0),
        _ => 1,
    };

    Validator::new()
        .check(!name.is_empty(), "name", "required")
        .check(
            service_type.is_some(),
            "service_type",
            "must be one of session, workshop, course, package",
        )
        .check(body.price_cents > 0, "price_cents", "must be positive")
        .check(
            body.duration_minutes > 0 && body.duration_minutes <= 24 * 60,
            "duration_minutes",
            "must be between 1 and 1440",
        )
        .check(max_participants >= 1, "max_participants", "must be at least 1")
        .check(
            sessions_included >= 1,
            "sessions_included",
            "packages must include at least one session",
        )
        .finish()?;

    let service = Service {
        id: uuid::Uuid::new_v4().to_string(),
        practitioner_id: practitioner.id,
        name,
        description: body.description,
        service_type: service_type.unwrap_or(ServiceType::Session),
        price_cents: body.price_cents,
        currency: body
            .currency
            .map(|c| c.to_lowercase())
            .unwrap_or_else(|| state.config.platform_currency.clone()),
        duration_minutes: body.duration_minutes,
        max_participants,
        sessions_included,
        is_active: true,
        created_at: db::now(),
    };

    {
        let db = state.db();
        queries::create_service(&db, &service)?;
    }
    tracing::info!(service_id = %service.id, kind = service.service_type.as_str(), "service created");
    Ok((StatusCode::CREATED, Json(service)))
}

#[derive(Deserialize)]
pub struct ListServicesQuery {
    pub practitioner_id: Option<String>,
    #[serde(rename = "type")]
    pub service_type: Option<String>,
}

// GET /api/services
pub async fn list_services(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListServicesQuery>,
) -> Result<Json<Vec<Service>>, AppError> {
    authenticate(&state, &headers)?;
    let service_type = match query.service_type.as_deref() {
        Some(raw) => Some(
            ServiceType::parse(raw)
                .ok_or_else(|| AppError::field("type", "unknown service type"))?,
        ),
        None => None,
    };
    let services = {
        let db = state.db();
        queries::list_services(&db, query.practitioner_id.as_deref(), service_type)?
    };
    Ok(Json(services))
}

#[derive(Serialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: ServiceSession,
    pub spots_remaining: i64,
}

fn session_views(
    conn: &rusqlite::Connection,
    service_id: &str,
) -> Result<Vec<SessionView>, AppError> {
    let mut views = Vec::new();
    for session in queries::list_service_sessions(conn, service_id)? {
        let taken = queries::count_session_seats_taken(conn, &session.id)?;
        views.push(SessionView {
            spots_remaining: (session.max_participants as i64 - taken).max(0),
            session,
        });
    }
    Ok(views)
}

// GET /api/services/:id
pub async fn get_service(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    authenticate(&state, &headers)?;
    let db = state.db();
    let service = queries::get_service(&db, &id)?
        .ok_or_else(|| AppError::NotFound("service".to_string()))?;
    let sessions = session_views(&db, &service.id)?;
    Ok(Json(json!({ "service": service, "sessions": sessions })))
}

fn owned_service(state: &AppState, headers: &HeaderMap, id: &str) -> Result<Service, AppError> {
    let user = authenticate(state, headers)?;
    let practitioner = require_practitioner(state, &user)?;
    let db = state.db();
    let service = queries::get_service(&db, id)?
        .ok_or_else(|| AppError::NotFound("service".to_string()))?;
    if service.practitioner_id != practitioner.id {
        return Err(AppError::Forbidden("not your service".to_string()));
    }
    Ok(service)
}

// DELETE /api/services/:id
pub async fn delete_service(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let service = owned_service(&state, &headers, &id)?;
    {
        let db = state.db();
        queries::soft_delete_service(&db, &service.id)?;
    }
    tracing::info!(service_id = %service.id, "service deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    pub start_time: NaiveDateTime,
    pub end_time: Option<NaiveDateTime>,
    pub max_participants: Option<i32>,
}

// POST /api/services/:id/sessions
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<ServiceSession>), AppError> {
    let service = owned_service(&state, &headers, &id)?;
    if !service.service_type.is_group() {
        return Err(AppError::field(
            "service_id",
            "only workshops and courses have sessions",
        ));
    }

    let end = body
        .end_time
        .unwrap_or(body.start_time + Duration::minutes(service.duration_minutes as i64));
    let capacity = body.max_participants.unwrap_or(service.max_participants);
    Validator::new()
        .check(end > body.start_time, "end_time", "must be after start_time")
        .check(capacity >= 1, "max_participants", "must be at least 1")
        .finish()?;

    let session = ServiceSession {
        id: uuid::Uuid::new_v4().to_string(),
        service_id: service.id.clone(),
        start_time: body.start_time,
        end_time: end,
        max_participants: capacity,
        is_canceled: false,
    };

    {
        let db = state.db();
        let practitioner = queries::get_practitioner(&db, &service.practitioner_id)?
            .ok_or_else(|| AppError::NotFound("practitioner".to_string()))?;
        let minutes = (end - body.start_time).num_minutes();
        validate_booking_time(&db, &practitioner, &body.start_time, minutes, None, &db::now())?;
        queries::create_service_session(&db, &session)?;
    }
    Ok((StatusCode::CREATED, Json(session)))
}

// GET /api/services/:id/sessions
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Vec<SessionView>>, AppError> {
    authenticate(&state, &headers)?;
    let db = state.db();
    let service = queries::get_service(&db, &id)?
        .ok_or_else(|| AppError::NotFound("service".to_string()))?;
    Ok(Json(session_views(&db, &service.id)?))
}
