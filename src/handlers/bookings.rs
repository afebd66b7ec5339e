use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::{self, queries};
use crate::errors::AppError;
use crate::handlers::auth::{authenticate, require_practitioner};
use crate::models::{Booking, BookingStatus};
use crate::services::booking::{self, BookingContext, NewBooking};
use crate::services::checkout::{self, CheckoutRequest, CheckoutResult};
use crate::services::earnings::format_cents;
use crate::services::notify::{notify, NewNotification};
use crate::services::rooms::{self, RoomAccess};
use crate::state::AppState;

fn describe(start: Option<NaiveDateTime>) -> String {
    start
        .map(|s| s.format("%a %b %-d at %H:%M UTC").to_string())
        .unwrap_or_else(|| "an unscheduled session".to_string())
}

// POST /api/bookings
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<NewBooking>,
) -> Result<(StatusCode, Json<Booking>), AppError> {
    let user = authenticate(&state, &headers)?;
    let booking = {
        let db = state.db();
        booking::create_booking(&db, &user, body, db::now())?
    };
    Ok((StatusCode::CREATED, Json(booking)))
}

#[derive(Deserialize)]
pub struct ListBookingsQuery {
    pub role: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
}

// GET /api/bookings
pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListBookingsQuery>,
) -> Result<Json<Vec<Booking>>, AppError> {
    let user = authenticate(&state, &headers)?;
    let limit = query.limit.unwrap_or(100).clamp(1, 500);
    let status = query.status.as_deref();
    if let Some(s) = status {
        if BookingStatus::parse(s).as_str() != s {
            return Err(AppError::field("status", "unknown booking status"));
        }
    }

    let bookings = match query.role.as_deref().unwrap_or("client") {
        "client" => {
            let db = state.db();
            queries::list_client_bookings(&db, &user.id, status, limit)?
        }
        "practitioner" => {
            let practitioner = require_practitioner(&state, &user)?;
            let db = state.db();
            queries::list_practitioner_bookings(&db, &practitioner.id, status, limit)?
        }
        _ => return Err(AppError::field("role", "must be client or practitioner")),
    };
    Ok(Json(bookings))
}

// GET /api/bookings/:id
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let user = authenticate(&state, &headers)?;
    let db = state.db();
    let ctx = BookingContext::load(&db, &id)?;
    ctx.actor(&user)?;
    let sessions = queries::list_child_bookings(&db, &ctx.booking.id)?;
    Ok(Json(json!({
        "booking": ctx.booking,
        "service": ctx.service,
        "practitioner": ctx.practitioner,
        "sessions": sessions,
    })))
}

// POST /api/bookings/:id/checkout
pub async fn checkout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<CheckoutRequest>>,
) -> Result<Json<CheckoutResult>, AppError> {
    let user = authenticate(&state, &headers)?;
    let req = body.map(|Json(b)| b).unwrap_or(CheckoutRequest {
        payment_method: None,
        use_credits: true,
    });
    let result = checkout::checkout(&state, &user, &id, req).await?;
    Ok(Json(result))
}

#[derive(Deserialize)]
pub struct StartTimeRequest {
    pub start_time: NaiveDateTime,
}

// POST /api/bookings/:id/schedule
pub async fn schedule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<StartTimeRequest>,
) -> Result<Json<Booking>, AppError> {
    let user = authenticate(&state, &headers)?;
    let (booking, counterpart) = {
        let db = state.db();
        booking::schedule_package_session(&db, &user, &id, body.start_time, db::now())?
    };

    notify(
        &state,
        NewNotification {
            user_id: &counterpart,
            kind: "session_scheduled",
            title: "Session scheduled".to_string(),
            body: format!("A package session was scheduled for {}.", describe(booking.start_time)),
            booking_id: Some(&booking.id),
            dedupe_key: None,
        },
    )
    .await;
    Ok(Json(booking))
}

#[derive(Deserialize, Default)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

// POST /api/bookings/:id/cancel
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<CancelRequest>>,
) -> Result<Json<Value>, AppError> {
    let user = authenticate(&state, &headers)?;
    let reason = body.and_then(|Json(b)| b.reason).filter(|r| !r.trim().is_empty());
    let outcome = {
        let db = state.db();
        booking::cancel_booking(&db, &user, &id, reason.as_deref(), db::now())?
    };

    let refund_note = if outcome.refund_cents > 0 {
        format!(
            " {} was refunded as credit.",
            format_cents(outcome.refund_cents)
        )
    } else {
        String::new()
    };
    let body = if outcome.returned_to_package {
        "A package session was cancelled and returned to the package.".to_string()
    } else {
        format!("{} cancelled a booking.{refund_note}", user.full_name)
    };
    notify(
        &state,
        NewNotification {
            user_id: &outcome.counterpart_user_id,
            kind: "booking_canceled",
            title: "Booking cancelled".to_string(),
            body,
            booking_id: Some(&outcome.booking.id),
            dedupe_key: None,
        },
    )
    .await;

    Ok(Json(json!({
        "booking": outcome.booking,
        "refund_cents": outcome.refund_cents,
        "returned_to_package": outcome.returned_to_package,
    })))
}

// POST /api/bookings/:id/reschedule
pub async fn reschedule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<StartTimeRequest>,
) -> Result<Json<Booking>, AppError> {
    let user = authenticate(&state, &headers)?;
    let (booking, counterpart) = {
        let db = state.db();
        booking::reschedule_booking(
            &db,
            &user,
            &id,
            body.start_time,
            db::now(),
            state.config.earnings_hold_hours,
        )?
    };

    notify(
        &state,
        NewNotification {
            user_id: &counterpart,
            kind: "booking_rescheduled",
            title: "Booking rescheduled".to_string(),
            body: format!("{} moved a booking to {}.", user.full_name, describe(booking.start_time)),
            booking_id: Some(&booking.id),
            dedupe_key: None,
        },
    )
    .await;
    Ok(Json(booking))
}

fn record_outcome(
    state: &AppState,
    headers: &HeaderMap,
    id: &str,
    outcome: BookingStatus,
) -> Result<Json<Booking>, AppError> {
    let user = authenticate(state, headers)?;
    let db = state.db();
    let booking = booking::record_outcome(&db, &user, id, outcome, db::now())?;
    Ok(Json(booking))
}

// POST /api/bookings/:id/complete
pub async fn complete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Booking>, AppError> {
    record_outcome(&state, &headers, &id, BookingStatus::Completed)
}

// POST /api/bookings/:id/no-show
pub async fn no_show(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Booking>, AppError> {
    record_outcome(&state, &headers, &id, BookingStatus::NoShow)
}

// GET /api/bookings/:id/room
pub async fn room(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<RoomAccess>, AppError> {
    let user = authenticate(&state, &headers)?;
    let access = rooms::join_room(&state, &user, &id, db::now()).await?;
    Ok(Json(access))
}
