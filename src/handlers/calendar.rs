use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::db::{self, queries};
use crate::errors::AppError;
use crate::handlers::auth::authenticate;
use crate::services::booking::BookingContext;
use crate::services::calendar::{booking_event, generate_ics, practitioner_feed, verify_feed_token};
use crate::services::pricing::Actor;
use crate::state::AppState;

fn ics_response(ics: String, filename: &str) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/calendar; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        ics,
    )
        .into_response()
}

// GET /calendar/:booking_id
pub async fn download_ics(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(raw_id): Path<String>,
) -> Result<Response, AppError> {
    let user = authenticate(&state, &headers)?;
    // Strip .ics suffix if present
    let booking_id = raw_id.strip_suffix(".ics").unwrap_or(&raw_id);

    let event = {
        let db = state.db();
        let ctx = BookingContext::load(&db, booking_id)?;
        let other = match ctx.actor(&user)? {
            Actor::Client => ctx.practitioner.display_name.clone(),
            Actor::Practitioner => queries::get_user(&db, &ctx.booking.client_id)?
                .map(|u| u.full_name)
                .unwrap_or_else(|| "client".to_string()),
        };
        booking_event(&ctx.booking, format!("{} with {other}", ctx.service.name))
            .ok_or_else(|| AppError::Conflict("booking is not scheduled".to_string()))?
    };

    let ics = generate_ics(&[event], "Haven");
    Ok(ics_response(ics, &format!("booking-{booking_id}.ics")))
}

#[derive(Deserialize)]
pub struct FeedQuery {
    pub token: Option<String>,
}

// GET /calendar/feed/:practitioner_id.ics?token=
pub async fn practitioner_feed_ics(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
    Query(query): Query<FeedQuery>,
) -> Result<Response, AppError> {
    let practitioner_id = raw_id.strip_suffix(".ics").unwrap_or(&raw_id);
    let token = query.token.as_deref().unwrap_or("");
    if !verify_feed_token(&state.config.calendar_feed_secret, practitioner_id, token) {
        return Err(AppError::Unauthorized);
    }

    let (events, name) = {
        let db = state.db();
        let practitioner = queries::get_practitioner(&db, practitioner_id)?
            .ok_or_else(|| AppError::NotFound("practitioner".to_string()))?;
        let events = practitioner_feed(&db, &practitioner, db::now())?;
        (events, practitioner.display_name)
    };

    let ics = generate_ics(&events, &format!("{name} (Haven)"));
    Ok(ics_response(ics, "haven.ics"))
}
