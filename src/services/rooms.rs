use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use rusqlite::Connection;
use serde::Serialize;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{Booking, BookingStatus, Room, User};
use crate::services::booking::{transition, BookingContext};
use crate::services::pricing::Actor;
use crate::services::workflow::run_activity;
use crate::state::AppState;

const ROOM_GRACE_MINUTES: i64 = 60;

#[derive(Debug, Serialize)]
pub struct RoomAccess {
    pub url: String,
    pub token: String,
    pub opens_at: NaiveDateTime,
    pub closes_at: NaiveDateTime,
}

pub fn room_window(
    conn: &Connection,
    booking: &Booking,
    now: NaiveDateTime,
) -> Result<(String, NaiveDateTime, NaiveDateTime), AppError> {
    let Some(session_id) = booking.service_session_id.as_deref() else {
        return match (booking.start_time, booking.end_time) {
            (Some(start), Some(end)) => Ok((booking.id.clone(), start, end)),
            _ => Err(AppError::BadRequest("booking is not scheduled".to_string())),
        };
    };

    let anchor = queries::get_service_session(conn, session_id)?
        .ok_or_else(|| AppError::NotFound("service session".to_string()))?;
    // A course booking spans past its first session; use the one running now or the next one.
    let session = if booking.end_time.map_or(false, |end| end > anchor.end_time) {
        queries::list_service_sessions(conn, &booking.service_id)?
            .into_iter()
            .find(|s| s.end_time > now)
            .ok_or_else(|| AppError::Conflict("course has ended".to_string()))?
    } else {
        anchor
    };
    Ok((session.id, session.start_time, session.end_time))
}

pub async fn ensure_room(
    state: &Arc<AppState>,
    subject_id: &str,
    expires_at: NaiveDateTime,
) -> anyhow::Result<Room> {
    let existing = {
        let db = state.db();
        queries::get_room(&db, subject_id)?
    };
    if let Some(room) = existing {
        return Ok(room);
    }

    let name = format!("haven-{subject_id}");
    let video = &state.video;
    let name_ref = name.as_str();
    let (url, _) = run_activity("create_room", &state.retry_policy, move || {
        video.create_room(name_ref, expires_at)
    })
    .await
    .map_err(|e| e.error)?;

    let db = state.db();
    queries::create_room(&db, subject_id, &name, &url)?;
    let room = queries::get_room(&db, subject_id)?
        .ok_or_else(|| anyhow::anyhow!("room {subject_id} vanished after insert"))?;
    tracing::info!(subject_id, room = %room.provider_room_name, "video room ready");
    Ok(room)
}

pub async fn join_room(
    state: &Arc<AppState>,
    user: &User,
    booking_id: &str,
    now: NaiveDateTime,
) -> Result<RoomAccess, AppError> {
    let (actor, subject_id, start, end) = {
        let db = state.db();
        let ctx = BookingContext::load(&db, booking_id)?;
        let actor = ctx.actor(user)?;
        if !matches!(
            ctx.booking.status,
            BookingStatus::Confirmed | BookingStatus::InProgress
        ) {
            return Err(AppError::Conflict(format!(
                "booking is {}",
                ctx.booking.status.as_str()
            )));
        }

        let (subject_id, start, end) = room_window(&db, &ctx.booking, now)?;
        let opens_at = start - Duration::minutes(state.config.room_join_early_minutes);
        if now < opens_at {
            return Err(AppError::Conflict(format!("room opens at {opens_at}")));
        }
        if now >= end {
            return Err(AppError::Conflict("session has ended".to_string()));
        }

        if actor == Actor::Practitioner
            && ctx.booking.status == BookingStatus::Confirmed
            && ctx.booking.service_session_id.is_none()
        {
            transition(&db, &ctx.booking, BookingStatus::InProgress)?;
        }
        (actor, subject_id, start, end)
    };

    let expires_at = end + Duration::minutes(ROOM_GRACE_MINUTES);
    let room = ensure_room(state, &subject_id, expires_at)
        .await
        .map_err(|e| AppError::Provider(format!("could not create room: {e}")))?;

    let video = &state.video;
    let room_name = room.provider_room_name.as_str();
    let user_name = user.full_name.as_str();
    let is_owner = actor == Actor::Practitioner;
    let (token, _) = run_activity("meeting_token", &state.retry_policy, move || {
        video.meeting_token(room_name, user_name, is_owner, expires_at)
    })
    .await
    .map_err(|e| AppError::Provider(format!("could not issue meeting token: {}", e.error)))?;

    Ok(RoomAccess {
        url: room.url,
        token,
        opens_at: start - Duration::minutes(state.config.room_join_early_minutes),
        closes_at: end,
    })
}
