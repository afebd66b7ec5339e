use chrono::{Duration, NaiveDate, NaiveDateTime};
use rusqlite::Connection;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::Practitioner;

const SLOT_STEP_MINUTES: i64 = 15;

#[derive(Debug)]
pub enum SchedulingError {
    InPast,
    OutsideAvailability { hours: String },
    Conflict,
    Storage(anyhow::Error),
}

impl std::fmt::Display for SchedulingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulingError::InPast => write!(f, "start time must be in the future"),
            SchedulingError::OutsideAvailability { hours } => {
                write!(f, "outside the practitioner's working hours ({hours})")
            }
            SchedulingError::Conflict => write!(f, "the practitioner is already booked at that time"),
            SchedulingError::Storage(e) => write!(f, "{e}"),
        }
    }
}

impl From<SchedulingError> for AppError {
    fn from(err: SchedulingError) -> Self {
        match err {
            SchedulingError::Conflict => AppError::Conflict(err.to_string()),
            SchedulingError::Storage(e) => AppError::Internal(e),
            other => AppError::field("start_time", other.to_string()),
        }
    }
}

pub fn validate_booking_time(
    conn: &Connection,
    practitioner: &Practitioner,
    start: &NaiveDateTime,
    duration_minutes: i64,
    exclude_booking: Option<&str>,
    now: &NaiveDateTime,
) -> Result<(), SchedulingError> {
    if start <= now {
        return Err(SchedulingError::InPast);
    }

    let availability = practitioner.parsed_availability();
    if !availability.covers(start, duration_minutes) {
        return Err(SchedulingError::OutsideAvailability {
            hours: availability.to_human_readable(),
        });
    }

    let end = *start + Duration::minutes(duration_minutes);
    if is_busy(conn, practitioner, start, &end, exclude_booking).map_err(SchedulingError::Storage)? {
        return Err(SchedulingError::Conflict);
    }

    Ok(())
}

// touching intervals do not overlap
fn is_busy(
    conn: &Connection,
    practitioner: &Practitioner,
    start: &NaiveDateTime,
    end: &NaiveDateTime,
    exclude_booking: Option<&str>,
) -> anyhow::Result<bool> {
    let buffer = Duration::minutes(practitioner.buffer_minutes as i64);
    let window_start = *start - buffer;
    let window_end = *end + buffer;

    let bookings = queries::get_practitioner_bookings_in_range(
        conn,
        &practitioner.id,
        &window_start,
        &window_end,
        exclude_booking,
    )?;
    if !bookings.is_empty() {
        return Ok(true);
    }

    let sessions = queries::practitioner_group_sessions_in_range(
        conn,
        &practitioner.id,
        &window_start,
        &window_end,
    )?;
    Ok(!sessions.is_empty())
}

pub fn open_slots(
    conn: &Connection,
    practitioner: &Practitioner,
    date: NaiveDate,
    duration_minutes: i64,
    now: &NaiveDateTime,
) -> anyhow::Result<Vec<NaiveDateTime>> {
    let availability = practitioner.parsed_availability();
    let windows = if availability.is_unrestricted() {
        let day_start = date.and_hms_opt(0, 0, 0).unwrap_or_default();
        vec![(day_start, day_start + Duration::days(1))]
    } else {
        availability.windows_on(date)
    };

    let duration = Duration::minutes(duration_minutes);
    let mut slots = Vec::new();
    for (win_start, win_end) in windows {
        let mut candidate = win_start;
        while candidate + duration <= win_end {
            let end = candidate + duration;
            if candidate > *now && !is_busy(conn, practitioner, &candidate, &end, None)? {
                slots.push(candidate);
            }
            candidate += Duration::minutes(SLOT_STEP_MINUTES);
        }
    }
    Ok(slots)
}
