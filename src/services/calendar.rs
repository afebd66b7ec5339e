use base64::Engine;
use chrono::{Duration, NaiveDateTime};
use hmac::{Hmac, Mac};
use rusqlite::Connection;
use sha1::Sha1;

use crate::db::queries;
use crate::models::{Booking, Practitioner};

const ICS_FORMAT: &str = "%Y%m%dT%H%M%SZ";

const FEED_HISTORY_DAYS: i64 = 30;
const FEED_HORIZON_DAYS: i64 = 365;

#[derive(Debug, Clone)]
pub struct CalendarEvent {
    pub uid: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub summary: String,
    pub description: Option<String>,
    pub stamp: NaiveDateTime,
}

fn escape_text(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace(';', "\\;")
        .replace(',', "\\,")
        .replace("\r\n", "\\n")
        .replace('\n', "\\n")
}

pub fn generate_ics(events: &[CalendarEvent], calendar_name: &str) -> String {
    let mut out = String::from(
        "BEGIN:VCALENDAR\r\n\
         VERSION:2.0\r\n\
         PRODID:-//Haven//Bookings//EN\r\n\
         CALSCALE:GREGORIAN\r\n",
    );
    out.push_str(&format!("X-WR-CALNAME:{}\r\n", escape_text(calendar_name)));

    for event in events {
        out.push_str("BEGIN:VEVENT\r\n");
        out.push_str(&format!("UID:{}\r\n", event.uid));
        out.push_str(&format!("DTSTAMP:{}\r\n", event.stamp.format(ICS_FORMAT)));
        out.push_str(&format!("DTSTART:{}\r\n", event.start.format(ICS_FORMAT)));
        out.push_str(&format!("DTEND:{}\r\n", event.end.format(ICS_FORMAT)));
        out.push_str(&format!("SUMMARY:{}\r\n", escape_text(&event.summary)));
        if let Some(description) = &event.description {
            out.push_str(&format!("DESCRIPTION:{}\r\n", escape_text(description)));
        }
        out.push_str("END:VEVENT\r\n");
    }

    out.push_str("END:VCALENDAR\r\n");
    out
}

pub fn booking_event(booking: &Booking, summary: String) -> Option<CalendarEvent> {
    Some(CalendarEvent {
        uid: format!("{}@haven", booking.id),
        start: booking.start_time?,
        end: booking.end_time?,
        summary,
        description: booking.notes.clone(),
        stamp: booking.updated_at,
    })
}

pub fn practitioner_feed(
    conn: &Connection,
    practitioner: &Practitioner,
    now: NaiveDateTime,
) -> anyhow::Result<Vec<CalendarEvent>> {
    let mut events = Vec::new();

    for booking in queries::confirmed_practitioner_bookings(conn, &practitioner.id)? {
        if booking.service_session_id.is_some() {
            continue;
        }
        let service = queries::get_service(conn, &booking.service_id)?;
        let client = queries::get_user(conn, &booking.client_id)?;
        let summary = format!(
            "{} with {}",
            service.map(|s| s.name).unwrap_or_else(|| "Session".to_string()),
            client.map(|c| c.full_name).unwrap_or_else(|| "client".to_string())
        );
        events.extend(booking_event(&booking, summary));
    }

    let from = now - Duration::days(FEED_HISTORY_DAYS);
    let to = now + Duration::days(FEED_HORIZON_DAYS);
    for session in queries::practitioner_group_sessions_in_range(conn, &practitioner.id, &from, &to)? {
        let taken = queries::count_session_seats_taken(conn, &session.id)?;
        let name = queries::get_service(conn, &session.service_id)?
            .map(|s| s.name)
            .unwrap_or_else(|| "Group session".to_string());
        events.push(CalendarEvent {
            uid: format!("{}@haven", session.id),
            start: session.start_time,
            end: session.end_time,
            summary: name,
            description: Some(format!("{taken} of {} seats booked", session.max_participants)),
            stamp: now,
        });
    }

    events.sort_by_key(|e| e.start);
    Ok(events)
}

pub fn feed_token(secret: &str, practitioner_id: &str) -> anyhow::Result<String> {
    let mut mac = Hmac::<Sha1>::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid calendar feed secret: {e}"))?;
    mac.update(practitioner_id.as_bytes());
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

pub fn verify_feed_token(secret: &str, practitioner_id: &str, token: &str) -> bool {
    let Ok(signature) = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(token) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha1>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(practitioner_id.as_bytes());
    mac.verify_slice(&signature).is_ok()
}

pub fn feed_url(base_url: &str, practitioner_id: &str, token: &str) -> String {
    format!(
        "{}/calendar/feed/{practitioner_id}.ics?token={token}",
        base_url.trim_end_matches('/')
    )
}
