use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;

use crate::db::{self, queries};
use crate::models::{Booking, BookingStatus};
use crate::services::booking::transition;
use crate::services::notify::{notify, NewNotification};
use crate::state::AppState;

// Sessions still open this long after their end are marked completed.
const AUTO_COMPLETE_AFTER_MINUTES: i64 = 30;

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub reminders_sent: usize,
    pub auto_completed: usize,
    pub earnings_released: usize,
}

struct Reminder {
    kind: &'static str,
    lead: &'static str,
    booking: Booking,
    // (user id, dedupe subject), one practitioner entry per group session
    recipients: Vec<(String, String)>,
    service_name: String,
}

fn collect_reminders(
    state: &AppState,
    now: NaiveDateTime,
) -> anyhow::Result<Vec<Reminder>> {
    let db = state.db();
    let windows = [
        ("reminder_24h", "tomorrow", now + Duration::hours(1), now + Duration::hours(24)),
        ("reminder_1h", "within the hour", now, now + Duration::hours(1)),
    ];

    let mut reminders = Vec::new();
    for (kind, lead, from, to) in windows {
        for booking in queries::confirmed_bookings_starting_between(&db, &from, &to)? {
            let Some(practitioner) = queries::get_practitioner(&db, &booking.practitioner_id)? else {
                continue;
            };
            let service_name = queries::get_service(&db, &booking.service_id)?
                .map(|s| s.name)
                .unwrap_or_else(|| "session".to_string());
            let group_subject = booking
                .service_session_id
                .clone()
                .unwrap_or_else(|| booking.id.clone());
            reminders.push(Reminder {
                kind,
                lead,
                recipients: vec![
                    (booking.client_id.clone(), booking.id.clone()),
                    (practitioner.user_id, group_subject),
                ],
                booking,
                service_name,
            });
        }
    }
    Ok(reminders)
}

fn auto_complete(state: &AppState, now: NaiveDateTime) -> anyhow::Result<usize> {
    let db = state.db();
    let cutoff = now - Duration::minutes(AUTO_COMPLETE_AFTER_MINUTES);
    let mut completed = 0;
    for booking in queries::active_bookings_ended_before(&db, &cutoff)? {
        match transition(&db, &booking, BookingStatus::Completed) {
            Ok(()) => completed += 1,
            Err(e) => tracing::warn!(booking_id = %booking.id, error = %e, "auto-complete skipped"),
        }
    }
    Ok(completed)
}

// Reminders are deduplicated per booking, user and start time. A failing
// step is logged and the remaining steps still run.
pub async fn tick(state: &Arc<AppState>, now: NaiveDateTime) -> TickReport {
    let mut report = TickReport::default();

    let reminders = collect_reminders(state, now).unwrap_or_else(|e| {
        tracing::error!(error = %e, "collecting reminders failed");
        Vec::new()
    });
    for reminder in reminders {
        let Some(start) = reminder.booking.start_time else {
            continue;
        };
        for (user_id, subject) in &reminder.recipients {
            let sent = notify(
                state,
                NewNotification {
                    user_id,
                    kind: reminder.kind,
                    title: "Upcoming session".to_string(),
                    body: format!(
                        "{} starts {} at {} UTC.",
                        reminder.service_name,
                        reminder.lead,
                        start.format("%H:%M")
                    ),
                    booking_id: Some(&reminder.booking.id),
                    dedupe_key: Some(format!(
                        "{}:{}:{}:{}",
                        reminder.kind,
                        subject,
                        user_id,
                        db::ts(&start)
                    )),
                },
            )
            .await;
            if sent.is_some() {
                report.reminders_sent += 1;
            }
        }
    }

    report.auto_completed = auto_complete(state, now).unwrap_or_else(|e| {
        tracing::error!(error = %e, "auto-complete failed");
        0
    });
    let released = {
        let db = state.db();
        queries::release_available_earnings(&db, &now)
    };
    report.earnings_released = released.unwrap_or_else(|e| {
        tracing::error!(error = %e, "releasing earnings failed");
        0
    });

    if report != TickReport::default() {
        tracing::info!(
            reminders = report.reminders_sent,
            completed = report.auto_completed,
            released = report.earnings_released,
            "scheduler tick"
        );
    }
    report
}

pub async fn run_scheduler(state: Arc<AppState>) {
    let mut interval =
        tokio::time::interval(StdDuration::from_secs(state.config.reminder_interval_secs.max(1)));
    loop {
        interval.tick().await;
        tick(&state, db::now()).await;
    }
}
