use chrono::{Duration, NaiveDateTime};
use rusqlite::Connection;
use serde::Deserialize;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{
    Booking, BookingStatus, EarningsStatus, PaymentStatus, Practitioner, Service, ServiceType,
    User,
};
use crate::services::pricing::{self, Actor};
use crate::services::scheduling::validate_booking_time;

#[derive(Debug, Deserialize)]
pub struct NewBooking {
    pub service_id: String,
    pub start_time: Option<NaiveDateTime>,
    pub service_session_id: Option<String>,
    pub notes: Option<String>,
}

pub struct BookingContext {
    pub booking: Booking,
    pub service: Service,
    pub practitioner: Practitioner,
}

impl BookingContext {
    pub fn load(conn: &Connection, booking_id: &str) -> Result<Self, AppError> {
        let booking = queries::get_booking(conn, booking_id)?
            .ok_or_else(|| AppError::NotFound("booking".to_string()))?;
        let service = queries::get_service(conn, &booking.service_id)?
            .ok_or_else(|| AppError::NotFound("service".to_string()))?;
        let practitioner = queries::get_practitioner(conn, &booking.practitioner_id)?
            .ok_or_else(|| AppError::NotFound("practitioner".to_string()))?;
        Ok(Self {
            booking,
            service,
            practitioner,
        })
    }

    // non-participants get 404
    pub fn actor(&self, user: &User) -> Result<Actor, AppError> {
        if self.practitioner.user_id == user.id {
            Ok(Actor::Practitioner)
        } else if self.booking.client_id == user.id {
            Ok(Actor::Client)
        } else {
            Err(AppError::NotFound("booking".to_string()))
        }
    }

    pub fn counterpart(&self, actor: Actor) -> &str {
        match actor {
            Actor::Client => &self.practitioner.user_id,
            Actor::Practitioner => &self.booking.client_id,
        }
    }
}

pub fn transition(
    conn: &Connection,
    booking: &Booking,
    next: BookingStatus,
) -> Result<(), AppError> {
    if !booking.status.can_transition_to(next) {
        return Err(AppError::InvalidTransition {
            from: booking.status.as_str().to_string(),
            to: next.as_str().to_string(),
        });
    }
    queries::update_booking_status(conn, &booking.id, next)?;
    tracing::info!(
        booking_id = %booking.id,
        from = booking.status.as_str(),
        to = next.as_str(),
        "booking status changed"
    );
    Ok(())
}

fn draft(
    client: &User,
    service: &Service,
    start: Option<NaiveDateTime>,
    end: Option<NaiveDateTime>,
    now: NaiveDateTime,
) -> Booking {
    Booking {
        id: uuid::Uuid::new_v4().to_string(),
        client_id: client.id.clone(),
        practitioner_id: service.practitioner_id.clone(),
        service_id: service.id.clone(),
        service_session_id: None,
        parent_booking_id: None,
        start_time: start,
        end_time: end,
        status: BookingStatus::Draft,
        payment_status: PaymentStatus::Unpaid,
        price_cents: service.price_cents,
        reschedule_count: 0,
        cancellation_reason: None,
        canceled_by: None,
        notes: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn create_booking(
    conn: &Connection,
    client: &User,
    req: NewBooking,
    now: NaiveDateTime,
) -> Result<Booking, AppError> {
    let service = queries::get_service(conn, &req.service_id)?
        .filter(|s| s.is_active)
        .ok_or_else(|| AppError::field("service_id", "service not found"))?;
    let practitioner = queries::get_practitioner(conn, &service.practitioner_id)?
        .filter(|p| p.is_active)
        .ok_or_else(|| AppError::field("service_id", "practitioner is not accepting bookings"))?;

    if practitioner.user_id == client.id {
        return Err(AppError::field("service_id", "cannot book your own service"));
    }

    let mut booking = match service.service_type {
        ServiceType::Session => {
            let start = req
                .start_time
                .ok_or_else(|| AppError::field("start_time", "required for sessions"))?;
            let duration = service.duration_minutes as i64;
            validate_booking_time(conn, &practitioner, &start, duration, None, &now)?;
            draft(client, &service, Some(start), Some(start + Duration::minutes(duration)), now)
        }
        ServiceType::Workshop => {
            let session_id = req
                .service_session_id
                .as_deref()
                .ok_or_else(|| AppError::field("service_session_id", "required for workshops"))?;
            let session = queries::get_service_session(conn, session_id)?
                .filter(|s| s.service_id == service.id && !s.is_canceled)
                .ok_or_else(|| AppError::field("service_session_id", "session not found"))?;
            check_group_seat(conn, &session.id, session.max_participants, &session.start_time, &now)?;
            let mut booking = draft(
                client,
                &service,
                Some(session.start_time),
                Some(session.end_time),
                now,
            );
            booking.service_session_id = Some(session.id);
            booking
        }
        ServiceType::Course => {
            let sessions = queries::list_service_sessions(conn, &service.id)?;
            let (first, last) = match (sessions.first(), sessions.last()) {
                (Some(first), Some(last)) => (first, last),
                _ => {
                    return Err(AppError::field(
                        "service_id",
                        "course has no scheduled sessions",
                    ))
                }
            };
            check_group_seat(conn, &first.id, first.max_participants, &first.start_time, &now)?;
            let mut booking = draft(
                client,
                &service,
                Some(first.start_time),
                Some(last.end_time),
                now,
            );
            booking.service_session_id = Some(first.id.clone());
            booking
        }
        ServiceType::Package => draft(client, &service, None, None, now),
    };
    booking.notes = req.notes;

    let tx = conn.unchecked_transaction()?;
    queries::create_booking(&tx, &booking)?;
    if service.service_type == ServiceType::Package {
        for _ in 0..service.sessions_included {
            let mut child = draft(client, &service, None, None, now);
            child.parent_booking_id = Some(booking.id.clone());
            child.price_cents = 0;
            queries::create_booking(&tx, &child)?;
        }
    }
    tx.commit()?;

    tracing::info!(
        booking_id = %booking.id,
        service_type = service.service_type.as_str(),
        client_id = %client.id,
        "booking drafted"
    );
    Ok(booking)
}

pub fn check_group_seat(
    conn: &Connection,
    session_id: &str,
    capacity: i32,
    start: &NaiveDateTime,
    now: &NaiveDateTime,
) -> Result<(), AppError> {
    if start <= now {
        return Err(AppError::field("service_session_id", "session has already started"));
    }
    let taken = queries::count_session_seats_taken(conn, session_id)?;
    if taken >= capacity as i64 {
        return Err(AppError::Conflict("session is full".to_string()));
    }
    Ok(())
}

pub fn schedule_package_session(
    conn: &Connection,
    user: &User,
    booking_id: &str,
    start: NaiveDateTime,
    now: NaiveDateTime,
) -> Result<(Booking, String), AppError> {
    let ctx = BookingContext::load(conn, booking_id)?;
    let actor = ctx.actor(user)?;

    if ctx.booking.parent_booking_id.is_none() {
        return Err(AppError::BadRequest(
            "only package sessions can be scheduled".to_string(),
        ));
    }
    if ctx.booking.status != BookingStatus::Confirmed {
        return Err(AppError::Conflict("package has not been paid".to_string()));
    }
    if ctx.booking.is_scheduled() {
        return Err(AppError::Conflict("session is already scheduled".to_string()));
    }

    let duration = ctx.service.duration_minutes as i64;
    validate_booking_time(conn, &ctx.practitioner, &start, duration, None, &now)?;
    queries::update_booking_times(
        conn,
        &ctx.booking.id,
        &start,
        &(start + Duration::minutes(duration)),
        false,
    )?;

    let updated = queries::get_booking(conn, &ctx.booking.id)?
        .ok_or_else(|| AppError::NotFound("booking".to_string()))?;
    Ok((updated, ctx.counterpart(actor).to_string()))
}

#[derive(Debug)]
pub struct CancelOutcome {
    pub booking: Booking,
    pub refund_cents: i64,
    pub counterpart_user_id: String,
    pub returned_to_package: bool,
}

pub fn cancel_booking(
    conn: &Connection,
    user: &User,
    booking_id: &str,
    reason: Option<&str>,
    now: NaiveDateTime,
) -> Result<CancelOutcome, AppError> {
    let ctx = BookingContext::load(conn, booking_id)?;
    let actor = ctx.actor(user)?;
    let booking = &ctx.booking;

    let tx = conn.unchecked_transaction()?;
    let mut refund_cents = 0;
    let mut returned_to_package = false;

    if booking.parent_booking_id.is_some() {
        let Some(start) = booking.start_time else {
            return Err(AppError::BadRequest(
                "unscheduled package sessions are cancelled with the package".to_string(),
            ));
        };
        if booking.status != BookingStatus::Confirmed {
            return Err(AppError::InvalidTransition {
                from: booking.status.as_str().to_string(),
                to: BookingStatus::Canceled.as_str().to_string(),
            });
        }
        if pricing::refund_percent(actor, Some(start), now) == 100 {
            queries::clear_booking_times(&tx, &booking.id)?;
            returned_to_package = true;
        } else {
            queries::mark_booking_canceled(&tx, &booking.id, reason, &user.id)?;
        }
    } else {
        if !booking.status.can_transition_to(BookingStatus::Canceled) {
            return Err(AppError::InvalidTransition {
                from: booking.status.as_str().to_string(),
                to: BookingStatus::Canceled.as_str().to_string(),
            });
        }

        let paid = booking.payment_status == PaymentStatus::Paid;
        if paid {
            if let Some(earnings) = queries::get_earnings_for_booking(&tx, &booking.id)? {
                if earnings.payout_id.is_some() && earnings.status != EarningsStatus::Paid {
                    return Err(AppError::Conflict(
                        "a payout including this booking is processing, try again shortly"
                            .to_string(),
                    ));
                }
            }
        }
        if ctx.service.service_type == ServiceType::Package {
            let children = queries::list_child_bookings(&tx, &booking.id)?;
            let unused: Vec<&Booking> = children
                .iter()
                .filter(|c| matches!(c.status, BookingStatus::Draft | BookingStatus::Confirmed))
                .collect();
            if paid {
                let percents: Vec<i64> = unused
                    .iter()
                    .map(|c| pricing::refund_percent(actor, c.start_time, now))
                    .collect();
                refund_cents =
                    pricing::package_refund(booking.price_cents, children.len() as i64, &percents);
            }
            for child in unused {
                queries::mark_booking_canceled(&tx, &child.id, reason, &user.id)?;
            }
        } else if paid {
            let percent = pricing::refund_percent(actor, booking.start_time, now);
            refund_cents = pricing::percent_of(booking.price_cents, percent);
        }

        queries::mark_booking_canceled(&tx, &booking.id, reason, &user.id)?;

        if refund_cents > 0 {
            queries::insert_credit_transaction(
                &tx,
                &booking.client_id,
                refund_cents,
                "refund",
                Some(&booking.id),
                Some("booking cancellation"),
            )?;
            let status = if refund_cents >= booking.price_cents {
                PaymentStatus::Refunded
            } else {
                PaymentStatus::PartiallyRefunded
            };
            queries::update_payment_status(&tx, &booking.id, status)?;
        }

        if paid {
            adjust_earnings_for_refund(&tx, &booking.id, refund_cents)?;
        }
    }
    tx.commit()?;

    tracing::info!(
        booking_id = %booking.id,
        actor = ?actor,
        refund_cents,
        returned_to_package,
        "booking cancelled"
    );

    let updated = queries::get_booking(conn, &booking.id)?
        .ok_or_else(|| AppError::NotFound("booking".to_string()))?;
    Ok(CancelOutcome {
        booking: updated,
        refund_cents,
        counterpart_user_id: ctx.counterpart(actor).to_string(),
        returned_to_package,
    })
}

fn adjust_earnings_for_refund(
    conn: &Connection,
    booking_id: &str,
    refund_cents: i64,
) -> anyhow::Result<()> {
    let Some(earnings) = queries::get_earnings_for_booking(conn, booking_id)? else {
        return Ok(());
    };
    if earnings.status == EarningsStatus::Paid {
        tracing::warn!(booking_id, refund_cents, "refund issued after earnings were paid out");
        return Ok(());
    }

    let remaining = earnings.gross_cents - refund_cents;
    if remaining <= 0 {
        queries::update_earnings_amounts(
            conn,
            &earnings.id,
            earnings.gross_cents,
            earnings.commission_cents,
            earnings.net_cents,
            EarningsStatus::Canceled,
        )?;
    } else {
        let (commission, net) = pricing::split_commission(remaining, earnings.commission_rate_bps);
        queries::update_earnings_amounts(conn, &earnings.id, remaining, commission, net, earnings.status)?;
    }
    Ok(())
}

pub fn reschedule_booking(
    conn: &Connection,
    user: &User,
    booking_id: &str,
    new_start: NaiveDateTime,
    now: NaiveDateTime,
    hold_hours: i64,
) -> Result<(Booking, String), AppError> {
    let ctx = BookingContext::load(conn, booking_id)?;
    let actor = ctx.actor(user)?;
    let booking = &ctx.booking;

    let Some(current_start) = booking.start_time else {
        return Err(AppError::BadRequest("booking is not scheduled".to_string()));
    };
    if booking.service_session_id.is_some() {
        return Err(AppError::BadRequest(
            "group bookings follow their session schedule".to_string(),
        ));
    }
    if booking.status != BookingStatus::Confirmed {
        return Err(AppError::Conflict(
            "only confirmed bookings can be rescheduled".to_string(),
        ));
    }
    if booking.reschedule_count >= pricing::MAX_RESCHEDULES {
        return Err(AppError::Conflict(format!(
            "booking was already rescheduled {} times",
            pricing::MAX_RESCHEDULES
        )));
    }
    if actor == Actor::Client && !pricing::within_free_change_window(current_start, now) {
        return Err(AppError::Conflict(format!(
            "bookings can only be rescheduled {} hours ahead",
            pricing::FREE_CHANGE_WINDOW_HOURS
        )));
    }

    let duration = ctx.service.duration_minutes as i64;
    validate_booking_time(conn, &ctx.practitioner, &new_start, duration, Some(&booking.id), &now)?;
    let new_end = new_start + Duration::minutes(duration);

    let tx = conn.unchecked_transaction()?;
    queries::update_booking_times(&tx, &booking.id, &new_start, &new_end, true)?;
    queries::set_earnings_available_after(&tx, &booking.id, &(new_end + Duration::hours(hold_hours)))?;
    tx.commit()?;

    tracing::info!(
        booking_id = %booking.id,
        from = %current_start,
        to = %new_start,
        "booking rescheduled"
    );

    let updated = queries::get_booking(conn, &booking.id)?
        .ok_or_else(|| AppError::NotFound("booking".to_string()))?;
    Ok((updated, ctx.counterpart(actor).to_string()))
}

pub fn record_outcome(
    conn: &Connection,
    user: &User,
    booking_id: &str,
    outcome: BookingStatus,
    now: NaiveDateTime,
) -> Result<Booking, AppError> {
    let ctx = BookingContext::load(conn, booking_id)?;
    if ctx.actor(user)? != Actor::Practitioner {
        return Err(AppError::Forbidden(
            "only the practitioner can record the outcome".to_string(),
        ));
    }
    match ctx.booking.start_time {
        Some(start) if start <= now => {}
        _ => return Err(AppError::Conflict("session has not started yet".to_string())),
    }

    transition(conn, &ctx.booking, outcome)?;
    let updated = queries::get_booking(conn, &ctx.booking.id)?
        .ok_or_else(|| AppError::NotFound("booking".to_string()))?;
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::{EarningsTransaction, Payout, PayoutStatus, ServiceSession, Tier};

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn user(id: &str) -> User {
        User {
            id: id.to_string(),
            email: format!("{id}@example.com"),
            full_name: id.to_string(),
            phone: None,
            api_token: format!("tok-{id}"),
            is_admin: false,
            created_at: dt("2025-01-01 00:00"),
        }
    }

    struct Fixture {
        conn: Connection,
        client: User,
        prac_user: User,
    }

    fn fixture() -> Fixture {
        let conn = db::init_db(":memory:").unwrap();
        let client = user("client");
        let prac_user = user("prac");
        queries::create_user(&conn, &client).unwrap();
        queries::create_user(&conn, &prac_user).unwrap();
        queries::save_practitioner(
            &conn,
            &Practitioner {
                id: "p-1".to_string(),
                user_id: prac_user.id.clone(),
                display_name: "Prac".to_string(),
                bio: None,
                tier: Tier::Basic,
                timezone: "UTC".to_string(),
                availability: None,
                buffer_minutes: 0,
                payout_account_id: None,
                is_active: true,
            },
        )
        .unwrap();
        Fixture {
            conn,
            client,
            prac_user,
        }
    }

    fn add_service(conn: &Connection, id: &str, service_type: ServiceType, sessions: i32) {
        queries::create_service(
            conn,
            &Service {
                id: id.to_string(),
                practitioner_id: "p-1".to_string(),
                name: id.to_string(),
                description: None,
                service_type,
                price_cents: 10_000,
                currency: "usd".to_string(),
                duration_minutes: 60,
                max_participants: 2,
                sessions_included: sessions,
                is_active: true,
                created_at: dt("2025-01-01 00:00"),
            },
        )
        .unwrap();
    }

    fn session_request(start: &str) -> NewBooking {
        NewBooking {
            service_id: "svc-session".to_string(),
            start_time: Some(dt(start)),
            service_session_id: None,
            notes: None,
        }
    }

    fn mark_paid(conn: &Connection, booking: &Booking) {
        queries::update_booking_status(conn, &booking.id, BookingStatus::Confirmed).unwrap();
        queries::update_payment_status(conn, &booking.id, PaymentStatus::Paid).unwrap();
        let (commission, net) = pricing::split_commission(booking.price_cents, 1500);
        queries::create_earnings(
            conn,
            &EarningsTransaction {
                id: format!("earn-{}", booking.id),
                practitioner_id: "p-1".to_string(),
                booking_id: booking.id.clone(),
                gross_cents: booking.price_cents,
                commission_rate_bps: 1500,
                commission_cents: commission,
                net_cents: net,
                status: EarningsStatus::Pending,
                available_after: dt("2025-07-01 00:00"),
                payout_id: None,
                created_at: dt("2025-06-01 00:00"),
            },
        )
        .unwrap();
    }

    #[test]
    fn test_session_booking_requires_start_and_rejects_self_booking() {
        let f = fixture();
        add_service(&f.conn, "svc-session", ServiceType::Session, 1);
        let now = dt("2025-06-01 00:00");

        let missing = NewBooking {
            start_time: None,
            ..session_request("2025-06-16 10:00")
        };
        assert!(matches!(
            create_booking(&f.conn, &f.client, missing, now),
            Err(AppError::Validation(_))
        ));

        let own = create_booking(&f.conn, &f.prac_user, session_request("2025-06-16 10:00"), now);
        assert!(matches!(own, Err(AppError::Validation(_))));

        let booking = create_booking(&f.conn, &f.client, session_request("2025-06-16 10:00"), now).unwrap();
        assert_eq!(booking.status, BookingStatus::Draft);
        assert_eq!(booking.end_time, Some(dt("2025-06-16 11:00")));
    }

    #[test]
    fn test_package_creates_unscheduled_children() {
        let f = fixture();
        add_service(&f.conn, "svc-pack", ServiceType::Package, 3);
        let now = dt("2025-06-01 00:00");

        let parent = create_booking(
            &f.conn,
            &f.client,
            NewBooking {
                service_id: "svc-pack".to_string(),
                start_time: None,
                service_session_id: None,
                notes: None,
            },
            now,
        )
        .unwrap();

        let children = queries::list_child_bookings(&f.conn, &parent.id).unwrap();
        assert_eq!(children.len(), 3);
        assert!(children.iter().all(|c| c.start_time.is_none() && c.price_cents == 0));
    }

    #[test]
    fn test_workshop_capacity() {
        let f = fixture();
        add_service(&f.conn, "svc-workshop", ServiceType::Workshop, 1);
        queries::create_service_session(
            &f.conn,
            &ServiceSession {
                id: "ss-1".to_string(),
                service_id: "svc-workshop".to_string(),
                start_time: dt("2025-06-20 18:00"),
                end_time: dt("2025-06-20 20:00"),
                max_participants: 1,
                is_canceled: false,
            },
        )
        .unwrap();
        let now = dt("2025-06-01 00:00");
        let req = || NewBooking {
            service_id: "svc-workshop".to_string(),
            start_time: None,
            service_session_id: Some("ss-1".to_string()),
            notes: None,
        };

        let first = create_booking(&f.conn, &f.client, req(), now).unwrap();
        // drafts do not hold a seat
        let second = create_booking(&f.conn, &f.client, req(), now).unwrap();
        mark_paid(&f.conn, &first);

        assert!(matches!(
            create_booking(&f.conn, &f.client, req(), now),
            Err(AppError::Conflict(_))
        ));
        assert_eq!(second.service_session_id.as_deref(), Some("ss-1"));
    }

    #[test]
    fn test_client_late_cancel_refunds_half_as_credit() {
        let f = fixture();
        add_service(&f.conn, "svc-session", ServiceType::Session, 1);
        let booking =
            create_booking(&f.conn, &f.client, session_request("2025-06-16 10:00"), dt("2025-06-01 00:00"))
                .unwrap();
        mark_paid(&f.conn, &booking);

        let outcome = cancel_booking(
            &f.conn,
            &f.client,
            &booking.id,
            Some("sick"),
            dt("2025-06-16 00:00"),
        )
        .unwrap();

        assert_eq!(outcome.refund_cents, 5_000);
        assert_eq!(outcome.booking.status, BookingStatus::Canceled);
        assert_eq!(outcome.booking.payment_status, PaymentStatus::PartiallyRefunded);
        assert_eq!(outcome.counterpart_user_id, "prac");
        assert_eq!(queries::credit_balance(&f.conn, "client").unwrap(), 5_000);

        let earnings = queries::get_earnings_for_booking(&f.conn, &booking.id).unwrap().unwrap();
        assert_eq!(earnings.gross_cents, 5_000);
        assert_eq!(earnings.net_cents, 4_250);
        assert_eq!(earnings.status, EarningsStatus::Pending);
    }

    #[test]
    fn test_practitioner_cancel_refunds_fully_and_cancels_earnings() {
        let f = fixture();
        add_service(&f.conn, "svc-session", ServiceType::Session, 1);
        let booking =
            create_booking(&f.conn, &f.client, session_request("2025-06-16 10:00"), dt("2025-06-01 00:00"))
                .unwrap();
        mark_paid(&f.conn, &booking);

        let outcome =
            cancel_booking(&f.conn, &f.prac_user, &booking.id, None, dt("2025-06-16 09:00")).unwrap();

        assert_eq!(outcome.refund_cents, 10_000);
        assert_eq!(outcome.booking.payment_status, PaymentStatus::Refunded);
        let earnings = queries::get_earnings_for_booking(&f.conn, &booking.id).unwrap().unwrap();
        assert_eq!(earnings.status, EarningsStatus::Canceled);
    }

    #[test]
    fn test_cancel_waits_for_processing_payout() {
        let f = fixture();
        add_service(&f.conn, "svc-session", ServiceType::Session, 1);
        let booking =
            create_booking(&f.conn, &f.client, session_request("2025-06-16 10:00"), dt("2025-06-01 00:00"))
                .unwrap();
        mark_paid(&f.conn, &booking);
        f.conn
            .execute(
                "UPDATE earnings_transactions SET status = 'available' WHERE booking_id = ?1",
                [&booking.id],
            )
            .unwrap();
        queries::create_payout(
            &f.conn,
            &Payout {
                id: "po-1".to_string(),
                practitioner_id: "p-1".to_string(),
                amount_cents: 8_500,
                currency: "usd".to_string(),
                status: PayoutStatus::Processing,
                provider_transfer_id: None,
                failure_reason: None,
                created_at: dt("2025-06-02 00:00"),
                completed_at: None,
            },
        )
        .unwrap();
        assert_eq!(queries::attach_available_earnings(&f.conn, "p-1", "po-1").unwrap(), 8_500);

        let blocked =
            cancel_booking(&f.conn, &f.client, &booking.id, None, dt("2025-06-03 00:00"));
        assert!(matches!(blocked, Err(AppError::Conflict(_))));
        let untouched = queries::get_booking(&f.conn, &booking.id).unwrap().unwrap();
        assert_eq!(untouched.status, BookingStatus::Confirmed);
        assert_eq!(untouched.payment_status, PaymentStatus::Paid);

        // once the transfer lands the earnings stay paid and the client still gets credit
        assert_eq!(queries::mark_payout_earnings_paid(&f.conn, "po-1").unwrap(), 1);
        let outcome =
            cancel_booking(&f.conn, &f.client, &booking.id, None, dt("2025-06-03 00:00")).unwrap();
        assert_eq!(outcome.refund_cents, 10_000);
        let earnings = queries::get_earnings_for_booking(&f.conn, &booking.id).unwrap().unwrap();
        assert_eq!(earnings.status, EarningsStatus::Paid);
        assert_eq!(earnings.net_cents, 8_500);
    }

    #[test]
    fn test_cancel_unpaid_draft_and_reject_second_cancel() {
        let f = fixture();
        add_service(&f.conn, "svc-session", ServiceType::Session, 1);
        let now = dt("2025-06-01 00:00");
        let booking = create_booking(&f.conn, &f.client, session_request("2025-06-16 10:00"), now).unwrap();

        let outcome = cancel_booking(&f.conn, &f.client, &booking.id, None, now).unwrap();
        assert_eq!(outcome.refund_cents, 0);

        let again = cancel_booking(&f.conn, &f.client, &booking.id, None, now);
        assert!(matches!(again, Err(AppError::InvalidTransition { .. })));
    }

    #[test]
    fn test_package_cancel_refunds_unused_sessions() {
        let f = fixture();
        add_service(&f.conn, "svc-pack", ServiceType::Package, 4);
        let now = dt("2025-06-01 00:00");
        let parent = create_booking(
            &f.conn,
            &f.client,
            NewBooking {
                service_id: "svc-pack".to_string(),
                start_time: None,
                service_session_id: None,
                notes: None,
            },
            now,
        )
        .unwrap();
        mark_paid(&f.conn, &parent);
        let children = queries::list_child_bookings(&f.conn, &parent.id).unwrap();
        for child in &children {
            queries::update_booking_status(&f.conn, &child.id, BookingStatus::Confirmed).unwrap();
        }
        queries::update_booking_status(&f.conn, &children[0].id, BookingStatus::Completed).unwrap();

        let outcome = cancel_booking(&f.conn, &f.client, &parent.id, None, now).unwrap();

        // 3 of 4 sessions unused, all unscheduled
        assert_eq!(outcome.refund_cents, 7_500);
        let after = queries::list_child_bookings(&f.conn, &parent.id).unwrap();
        let canceled = after.iter().filter(|c| c.status == BookingStatus::Canceled).count();
        assert_eq!(canceled, 3);
    }

    #[test]
    fn test_package_session_schedule_and_free_cancel_returns_it() {
        let f = fixture();
        add_service(&f.conn, "svc-pack", ServiceType::Package, 2);
        let now = dt("2025-06-01 00:00");
        let parent = create_booking(
            &f.conn,
            &f.client,
            NewBooking {
                service_id: "svc-pack".to_string(),
                start_time: None,
                service_session_id: None,
                notes: None,
            },
            now,
        )
        .unwrap();
        let child = queries::list_child_bookings(&f.conn, &parent.id).unwrap().remove(0);

        let unpaid = schedule_package_session(&f.conn, &f.client, &child.id, dt("2025-06-16 10:00"), now);
        assert!(matches!(unpaid, Err(AppError::Conflict(_))));

        queries::update_booking_status(&f.conn, &child.id, BookingStatus::Confirmed).unwrap();
        let (scheduled, counterpart) =
            schedule_package_session(&f.conn, &f.client, &child.id, dt("2025-06-16 10:00"), now).unwrap();
        assert_eq!(scheduled.start_time, Some(dt("2025-06-16 10:00")));
        assert_eq!(counterpart, "prac");

        let outcome = cancel_booking(&f.conn, &f.client, &child.id, None, now).unwrap();
        assert!(outcome.returned_to_package);
        assert_eq!(outcome.booking.status, BookingStatus::Confirmed);
        assert!(outcome.booking.start_time.is_none());
    }

    #[test]
    fn test_reschedule_rules() {
        let f = fixture();
        add_service(&f.conn, "svc-session", ServiceType::Session, 1);
        let booking =
            create_booking(&f.conn, &f.client, session_request("2025-06-16 10:00"), dt("2025-06-01 00:00"))
                .unwrap();
        mark_paid(&f.conn, &booking);

        let late = reschedule_booking(
            &f.conn,
            &f.client,
            &booking.id,
            dt("2025-06-17 10:00"),
            dt("2025-06-15 12:00"),
            48,
        );
        assert!(matches!(late, Err(AppError::Conflict(_))));

        // the practitioner is not bound by the 24h window
        let (moved, _) = reschedule_booking(
            &f.conn,
            &f.prac_user,
            &booking.id,
            dt("2025-06-17 10:00"),
            dt("2025-06-15 12:00"),
            48,
        )
        .unwrap();
        assert_eq!(moved.reschedule_count, 1);
        assert_eq!(moved.end_time, Some(dt("2025-06-17 11:00")));

        let earnings = queries::get_earnings_for_booking(&f.conn, &booking.id).unwrap().unwrap();
        assert_eq!(earnings.available_after, dt("2025-06-19 11:00"));
    }

    #[test]
    fn test_outcome_only_by_practitioner_after_start() {
        let f = fixture();
        add_service(&f.conn, "svc-session", ServiceType::Session, 1);
        let booking =
            create_booking(&f.conn, &f.client, session_request("2025-06-16 10:00"), dt("2025-06-01 00:00"))
                .unwrap();
        mark_paid(&f.conn, &booking);

        let by_client = record_outcome(
            &f.conn,
            &f.client,
            &booking.id,
            BookingStatus::Completed,
            dt("2025-06-16 11:00"),
        );
        assert!(matches!(by_client, Err(AppError::Forbidden(_))));

        let early = record_outcome(
            &f.conn,
            &f.prac_user,
            &booking.id,
            BookingStatus::NoShow,
            dt("2025-06-16 09:00"),
        );
        assert!(matches!(early, Err(AppError::Conflict(_))));

        let done = record_outcome(
            &f.conn,
            &f.prac_user,
            &booking.id,
            BookingStatus::Completed,
            dt("2025-06-16 11:00"),
        )
        .unwrap();
        assert_eq!(done.status, BookingStatus::Completed);
    }
}
