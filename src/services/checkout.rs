use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::db::{self, queries};
use crate::errors::AppError;
use crate::models::{
    Booking, BookingStatus, Order, OrderStatus, PaymentStatus, ServiceType, User,
};
use crate::services::booking::{check_group_seat, transition, BookingContext};
use crate::services::earnings::{format_cents, record_earnings};
use crate::services::notify::{notify, NewNotification};
use crate::services::payments::ChargeRequest;
use crate::services::pricing::Actor;
use crate::services::rooms;
use crate::services::scheduling::validate_booking_time;
use crate::services::workflow::{run_activity, WorkflowRecord};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CheckoutRequest {
    pub payment_method: Option<String>,
    #[serde(default = "default_use_credits")]
    pub use_credits: bool,
}

fn default_use_credits() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct CheckoutResult {
    pub booking: Booking,
    pub order: Order,
    pub room_url: Option<String>,
}

struct Prepared {
    order: Order,
    practitioner_user_id: String,
    service_name: String,
}

fn prepare(
    state: &AppState,
    user: &User,
    booking_id: &str,
    req: &CheckoutRequest,
    now: NaiveDateTime,
) -> Result<Prepared, AppError> {
    let db = state.db();
    let ctx = BookingContext::load(&db, booking_id)?;
    if ctx.actor(user)? != Actor::Client {
        return Err(AppError::Forbidden("only the client can pay for a booking".to_string()));
    }
    let booking = &ctx.booking;
    if booking.parent_booking_id.is_some() {
        return Err(AppError::BadRequest(
            "package sessions are paid with their package".to_string(),
        ));
    }
    if booking.status != BookingStatus::Draft {
        return Err(AppError::InvalidTransition {
            from: booking.status.as_str().to_string(),
            to: BookingStatus::PendingPayment.as_str().to_string(),
        });
    }

    match ctx.service.service_type {
        ServiceType::Session => {
            let start = booking
                .start_time
                .ok_or_else(|| AppError::BadRequest("booking is not scheduled".to_string()))?;
            let duration = ctx.service.duration_minutes as i64;
            validate_booking_time(&db, &ctx.practitioner, &start, duration, Some(&booking.id), &now)?;
        }
        ServiceType::Workshop | ServiceType::Course => {
            let session_id = booking
                .service_session_id
                .as_deref()
                .ok_or_else(|| AppError::BadRequest("booking has no session".to_string()))?;
            let session = queries::get_service_session(&db, session_id)?
                .filter(|s| !s.is_canceled)
                .ok_or_else(|| AppError::Conflict("session was cancelled".to_string()))?;
            check_group_seat(&db, &session.id, session.max_participants, &session.start_time, &now)?;
        }
        ServiceType::Package => {}
    }

    let balance = queries::credit_balance(&db, &user.id)?;
    let credits_applied = if req.use_credits {
        balance.clamp(0, booking.price_cents)
    } else {
        0
    };
    let total = booking.price_cents - credits_applied;
    if total > 0 && req.payment_method.as_deref().map_or(true, str::is_empty) {
        return Err(AppError::PaymentRequired(format!(
            "{} due and no payment method given",
            format_cents(total)
        )));
    }

    let order = Order {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user.id.clone(),
        booking_id: booking.id.clone(),
        subtotal_cents: booking.price_cents,
        credits_applied_cents: credits_applied,
        total_cents: total,
        currency: ctx.service.currency.clone(),
        status: OrderStatus::Pending,
        provider_payment_id: None,
        created_at: now,
    };

    let tx = db.unchecked_transaction()?;
    queries::create_order(&tx, &order)?;
    if credits_applied > 0 {
        queries::insert_credit_transaction(
            &tx,
            &user.id,
            -credits_applied,
            "purchase",
            Some(&booking.id),
            Some("applied at checkout"),
        )?;
    }
    transition(&tx, booking, BookingStatus::PendingPayment)?;
    tx.commit()?;

    Ok(Prepared {
        order,
        practitioner_user_id: ctx.practitioner.user_id.clone(),
        service_name: ctx.service.name.clone(),
    })
}

fn roll_back(state: &AppState, order: &Order) -> Result<(), AppError> {
    let db = state.db();
    let tx = db.unchecked_transaction()?;
    queries::update_order_status(&tx, &order.id, OrderStatus::Failed, None)?;
    if order.credits_applied_cents > 0 {
        queries::insert_credit_transaction(
            &tx,
            &order.user_id,
            order.credits_applied_cents,
            "refund",
            Some(&order.booking_id),
            Some("payment failed"),
        )?;
    }
    if let Some(booking) = queries::get_booking(&tx, &order.booking_id)? {
        if booking.status == BookingStatus::PendingPayment {
            transition(&tx, &booking, BookingStatus::Draft)?;
        }
    }
    tx.commit()?;
    Ok(())
}

fn confirm(
    state: &AppState,
    order: &Order,
    provider_payment_id: Option<&str>,
    now: NaiveDateTime,
) -> Result<Booking, AppError> {
    let db = state.db();
    let ctx = BookingContext::load(&db, &order.booking_id)?;
    let tx = db.unchecked_transaction()?;
    queries::update_order_status(&tx, &order.id, OrderStatus::Paid, provider_payment_id)?;

    if ctx.booking.status != BookingStatus::PendingPayment {
        // Cancelled while the charge was in flight; everything paid goes back as credit.
        queries::insert_credit_transaction(
            &tx,
            &order.user_id,
            order.subtotal_cents,
            "refund",
            Some(&order.booking_id),
            Some("booking cancelled during checkout"),
        )?;
        queries::update_payment_status(&tx, &order.booking_id, PaymentStatus::Refunded)?;
        tx.commit()?;
        return Err(AppError::Conflict(
            "booking was cancelled during checkout, payment refunded as credit".to_string(),
        ));
    }

    transition(&tx, &ctx.booking, BookingStatus::Confirmed)?;
    queries::update_payment_status(&tx, &ctx.booking.id, PaymentStatus::Paid)?;
    for child in queries::list_child_bookings(&tx, &ctx.booking.id)? {
        if child.status == BookingStatus::Draft {
            queries::update_booking_status(&tx, &child.id, BookingStatus::Confirmed)?;
            queries::update_payment_status(&tx, &child.id, PaymentStatus::Paid)?;
        }
    }
    record_earnings(
        &tx,
        &ctx.booking,
        &ctx.service,
        &ctx.practitioner,
        now,
        state.config.earnings_hold_hours,
    )?;
    tx.commit()?;

    let booking = queries::get_booking(&db, &ctx.booking.id)?
        .ok_or_else(|| AppError::NotFound("booking".to_string()))?;
    Ok(booking)
}

pub async fn checkout(
    state: &Arc<AppState>,
    user: &User,
    booking_id: &str,
    req: CheckoutRequest,
) -> Result<CheckoutResult, AppError> {
    let now = db::now();
    let Prepared {
        mut order,
        practitioner_user_id,
        service_name,
    } = prepare(state, user, booking_id, &req, now)?;

    let mut record = WorkflowRecord::start(state, "booking_confirmation", booking_id);

    let mut provider_payment_id = None;
    if order.total_cents > 0 {
        let charge = ChargeRequest {
            amount_cents: order.total_cents,
            currency: order.currency.clone(),
            payment_method: req.payment_method.clone().unwrap_or_default(),
            description: format!("{service_name} ({booking_id})"),
            idempotency_key: format!("order:{}", order.id),
        };
        let payments = &state.payments;
        let charge_ref = &charge;
        match run_activity("charge_payment", &state.retry_policy, move || {
            payments.charge(charge_ref)
        })
        .await
        {
            Ok((payment_id, attempts)) => {
                record.add_attempts(attempts);
                provider_payment_id = Some(payment_id);
            }
            Err(failure) => {
                record.add_attempts(failure.attempts);
                let reason = failure.error.to_string();
                roll_back(state, &order)?;
                record.fail(state, &reason);
                return Err(AppError::PaymentRequired(format!("payment failed: {reason}")));
            }
        }
    }

    let booking = match confirm(state, &order, provider_payment_id.as_deref(), now) {
        Ok(booking) => booking,
        Err(e) => {
            record.fail(state, &e.to_string());
            return Err(e);
        }
    };
    order.status = OrderStatus::Paid;
    order.provider_payment_id = provider_payment_id;

    let room_url = provision_room(state, &booking, now).await;

    let when = booking
        .start_time
        .map(|s| format!(" on {}", s.format("%a %b %-d at %H:%M UTC")))
        .unwrap_or_default();
    notify(
        state,
        NewNotification {
            user_id: &booking.client_id,
            kind: "booking_confirmed",
            title: "Booking confirmed".to_string(),
            body: format!("Your {service_name}{when} is confirmed."),
            booking_id: Some(&booking.id),
            dedupe_key: Some(format!("booking_confirmed:{}", booking.id)),
        },
    )
    .await;
    notify(
        state,
        NewNotification {
            user_id: &practitioner_user_id,
            kind: "new_booking",
            title: "New booking".to_string(),
            body: format!("{} booked {service_name}{when}.", user.full_name),
            booking_id: Some(&booking.id),
            dedupe_key: Some(format!("new_booking:{}", booking.id)),
        },
    )
    .await;

    record.complete(state);
    tracing::info!(
        booking_id = %booking.id,
        order_id = %order.id,
        total = order.total_cents,
        credits = order.credits_applied_cents,
        "checkout completed"
    );

    Ok(CheckoutResult {
        booking,
        order,
        room_url,
    })
}

async fn provision_room(
    state: &Arc<AppState>,
    booking: &Booking,
    now: NaiveDateTime,
) -> Option<String> {
    let window = {
        let db = state.db();
        rooms::room_window(&db, booking, now)
    };
    let (subject_id, _, end) = window.ok()?;
    match rooms::ensure_room(state, &subject_id, end + Duration::hours(1)).await {
        Ok(room) => Some(room.url),
        Err(e) => {
            tracing::warn!(booking_id = %booking.id, error = %e, "room provisioning failed");
            None
        }
    }
}
