use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use rusqlite::Connection;

use crate::db::{self, queries};
use crate::errors::AppError;
use crate::models::{
    Booking, EarningsStatus, EarningsTransaction, Payout, PayoutStatus, Practitioner, Service,
};
use crate::services::notify::{notify, NewNotification};
use crate::services::payments::TransferRequest;
use crate::services::pricing;
use crate::services::workflow::{run_activity, WorkflowRecord};
use crate::state::AppState;

pub fn record_earnings(
    conn: &Connection,
    booking: &Booking,
    service: &Service,
    practitioner: &Practitioner,
    now: NaiveDateTime,
    hold_hours: i64,
) -> anyhow::Result<EarningsTransaction> {
    let rate = pricing::commission_rate_bps(practitioner.tier, service.service_type);
    let (commission, net) = pricing::split_commission(booking.price_cents, rate);
    let earnings = EarningsTransaction {
        id: uuid::Uuid::new_v4().to_string(),
        practitioner_id: practitioner.id.clone(),
        booking_id: booking.id.clone(),
        gross_cents: booking.price_cents,
        commission_rate_bps: rate,
        commission_cents: commission,
        net_cents: net,
        status: EarningsStatus::Pending,
        available_after: booking.end_time.unwrap_or(now) + Duration::hours(hold_hours),
        payout_id: None,
        created_at: now,
    };
    queries::create_earnings(conn, &earnings)?;
    tracing::info!(
        booking_id = %booking.id,
        gross = earnings.gross_cents,
        commission = earnings.commission_cents,
        net = earnings.net_cents,
        "earnings recorded"
    );
    Ok(earnings)
}

pub async fn request_payout(
    state: &Arc<AppState>,
    practitioner: &Practitioner,
) -> Result<Payout, AppError> {
    let (mut payout, account) = {
        let db = state.db();
        let Some(account) = practitioner.payout_account_id.as_deref().filter(|a| !a.is_empty())
        else {
            return Err(AppError::field("payout_account_id", "no payout account on file"));
        };
        if queries::has_processing_payout(&db, &practitioner.id)? {
            return Err(AppError::Conflict("a payout is already processing".to_string()));
        }
        let balance = queries::earnings_balance(&db, &practitioner.id)?;
        if balance.available_cents < state.config.minimum_payout_cents {
            return Err(AppError::field(
                "amount",
                format!(
                    "available balance {} is below the minimum payout of {}",
                    format_cents(balance.available_cents),
                    format_cents(state.config.minimum_payout_cents)
                ),
            ));
        }

        let payout = Payout {
            id: uuid::Uuid::new_v4().to_string(),
            practitioner_id: practitioner.id.clone(),
            amount_cents: balance.available_cents,
            currency: state.config.platform_currency.clone(),
            status: PayoutStatus::Processing,
            provider_transfer_id: None,
            failure_reason: None,
            created_at: db::now(),
            completed_at: None,
        };
        let tx = db.unchecked_transaction()?;
        queries::create_payout(&tx, &payout)?;
        let attached = queries::attach_available_earnings(&tx, &practitioner.id, &payout.id)?;
        if attached != payout.amount_cents {
            return Err(AppError::Conflict("available balance changed, retry".to_string()));
        }
        tx.commit()?;
        (payout, account.to_string())
    };

    let mut record = WorkflowRecord::start(state, "payout", &payout.id);
    let transfer = TransferRequest {
        destination_account: account,
        amount_cents: payout.amount_cents,
        currency: payout.currency.clone(),
        idempotency_key: format!("payout:{}", payout.id),
    };
    let payments = &state.payments;
    let transfer_ref = &transfer;
    let result = run_activity("transfer_payout", &state.retry_policy, move || {
        payments.transfer(transfer_ref)
    })
    .await;

    match result {
        Ok((transfer_id, attempts)) => {
            record.add_attempts(attempts);
            {
                let db = state.db();
                let tx = db.unchecked_transaction()?;
                queries::finish_payout(&tx, &payout.id, PayoutStatus::Completed, Some(&transfer_id), None)?;
                queries::mark_payout_earnings_paid(&tx, &payout.id)?;
                tx.commit()?;
            }
            record.complete(state);
            payout.status = PayoutStatus::Completed;
            payout.provider_transfer_id = Some(transfer_id);
            payout.completed_at = Some(db::now());

            notify(
                state,
                NewNotification {
                    user_id: &practitioner.user_id,
                    kind: "payout_completed",
                    title: "Payout sent".to_string(),
                    body: format!(
                        "{} {} is on its way to your account.",
                        format_cents(payout.amount_cents),
                        payout.currency.to_uppercase()
                    ),
                    booking_id: None,
                    dedupe_key: Some(format!("payout_completed:{}", payout.id)),
                },
            )
            .await;
            Ok(payout)
        }
        Err(failure) => {
            record.add_attempts(failure.attempts);
            let reason = failure.error.to_string();
            {
                let db = state.db();
                let tx = db.unchecked_transaction()?;
                queries::finish_payout(&tx, &payout.id, PayoutStatus::Failed, None, Some(&reason))?;
                queries::detach_payout_earnings(&tx, &payout.id)?;
                tx.commit()?;
            }
            record.fail(state, &reason);
            Err(AppError::Provider(format!("payout transfer failed: {reason}")))
        }
    }
}

pub fn format_cents(cents: i64) -> String {
    format!("{}.{:02}", cents / 100, (cents % 100).abs())
}
