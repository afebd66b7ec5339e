pub mod admin;
pub mod auth;
pub mod bookings;
pub mod calendar;
pub mod conversations;
pub mod health;
pub mod notifications;
pub mod payments;
pub mod practitioners;
pub mod services;
pub mod users;

use std::sync::Arc;

use axum::routing::{get, patch, post};
use axum::Router;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/users", post(users::register))
        .route("/api/me", get(users::me))
        .route(
            "/api/practitioners",
            get(practitioners::list_practitioners).post(practitioners::create_practitioner),
        )
        .route("/api/practitioners/me", patch(practitioners::update_me))
        .route(
            "/api/practitioners/me/calendar-token",
            get(practitioners::calendar_token),
        )
        .route("/api/practitioners/:id", get(practitioners::get_practitioner))
        .route("/api/practitioners/:id/slots", get(practitioners::open_slots))
        .route(
            "/api/services",
            get(services::list_services).post(services::create_service),
        )
        .route(
            "/api/services/:id",
            get(services::get_service).delete(services::delete_service),
        )
        .route(
            "/api/services/:id/sessions",
            get(services::list_sessions).post(services::create_session),
        )
        .route(
            "/api/bookings",
            get(bookings::list_bookings).post(bookings::create_booking),
        )
        .route("/api/bookings/:id", get(bookings::get_booking))
        .route("/api/bookings/:id/checkout", post(bookings::checkout))
        .route("/api/bookings/:id/schedule", post(bookings::schedule))
        .route("/api/bookings/:id/cancel", post(bookings::cancel))
        .route("/api/bookings/:id/reschedule", post(bookings::reschedule))
        .route("/api/bookings/:id/complete", post(bookings::complete))
        .route("/api/bookings/:id/no-show", post(bookings::no_show))
        .route("/api/bookings/:id/room", get(bookings::room))
        .route("/api/credits", get(payments::get_credits))
        .route("/api/earnings", get(payments::get_earnings))
        .route("/api/earnings/transactions", get(payments::list_earnings))
        .route(
            "/api/payouts",
            get(payments::list_payouts).post(payments::request_payout),
        )
        .route(
            "/api/notifications",
            get(notifications::list_notifications),
        )
        .route(
            "/api/notifications/read-all",
            post(notifications::mark_all_read),
        )
        .route(
            "/api/notifications/:id/read",
            post(notifications::mark_read),
        )
        .route("/api/events", get(notifications::events_stream))
        .route(
            "/api/conversations",
            get(conversations::list_conversations).post(conversations::start_conversation),
        )
        .route(
            "/api/conversations/:id/messages",
            get(conversations::get_messages).post(conversations::send_message),
        )
        .route("/api/conversations/:id/read", post(conversations::mark_read))
        .route("/api/workflows/:subject_id", get(admin::get_workflows))
        .route("/api/admin/credits", post(payments::grant_credits))
        .route(
            "/api/admin/practitioners/:id",
            patch(admin::update_practitioner_tier),
        )
        .route("/api/admin/scheduler/tick", post(admin::run_scheduler_tick))
        .route(
            "/calendar/feed/:practitioner_id",
            get(calendar::practitioner_feed_ics),
        )
        .route("/calendar/:booking_id", get(calendar::download_ics))
        .with_state(state)
}
