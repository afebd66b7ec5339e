use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use chrono::{Duration, NaiveDateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::{broadcast, Notify};
use tower::ServiceExt;

use haven::config::AppConfig;
use haven::db;
use haven::handlers;
use haven::services::messaging::MessagingProvider;
use haven::services::payments::{ChargeRequest, PaymentProvider, TransferRequest};
use haven::services::video::VideoProvider;
use haven::services::workflow::RetryPolicy;
use haven::state::AppState;

// ── Mock Providers ──

#[derive(Default)]
struct TransferControl {
    hold: AtomicBool,
    fail: AtomicBool,
    started: Notify,
    release: Notify,
}

struct MockPayments {
    charges: Arc<Mutex<Vec<ChargeRequest>>>,
    transfers: Arc<Mutex<Vec<TransferRequest>>>,
    fail: Arc<AtomicBool>,
    transfer_control: Arc<TransferControl>,
}

#[async_trait]
impl PaymentProvider for MockPayments {
    async fn charge(&self, req: &ChargeRequest) -> anyhow::Result<String> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("card declined");
        }
        self.charges.lock().unwrap().push(req.clone());
        Ok(format!("pi_{}", req.idempotency_key))
    }

    async fn transfer(&self, req: &TransferRequest) -> anyhow::Result<String> {
        let control = &self.transfer_control;
        if control.fail.load(Ordering::SeqCst) {
            anyhow::bail!("destination account closed");
        }
        if control.hold.load(Ordering::SeqCst) {
            control.started.notify_one();
            control.release.notified().await;
        }
        self.transfers.lock().unwrap().push(req.clone());
        Ok(format!("tr_{}", req.idempotency_key))
    }
}

struct MockVideo;

#[async_trait]
impl VideoProvider for MockVideo {
    async fn create_room(&self, name: &str, _expires_at: NaiveDateTime) -> anyhow::Result<String> {
        Ok(format!("https://video.test/{name}"))
    }

    async fn meeting_token(
        &self,
        room_name: &str,
        _user_name: &str,
        is_owner: bool,
        _expires_at: NaiveDateTime,
    ) -> anyhow::Result<String> {
        Ok(format!("tok-{room_name}-{is_owner}"))
    }
}

struct MockMessaging {
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl MessagingProvider for MockMessaging {
    async fn send_message(&self, to: &str, body: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), body.to_string()));
        Ok(())
    }
}

// ── Helpers ──

const ADMIN: &str = "test-admin-token";

fn test_config() -> AppConfig {
    AppConfig {
        port: 3000,
        database_url: ":memory:".to_string(),
        admin_token: ADMIN.to_string(),
        platform_currency: "usd".to_string(),
        earnings_hold_hours: 0,
        minimum_payout_cents: 5000,
        reminder_interval_secs: 60,
        room_join_early_minutes: 15,
        calendar_feed_secret: "feed-secret".to_string(),
        public_base_url: "https://haven.test".to_string(),
        stripe_secret_key: String::new(),
        daily_api_key: String::new(),
        twilio_account_sid: String::new(),
        twilio_auth_token: String::new(),
        twilio_phone_number: String::new(),
    }
}

struct TestApp {
    state: Arc<AppState>,
    charges: Arc<Mutex<Vec<ChargeRequest>>>,
    transfers: Arc<Mutex<Vec<TransferRequest>>>,
    fail_payments: Arc<AtomicBool>,
    transfer_control: Arc<TransferControl>,
    sms: Arc<Mutex<Vec<(String, String)>>>,
}

fn test_app_with(config: AppConfig) -> TestApp {
    let conn = db::init_db(":memory:").unwrap();
    let charges = Arc::new(Mutex::new(vec![]));
    let transfers = Arc::new(Mutex::new(vec![]));
    let fail_payments = Arc::new(AtomicBool::new(false));
    let transfer_control = Arc::new(TransferControl::default());
    let sms = Arc::new(Mutex::new(vec![]));
    let (events_tx, _) = broadcast::channel(64);

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config,
        payments: Box::new(MockPayments {
            charges: Arc::clone(&charges),
            transfers: Arc::clone(&transfers),
            fail: Arc::clone(&fail_payments),
            transfer_control: Arc::clone(&transfer_control),
        }),
        video: Box::new(MockVideo),
        messaging: Box::new(MockMessaging {
            sent: Arc::clone(&sms),
        }),
        retry_policy: RetryPolicy {
            max_attempts: 2,
            initial_interval: StdDuration::from_millis(1),
            backoff_coefficient: 1.0,
            max_interval: StdDuration::from_millis(1),
        },
        events_tx,
    });

    TestApp {
        state,
        charges,
        transfers,
        fail_payments,
        transfer_control,
        sms,
    }
}

fn test_app() -> TestApp {
    test_app_with(test_config())
}

fn days_ahead(days: i64, hour: u32) -> NaiveDateTime {
    (Utc::now().naive_utc() + Duration::days(days))
        .date()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

fn fmt(dt: NaiveDateTime) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S").to_string()
}

impl TestApp {
    async fn raw(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, String) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let res = handlers::router(Arc::clone(&self.state))
            .oneshot(req)
            .await
            .unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    async fn call(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let (status, text) = self.raw(method, uri, token, body).await;
        let json = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap()
        };
        (status, json)
    }

    async fn register(&self, email: &str, name: &str, phone: Option<&str>) -> (String, String) {
        let (status, body) = self
            .call(
                "POST",
                "/api/users",
                None,
                Some(json!({"email": email, "full_name": name, "phone": phone})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        (
            body["user"]["id"].as_str().unwrap().to_string(),
            body["api_token"].as_str().unwrap().to_string(),
        )
    }

    async fn create_service(&self, token: &str, body: Value) -> String {
        let (status, service) = self.call("POST", "/api/services", Some(token), Some(body)).await;
        assert_eq!(status, StatusCode::CREATED, "{service}");
        service["id"].as_str().unwrap().to_string()
    }

    async fn book(&self, token: &str, body: Value) -> Value {
        let (status, booking) = self.call("POST", "/api/bookings", Some(token), Some(body)).await;
        assert_eq!(status, StatusCode::CREATED, "{booking}");
        booking
    }

    async fn checkout(&self, token: &str, booking_id: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.call(
            "POST",
            &format!("/api/bookings/{booking_id}/checkout"),
            Some(token),
            body,
        )
        .await
    }

    async fn tick(&self) -> Value {
        let (status, report) = self
            .call("POST", "/api/admin/scheduler/tick", Some(ADMIN), None)
            .await;
        assert_eq!(status, StatusCode::OK, "{report}");
        report
    }

    fn move_into_past(&self, booking_id: &str) {
        let start = Utc::now().naive_utc() - Duration::hours(3);
        self.state
            .db()
            .execute(
                "UPDATE bookings SET start_time = ?1, end_time = ?2 WHERE id = ?3",
                rusqlite::params![
                    db::ts(&start),
                    db::ts(&(start + Duration::hours(1))),
                    booking_id
                ],
            )
            .unwrap();
    }

    async fn credit_balance(&self, token: &str) -> i64 {
        let (_, credits) = self.call("GET", "/api/credits", Some(token), None).await;
        credits["balance_cents"].as_i64().unwrap()
    }
}

struct Fixture {
    app: TestApp,
    client_id: String,
    client: String,
    practitioner_user_id: String,
    practitioner: String,
    practitioner_id: String,
    session_service: String,
}

async fn fixture_with(config: AppConfig) -> Fixture {
    let app = test_app_with(config);
    let (client_id, client) = app
        .register("client@example.com", "Casey Client", Some("+15550001111"))
        .await;
    let (practitioner_user_id, practitioner) = app
        .register("prac@example.com", "Pat Practitioner", None)
        .await;

    let (status, profile) = app
        .call(
            "POST",
            "/api/practitioners",
            Some(&practitioner),
            Some(json!({
                "display_name": "Pat P.",
                "bio": "Breathwork and coaching",
                "payout_account_id": "acct_123",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{profile}");
    let practitioner_id = profile["id"].as_str().unwrap().to_string();

    let session_service = app
        .create_service(
            &practitioner,
            json!({
                "name": "Coaching",
                "service_type": "session",
                "price_cents": 10000,
                "duration_minutes": 60,
            }),
        )
        .await;

    Fixture {
        app,
        client_id,
        client,
        practitioner_user_id,
        practitioner,
        practitioner_id,
        session_service,
    }
}

async fn fixture() -> Fixture {
    fixture_with(test_config()).await
}

impl Fixture {
    async fn confirmed_session(&self, start: NaiveDateTime) -> Value {
        let booking = self
            .app
            .book(
                &self.client,
                json!({"service_id": self.session_service, "start_time": fmt(start)}),
            )
            .await;
        let id = booking["id"].as_str().unwrap();
        let (status, result) = self
            .app
            .checkout(&self.client, id, Some(json!({"payment_method": "pm_card_visa"})))
            .await;
        assert_eq!(status, StatusCode::OK, "{result}");
        result["booking"].clone()
    }
}

// ── Health & Auth ──

#[tokio::test]
async fn test_health() {
    let app = test_app();
    let (status, body) = app.call("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_requires_auth() {
    let app = test_app();
    let (status, _) = app.call("GET", "/api/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.call("GET", "/api/me", Some("bogus"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .call("POST", "/api/admin/scheduler/tick", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_catalog_reads_require_auth() {
    let f = fixture().await;
    let uris = [
        "/api/services".to_string(),
        format!("/api/services/{}", f.session_service),
        format!("/api/services/{}/sessions", f.session_service),
        "/api/practitioners".to_string(),
        format!("/api/practitioners/{}", f.practitioner_id),
        format!(
            "/api/practitioners/{}/slots?date={}&service_id={}",
            f.practitioner_id,
            days_ahead(3, 9).date(),
            f.session_service
        ),
    ];
    for uri in &uris {
        let (status, _) = f.app.call("GET", uri, None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
        let (status, body) = f.app.call("GET", uri, Some(&f.client), None).await;
        assert_eq!(status, StatusCode::OK, "{uri}: {body}");
    }
}

#[tokio::test]
async fn test_admin_routes_forbid_regular_users() {
    let f = fixture().await;
    let (status, body) = f
        .app
        .call("POST", "/api/admin/scheduler/tick", Some(&f.client), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().is_some());
}

// ── Users & Practitioners ──

#[tokio::test]
async fn test_register_validates_and_rejects_duplicates() {
    let app = test_app();
    let (status, body) = app
        .call(
            "POST",
            "/api/users",
            None,
            Some(json!({"email": "nope", "full_name": "", "phone": "555"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["fields"]["email"].is_array());
    assert!(body["fields"]["full_name"].is_array());
    assert!(body["fields"]["phone"].is_array());

    app.register("dup@example.com", "First", None).await;
    let (status, _) = app
        .call(
            "POST",
            "/api/users",
            None,
            Some(json!({"email": "DUP@example.com", "full_name": "Second"})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_me_includes_practitioner_profile() {
    let f = fixture().await;
    let (status, body) = f.app.call("GET", "/api/me", Some(&f.practitioner), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["email"], "prac@example.com");
    assert!(body["user"].get("api_token").is_none());
    assert_eq!(body["practitioner"]["id"], f.practitioner_id.as_str());
    assert_eq!(body["practitioner"]["tier"], "basic");

    let (_, body) = f.app.call("GET", "/api/me", Some(&f.client), None).await;
    assert!(body["practitioner"].is_null());
}

#[tokio::test]
async fn test_practitioner_profile_is_unique_and_validated() {
    let f = fixture().await;
    let (status, _) = f
        .app
        .call(
            "POST",
            "/api/practitioners",
            Some(&f.practitioner),
            Some(json!({"display_name": "Again"})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = f
        .app
        .call(
            "POST",
            "/api/practitioners",
            Some(&f.client),
            Some(json!({
                "display_name": "Casey",
                "availability": {"slots": [{"day": "funday", "start": "09:00", "end": "17:00"}]},
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["fields"]["availability"].is_array());
}

#[tokio::test]
async fn test_open_slots_respect_existing_bookings() {
    let f = fixture().await;
    let (status, _) = f
        .app
        .call(
            "PATCH",
            "/api/practitioners/me",
            Some(&f.practitioner),
            Some(json!({
                "availability": {"slots": [
                    {"day": "mon", "start": "09:00", "end": "12:00"},
                    {"day": "tue", "start": "09:00", "end": "12:00"},
                    {"day": "wed", "start": "09:00", "end": "12:00"},
                    {"day": "thu", "start": "09:00", "end": "12:00"},
                    {"day": "fri", "start": "09:00", "end": "12:00"},
                    {"day": "sat", "start": "09:00", "end": "12:00"},
                    {"day": "sun", "start": "09:00", "end": "12:00"},
                ]},
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let day = days_ahead(5, 9);
    let uri = format!(
        "/api/practitioners/{}/slots?date={}&service_id={}",
        f.practitioner_id,
        day.date(),
        f.session_service
    );
    let (status, _) = f.app.call("GET", &uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, body) = f.app.call("GET", &uri, Some(&f.client), None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let before = body["slots"].as_array().unwrap().len();
    assert!(before > 0);

    f.confirmed_session(day).await;
    let (_, body) = f.app.call("GET", &uri, Some(&f.client), None).await;
    let after = body["slots"].as_array().unwrap().len();
    assert!(after < before);

    // Outside working hours
    let (status, body) = f
        .app
        .call(
            "POST",
            "/api/bookings",
            Some(&f.client),
            Some(json!({"service_id": f.session_service, "start_time": fmt(days_ahead(5, 15))})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["fields"]["start_time"].is_array());
}

// ── Services ──

#[tokio::test]
async fn test_service_creation_rules() {
    let f = fixture().await;

    let (status, _) = f
        .app
        .call(
            "POST",
            "/api/services",
            Some(&f.client),
            Some(json!({"name": "x", "service_type": "session", "price_cents": 100, "duration_minutes": 30})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = f
        .app
        .call(
            "POST",
            "/api/services",
            Some(&f.practitioner),
            Some(json!({"name": "Bundle", "service_type": "package", "price_cents": 9000, "duration_minutes": 60})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["fields"]["sessions_included"].is_array());

    let (status, body) = f
        .app
        .call(
            "POST",
            "/api/services",
            Some(&f.practitioner),
            Some(json!({"name": "Odd", "service_type": "seminar", "price_cents": 0, "duration_minutes": 60})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["fields"]["service_type"].is_array());
    assert!(body["fields"]["price_cents"].is_array());

    let (status, list) = f
        .app
        .call(
            "GET",
            &format!("/api/services?practitioner_id={}&type=session", f.practitioner_id),
            Some(&f.client),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (status, _) = f
        .app
        .call(
            "DELETE",
            &format!("/api/services/{}", f.session_service),
            Some(&f.practitioner),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, list) = f
        .app
        .call(
            "GET",
            &format!("/api/services?practitioner_id={}", f.practitioner_id),
            Some(&f.client),
            None,
        )
        .await;
    assert!(list.as_array().unwrap().is_empty());
}

// ── Bookings & Checkout ──

#[tokio::test]
async fn test_cannot_book_own_service() {
    let f = fixture().await;
    let (status, _) = f
        .app
        .call(
            "POST",
            "/api/bookings",
            Some(&f.practitioner),
            Some(json!({"service_id": f.session_service, "start_time": fmt(days_ahead(3, 10))})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_checkout_requires_payment_method_when_credits_fall_short() {
    let f = fixture().await;
    let booking = f
        .app
        .book(
            &f.client,
            json!({"service_id": f.session_service, "start_time": fmt(days_ahead(3, 10))}),
        )
        .await;
    assert_eq!(booking["status"], "draft");
    let id = booking["id"].as_str().unwrap();

    let (status, _) = f.app.checkout(&f.client, id, None).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);

    // Nothing changed
    let (_, body) = f
        .app
        .call("GET", &format!("/api/bookings/{id}"), Some(&f.client), None)
        .await;
    assert_eq!(body["booking"]["status"], "draft");
    assert!(f.app.charges.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_checkout_applies_credits_then_charges_the_rest() {
    let f = fixture().await;
    let (status, body) = f
        .app
        .call(
            "POST",
            "/api/admin/credits",
            Some(ADMIN),
            Some(json!({"user_id": f.client_id, "amount_cents": 4000, "description": "welcome"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["balance_cents"], 4000);

    let booking = f
        .app
        .book(
            &f.client,
            json!({"service_id": f.session_service, "start_time": fmt(days_ahead(3, 10))}),
        )
        .await;
    let id = booking["id"].as_str().unwrap();
    let (status, result) = f
        .app
        .checkout(&f.client, id, Some(json!({"payment_method": "pm_card_visa"})))
        .await;
    assert_eq!(status, StatusCode::OK, "{result}");
    assert_eq!(result["booking"]["status"], "confirmed");
    assert_eq!(result["booking"]["payment_status"], "paid");
    assert_eq!(result["order"]["credits_applied_cents"], 4000);
    assert_eq!(result["order"]["total_cents"], 6000);
    assert_eq!(result["order"]["status"], "paid");
    assert!(result["room_url"].as_str().unwrap().starts_with("https://video.test/"));

    {
        let charges = f.app.charges.lock().unwrap();
        assert_eq!(charges.len(), 1);
        assert_eq!(charges[0].amount_cents, 6000);
        assert_eq!(charges[0].payment_method, "pm_card_visa");
        assert!(charges[0].idempotency_key.starts_with("order:"));
    }
    assert_eq!(f.app.credit_balance(&f.client).await, 0);

    // Both sides were told; the client has a phone so they also got a text
    let (_, notes) = f
        .app
        .call("GET", "/api/notifications", Some(&f.client), None)
        .await;
    assert_eq!(notes[0]["kind"], "booking_confirmed");
    let (_, notes) = f
        .app
        .call("GET", "/api/notifications", Some(&f.practitioner), None)
        .await;
    assert_eq!(notes[0]["kind"], "new_booking");
    assert_eq!(f.app.sms.lock().unwrap()[0].0, "+15550001111");

    // Earnings recorded at the basic 1:1 rate
    let (_, balance) = f.app.call("GET", "/api/earnings", Some(&f.practitioner), None).await;
    assert_eq!(balance["pending_cents"], 8500);

    // The slot is now taken for everyone
    let (status, _) = f
        .app
        .call(
            "POST",
            "/api/bookings",
            Some(&f.client),
            Some(json!({"service_id": f.session_service, "start_time": fmt(days_ahead(3, 10) + Duration::minutes(30))})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, runs) = f
        .app
        .call("GET", &format!("/api/workflows/{id}"), Some(ADMIN), None)
        .await;
    assert_eq!(runs[0]["kind"], "booking_confirmation");
    assert_eq!(runs[0]["status"], "completed");
}

#[tokio::test]
async fn test_checkout_fully_covered_by_credits_skips_charge() {
    let f = fixture().await;
    f.app
        .call(
            "POST",
            "/api/admin/credits",
            Some(ADMIN),
            Some(json!({"user_id": f.client_id, "amount_cents": 15000})),
        )
        .await;
    let booking = f
        .app
        .book(
            &f.client,
            json!({"service_id": f.session_service, "start_time": fmt(days_ahead(3, 10))}),
        )
        .await;
    let (status, result) = f
        .app
        .checkout(&f.client, booking["id"].as_str().unwrap(), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{result}");
    assert_eq!(result["order"]["total_cents"], 0);
    assert!(f.app.charges.lock().unwrap().is_empty());
    assert_eq!(f.app.credit_balance(&f.client).await, 5000);
}

#[tokio::test]
async fn test_failed_payment_rolls_back() {
    let f = fixture().await;
    f.app
        .call(
            "POST",
            "/api/admin/credits",
            Some(ADMIN),
            Some(json!({"user_id": f.client_id, "amount_cents": 2500})),
        )
        .await;
    f.app.fail_payments.store(true, Ordering::SeqCst);

    let booking = f
        .app
        .book(
            &f.client,
            json!({"service_id": f.session_service, "start_time": fmt(days_ahead(3, 10))}),
        )
        .await;
    let id = booking["id"].as_str().unwrap();
    let (status, body) = f
        .app
        .checkout(&f.client, id, Some(json!({"payment_method": "pm_card_declined"})))
        .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert!(body["error"].as_str().unwrap().contains("card declined"));

    let (_, detail) = f
        .app
        .call("GET", &format!("/api/bookings/{id}"), Some(&f.client), None)
        .await;
    assert_eq!(detail["booking"]["status"], "draft");
    assert_eq!(f.app.credit_balance(&f.client).await, 2500);

    let (_, runs) = f
        .app
        .call("GET", &format!("/api/workflows/{id}"), Some(ADMIN), None)
        .await;
    assert_eq!(runs[0]["status"], "failed");
    assert_eq!(runs[0]["attempts"], 2);

    // A retry with a working card goes through
    f.app.fail_payments.store(false, Ordering::SeqCst);
    let (status, result) = f
        .app
        .checkout(&f.client, id, Some(json!({"payment_method": "pm_card_visa"})))
        .await;
    assert_eq!(status, StatusCode::OK, "{result}");
    assert_eq!(result["order"]["total_cents"], 7500);
}

#[tokio::test]
async fn test_outsiders_cannot_see_bookings() {
    let f = fixture().await;
    let (_, stranger) = f.app.register("stranger@example.com", "Sam", None).await;
    let booking = f.confirmed_session(days_ahead(3, 10)).await;
    let id = booking["id"].as_str().unwrap();

    let (status, _) = f
        .app
        .call("GET", &format!("/api/bookings/{id}"), Some(&stranger), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = f
        .app
        .call("GET", "/api/bookings?role=practitioner", Some(&f.practitioner), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, _) = f
        .app
        .call("GET", "/api/bookings?status=sideways", Some(&f.client), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ── Cancel & Reschedule ──

#[tokio::test]
async fn test_early_cancel_refunds_to_credits() {
    let f = fixture().await;
    let booking = f.confirmed_session(days_ahead(3, 10)).await;
    let id = booking["id"].as_str().unwrap();

    let (status, body) = f
        .app
        .call(
            "POST",
            &format!("/api/bookings/{id}/cancel"),
            Some(&f.client),
            Some(json!({"reason": "travel"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["refund_cents"], 10000);
    assert_eq!(body["booking"]["status"], "canceled");
    assert_eq!(body["booking"]["payment_status"], "refunded");
    assert_eq!(body["booking"]["cancellation_reason"], "travel");
    assert_eq!(f.app.credit_balance(&f.client).await, 10000);

    let (_, balance) = f.app.call("GET", "/api/earnings", Some(&f.practitioner), None).await;
    assert_eq!(balance["pending_cents"], 0);

    let (_, notes) = f
        .app
        .call("GET", "/api/notifications?unread=true", Some(&f.practitioner), None)
        .await;
    assert_eq!(notes[0]["kind"], "booking_canceled");

    // Second cancel is an invalid transition
    let (status, _) = f
        .app
        .call("POST", &format!("/api/bookings/{id}/cancel"), Some(&f.client), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_reschedule_moves_booking_and_notifies() {
    let f = fixture().await;
    let booking = f.confirmed_session(days_ahead(3, 10)).await;
    let id = booking["id"].as_str().unwrap();
    let new_start = days_ahead(4, 14);

    let (status, body) = f
        .app
        .call(
            "POST",
            &format!("/api/bookings/{id}/reschedule"),
            Some(&f.client),
            Some(json!({"start_time": fmt(new_start)})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["start_time"], fmt(new_start));
    assert_eq!(body["end_time"], fmt(new_start + Duration::hours(1)));
    assert_eq!(body["reschedule_count"], 1);

    let (_, notes) = f
        .app
        .call("GET", "/api/notifications", Some(&f.practitioner), None)
        .await;
    assert_eq!(notes[0]["kind"], "booking_rescheduled");

    // Into the past is rejected
    let (status, _) = f
        .app
        .call(
            "POST",
            &format!("/api/bookings/{id}/reschedule"),
            Some(&f.client),
            Some(json!({"start_time": fmt(days_ahead(-2, 10))})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_reschedule_limit() {
    let f = fixture().await;
    let booking = f.confirmed_session(days_ahead(3, 10)).await;
    let uri = format!("/api/bookings/{}/reschedule", booking["id"].as_str().unwrap());

    for (i, hour) in [10, 12, 14].into_iter().enumerate() {
        let (status, body) = f
            .app
            .call(
                "POST",
                &uri,
                Some(&f.client),
                Some(json!({"start_time": fmt(days_ahead(4, hour))})),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["reschedule_count"], i as i64 + 1);
    }

    let (status, body) = f
        .app
        .call(
            "POST",
            &uri,
            Some(&f.client),
            Some(json!({"start_time": fmt(days_ahead(5, 10))})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("3 times"));
}

#[tokio::test]
async fn test_outcome_cannot_be_recorded_before_start() {
    let f = fixture().await;
    let booking = f.confirmed_session(days_ahead(3, 10)).await;
    let id = booking["id"].as_str().unwrap();

    let (status, _) = f
        .app
        .call("POST", &format!("/api/bookings/{id}/complete"), Some(&f.client), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = f
        .app
        .call("POST", &format!("/api/bookings/{id}/no-show"), Some(&f.practitioner), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

// ── Groups & Packages ──

#[tokio::test]
async fn test_workshop_seats_are_limited() {
    let f = fixture().await;
    let workshop = f
        .app
        .create_service(
            &f.practitioner,
            json!({
                "name": "Breathwork Circle",
                "service_type": "workshop",
                "price_cents": 3000,
                "duration_minutes": 90,
                "max_participants": 1,
            }),
        )
        .await;
    let (status, session) = f
        .app
        .call(
            "POST",
            &format!("/api/services/{workshop}/sessions"),
            Some(&f.practitioner),
            Some(json!({"start_time": fmt(days_ahead(6, 18))})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{session}");
    let session_id = session["id"].as_str().unwrap();

    let booking = f
        .app
        .book(
            &f.client,
            json!({"service_id": workshop, "service_session_id": session_id}),
        )
        .await;
    let (status, _) = f
        .app
        .checkout(
            &f.client,
            booking["id"].as_str().unwrap(),
            Some(json!({"payment_method": "pm_card_visa"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, detail) = f
        .app
        .call("GET", &format!("/api/services/{workshop}"), Some(&f.client), None)
        .await;
    assert_eq!(detail["sessions"][0]["spots_remaining"], 0);

    let (_, other) = f.app.register("other@example.com", "Olive", None).await;
    let (status, _) = f
        .app
        .call(
            "POST",
            "/api/bookings",
            Some(&other),
            Some(json!({"service_id": workshop, "service_session_id": session_id})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_course_books_every_session_and_follows_the_schedule() {
    let mut config = test_config();
    config.room_join_early_minutes = 240;
    let f = fixture_with(config).await;
    let course = f
        .app
        .create_service(
            &f.practitioner,
            json!({
                "name": "Mindful Mornings",
                "service_type": "course",
                "price_cents": 20000,
                "duration_minutes": 60,
                "max_participants": 5,
            }),
        )
        .await;

    let now = Utc::now().naive_utc();
    let mut sessions = Vec::new();
    for offset in [1, 3] {
        let (status, session) = f
            .app
            .call(
                "POST",
                &format!("/api/services/{course}/sessions"),
                Some(&f.practitioner),
                Some(json!({"start_time": fmt(now + Duration::hours(offset))})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{session}");
        sessions.push(session);
    }
    let first_id = sessions[0]["id"].as_str().unwrap();
    let second_id = sessions[1]["id"].as_str().unwrap();

    let booking = f.app.book(&f.client, json!({"service_id": course})).await;
    assert_eq!(booking["start_time"], sessions[0]["start_time"]);
    assert_eq!(booking["end_time"], sessions[1]["end_time"]);
    assert_eq!(booking["service_session_id"], first_id);
    assert_eq!(booking["price_cents"], 20000);

    let id = booking["id"].as_str().unwrap();
    let (status, result) = f
        .app
        .checkout(&f.client, id, Some(json!({"payment_method": "pm_card_visa"})))
        .await;
    assert_eq!(status, StatusCode::OK, "{result}");
    assert_eq!(result["room_url"], format!("https://video.test/haven-{first_id}"));

    let room_uri = format!("/api/bookings/{id}/room");
    let (status, access) = f.app.call("GET", &room_uri, Some(&f.client), None).await;
    assert_eq!(status, StatusCode::OK, "{access}");
    assert_eq!(access["url"], format!("https://video.test/haven-{first_id}"));

    // Once the first session is over, the room follows the next one
    let past = now - Duration::hours(3);
    f.app
        .state
        .db()
        .execute(
            "UPDATE service_sessions SET start_time = ?1, end_time = ?2 WHERE id = ?3",
            rusqlite::params![db::ts(&past), db::ts(&(past + Duration::hours(1))), first_id],
        )
        .unwrap();
    let (status, access) = f.app.call("GET", &room_uri, Some(&f.client), None).await;
    assert_eq!(status, StatusCode::OK, "{access}");
    assert_eq!(access["url"], format!("https://video.test/haven-{second_id}"));

    // Group bookings stay confirmed when the host joins
    let (status, _) = f.app.call("GET", &room_uri, Some(&f.practitioner), None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, detail) = f
        .app
        .call("GET", &format!("/api/bookings/{id}"), Some(&f.client), None)
        .await;
    assert_eq!(detail["booking"]["status"], "confirmed");
}

#[tokio::test]
async fn test_package_purchase_schedule_and_payout() {
    let f = fixture().await;
    let package = f
        .app
        .create_service(
            &f.practitioner,
            json!({
                "name": "Three Sessions",
                "service_type": "package",
                "price_cents": 9000,
                "duration_minutes": 60,
                "sessions_included": 3,
            }),
        )
        .await;

    let parent = f.app.book(&f.client, json!({"service_id": package})).await;
    let parent_id = parent["id"].as_str().unwrap();
    let (status, result) = f
        .app
        .checkout(&f.client, parent_id, Some(json!({"payment_method": "pm_card_visa"})))
        .await;
    assert_eq!(status, StatusCode::OK, "{result}");
    assert!(result["room_url"].is_null());

    let (_, detail) = f
        .app
        .call("GET", &format!("/api/bookings/{parent_id}"), Some(&f.client), None)
        .await;
    let children = detail["sessions"].as_array().unwrap();
    assert_eq!(children.len(), 3);
    assert!(children.iter().all(|c| c["status"] == "confirmed"));
    let child_id = children[0]["id"].as_str().unwrap();

    // Children are not checked out on their own
    let (status, _) = f.app.checkout(&f.client, child_id, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let start = days_ahead(3, 10);
    let (status, child) = f
        .app
        .call(
            "POST",
            &format!("/api/bookings/{child_id}/schedule"),
            Some(&f.client),
            Some(json!({"start_time": fmt(start)})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{child}");
    assert_eq!(child["start_time"], fmt(start));

    // With no hold configured, the purchase is released on the next tick
    let (status, report) = f
        .app
        .call("POST", "/api/admin/scheduler/tick", Some(ADMIN), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["earnings_released"], 1);

    let (status, payout) = f
        .app
        .call("POST", "/api/payouts", Some(&f.practitioner), None)
        .await;
    assert_eq!(status, StatusCode::CREATED, "{payout}");
    assert_eq!(payout["amount_cents"], 7650);
    assert_eq!(payout["status"], "completed");
    {
        let transfers = f.app.transfers.lock().unwrap();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].destination_account, "acct_123");
    }

    let (_, balance) = f.app.call("GET", "/api/earnings", Some(&f.practitioner), None).await;
    assert_eq!(balance["available_cents"], 0);
    assert_eq!(balance["paid_cents"], 7650);

    // Nothing left to pay out
    let (status, body) = f
        .app
        .call("POST", "/api/payouts", Some(&f.practitioner), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["fields"]["amount"][0]
        .as_str()
        .unwrap()
        .contains("below the minimum payout of 50.00"));
}

async fn released_package(f: &Fixture) -> String {
    let package = f
        .app
        .create_service(
            &f.practitioner,
            json!({
                "name": "Three Sessions",
                "service_type": "package",
                "price_cents": 9000,
                "duration_minutes": 60,
                "sessions_included": 3,
            }),
        )
        .await;
    let parent = f.app.book(&f.client, json!({"service_id": package})).await;
    let parent_id = parent["id"].as_str().unwrap().to_string();
    let (status, result) = f
        .app
        .checkout(&f.client, &parent_id, Some(json!({"payment_method": "pm_card_visa"})))
        .await;
    assert_eq!(status, StatusCode::OK, "{result}");
    assert_eq!(f.app.tick().await["earnings_released"], 1);
    parent_id
}

#[tokio::test]
async fn test_cancel_is_refused_while_its_payout_is_in_flight() {
    let f = fixture().await;
    let parent_id = released_package(&f).await;
    let control = Arc::clone(&f.app.transfer_control);
    control.hold.store(true, Ordering::SeqCst);

    let cancel_uri = format!("/api/bookings/{parent_id}/cancel");
    let ((payout_status, payout), (cancel_status, cancel)) = tokio::join!(
        f.app.call("POST", "/api/payouts", Some(&f.practitioner), None),
        async {
            control.started.notified().await;
            let result = f.app.call("POST", &cancel_uri, Some(&f.client), None).await;
            control.release.notify_one();
            result
        }
    );

    assert_eq!(cancel_status, StatusCode::CONFLICT, "{cancel}");
    assert_eq!(payout_status, StatusCode::CREATED, "{payout}");
    assert_eq!(payout["status"], "completed");
    assert_eq!(payout["amount_cents"], 7650);
    assert_eq!(f.app.credit_balance(&f.client).await, 0);

    let (_, detail) = f
        .app
        .call("GET", &format!("/api/bookings/{parent_id}"), Some(&f.client), None)
        .await;
    assert_eq!(detail["booking"]["status"], "confirmed");
    assert_eq!(detail["booking"]["payment_status"], "paid");

    // After the transfer lands the cancel goes through and paid earnings stay paid
    let (status, body) = f.app.call("POST", &cancel_uri, Some(&f.client), None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["refund_cents"], 9000);
    let (_, balance) = f.app.call("GET", "/api/earnings", Some(&f.practitioner), None).await;
    assert_eq!(balance["paid_cents"], 7650);
    assert_eq!(balance["available_cents"], 0);
}

#[tokio::test]
async fn test_failed_transfer_returns_earnings_to_available() {
    let f = fixture().await;
    released_package(&f).await;
    f.app.transfer_control.fail.store(true, Ordering::SeqCst);

    let (status, body) = f
        .app
        .call("POST", "/api/payouts", Some(&f.practitioner), None)
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY, "{body}");
    assert!(f.app.transfers.lock().unwrap().is_empty());

    let (_, payouts) = f.app.call("GET", "/api/payouts", Some(&f.practitioner), None).await;
    assert_eq!(payouts[0]["status"], "failed");
    assert!(payouts[0]["failure_reason"]
        .as_str()
        .unwrap()
        .contains("destination account closed"));

    let (_, balance) = f.app.call("GET", "/api/earnings", Some(&f.practitioner), None).await;
    assert_eq!(balance["available_cents"], 7650);
    assert_eq!(balance["paid_cents"], 0);

    // The earnings can go out on the next attempt
    f.app.transfer_control.fail.store(false, Ordering::SeqCst);
    let (status, payout) = f
        .app
        .call("POST", "/api/payouts", Some(&f.practitioner), None)
        .await;
    assert_eq!(status, StatusCode::CREATED, "{payout}");
    assert_eq!(payout["amount_cents"], 7650);
}

#[tokio::test]
async fn test_payout_needs_an_account() {
    let f = fixture().await;
    let (status, _) = f
        .app
        .call(
            "PATCH",
            "/api/practitioners/me",
            Some(&f.practitioner),
            Some(json!({"payout_account_id": ""})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = f
        .app
        .call("POST", "/api/payouts", Some(&f.practitioner), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["fields"]["payout_account_id"].is_array());
}

// ── Scheduler ──

#[tokio::test]
async fn test_tick_sends_reminders_once() {
    let f = fixture().await;
    let start = Utc::now().naive_utc() + Duration::hours(3);
    f.confirmed_session(start).await;

    let (_, report) = f
        .app
        .call("POST", "/api/admin/scheduler/tick", Some(ADMIN), None)
        .await;
    assert_eq!(report["reminders_sent"], 2);

    let (_, report) = f
        .app
        .call("POST", "/api/admin/scheduler/tick", Some(ADMIN), None)
        .await;
    assert_eq!(report["reminders_sent"], 0);

    let (_, notes) = f
        .app
        .call("GET", "/api/notifications", Some(&f.client), None)
        .await;
    assert_eq!(notes[0]["kind"], "reminder_24h");
}

#[tokio::test]
async fn test_tick_completes_finished_sessions() {
    let f = fixture().await;
    let booking = f.confirmed_session(days_ahead(3, 10)).await;
    let id = booking["id"].as_str().unwrap();
    f.app.move_into_past(id);

    let report = f.app.tick().await;
    assert_eq!(report["auto_completed"], 1);
    let (_, detail) = f
        .app
        .call("GET", &format!("/api/bookings/{id}"), Some(&f.client), None)
        .await;
    assert_eq!(detail["booking"]["status"], "completed");

    assert_eq!(f.app.tick().await["auto_completed"], 0);
}

#[tokio::test]
async fn test_tick_keeps_going_when_a_step_fails() {
    let f = fixture().await;
    f.confirmed_session(Utc::now().naive_utc() + Duration::hours(3))
        .await;
    let finished = f.confirmed_session(days_ahead(3, 10)).await;
    let finished_id = finished["id"].as_str().unwrap();
    f.app.move_into_past(finished_id);

    // Reminder lookups need the services table
    f.app
        .state
        .db()
        .execute_batch("PRAGMA foreign_keys = OFF; DROP TABLE services;")
        .unwrap();

    let report = f.app.tick().await;
    assert_eq!(report["reminders_sent"], 0);
    assert_eq!(report["auto_completed"], 1);

    let status: String = f
        .app
        .state
        .db()
        .query_row(
            "SELECT status FROM bookings WHERE id = ?1",
            [finished_id],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(status, "completed");
}

#[tokio::test]
async fn test_admin_can_change_tier() {
    let f = fixture().await;
    let uri = format!("/api/admin/practitioners/{}", f.practitioner_id);
    let (status, body) = f
        .app
        .call("PATCH", &uri, Some(ADMIN), Some(json!({"tier": "premium"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tier"], "premium");

    let (status, _) = f
        .app
        .call("PATCH", &uri, Some(ADMIN), Some(json!({"tier": "platinum"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // The new rate applies to the next booking
    f.confirmed_session(days_ahead(3, 10)).await;
    let (_, balance) = f.app.call("GET", "/api/earnings", Some(&f.practitioner), None).await;
    assert_eq!(balance["pending_cents"], 9000);
}

// ── Rooms ──

#[tokio::test]
async fn test_room_join_window() {
    let f = fixture().await;
    let booking = f.confirmed_session(days_ahead(3, 10)).await;
    let id = booking["id"].as_str().unwrap();
    let (status, _) = f
        .app
        .call("GET", &format!("/api/bookings/{id}/room"), Some(&f.client), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let mut config = test_config();
    config.room_join_early_minutes = 240;
    let f = fixture_with(config).await;
    let booking = f
        .confirmed_session(Utc::now().naive_utc() + Duration::hours(2))
        .await;
    let id = booking["id"].as_str().unwrap();

    let (status, access) = f
        .app
        .call("GET", &format!("/api/bookings/{id}/room"), Some(&f.client), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{access}");
    assert!(access["url"].as_str().unwrap().starts_with("https://video.test/"));
    assert!(access["token"].as_str().unwrap().ends_with("-false"));

    let (status, access) = f
        .app
        .call("GET", &format!("/api/bookings/{id}/room"), Some(&f.practitioner), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(access["token"].as_str().unwrap().ends_with("-true"));

    let (_, detail) = f
        .app
        .call("GET", &format!("/api/bookings/{id}"), Some(&f.client), None)
        .await;
    assert_eq!(detail["booking"]["status"], "in_progress");
}

// ── Notifications & Conversations ──

#[tokio::test]
async fn test_mark_notifications_read() {
    let f = fixture().await;
    f.confirmed_session(days_ahead(3, 10)).await;

    let (_, notes) = f
        .app
        .call("GET", "/api/notifications?unread=true", Some(&f.client), None)
        .await;
    let note_id = notes[0]["id"].as_i64().unwrap();

    let (status, _) = f
        .app
        .call("POST", &format!("/api/notifications/{note_id}/read"), Some(&f.client), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = f
        .app
        .call("POST", &format!("/api/notifications/{note_id}/read"), Some(&f.practitioner), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, notes) = f
        .app
        .call("GET", "/api/notifications?unread=true", Some(&f.client), None)
        .await;
    assert!(notes.as_array().unwrap().is_empty());

    let (_, body) = f
        .app
        .call("POST", "/api/notifications/read-all", Some(&f.practitioner), None)
        .await;
    assert_eq!(body["updated"], 1);
}

#[tokio::test]
async fn test_events_stream_requires_token() {
    let app = test_app();
    let (status, _) = app.raw("GET", "/api/events?token=nope", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_events_stream_replays_after_last_id() {
    use tokio_stream::StreamExt;

    let f = fixture().await;
    let first = f.confirmed_session(days_ahead(3, 10)).await;
    let second = f.confirmed_session(days_ahead(4, 10)).await;
    let first_id = first["id"].as_str().unwrap();
    let second_id = second["id"].as_str().unwrap();

    let (_, notes) = f.app.call("GET", "/api/notifications", Some(&f.client), None).await;
    let notes = notes.as_array().unwrap();
    assert_eq!(notes.len(), 2);
    assert_eq!(notes[1]["booking_id"], first_id);
    let last_id = notes[1]["id"].as_i64().unwrap();

    let req = Request::builder()
        .uri(format!("/api/events?token={}&last_id={last_id}", f.client))
        .body(Body::empty())
        .unwrap();
    let res = handlers::router(Arc::clone(&f.app.state))
        .oneshot(req)
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let mut stream = res.into_body().into_data_stream();
    let mut seen = String::new();
    while !seen.contains(second_id) {
        let chunk = tokio::time::timeout(StdDuration::from_secs(5), stream.next())
            .await
            .expect("catch-up event within 5s")
            .expect("stream still open")
            .unwrap();
        seen.push_str(&String::from_utf8_lossy(&chunk));
    }
    assert!(seen.contains("event: notification"));
    assert!(!seen.contains(first_id));
}

#[tokio::test]
async fn test_conversation_flow() {
    let f = fixture().await;
    let (status, body) = f
        .app
        .call(
            "POST",
            "/api/conversations",
            Some(&f.client),
            Some(json!({"user_id": f.practitioner_user_id})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let conv = body["id"].as_str().unwrap().to_string();

    // Same pair, same conversation
    let (_, again) = f
        .app
        .call(
            "POST",
            "/api/conversations",
            Some(&f.practitioner),
            Some(json!({"user_id": f.client_id})),
        )
        .await;
    assert_eq!(again["id"], conv.as_str());

    let (status, _) = f
        .app
        .call(
            "POST",
            &format!("/api/conversations/{conv}/messages"),
            Some(&f.client),
            Some(json!({"body": "   "})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, message) = f
        .app
        .call(
            "POST",
            &format!("/api/conversations/{conv}/messages"),
            Some(&f.client),
            Some(json!({"body": "  Looking forward to it!  "})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(message["body"], "Looking forward to it!");
    assert_eq!(message["recipient_id"], f.practitioner_user_id.as_str());

    let (_, list) = f
        .app
        .call("GET", "/api/conversations", Some(&f.practitioner), None)
        .await;
    assert_eq!(list[0]["unread_count"], 1);
    assert_eq!(list[0]["other_user_name"], "Casey Client");

    let (_, body) = f
        .app
        .call("POST", &format!("/api/conversations/{conv}/read"), Some(&f.practitioner), None)
        .await;
    assert_eq!(body["updated"], 1);

    let (_, stranger) = f.app.register("nosy@example.com", "Nosy", None).await;
    let (status, _) = f
        .app
        .call("GET", &format!("/api/conversations/{conv}/messages"), Some(&stranger), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = f
        .app
        .call(
            "POST",
            "/api/conversations",
            Some(&f.client),
            Some(json!({"user_id": f.client_id})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ── Calendar ──

#[tokio::test]
async fn test_booking_ics_download() {
    let f = fixture().await;
    let booking = f.confirmed_session(days_ahead(3, 10)).await;
    let id = booking["id"].as_str().unwrap();

    let (status, ics) = f
        .app
        .raw("GET", &format!("/calendar/{id}.ics"), Some(&f.client), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(ics.starts_with("BEGIN:VCALENDAR"));
    assert!(ics.contains(&format!("UID:{id}@haven")));
    assert!(ics.contains("SUMMARY:Coaching with Pat P."));

    let (status, _) = f.app.raw("GET", &format!("/calendar/{id}.ics"), None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_practitioner_feed_needs_valid_token() {
    let f = fixture().await;
    let booking = f.confirmed_session(days_ahead(3, 10)).await;

    let (status, body) = f
        .app
        .call("GET", "/api/practitioners/me/calendar-token", Some(&f.practitioner), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["token"].as_str().unwrap();
    assert!(body["url"]
        .as_str()
        .unwrap()
        .starts_with(&format!("https://haven.test/calendar/feed/{}.ics", f.practitioner_id)));

    let (status, ics) = f
        .app
        .raw(
            "GET",
            &format!("/calendar/feed/{}.ics?token={token}", f.practitioner_id),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(ics.contains(booking["id"].as_str().unwrap()));

    let (status, _) = f
        .app
        .raw(
            "GET",
            &format!("/calendar/feed/{}.ics?token=forged", f.practitioner_id),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
