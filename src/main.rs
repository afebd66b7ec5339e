use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use haven::config::AppConfig;
use haven::db;
use haven::handlers;
use haven::services::messaging::twilio::TwilioSmsProvider;
use haven::services::messaging::{LogOnlyMessaging, MessagingProvider};
use haven::services::payments::stripe::StripeProvider;
use haven::services::payments::{LogOnlyPayments, PaymentProvider};
use haven::services::reminders;
use haven::services::video::daily::DailyProvider;
use haven::services::video::{LogOnlyVideo, VideoProvider};
use haven::services::workflow::RetryPolicy;
use haven::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let conn = db::init_db(&config.database_url)?;

    let payments: Box<dyn PaymentProvider> = if config.stripe_secret_key.is_empty() {
        tracing::warn!("STRIPE_SECRET_KEY not set, charges and transfers are simulated");
        Box::new(LogOnlyPayments)
    } else {
        Box::new(StripeProvider::new(config.stripe_secret_key.clone()))
    };
    let video: Box<dyn VideoProvider> = if config.daily_api_key.is_empty() {
        tracing::warn!("DAILY_API_KEY not set, video rooms are simulated");
        Box::new(LogOnlyVideo)
    } else {
        Box::new(DailyProvider::new(config.daily_api_key.clone()))
    };
    let messaging: Box<dyn MessagingProvider> = if config.twilio_account_sid.is_empty() {
        tracing::info!("twilio not configured, SMS notifications are logged only");
        Box::new(LogOnlyMessaging)
    } else {
        Box::new(TwilioSmsProvider::new(
            config.twilio_account_sid.clone(),
            config.twilio_auth_token.clone(),
            config.twilio_phone_number.clone(),
        ))
    };

    let (events_tx, _) = broadcast::channel(256);

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: config.clone(),
        payments,
        video,
        messaging,
        retry_policy: RetryPolicy::default(),
        events_tx,
    });

    tokio::spawn(reminders::run_scheduler(Arc::clone(&state)));

    let app = handlers::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
