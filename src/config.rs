use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    pub platform_currency: String,
    pub earnings_hold_hours: i64,
    pub minimum_payout_cents: i64,
    pub reminder_interval_secs: u64,
    pub room_join_early_minutes: i64,
    pub calendar_feed_secret: String,
    pub public_base_url: String,
    pub stripe_secret_key: String,
    pub daily_api_key: String,
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    pub twilio_phone_number: String,
}

fn parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: parsed("PORT", 3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "haven.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            platform_currency: env::var("PLATFORM_CURRENCY").unwrap_or_else(|_| "usd".to_string()),
            earnings_hold_hours: parsed("EARNINGS_HOLD_HOURS", 48),
            minimum_payout_cents: parsed("MINIMUM_PAYOUT_CENTS", 5000),
            reminder_interval_secs: parsed("REMINDER_INTERVAL_SECS", 60),
            room_join_early_minutes: parsed("ROOM_JOIN_EARLY_MINUTES", 15),
            calendar_feed_secret: env::var("CALENDAR_FEED_SECRET")
                .unwrap_or_else(|_| "dev-calendar-secret".to_string()),
            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            stripe_secret_key: env::var("STRIPE_SECRET_KEY").unwrap_or_default(),
            daily_api_key: env::var("DAILY_API_KEY").unwrap_or_default(),
            twilio_account_sid: env::var("TWILIO_ACCOUNT_SID").unwrap_or_default(),
            twilio_auth_token: env::var("TWILIO_AUTH_TOKEN").unwrap_or_default(),
            twilio_phone_number: env::var("TWILIO_PHONE_NUMBER").unwrap_or_default(),
        }
    }
}
