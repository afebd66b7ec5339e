use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::models::LiveEvent;
use crate::services::messaging::MessagingProvider;
use crate::services::payments::PaymentProvider;
use crate::services::video::VideoProvider;
use crate::services::workflow::RetryPolicy;

pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: AppConfig,
    pub payments: Box<dyn PaymentProvider>,
    pub video: Box<dyn VideoProvider>,
    pub messaging: Box<dyn MessagingProvider>,
    pub retry_policy: RetryPolicy,
    pub events_tx: broadcast::Sender<LiveEvent>,
}

impl AppState {
    // never hold the guard across an .await
    pub fn db(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
