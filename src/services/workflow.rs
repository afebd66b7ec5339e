use std::future::Future;
use std::time::Duration;

use crate::db::queries;
use crate::state::AppState;

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            max_interval: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let secs = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_interval.as_secs_f64()))
    }
}

#[derive(Debug)]
pub struct ActivityError {
    pub error: anyhow::Error,
    pub attempts: u32,
}

pub async fn run_activity<T, F, Fut>(
    name: &str,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<(T, u32), ActivityError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok((value, attempt)),
            Err(error) if attempt >= max_attempts => {
                tracing::error!(activity = name, attempt, error = %error, "activity failed, giving up");
                return Err(ActivityError {
                    error,
                    attempts: attempt,
                });
            }
            Err(error) => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(activity = name, attempt, error = %error, ?delay, "activity failed, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

pub struct WorkflowRecord {
    id: Option<String>,
    kind: &'static str,
    attempts: i64,
}

impl WorkflowRecord {
    pub fn start(state: &AppState, kind: &'static str, subject_id: &str) -> Self {
        let id = {
            let db = state.db();
            queries::start_workflow_run(&db, kind, subject_id)
        };
        let id = match id {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::error!(error = %e, kind, "failed to record workflow start");
                None
            }
        };
        tracing::info!(kind, subject_id, "workflow started");
        Self {
            id,
            kind,
            attempts: 0,
        }
    }

    pub fn add_attempts(&mut self, attempts: u32) {
        self.attempts += i64::from(attempts);
    }

    pub fn complete(self, state: &AppState) {
        self.finish(state, None);
    }

    pub fn fail(self, state: &AppState, error: &str) {
        self.finish(state, Some(error));
    }

    fn finish(self, state: &AppState, error: Option<&str>) {
        let Some(id) = self.id else { return };
        let result = {
            let db = state.db();
            queries::finish_workflow_run(&db, &id, error.is_none(), self.attempts, error)
        };
        if let Err(e) = result {
            tracing::error!(error = %e, kind = self.kind, "failed to record workflow finish");
        }
        match error {
            None => tracing::info!(kind = self.kind, attempts = self.attempts, "workflow completed"),
            Some(reason) => tracing::warn!(kind = self.kind, reason, "workflow failed"),
        }
    }
}
