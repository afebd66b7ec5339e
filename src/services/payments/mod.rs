pub mod stripe;

use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub amount_cents: i64,
    pub currency: String,
    pub payment_method: String,
    pub description: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub destination_account: String,
    pub amount_cents: i64,
    pub currency: String,
    pub idempotency_key: String,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn charge(&self, req: &ChargeRequest) -> anyhow::Result<String>;

    async fn transfer(&self, req: &TransferRequest) -> anyhow::Result<String>;
}

pub struct LogOnlyPayments;

#[async_trait]
impl PaymentProvider for LogOnlyPayments {
    async fn charge(&self, req: &ChargeRequest) -> anyhow::Result<String> {
        tracing::info!(amount = req.amount_cents, key = %req.idempotency_key, "payments disabled, charge simulated");
        Ok(format!("sim_{}", req.idempotency_key))
    }

    async fn transfer(&self, req: &TransferRequest) -> anyhow::Result<String> {
        tracing::info!(amount = req.amount_cents, key = %req.idempotency_key, "payments disabled, transfer simulated");
        Ok(format!("sim_{}", req.idempotency_key))
    }
}
