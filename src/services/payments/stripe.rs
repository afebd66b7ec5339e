use anyhow::Context;
use async_trait::async_trait;

use super::{ChargeRequest, PaymentProvider, TransferRequest};

const API_BASE: &str = "https://api.stripe.com/v1";

pub struct StripeProvider {
    secret_key: String,
    client: reqwest::Client,
}

impl StripeProvider {
    pub fn new(secret_key: String) -> Self {
        Self {
            secret_key,
            client: reqwest::Client::new(),
        }
    }

    async fn post_form(
        &self,
        path: &str,
        idempotency_key: &str,
        form: &[(&str, String)],
    ) -> anyhow::Result<serde_json::Value> {
        let resp = self
            .client
            .post(format!("{API_BASE}{path}"))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", idempotency_key)
            .form(form)
            .send()
            .await
            .with_context(|| format!("failed to call Stripe {path}"))?;

        let status = resp.status();
        let data: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse Stripe response")?;

        if !status.is_success() {
            let message = data["error"]["message"].as_str().unwrap_or("unknown error");
            anyhow::bail!("Stripe API error ({status}): {message}");
        }
        Ok(data)
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    async fn charge(&self, req: &ChargeRequest) -> anyhow::Result<String> {
        let form = [
            ("amount", req.amount_cents.to_string()),
            ("currency", req.currency.clone()),
            ("payment_method", req.payment_method.clone()),
            ("description", req.description.clone()),
            ("confirm", "true".to_string()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
            ("automatic_payment_methods[allow_redirects]", "never".to_string()),
        ];
        let data = self
            .post_form("/payment_intents", &req.idempotency_key, &form)
            .await?;

        let status = data["status"].as_str().unwrap_or_default();
        if status != "succeeded" {
            anyhow::bail!("payment intent not completed (status: {status})");
        }
        data["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("missing id in Stripe payment intent"))
    }

    async fn transfer(&self, req: &TransferRequest) -> anyhow::Result<String> {
        let form = [
            ("amount", req.amount_cents.to_string()),
            ("currency", req.currency.clone()),
            ("destination", req.destination_account.clone()),
        ];
        let data = self
            .post_form("/transfers", &req.idempotency_key, &form)
            .await?;

        data["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("missing id in Stripe transfer"))
    }
}
