use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde_json::json;

use super::VideoProvider;

const API_BASE: &str = "https://api.daily.co/v1";

pub struct DailyProvider {
    api_key: String,
    client: reqwest::Client,
}

impl DailyProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
        }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let resp = self
            .client
            .post(format!("{API_BASE}{path}"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("failed to call Daily {path}"))?;

        let status = resp.status();
        let data: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse Daily response")?;

        if !status.is_success() {
            anyhow::bail!("Daily API error ({}): {}", status, data);
        }
        Ok(data)
    }
}

#[async_trait]
impl VideoProvider for DailyProvider {
    async fn create_room(&self, name: &str, expires_at: NaiveDateTime) -> anyhow::Result<String> {
        let body = json!({
            "name": name,
            "privacy": "private",
            "properties": {
                "exp": expires_at.and_utc().timestamp(),
                "enable_chat": true,
            },
        });
        let data = self.post("/rooms", body).await?;
        data["url"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("missing url in Daily room response"))
    }

    async fn meeting_token(
        &self,
        room_name: &str,
        user_name: &str,
        is_owner: bool,
        expires_at: NaiveDateTime,
    ) -> anyhow::Result<String> {
        let body = json!({
            "properties": {
                "room_name": room_name,
                "user_name": user_name,
                "is_owner": is_owner,
                "exp": expires_at.and_utc().timestamp(),
            },
        });
        let data = self.post("/meeting-tokens", body).await?;
        data["token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("missing token in Daily response"))
    }
}
