use anyhow::Context;
use async_trait::async_trait;

use super::MessagingProvider;

const MAX_SMS_CHARS: usize = 1600;

pub struct TwilioSmsProvider {
    account_sid: String,
    auth_token: String,
    from_number: String,
    client: reqwest::Client,
}

impl TwilioSmsProvider {
    pub fn new(account_sid: String, auth_token: String, from_number: String) -> Self {
        Self {
            account_sid,
            auth_token,
            from_number,
            client: reqwest::Client::new(),
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.account_sid
        )
    }
}

fn clip(body: &str) -> String {
    if body.chars().count() <= MAX_SMS_CHARS {
        return body.to_string();
    }
    let mut clipped: String = body.chars().take(MAX_SMS_CHARS - 1).collect();
    clipped.push('…');
    clipped
}

#[async_trait]
impl MessagingProvider for TwilioSmsProvider {
    async fn send_message(&self, to: &str, body: &str) -> anyhow::Result<()> {
        let body = clip(body);
        let resp = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("To", to), ("From", self.from_number.as_str()), ("Body", body.as_str())])
            .send()
            .await
            .context("failed to reach Twilio")?;

        let status = resp.status();
        let data: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse Twilio response")?;
        if !status.is_success() {
            let message = data["message"].as_str().unwrap_or("unknown error");
            anyhow::bail!("Twilio API error ({status}): {message}");
        }

        tracing::debug!(to, sid = data["sid"].as_str().unwrap_or(""), "sms sent");
        Ok(())
    }
}
