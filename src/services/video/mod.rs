pub mod daily;

use async_trait::async_trait;
use chrono::NaiveDateTime;

#[async_trait]
pub trait VideoProvider: Send + Sync {
    async fn create_room(&self, name: &str, expires_at: NaiveDateTime) -> anyhow::Result<String>;

    async fn meeting_token(
        &self,
        room_name: &str,
        user_name: &str,
        is_owner: bool,
        expires_at: NaiveDateTime,
    ) -> anyhow::Result<String>;
}

pub struct LogOnlyVideo;

#[async_trait]
impl VideoProvider for LogOnlyVideo {
    async fn create_room(&self, name: &str, _expires_at: NaiveDateTime) -> anyhow::Result<String> {
        tracing::info!(room = name, "video disabled, room simulated");
        Ok(format!("https://video.invalid/{name}"))
    }

    async fn meeting_token(
        &self,
        room_name: &str,
        _user_name: &str,
        is_owner: bool,
        _expires_at: NaiveDateTime,
    ) -> anyhow::Result<String> {
        Ok(format!("sim-{room_name}-{}", if is_owner { "owner" } else { "guest" }))
    }
}
