use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    // booking id, or service session id for group services
    pub subject_id: String,
    pub provider_room_name: String,
    pub url: String,
    pub created_at: String,
}
