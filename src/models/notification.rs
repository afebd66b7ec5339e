use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub user_id: String,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub booking_id: Option<String>,
    pub is_read: bool,
    pub created_at: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveEvent {
    Notification(Notification),
    Message(ChatMessage),
}

impl LiveEvent {
    pub fn recipient(&self) -> &str {
        match self {
            LiveEvent::Notification(n) => &n.user_id,
            LiveEvent::Message(m) => &m.recipient_id,
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            LiveEvent::Notification(_) => "notification",
            LiveEvent::Message(_) => "message",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub conversation_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub body: String,
    pub is_read: bool,
    pub created_at: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub other_user_id: String,
    pub other_user_name: String,
    pub last_message: Option<String>,
    pub last_activity: String,
    pub unread_count: i64,
}
