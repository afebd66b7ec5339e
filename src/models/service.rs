use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub practitioner_id: String,
    pub name: String,
    pub description: Option<String>,
    pub service_type: ServiceType,
    pub price_cents: i64,
    pub currency: String,
    pub duration_minutes: i32,
    pub max_participants: i32,
    pub sessions_included: i32,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Session,
    Workshop,
    Course,
    Package,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Session => "session",
            ServiceType::Workshop => "workshop",
            ServiceType::Course => "course",
            ServiceType::Package => "package",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "session" => Some(ServiceType::Session),
            "workshop" => Some(ServiceType::Workshop),
            "course" => Some(ServiceType::Course),
            "package" => Some(ServiceType::Package),
            _ => None,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, ServiceType::Workshop | ServiceType::Course)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSession {
    pub id: String,
    pub service_id: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub max_participants: i32,
    pub is_canceled: bool,
}
