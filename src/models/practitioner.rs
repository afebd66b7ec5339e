use serde::{Deserialize, Serialize};

use super::Availability;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Practitioner {
    pub id: String,
    pub user_id: String,
    pub display_name: String,
    pub bio: Option<String>,
    pub tier: Tier,
    pub timezone: String,
    pub availability: Option<String>,
    pub buffer_minutes: i32,
    #[serde(skip_serializing)]
    pub payout_account_id: Option<String>,
    pub is_active: bool,
}

impl Practitioner {
    pub fn parsed_availability(&self) -> Availability {
        self.availability
            .as_deref()
            .and_then(|raw| Availability::from_json(raw).ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Basic,
    Professional,
    Premium,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Basic => "basic",
            Tier::Professional => "professional",
            Tier::Premium => "premium",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "professional" => Tier::Professional,
            "premium" => Tier::Premium,
            _ => Tier::Basic,
        }
    }
}
