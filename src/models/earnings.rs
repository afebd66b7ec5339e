use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarningsTransaction {
    pub id: String,
    pub practitioner_id: String,
    pub booking_id: String,
    pub gross_cents: i64,
    pub commission_rate_bps: i64,
    pub commission_cents: i64,
    pub net_cents: i64,
    pub status: EarningsStatus,
    pub available_after: NaiveDateTime,
    pub payout_id: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EarningsStatus {
    Pending,
    Available,
    Paid,
    Canceled,
}

impl EarningsStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EarningsStatus::Pending => "pending",
            EarningsStatus::Available => "available",
            EarningsStatus::Paid => "paid",
            EarningsStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "available" => EarningsStatus::Available,
            "paid" => EarningsStatus::Paid,
            "canceled" => EarningsStatus::Canceled,
            _ => EarningsStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EarningsBalance {
    pub pending_cents: i64,
    pub available_cents: i64,
    pub paid_cents: i64,
    pub lifetime_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payout {
    pub id: String,
    pub practitioner_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PayoutStatus,
    pub provider_transfer_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    Processing,
    Completed,
    Failed,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Processing => "processing",
            PayoutStatus::Completed => "completed",
            PayoutStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "completed" => PayoutStatus::Completed,
            "failed" => PayoutStatus::Failed,
            _ => PayoutStatus::Processing,
        }
    }
}
