use chrono::{Duration, NaiveDateTime};

use crate::models::{ServiceType, Tier};

pub const FREE_CHANGE_WINDOW_HOURS: i64 = 24;
pub const LATE_CANCEL_REFUND_PERCENT: i64 = 50;
pub const MAX_RESCHEDULES: i32 = 3;

pub fn commission_rate_bps(tier: Tier, service_type: ServiceType) -> i64 {
    let group = service_type.is_group();
    match (tier, group) {
        (Tier::Basic, false) => 1500,
        (Tier::Basic, true) => 1800,
        (Tier::Professional, false) => 1200,
        (Tier::Professional, true) => 1500,
        (Tier::Premium, false) => 1000,
        (Tier::Premium, true) => 1200,
    }
}

// (commission, net), commission rounds half up
pub fn split_commission(gross_cents: i64, rate_bps: i64) -> (i64, i64) {
    let commission = (gross_cents * rate_bps + 5_000) / 10_000;
    (commission, gross_cents - commission)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Client,
    Practitioner,
}

pub fn refund_percent(actor: Actor, start: Option<NaiveDateTime>, now: NaiveDateTime) -> i64 {
    match (actor, start) {
        (Actor::Practitioner, _) => 100,
        (Actor::Client, None) => 100,
        (Actor::Client, Some(start)) => {
            if start - now >= Duration::hours(FREE_CHANGE_WINDOW_HOURS) {
                100
            } else {
                LATE_CANCEL_REFUND_PERCENT
            }
        }
    }
}

// rounds down; refunding every session returns exactly price_cents
pub fn package_refund(price_cents: i64, sessions_total: i64, unused_percents: &[i64]) -> i64 {
    if sessions_total <= 0 {
        return 0;
    }
    let percent_sum: i64 = unused_percents.iter().sum();
    price_cents * percent_sum / (100 * sessions_total)
}

pub fn percent_of(amount_cents: i64, percent: i64) -> i64 {
    amount_cents * percent / 100
}

pub fn within_free_change_window(start: NaiveDateTime, now: NaiveDateTime) -> bool {
    start - now >= Duration::hours(FREE_CHANGE_WINDOW_HOURS)
}
