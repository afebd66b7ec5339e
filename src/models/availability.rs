use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

const DAY_ORDER: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSlot {
    pub day: String,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Availability {
    pub slots: Vec<TimeSlot>,
}

impl Availability {
    pub fn from_json(s: &str) -> anyhow::Result<Self> {
        let availability: Availability = serde_json::from_str(s)?;
        for slot in &availability.slots {
            parse_weekday(&slot.day)?;
            let start = parse_time(&slot.start)?;
            let end = parse_time(&slot.end)?;
            if end <= start {
                anyhow::bail!("slot end must be after start: {}-{}", slot.start, slot.end);
            }
        }
        Ok(availability)
    }

    pub fn is_unrestricted(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn windows_on(&self, date: NaiveDate) -> Vec<(NaiveDateTime, NaiveDateTime)> {
        let weekday = weekday_key(date.weekday());
        let mut windows: Vec<_> = self
            .slots
            .iter()
            .filter(|slot| slot.day.eq_ignore_ascii_case(weekday))
            .filter_map(|slot| {
                let start = parse_time(&slot.start).ok()?;
                let end = parse_time(&slot.end).ok()?;
                Some((date.and_time(start), date.and_time(end)))
            })
            .collect();
        windows.sort();
        windows
    }

    pub fn covers(&self, start: &NaiveDateTime, duration_minutes: i64) -> bool {
        if self.is_unrestricted() {
            return true;
        }
        let end = *start + Duration::minutes(duration_minutes);
        self.windows_on(start.date())
            .iter()
            .any(|(win_start, win_end)| start >= win_start && end <= *win_end)
    }

    pub fn to_human_readable(&self) -> String {
        let mut sorted_slots = self.slots.clone();
        sorted_slots.sort_by_key(|s| {
            DAY_ORDER
                .iter()
                .position(|d| d.eq_ignore_ascii_case(&s.day))
                .unwrap_or(DAY_ORDER.len())
        });

        sorted_slots
            .iter()
            .map(|s| format!("{}: {}-{}", capitalize(&s.day), s.start, s.end))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn weekday_key(day: Weekday) -> &'static str {
    DAY_ORDER[day.num_days_from_monday() as usize]
}

fn capitalize(s: &str) -> String {
    let mut c = s.chars();
    match c.next() {
        None => String::new(),
        Some(f) => f.to_uppercase().to_string() + &c.as_str().to_lowercase(),
    }
}

fn parse_weekday(s: &str) -> anyhow::Result<()> {
    if DAY_ORDER.iter().any(|d| d.eq_ignore_ascii_case(s)) {
        Ok(())
    } else {
        Err(anyhow::anyhow!("invalid weekday: {s}"))
    }
}

fn parse_time(s: &str) -> anyhow::Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|_| anyhow::anyhow!("invalid time: {s}"))
}
