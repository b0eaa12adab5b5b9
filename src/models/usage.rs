use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Days, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_EVENT_TYPE: &str = "custom";
pub const DEFAULT_EVENT_NAME: &str = "Unknown Event";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    pub id: String,
    pub license_key_id: String,
    pub event_type: String,
    pub event_name: String,
    pub event_data: Value,
    pub metadata: Value,
    pub created_at: i64,
}

/// Row values for one usage event.
#[derive(Debug, Clone)]
pub struct NewUsageEvent {
    pub event_type: String,
    pub event_name: String,
    pub event_data: Value,
    pub metadata: Value,
}

/// One entry of a batch. Missing type/name fall back to
/// [`DEFAULT_EVENT_TYPE`]/[`DEFAULT_EVENT_NAME`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchEvent {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl BatchEvent {
    /// Resolve defaults and merge this event's metadata over `shared`.
    pub fn into_new_event(self, shared: &Map<String, Value>) -> NewUsageEvent {
        let mut metadata = shared.clone();
        if let Some(own) = self.metadata {
            metadata.extend(own);
        }
        NewUsageEvent {
            event_type: self.event_type.unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string()),
            event_name: self.name.unwrap_or_else(|| DEFAULT_EVENT_NAME.to_string()),
            event_data: self.data.unwrap_or_else(|| Value::Object(Map::new())),
            metadata: Value::Object(metadata),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsagePeriod {
    Today,
    Week,
    Month,
    #[default]
    All,
}

impl UsagePeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsagePeriod::Today => "today",
            UsagePeriod::Week => "week",
            UsagePeriod::Month => "month",
            UsagePeriod::All => "all",
        }
    }

    /// Unknown periods count everything.
    pub fn parse(s: &str) -> Self {
        match s {
            "today" => UsagePeriod::Today,
            "week" => UsagePeriod::Week,
            "month" => UsagePeriod::Month,
            _ => UsagePeriod::All,
        }
    }

    /// Inclusive lower bound (unix seconds, UTC) of the calendar period
    /// containing `now`. Weeks start on Monday. `None` for `All`.
    pub fn since(&self, now: DateTime<Utc>) -> Option<i64> {
        let today = now.date_naive();
        let start = match self {
            UsagePeriod::Today => today,
            UsagePeriod::Week => {
                today.checked_sub_days(Days::new(u64::from(today.weekday().num_days_from_monday())))?
            }
            UsagePeriod::Month => today.with_day(1)?,
            UsagePeriod::All => return None,
        };
        Some(start.and_time(NaiveTime::MIN).and_utc().timestamp())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub total_events: i64,
    pub events_by_type: BTreeMap<String, i64>,
    pub period: UsagePeriod,
}
