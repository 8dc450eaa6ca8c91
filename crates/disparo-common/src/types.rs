//! Common types for Disparo

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for tenants
pub type TenantId = Uuid;

/// Unique identifier for gateway instances
pub type InstanceId = Uuid;

/// Unique identifier for campaigns
pub type CampaignId = Uuid;

/// Unique identifier for message variants
pub type VariantId = Uuid;

/// Unique identifier for contacts
pub type ContactId = Uuid;

/// Unique identifier for campaign contact rows
pub type CampaignContactId = Uuid;

/// Unique identifier for campaign log entries
pub type CampaignLogId = Uuid;

/// Unique identifier for queued jobs
pub type JobId = Uuid;

/// Unique identifier for API keys
pub type ApiKeyId = Uuid;

/// E.164 phone number
///
/// Stored and transmitted with the leading `+`, e.g. `+5511999999999`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Parse a phone number from a string
    ///
    /// Accepts `+` followed by 8 to 15 digits. Spaces, dashes and
    /// parentheses are stripped before validation.
    pub fn parse(s: &str) -> Option<Self> {
        let cleaned: String = s
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
            .collect();

        let digits = cleaned.strip_prefix('+')?;
        if digits.len() < 8 || digits.len() > 15 {
            return None;
        }
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        Some(Self(cleaned))
    }

    /// The number as a string, including the leading `+`
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The number without the leading `+`, as gateways expect it
    pub fn digits(&self) -> &str {
        &self.0[1..]
    }
}

impl std::fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PhoneNumber {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| crate::Error::Validation("Invalid phone number".to_string()))
    }
}

/// Sending schedule for a campaign
///
/// Stored as a JSON document on the campaign row. Window times are
/// `HH:MM` strings in the campaign's timezone; windows are half-open,
/// `start` inclusive and `end` exclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSpec {
    /// IANA timezone name, e.g. `America/Sao_Paulo`
    pub timezone: String,

    /// Exactly seven entries, Monday through Sunday
    pub days: Vec<DaySchedule>,

    /// Dates (`YYYY-MM-DD`) on which no sends happen when
    /// `skip_holidays` is set
    #[serde(default)]
    pub holidays: Vec<chrono::NaiveDate>,

    /// Treat Saturday and Sunday as disabled regardless of their entries
    #[serde(default)]
    pub skip_weekends: bool,

    /// Honor the `holidays` list
    #[serde(default)]
    pub skip_holidays: bool,
}

/// Per-weekday schedule entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaySchedule {
    pub enabled: bool,

    /// Sending windows within the day; empty means closed all day
    #[serde(default)]
    pub windows: Vec<TimeWindow>,
}

/// A `[start, end)` window within a day, times as `HH:MM`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: String,
    pub end: String,
}

impl ScheduleSpec {
    /// A schedule that allows sending at any time, in the given timezone
    pub fn always_open(timezone: impl Into<String>) -> Self {
        Self {
            timezone: timezone.into(),
            days: (0..7)
                .map(|_| DaySchedule {
                    enabled: true,
                    windows: vec![TimeWindow {
                        start: "00:00".to_string(),
                        end: "24:00".to_string(),
                    }],
                })
                .collect(),
            holidays: Vec::new(),
            skip_weekends: false,
            skip_holidays: false,
        }
    }
}

/// Pagination cursor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationCursor {
    pub cursor: Option<String>,
    pub limit: usize,
}

impl Default for PaginationCursor {
    fn default() -> Self {
        Self {
            cursor: None,
            limit: 50,
        }
    }
}

/// Paginated response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub cursor: Option<String>,
    pub has_more: bool,
}

/// Timestamp wrapper
pub type Timestamp = DateTime<Utc>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phone_number_parse() {
        let phone = PhoneNumber::parse("+5511999999999").unwrap();
        assert_eq!(phone.as_str(), "+5511999999999");
        assert_eq!(phone.digits(), "5511999999999");
        assert_eq!(phone.to_string(), "+5511999999999");
    }

    #[test]
    fn test_phone_number_strips_formatting() {
        let phone = PhoneNumber::parse("+55 (11) 99999-9999").unwrap();
        assert_eq!(phone.as_str(), "+5511999999999");
    }

    #[test]
    fn test_phone_number_invalid() {
        assert!(PhoneNumber::parse("5511999999999").is_none());
        assert!(PhoneNumber::parse("+55").is_none());
        assert!(PhoneNumber::parse("+55119999999990000").is_none());
        assert!(PhoneNumber::parse("+55abc9999999").is_none());
    }

    #[test]
    fn test_schedule_spec_roundtrip() {
        let json = r#"{
            "timezone": "America/Sao_Paulo",
            "days": [
                {"enabled": true, "windows": [{"start": "09:00", "end": "12:00"}]},
                {"enabled": true, "windows": [{"start": "09:00", "end": "12:00"}]},
                {"enabled": true, "windows": [{"start": "09:00", "end": "12:00"}]},
                {"enabled": true, "windows": [{"start": "09:00", "end": "12:00"}]},
                {"enabled": true, "windows": [{"start": "09:00", "end": "12:00"}]},
                {"enabled": false, "windows": []},
                {"enabled": false, "windows": []}
            ],
            "holidays": ["2026-12-25"],
            "skip_holidays": true
        }"#;

        let spec: ScheduleSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.timezone, "America/Sao_Paulo");
        assert_eq!(spec.days.len(), 7);
        assert!(spec.skip_holidays);
        assert!(!spec.skip_weekends);
        assert_eq!(spec.holidays.len(), 1);
    }

    #[test]
    fn test_always_open_schedule() {
        let spec = ScheduleSpec::always_open("UTC");
        assert_eq!(spec.days.len(), 7);
        assert!(spec.days.iter().all(|d| d.enabled));
    }
}
