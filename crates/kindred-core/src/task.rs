use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::datetime::{lenient_text, parse_clock_time, parse_task_day, parse_task_instant};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "u8", into = "u8")]
pub enum Priority {
    Low = 1,
    Medium = 2,
    High = 3,
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Low),
            2 => Ok(Self::Medium),
            3 => Ok(Self::High),
            other => Err(format!("priority must be 1, 2 or 3, got {other}")),
        }
    }
}

impl From<Priority> for u8 {
    fn from(value: Priority) -> Self {
        value as u8
    }
}

/// A task record as served by the backend. Date fields stay as raw text
/// and are parsed on demand, so a malformed value only blanks that field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    #[serde(alias = "_id")]
    pub id: String,

    #[serde(default)]
    pub content: String,

    #[serde(default)]
    pub value: f64,

    pub priority: Priority,

    #[serde(rename = "categoryID", default)]
    pub category_id: String,

    #[serde(rename = "startDate", default, with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,

    #[serde(rename = "startTime", default, with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,

    #[serde(default, with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,

    #[serde(default)]
    pub public: bool,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Task {
    pub fn new(id: impl Into<String>, content: impl Into<String>, priority: Priority) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            value: 0.0,
            priority,
            category_id: String::new(),
            start_date: None,
            start_time: None,
            deadline: None,
            public: false,
            extra: BTreeMap::new(),
        }
    }

    pub fn start_instant(&self, tz: &Tz) -> Option<DateTime<Utc>> {
        self.start_date.as_deref().and_then(|raw| parse_task_instant(raw, tz))
    }

    pub fn deadline_instant(&self, tz: &Tz) -> Option<DateTime<Utc>> {
        self.deadline.as_deref().and_then(|raw| parse_task_instant(raw, tz))
    }

    pub fn start_day(&self, tz: &Tz) -> Option<NaiveDate> {
        self.start_date.as_deref().and_then(|raw| parse_task_day(raw, tz))
    }

    pub fn deadline_day(&self, tz: &Tz) -> Option<NaiveDate> {
        self.deadline.as_deref().and_then(|raw| parse_task_day(raw, tz))
    }

    /// True when an explicit start time was set. The clock value does not
    /// have to parse; only its presence matters for bucketing.
    pub fn has_start_time(&self) -> bool {
        self.start_time
            .as_deref()
            .is_some_and(|raw| !raw.trim().is_empty())
    }

    /// Wall-clock start in `tz`, for display and ordering inside a day.
    pub fn start_clock(&self, tz: &Tz) -> Option<NaiveTime> {
        let raw = self.start_time.as_deref()?.trim();
        if let Some(instant) = parse_task_instant(raw, tz) {
            let local = instant.with_timezone(tz);
            return NaiveTime::from_hms_opt(local.hour(), local.minute(), 0);
        }
        let (hour, minute) = parse_clock_time(raw)?;
        NaiveTime::from_hms_opt(hour, minute, 0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveTime;

    use super::{Priority, Task};

    #[test]
    fn decodes_backend_payload_and_keeps_unknown_fields() {
        let raw = r#"{
            "_id": "665f1c",
            "content": "Stretch",
            "value": 3.5,
            "priority": 2,
            "categoryID": "cat-1",
            "startDate": "2024-06-10T00:00:00Z",
            "startTime": null,
            "deadline": 17,
            "public": true,
            "recurring": false,
            "notes": "slowly"
        }"#;
        let task: Task = serde_json::from_str(raw).expect("decode task");
        assert_eq!(task.id, "665f1c");
        assert_eq!(task.priority, Priority::Medium);
        assert_eq!(task.category_id, "cat-1");
        assert_eq!(task.start_date.as_deref(), Some("2024-06-10T00:00:00Z"));
        assert!(task.start_time.is_none());
        assert!(task.deadline.is_none(), "non-string deadline is absent");
        assert_eq!(task.extra.get("notes"), Some(&serde_json::json!("slowly")));

        let encoded = serde_json::to_value(&task).expect("encode task");
        assert_eq!(encoded["categoryID"], "cat-1");
        assert_eq!(encoded["recurring"], false);
        assert!(encoded.get("deadline").is_none());
    }

    #[test]
    fn rejects_out_of_range_priority() {
        let raw = r#"{"id": "x", "priority": 7}"#;
        assert!(serde_json::from_str::<Task>(raw).is_err());
    }

    #[test]
    fn start_time_presence_and_clock() {
        let tz: chrono_tz::Tz = "Europe/Madrid".parse().expect("tz");
        let mut task = Task::new("t", "Run", Priority::Low);
        assert!(!task.has_start_time());

        task.start_time = Some("  ".to_string());
        assert!(!task.has_start_time());

        task.start_time = Some("09:30".to_string());
        assert!(task.has_start_time());
        assert_eq!(task.start_clock(&tz), NaiveTime::from_hms_opt(9, 30, 0));

        task.start_time = Some("2024-06-10T07:15:00Z".to_string());
        assert_eq!(task.start_clock(&tz), NaiveTime::from_hms_opt(9, 15, 0));

        task.start_time = Some("whenever".to_string());
        assert!(task.has_start_time());
        assert!(task.start_clock(&tz).is_none());
    }
}
