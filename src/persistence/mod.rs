use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod ttl;
pub mod wal;

/// A stored value with an optional absolute expiration time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    pub key: String,
}

impl Record {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            expiration_time: None,
            value: value.into(),
            key: key.into(),
        }
    }

    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expiration_time = Some(at);
        self
    }

    /// Expires `ttl` from now. Negative durations produce an already expired record.
    pub fn expiring_in(self, ttl: chrono::Duration) -> Self {
        self.expiring_at(Utc::now() + ttl)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration_time.is_some_and(|at| at < now)
    }

    fn tombstone(key: &str) -> Self {
        Self {
            expiration_time: None,
            value: String::new(),
            key: key.to_string(),
        }
    }
}

/// Kind of mutation carried by an [`Event`], stored as `0` (set) or `1` (delete).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Action {
    Set,
    Delete,
}

impl From<Action> for u8 {
    fn from(action: Action) -> Self {
        match action {
            Action::Set => 0,
            Action::Delete => 1,
        }
    }
}

impl TryFrom<u8> for Action {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Action::Set),
            1 => Ok(Action::Delete),
            other => Err(format!("unknown action {}", other)),
        }
    }
}

/// One line of the write-ahead log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub record: Record,
    pub action: Action,
}

impl Event {
    pub fn set(record: Record) -> Self {
        Self {
            record,
            action: Action::Set,
        }
    }

    pub fn delete(key: &str) -> Self {
        Self {
            record: Record::tombstone(key),
            action: Action::Delete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn set_event_line_shape() {
        let at = Utc.with_ymd_and_hms(2059, 1, 1, 1, 1, 1).unwrap();
        let event = Event::set(Record::new("key3", "value3").expiring_at(at));

        let line = serde_json::to_string(&event).unwrap();
        assert_eq!(
            line,
            r#"{"record":{"expiration_time":"2059-01-01T01:01:01Z","value":"value3","key":"key3"},"action":0}"#
        );
    }

    #[test]
    fn tombstone_omits_value() {
        let line = serde_json::to_string(&Event::delete("key1")).unwrap();
        assert_eq!(line, r#"{"record":{"key":"key1"},"action":1}"#);
    }

    #[test]
    fn unknown_action_is_rejected() {
        let parsed = serde_json::from_str::<Event>(r#"{"record":{"key":"k"},"action":7}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn expiry_check_is_strict() {
        let at = Utc.with_ymd_and_hms(2030, 6, 1, 0, 0, 0).unwrap();
        let record = Record::new("k", "v").expiring_at(at);

        assert!(!record.is_expired_at(at));
        assert!(record.is_expired_at(at + chrono::Duration::milliseconds(1)));
        assert!(!Record::new("k", "v").is_expired_at(at));
    }
}
