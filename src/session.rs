use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

/// Label shown for sessions that carry no topic.
pub const NO_TOPIC: &str = "Sin tema";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Other,
}

impl Role {
    fn from_label(label: &str) -> Self {
        match label {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            "system" => Role::System,
            _ => Role::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default = "other_role", deserialize_with = "lenient_role")]
    pub role: Role,
    #[serde(default, deserialize_with = "lenient_string")]
    pub content: String,
    #[serde(default, deserialize_with = "lenient_count")]
    pub tokens: u64,
    /// Unix seconds.
    #[serde(default, deserialize_with = "lenient_unix")]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_topic")]
    pub topic: Option<String>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub success: bool,
    #[serde(default, deserialize_with = "lenient_history")]
    pub history: Vec<Message>,
}

impl Session {
    pub fn topic_label(&self) -> &str {
        self.topic.as_deref().unwrap_or(NO_TOPIC)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default, deserialize_with = "lenient_optional_string")]
    pub nickname: Option<String>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub session_count: u64,
}

/// Decodes a fetched sessions array. Entries that are not objects are dropped.
pub fn decode_sessions(items: Vec<Value>) -> Vec<Session> {
    decode_records(items, "session")
}

pub fn decode_users(items: Vec<Value>) -> Vec<User> {
    decode_records(items, "user")
}

fn decode_records<T: for<'de> Deserialize<'de>>(items: Vec<Value>, kind: &str) -> Vec<T> {
    items
        .into_iter()
        .enumerate()
        .filter_map(|(idx, item)| {
            if !item.is_object() {
                warn!(kind, idx, "dropping non-object record");
                return None;
            }
            match serde_json::from_value(item) {
                Ok(rec) => Some(rec),
                Err(err) => {
                    warn!(kind, idx, error = %err, "dropping undecodable record");
                    None
                }
            }
        })
        .collect()
}

/// Accepts RFC 3339, naive date-times (read as UTC) and bare dates.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn other_role() -> Role {
    Role::Other
}

fn lenient_role<'de, D: Deserializer<'de>>(d: D) -> Result<Role, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => Role::from_label(&s),
        _ => Role::Other,
    })
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

fn lenient_optional_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

fn lenient_topic<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(lenient_optional_string(d)?.filter(|t| !t.is_empty()))
}

fn lenient_bool<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(matches!(Value::deserialize(d)?, Value::Bool(true)))
}

fn lenient_count<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    let v = Value::deserialize(d)?;
    Ok(v.as_u64()
        .or_else(|| {
            v.as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                .map(|f| f as u64)
        })
        .unwrap_or(0))
}

fn lenient_unix<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    let v = Value::deserialize(d)?;
    Ok(v.as_i64().or_else(|| v.as_f64().map(|f| f.floor() as i64)))
}

fn lenient_datetime<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => parse_timestamp(&s),
        // numeric values are epoch milliseconds
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    })
}

fn lenient_history<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Message>, D::Error> {
    let Value::Array(items) = Value::deserialize(d)? else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .filter(Value::is_object)
        .filter_map(|m| serde_json::from_value(m).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_complete_session() {
        let s: Session = serde_json::from_value(json!({
            "id": "abc",
            "topic": "Motos",
            "created_at": "2024-03-01T10:15:00Z",
            "success": true,
            "history": [
                {"role": "user", "content": "hola", "tokens": 12, "timestamp": 1709288100},
                {"role": "assistant", "content": "buenas", "tokens": 30}
            ]
        }))
        .unwrap();
        assert_eq!(s.id, "abc");
        assert_eq!(s.topic_label(), "Motos");
        assert!(s.success);
        assert_eq!(s.created_at.unwrap().to_rfc3339(), "2024-03-01T10:15:00+00:00");
        assert_eq!(s.history.len(), 2);
        assert_eq!(s.history[0].role, Role::User);
        assert_eq!(s.history[0].timestamp, Some(1709288100));
        assert_eq!(s.history[1].timestamp, None);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let s: Session = serde_json::from_value(json!({"id": 7, "topic": null})).unwrap();
        assert_eq!(s.id, "7");
        assert_eq!(s.topic, None);
        assert_eq!(s.topic_label(), NO_TOPIC);
        assert!(!s.success);
        assert!(s.created_at.is_none());
        assert!(s.history.is_empty());

        let s: Session = serde_json::from_value(json!({"topic": "", "success": "yes", "history": "oops"})).unwrap();
        assert_eq!(s.topic, None);
        assert!(!s.success);
        assert!(s.history.is_empty());
    }

    #[test]
    fn malformed_messages_are_dropped_or_defaulted() {
        let s: Session = serde_json::from_value(json!({
            "id": "x",
            "history": [
                42,
                {"role": "tool", "content": null, "tokens": -3},
                {"role": "assistant", "content": "ok", "tokens": "many"}
            ]
        }))
        .unwrap();
        assert_eq!(s.history.len(), 2);
        assert_eq!(s.history[0].role, Role::Other);
        assert_eq!(s.history[0].content, "");
        assert_eq!(s.history[0].tokens, 0);
        assert_eq!(s.history[1].tokens, 0);
    }

    #[test]
    fn timestamp_formats() {
        let naive = parse_timestamp("2024-05-02T23:59:59.123").unwrap();
        assert_eq!(naive.format("%Y-%m-%d %H:%M:%S").to_string(), "2024-05-02 23:59:59");
        let spaced = parse_timestamp("2024-05-02 08:00:00").unwrap();
        assert_eq!(spaced.format("%H").to_string(), "08");
        let offset = parse_timestamp("2024-05-02T01:00:00+02:00").unwrap();
        assert_eq!(offset.format("%Y-%m-%d %H").to_string(), "2024-05-01 23");
        let date = parse_timestamp("2024-05-02").unwrap();
        assert_eq!(date.format("%H:%M").to_string(), "00:00");
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn decode_drops_non_objects() {
        let sessions = decode_sessions(vec![json!({"id": "a"}), json!([1, 2]), json!("b")]);
        assert_eq!(sessions.len(), 1);
        let users = decode_users(vec![json!({"nickname": "ana", "session_count": 4}), json!({})]);
        assert_eq!(users[0].nickname.as_deref(), Some("ana"));
        assert_eq!(users[0].session_count, 4);
        assert_eq!(users[1].nickname, None);
        assert_eq!(users[1].session_count, 0);
    }
}
