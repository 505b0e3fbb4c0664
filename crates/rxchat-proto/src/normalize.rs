//! Inbound message normalization.
//!
//! Message broadcasts come from several backend generations that disagree on
//! field names and timestamp encodings. Each canonical field is resolved from
//! an ordered alias list; the first present, non-null alias wins.
//!
//! | Field       | Aliases                                                   |
//! |-------------|-----------------------------------------------------------|
//! | id          | `id`, `messageId`                                         |
//! | thread      | `chatId`, `chatRoomId`, `threadId`, `conversationId`      |
//! | content     | `content`, `text`, `message`                              |
//! | sender      | `senderId`, `sender`, `fromUserId`, `authorId`            |
//! | sender name | `senderName`, `senderDisplayName`, `authorName`           |
//! | timestamp   | `timestamp`, `time`, `sentAt`, `createdAt`, `updatedAt`   |
//!
//! Timestamps are accepted as RFC 3339 strings, zone-less ISO date-times
//! (taken as UTC), epoch seconds or milliseconds, and `[y, m, d, h, min, s,
//! nanos]` arrays as emitted by Jackson for `LocalDateTime`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Number, Value};

use crate::{ProtocolError, Result, ThreadId, UserId};

const ID_FIELDS: &[&str] = &["id", "messageId"];
const THREAD_FIELDS: &[&str] = &["chatId", "chatRoomId", "threadId", "conversationId"];
const CONTENT_FIELDS: &[&str] = &["content", "text", "message"];
const SENDER_FIELDS: &[&str] = &["senderId", "sender", "fromUserId", "authorId"];
const SENDER_NAME_FIELDS: &[&str] = &["senderName", "senderDisplayName", "authorName"];
const TIMESTAMP_FIELDS: &[&str] = &["timestamp", "time", "sentAt", "createdAt", "updatedAt"];

/// Epoch values at or above this magnitude are milliseconds, below it seconds.
///
/// 10^11 seconds is year 5138; 10^11 milliseconds is March 1973.
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Canonical form of a confirmed message broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedMessage {
    /// Server-issued message id
    pub id: String,
    /// Owning thread, if the body names one
    pub thread_id: Option<ThreadId>,
    /// Author
    pub sender_id: UserId,
    /// Author display name, if present
    pub sender_name: Option<String>,
    /// Message text. Empty for attachment-only messages.
    pub content: String,
    /// Logical send time
    pub timestamp: DateTime<Utc>,
    /// Attachment references and other opaque data
    pub metadata: Map<String, Value>,
}

/// Resolve a raw message body into a [`NormalizedMessage`].
///
/// # Errors
///
/// - `ProtocolError::MissingField` if id, sender, or timestamp is absent
/// - `ProtocolError::InvalidField` if a present field has the wrong type
pub fn normalize_message(raw: &Value) -> Result<NormalizedMessage> {
    let Some(obj) = raw.as_object() else {
        return Err(ProtocolError::InvalidField {
            field: "message",
            reason: "expected a JSON object".to_string(),
        });
    };

    let id = match first(obj, ID_FIELDS) {
        None => return Err(ProtocolError::MissingField("id")),
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => return Err(invalid("id", other)),
    };

    let thread_id = match first(obj, THREAD_FIELDS) {
        None => None,
        Some(v) => Some(coerce_id(v).ok_or_else(|| invalid("thread", v))?),
    };

    let sender_id = match first(obj, SENDER_FIELDS) {
        None => return Err(ProtocolError::MissingField("sender")),
        Some(v) => coerce_id(v).ok_or_else(|| invalid("sender", v))?,
    };

    let content = match first(obj, CONTENT_FIELDS) {
        None => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => return Err(invalid("content", other)),
    };

    let timestamp = match first(obj, TIMESTAMP_FIELDS) {
        None => return Err(ProtocolError::MissingField("timestamp")),
        Some(v) => parse_timestamp(v)?,
    };

    let sender_name = first(obj, SENDER_NAME_FIELDS).and_then(Value::as_str).map(str::to_string);

    let metadata = match obj.get("metadata") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(other) => return Err(invalid("metadata", other)),
    };

    Ok(NormalizedMessage { id, thread_id, sender_id, sender_name, content, timestamp, metadata })
}

/// Coerce any accepted timestamp encoding into a UTC instant.
///
/// # Errors
///
/// - `ProtocolError::InvalidField` if the value matches no accepted encoding or
///   names an instant outside the representable range
pub fn parse_timestamp(value: &Value) -> Result<DateTime<Utc>> {
    let parsed = match value {
        Value::String(s) => parse_timestamp_str(s.trim()),
        Value::Number(n) => from_epoch_number(n),
        Value::Array(parts) => from_date_parts(parts),
        _ => None,
    };

    parsed.ok_or_else(|| invalid("timestamp", value))
}

/// Ids arrive as JSON numbers or numeric strings.
pub(crate) fn coerce_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn first<'a>(obj: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases.iter().filter_map(|name| obj.get(*name)).find(|v| !v.is_null())
}

fn invalid(field: &'static str, value: &Value) -> ProtocolError {
    ProtocolError::InvalidField { field, reason: format!("unusable value {value}") }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }

    s.parse::<i64>().ok().and_then(from_epoch)
}

fn from_epoch_number(n: &Number) -> Option<DateTime<Utc>> {
    if let Some(i) = n.as_i64() {
        return from_epoch(i);
    }

    let f = n.as_f64()?;
    if !f.is_finite() {
        return None;
    }
    let millis = if f.abs() >= MILLIS_THRESHOLD as f64 { f } else { f * 1000.0 };
    DateTime::from_timestamp_millis(millis.round() as i64)
}

fn from_epoch(value: i64) -> Option<DateTime<Utc>> {
    if value.unsigned_abs() >= MILLIS_THRESHOLD.unsigned_abs() {
        DateTime::from_timestamp_millis(value)
    } else {
        DateTime::from_timestamp(value, 0)
    }
}

fn from_date_parts(parts: &[Value]) -> Option<DateTime<Utc>> {
    if !(3..=7).contains(&parts.len()) {
        return None;
    }

    let mut fields = [0i64; 7];
    for (slot, part) in fields.iter_mut().zip(parts) {
        *slot = part.as_i64()?;
    }
    let [year, month, day, hour, minute, second, nanos] = fields;

    let date = NaiveDate::from_ymd_opt(
        i32::try_from(year).ok()?,
        u32::try_from(month).ok()?,
        u32::try_from(day).ok()?,
    )?;
    let time = date.and_hms_nano_opt(
        u32::try_from(hour).ok()?,
        u32::try_from(minute).ok()?,
        u32::try_from(second).ok()?,
        u32::try_from(nanos).ok()?,
    )?;

    Some(time.and_utc())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn canonical_fields() {
        let msg = normalize_message(&json!({
            "id": "m-1",
            "chatId": 3,
            "content": "hello",
            "senderId": 9,
            "senderName": "Dana",
            "timestamp": "2025-03-01T10:00:00Z",
            "metadata": {"attachment": "rx.png"}
        }))
        .unwrap();

        assert_eq!(msg.id, "m-1");
        assert_eq!(msg.thread_id, Some(3));
        assert_eq!(msg.content, "hello");
        assert_eq!(msg.sender_id, 9);
        assert_eq!(msg.sender_name.as_deref(), Some("Dana"));
        assert_eq!(msg.timestamp, utc(2025, 3, 1, 10, 0, 0));
        assert_eq!(msg.metadata.get("attachment"), Some(&json!("rx.png")));
    }

    #[test]
    fn alias_fields() {
        let msg = normalize_message(&json!({
            "messageId": 55,
            "chatRoomId": "4",
            "text": "refill ready",
            "fromUserId": "21",
            "createdAt": "2025-03-01T10:00:05"
        }))
        .unwrap();

        assert_eq!(msg.id, "55");
        assert_eq!(msg.thread_id, Some(4));
        assert_eq!(msg.content, "refill ready");
        assert_eq!(msg.sender_id, 21);
        assert_eq!(msg.timestamp, utc(2025, 3, 1, 10, 0, 5));
        assert!(msg.metadata.is_empty());
    }

    #[test]
    fn earlier_alias_wins_and_nulls_are_skipped() {
        let msg = normalize_message(&json!({
            "id": null,
            "messageId": "x",
            "content": "first",
            "text": "second",
            "senderId": 1,
            "timestamp": null,
            "time": 1_700_000_000
        }))
        .unwrap();

        assert_eq!(msg.id, "x");
        assert_eq!(msg.content, "first");
        assert_eq!(msg.timestamp, DateTime::from_timestamp(1_700_000_000, 0).unwrap());
    }

    #[test]
    fn missing_content_defaults_to_empty() {
        let msg = normalize_message(&json!({
            "id": 1, "senderId": 1, "timestamp": "2025-01-01T00:00:00Z",
            "metadata": {"attachment": "a.pdf"}
        }))
        .unwrap();
        assert_eq!(msg.content, "");
    }

    #[test]
    fn missing_required_fields() {
        let base = json!({"id": 1, "senderId": 2, "timestamp": "2025-01-01T00:00:00Z"});

        for (field, expected) in [("id", "id"), ("senderId", "sender"), ("timestamp", "timestamp")] {
            let mut raw = base.clone();
            raw.as_object_mut().unwrap().remove(field);
            assert_eq!(normalize_message(&raw), Err(ProtocolError::MissingField(expected)));
        }
    }

    #[test]
    fn invalid_fields() {
        assert!(matches!(
            normalize_message(&json!({"id": 1, "senderId": "abc", "timestamp": 0})),
            Err(ProtocolError::InvalidField { field: "sender", .. })
        ));
        assert!(matches!(
            normalize_message(&json!({"id": 1, "senderId": 1, "timestamp": "yesterday"})),
            Err(ProtocolError::InvalidField { field: "timestamp", .. })
        ));
        assert!(matches!(
            normalize_message(&json!({"id": {}, "senderId": 1, "timestamp": 0})),
            Err(ProtocolError::InvalidField { field: "id", .. })
        ));
        assert!(normalize_message(&json!("just a string")).is_err());
    }

    #[test]
    fn timestamp_encodings() {
        let expected = utc(2025, 3, 1, 10, 0, 0);

        for raw in [
            json!("2025-03-01T10:00:00Z"),
            json!("2025-03-01T12:00:00+02:00"),
            json!("2025-03-01T10:00:00"),
            json!("2025-03-01T10:00:00.000"),
            json!("2025-03-01 10:00:00"),
            json!(expected.timestamp()),
            json!(expected.timestamp_millis()),
            json!(expected.timestamp_millis().to_string()),
            json!([2025, 3, 1, 10, 0, 0]),
            json!([2025, 3, 1, 10, 0, 0, 0]),
        ] {
            assert_eq!(parse_timestamp(&raw).unwrap(), expected, "{raw}");
        }
    }

    #[test]
    fn sub_second_precision_survives() {
        let ts = parse_timestamp(&json!("2025-03-01T10:00:00.250Z")).unwrap();
        assert_eq!(ts.timestamp_subsec_millis(), 250);

        let ts = parse_timestamp(&json!([2025, 3, 1, 10, 0, 0, 250_000_000])).unwrap();
        assert_eq!(ts.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn rejects_impossible_dates() {
        assert!(parse_timestamp(&json!([2025, 2, 30, 0, 0, 0])).is_err());
        assert!(parse_timestamp(&json!([2025, 2])).is_err());
        assert!(parse_timestamp(&json!(true)).is_err());
    }
}
