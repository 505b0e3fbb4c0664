//! Property-based tests for inbound normalization.
//!
//! Normalization sits on the hot path for every broadcast and must treat any
//! alias spelling identically. It must never panic on hostile input.

use chrono::{DateTime, Utc};
use proptest::prelude::*;
use rxchat_proto::{Destination, Topic, normalize_message};
use serde_json::{Map, Value, json};

fn arbitrary_instant() -> impl Strategy<Value = DateTime<Utc>> {
    // 2001-09-09 .. 2033-05-18, millisecond precision
    (1_000_000_000_000i64..2_000_000_000_000i64)
        .prop_map(|ms| DateTime::from_timestamp_millis(ms).unwrap_or_default())
}

fn arbitrary_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        any::<f64>().prop_map(|f| json!(f)),
        ".{0,12}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map(
                prop_oneof![
                    Just("id".to_string()),
                    Just("senderId".to_string()),
                    Just("timestamp".to_string()),
                    Just("content".to_string()),
                    Just("metadata".to_string()),
                    "[a-z]{1,6}",
                ],
                inner,
                0..6
            )
            .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn alias_spelling_does_not_change_result(
        id in 1u64..1_000_000,
        sender in 1u64..10_000,
        content in "[a-zA-Z0-9 ?!]{0,40}",
        at in arbitrary_instant(),
        id_alias in prop::sample::select(vec!["id", "messageId"]),
        sender_alias in prop::sample::select(vec!["senderId", "sender", "fromUserId", "authorId"]),
        content_alias in prop::sample::select(vec!["content", "text", "message"]),
        ts_alias in prop::sample::select(vec!["timestamp", "time", "sentAt", "createdAt", "updatedAt"]),
        ts_as_millis in any::<bool>(),
    ) {
        let canonical = json!({
            "id": id,
            "senderId": sender,
            "content": content,
            "timestamp": at.to_rfc3339(),
        });

        let mut aliased = Map::new();
        aliased.insert(id_alias.to_string(), json!(id.to_string()));
        aliased.insert(sender_alias.to_string(), json!(sender));
        aliased.insert(content_alias.to_string(), json!(content));
        let ts = if ts_as_millis { json!(at.timestamp_millis()) } else { json!(at.to_rfc3339()) };
        aliased.insert(ts_alias.to_string(), ts);

        let a = normalize_message(&canonical).unwrap();
        let b = normalize_message(&Value::Object(aliased)).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn normalization_never_panics(raw in arbitrary_json()) {
        let _ = normalize_message(&raw);
    }

    #[test]
    fn topic_and_destination_paths_parse_back(thread in any::<u64>()) {
        for topic in [Topic::messages(thread), Topic::typing(thread), Topic::presence(thread)] {
            prop_assert_eq!(topic.to_string().parse::<Topic>().unwrap(), topic);
        }
        for dest in [
            Destination::Send(thread),
            Destination::Typing(thread),
            Destination::Join(thread),
            Destination::Leave(thread),
        ] {
            prop_assert_eq!(dest.to_string().parse::<Destination>().unwrap(), dest);
        }
    }
}
