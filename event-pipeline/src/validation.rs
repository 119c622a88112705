use std::io;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::instrument;

use crate::api::ValidationError;

pub const MAX_PAYLOAD_BYTES: usize = 100_000;
pub const MAX_NESTING_DEPTH: usize = 10;
pub const MAX_KIND_LENGTH: usize = 100;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ValidationLimits {
    pub max_payload_bytes: usize,
    pub max_nesting_depth: usize,
    pub max_kind_length: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_payload_bytes: MAX_PAYLOAD_BYTES,
            max_nesting_depth: MAX_NESTING_DEPTH,
            max_kind_length: MAX_KIND_LENGTH,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum FieldType {
    String,
    Number,
    Record,
}

impl FieldType {
    fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Record => "record",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Record => value.is_object(),
        }
    }
}

/// Required top-level fields per exact kind. Kinds not listed have none.
const REQUIRED_FIELDS: &[(&str, &[(&str, FieldType)])] = &[
    (
        "channel.follow",
        &[
            ("user_id", FieldType::String),
            ("broadcaster_user_id", FieldType::String),
        ],
    ),
    (
        "channel.subscribe",
        &[
            ("user_id", FieldType::String),
            ("broadcaster_user_id", FieldType::String),
        ],
    ),
    (
        "channel.subscription.gift",
        &[("broadcaster_user_id", FieldType::String)],
    ),
    (
        "channel.subscription.message",
        &[
            ("user_id", FieldType::String),
            ("broadcaster_user_id", FieldType::String),
        ],
    ),
    (
        "channel.cheer",
        &[
            ("broadcaster_user_id", FieldType::String),
            ("bits", FieldType::Number),
        ],
    ),
    (
        "channel.raid",
        &[
            ("from_broadcaster_user_id", FieldType::String),
            ("to_broadcaster_user_id", FieldType::String),
            ("viewers", FieldType::Number),
        ],
    ),
    (
        "channel.chat.message",
        &[
            ("message_id", FieldType::String),
            ("message", FieldType::Record),
        ],
    ),
    (
        "channel.chat.message_delete",
        &[("message_id", FieldType::String)],
    ),
    ("obs.scene_changed", &[("scene_name", FieldType::String)]),
    ("system.health_check", &[("service", FieldType::String)]),
    ("system.service_started", &[("service", FieldType::String)]),
    ("system.service_stopped", &[("service", FieldType::String)]),
];

/// A payload that passed every validation rule. Only the validator builds
/// these, so holding one proves the checks ran.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPayload(Map<String, Value>);

impl ValidatedPayload {
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

#[derive(Clone, Default)]
pub struct Validator {
    limits: ValidationLimits,
}

impl Validator {
    pub fn new(limits: ValidationLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ValidationLimits {
        &self.limits
    }

    /// Applies the rules in order, the first failure wins. Payload contents
    /// are never logged, only the kind and the rejection code.
    #[instrument(skip_all, fields(kind = %printable_kind(kind)))]
    pub fn validate(
        &self,
        kind: &str,
        payload: Map<String, Value>,
    ) -> Result<ValidatedPayload, ValidationError> {
        let result = self.check(kind, &payload);
        if let Err(err) = &result {
            tracing::warn!(code = err.code(), "rejected event");
        }
        result.map(|_| ValidatedPayload(payload))
    }

    fn check(&self, kind: &str, payload: &Map<String, Value>) -> Result<(), ValidationError> {
        check_kind(kind, self.limits.max_kind_length)?;

        let scan = scan(payload);
        if scan.bytes > self.limits.max_payload_bytes {
            return Err(ValidationError::OversizedPayload {
                size: scan.bytes,
                max: self.limits.max_payload_bytes,
            });
        }
        if let Some(field) = scan.invalid_characters {
            return Err(ValidationError::InvalidCharacters(
                field.escape_default().to_string(),
            ));
        }
        if scan.max_depth > self.limits.max_nesting_depth {
            return Err(ValidationError::ExcessiveNesting {
                max: self.limits.max_nesting_depth,
            });
        }

        check_required_fields(kind, payload)
    }
}

fn check_kind(kind: &str, max_length: usize) -> Result<(), ValidationError> {
    if kind.is_empty() {
        return Err(ValidationError::EmptyKind);
    }
    let length = kind.chars().count();
    if length > max_length {
        return Err(ValidationError::KindTooLong {
            length,
            max: max_length,
        });
    }
    if contains_control_characters(kind) {
        return Err(ValidationError::InvalidCharacters("kind".to_string()));
    }
    Ok(())
}

/// Counts serialized bytes without buffering the payload.
struct ByteCounter(usize);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Compact JSON length of a string or scalar. Containers are never passed
/// here, so the serializer does not recurse.
fn serialized_len<T: Serialize + ?Sized>(value: &T) -> usize {
    let mut counter = ByteCounter(0);
    match serde_json::to_writer(&mut counter, value) {
        Ok(()) => counter.0,
        Err(_) => usize::MAX,
    }
}

/// Brackets plus the commas between `entries` elements.
fn delimiters(entries: usize) -> usize {
    2 + entries.saturating_sub(1)
}

fn object_len(map: &Map<String, Value>) -> usize {
    map.keys().fold(delimiters(map.len()), |total, key| {
        total
            .saturating_add(serialized_len(key.as_str()))
            .saturating_add(1)
    })
}

/// Bytes 0-8, 11-31 and 127. Tab, line feed are allowed, carriage return is not.
fn is_forbidden(c: char) -> bool {
    matches!(c as u32, 0..=8 | 11..=31 | 127)
}

fn contains_control_characters(s: &str) -> bool {
    s.chars().any(is_forbidden)
}

#[derive(Debug, Default)]
struct Scan {
    bytes: usize,
    invalid_characters: Option<String>,
    max_depth: usize,
}

/// Walks the payload with an explicit stack, so a hostile nesting depth
/// cannot exhaust the call stack. Records the compact JSON size, the first
/// field holding control characters and the deepest container level seen.
fn scan(payload: &Map<String, Value>) -> Scan {
    let mut result = Scan {
        bytes: object_len(payload),
        invalid_characters: None,
        max_depth: 1,
    };
    let mut stack: Vec<(String, &Value, usize)> = payload
        .iter()
        .rev()
        .map(|(key, value)| (key.clone(), value, 1))
        .collect();

    result.invalid_characters = payload
        .keys()
        .find(|key| contains_control_characters(key))
        .cloned();

    while let Some((path, value, depth)) = stack.pop() {
        match value {
            Value::Object(map) => {
                result.bytes = result.bytes.saturating_add(object_len(map));
                result.max_depth = result.max_depth.max(depth + 1);
                for (key, child) in map.iter().rev() {
                    let child_path = format!("{path}.{key}");
                    if result.invalid_characters.is_none() && contains_control_characters(key) {
                        result.invalid_characters = Some(child_path.clone());
                    }
                    stack.push((child_path, child, depth + 1));
                }
            }
            Value::Array(items) => {
                result.bytes = result.bytes.saturating_add(delimiters(items.len()));
                result.max_depth = result.max_depth.max(depth + 1);
                for (index, child) in items.iter().enumerate().rev() {
                    stack.push((format!("{path}[{index}]"), child, depth + 1));
                }
            }
            scalar => {
                result.bytes = result.bytes.saturating_add(serialized_len(scalar));
                if let Value::String(s) = scalar {
                    if result.invalid_characters.is_none() && contains_control_characters(s) {
                        result.invalid_characters = Some(path);
                    }
                }
            }
        }
    }

    result
}

fn check_required_fields(kind: &str, payload: &Map<String, Value>) -> Result<(), ValidationError> {
    let Some((_, fields)) = REQUIRED_FIELDS.iter().find(|(k, _)| *k == kind) else {
        return Ok(());
    };

    for (field, expected) in fields.iter() {
        match payload.get(*field) {
            None | Some(Value::Null) => {
                return Err(ValidationError::MissingRequiredField {
                    kind: kind.to_string(),
                    field: field.to_string(),
                })
            }
            Some(value) if !expected.matches(value) => {
                return Err(ValidationError::InvalidFieldType {
                    kind: kind.to_string(),
                    field: field.to_string(),
                    expected: expected.name(),
                })
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Kinds are echoed in logs, so control characters are escaped first.
pub fn printable_kind(kind: &str) -> String {
    kind.escape_default().take(MAX_KIND_LENGTH * 2).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test payload must be an object"),
        }
    }

    fn nested(depth: usize) -> Value {
        let mut value = json!("leaf");
        for _ in 0..depth {
            value = json!({ "inner": value });
        }
        value
    }

    #[test]
    fn accepts_a_follow() {
        let validated = Validator::default()
            .validate(
                "channel.follow",
                payload(json!({"user_id": "123", "user_login": "ada", "broadcaster_user_id": "456"})),
            )
            .expect("follow should validate");
        assert_eq!(validated.as_map()["user_login"], json!("ada"));
    }

    #[test]
    fn rejects_bad_kinds() {
        let validator = Validator::default();
        assert_eq!(
            validator.validate("", Map::new()),
            Err(ValidationError::EmptyKind)
        );
        assert_eq!(
            validator.validate(&"a".repeat(101), Map::new()),
            Err(ValidationError::KindTooLong {
                length: 101,
                max: 100
            })
        );
        assert_eq!(
            validator.validate("channel\u{0}.follow", Map::new()),
            Err(ValidationError::InvalidCharacters("kind".to_string()))
        );
    }

    #[test]
    fn rejects_oversized_payloads() {
        let result = Validator::default().validate(
            "channel.chat.message",
            payload(json!({"message_id": "m1", "message": {"text": "x".repeat(101_000)}})),
        );
        assert!(matches!(
            result,
            Err(ValidationError::OversizedPayload { max: 100_000, .. })
        ));
    }

    #[test]
    fn size_is_checked_before_characters() {
        let result = Validator::default().validate(
            "channel.follow",
            payload(json!({"text": format!("\u{0}{}", "x".repeat(100_000))})),
        );
        assert!(matches!(
            result,
            Err(ValidationError::OversizedPayload { .. })
        ));
    }

    #[test]
    fn size_matches_compact_json() {
        let value = payload(json!({
            "text": "quote \" slash \\ tab\t é 🎉",
            "escaped\nkey": [1, -2, 3.5, 1e300, true, false, null],
            "empty": {"list": [], "record": {}},
            "nested": [{"a": "b", "c": [[]]}, "x"],
        }));
        let expected = serde_json::to_vec(&value).unwrap().len();
        assert_eq!(scan(&value).bytes, expected);
        assert_eq!(scan(&Map::new()).bytes, 2);
    }

    #[test]
    fn rejects_very_deep_payloads_without_recursing() {
        let mut list = json!("leaf");
        for _ in 0..2000 {
            list = Value::Array(vec![list]);
        }
        assert_eq!(
            Validator::default().validate("chat.anything", payload(json!({ "a": list }))),
            Err(ValidationError::ExcessiveNesting { max: 10 })
        );
    }

    #[test]
    fn rejects_control_characters_with_their_path() {
        let validator = Validator::default();
        for (value, field) in [
            (json!({"text": "a\u{0}b"}), "text"),
            (json!({"message": {"text": "bell\u{7}"}}), "message.text"),
            (json!({"fragments": [{"text": "ok"}, {"text": "esc\u{1b}"}]}), "fragments[1].text"),
            (json!({"del": "\u{7f}"}), "del"),
            (json!({"bad\u{1}key": "fine"}), "bad\\u{1}key"),
        ] {
            assert_eq!(
                validator.validate("chat.anything", payload(value)),
                Err(ValidationError::InvalidCharacters(field.to_string()))
            );
        }
    }

    #[test]
    fn allows_tabs_and_newlines() {
        Validator::default()
            .validate("chat.anything", payload(json!({"text": "line one\n\tline two"})))
            .expect("tab and newline are allowed");
    }

    #[test]
    fn rejects_deep_nesting() {
        let validator = Validator::default();
        // The payload itself is level one, so nine nested records reach the limit.
        validator
            .validate("chat.anything", payload(json!({ "a": nested(9) })))
            .expect("ten levels are allowed");
        assert_eq!(
            validator.validate("chat.anything", payload(json!({ "a": nested(10) }))),
            Err(ValidationError::ExcessiveNesting { max: 10 })
        );

        let mut list = json!(1);
        for _ in 0..12 {
            list = json!([list]);
        }
        assert_eq!(
            validator.validate("chat.anything", payload(json!({ "a": list }))),
            Err(ValidationError::ExcessiveNesting { max: 10 })
        );
    }

    #[test]
    fn checks_required_fields() {
        let validator = Validator::default();
        assert_eq!(
            validator.validate(
                "channel.follow",
                payload(json!({"user_id": "123", "broadcaster_user_id": null}))
            ),
            Err(ValidationError::MissingRequiredField {
                kind: "channel.follow".to_string(),
                field: "broadcaster_user_id".to_string(),
            })
        );
        assert_eq!(
            validator.validate(
                "channel.follow",
                payload(json!({"user_id": 123, "broadcaster_user_id": "456"}))
            ),
            Err(ValidationError::InvalidFieldType {
                kind: "channel.follow".to_string(),
                field: "user_id".to_string(),
                expected: "string",
            })
        );
        assert_eq!(
            validator.validate(
                "channel.cheer",
                payload(json!({"broadcaster_user_id": "1", "bits": "100"}))
            ),
            Err(ValidationError::InvalidFieldType {
                kind: "channel.cheer".to_string(),
                field: "bits".to_string(),
                expected: "number",
            })
        );
    }

    #[test]
    fn unknown_kinds_have_no_required_fields() {
        Validator::default()
            .validate("foo.bar.unrecognized", Map::new())
            .expect("unknown kinds only get the generic checks");
    }

    #[test]
    fn respects_custom_limits() {
        let validator = Validator::new(ValidationLimits {
            max_payload_bytes: 32,
            max_nesting_depth: 2,
            max_kind_length: 8,
        });
        assert!(matches!(
            validator.validate("chat.msg", payload(json!({"text": "x".repeat(40)}))),
            Err(ValidationError::OversizedPayload { max: 32, .. })
        ));
        assert_eq!(
            validator.validate("chat.msg", payload(json!({"a": {"b": {}}}))),
            Err(ValidationError::ExcessiveNesting { max: 2 })
        );
    }

    #[test]
    fn printable_kind_escapes_control_characters() {
        assert_eq!(printable_kind("chat\u{0}x"), "chat\\u{0}x");
    }
}
