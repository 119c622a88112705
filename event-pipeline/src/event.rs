use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Keys every canonical event carries. Producer fields landing on one of
/// these names are dropped during normalization.
pub const CORE_FIELDS: [&str; 5] = ["id", "type", "source", "timestamp", "correlation_id"];

/// Logical producer category, always derived from the event kind.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    Chat,
    Broadcast,
    Telemetry,
    Music,
    System,
    InternalStream,
}

impl Source {
    pub const ALL: [Source; 6] = [
        Source::Chat,
        Source::Broadcast,
        Source::Telemetry,
        Source::Music,
        Source::System,
        Source::InternalStream,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Chat => "chat",
            Source::Broadcast => "broadcast",
            Source::Telemetry => "telemetry",
            Source::Music => "music",
            Source::System => "system",
            Source::InternalStream => "internal-stream",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Source::ALL
            .into_iter()
            .find(|source| source.as_str() == s)
            .ok_or_else(|| format!("Unknown source: {s}"))
    }
}

/// A single JSON scalar. `Null` is kept so that producers can explicitly
/// clear a field downstream.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
}

/// Element of a list field: a scalar, or a one-level record of scalars.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ListItem {
    Scalar(Scalar),
    Record(BTreeMap<String, Scalar>),
}

/// Value of a kind-specific field on a canonical event. The type has no room
/// for nested maps, which is what keeps canonical events flat.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Scalar(Scalar),
    List(Vec<ListItem>),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Scalar(Scalar::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Scalar(Scalar::String(value.to_string()))
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Scalar(Scalar::String(value))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CanonicalEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub source: Source,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub correlation_id: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl CanonicalEvent {
    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Event,
}

/// What subscribers receive: the canonical event tagged as an event message.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EventEnvelope {
    pub message_kind: MessageKind,
    pub payload: CanonicalEvent,
}

impl EventEnvelope {
    pub fn event(payload: CanonicalEvent) -> Self {
        Self {
            message_kind: MessageKind::Event,
            payload,
        }
    }
}
