use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use metrics::counter;
use serde_json::{Map, Value};
use tracing::instrument;

use crate::classify::classify_detailed;
use crate::event::{CanonicalEvent, FieldValue, ListItem, Scalar, CORE_FIELDS};
use crate::time::TimeSource;
use crate::utils::{correlation_id, event_id};
use crate::validation::ValidatedPayload;

/// Moves one sub-key of a nested record to a fixed top-level key.
struct Extraction {
    field: &'static str,
    target: &'static str,
}

/// Bespoke handling for one top-level record key. Sub-keys without an
/// extraction fall back to generic prefixing.
struct FlattenRule {
    key: &'static str,
    extractions: &'static [Extraction],
}

const CHAT_MESSAGE_RULES: &[FlattenRule] = &[
    FlattenRule {
        key: "message",
        extractions: &[
            Extraction {
                field: "text",
                target: "message",
            },
            Extraction {
                field: "fragments",
                target: "fragments",
            },
        ],
    },
    FlattenRule {
        key: "cheer",
        extractions: &[Extraction {
            field: "bits",
            target: "bits",
        }],
    },
];

const SUBSCRIPTION_MESSAGE_RULES: &[FlattenRule] = &[FlattenRule {
    key: "message",
    extractions: &[
        Extraction {
            field: "text",
            target: "message",
        },
        Extraction {
            field: "emotes",
            target: "emotes",
        },
    ],
}];

/// Flattening schemas per exact kind. Kinds not listed use generic prefixing only.
const SCHEMAS: &[(&str, &[FlattenRule])] = &[
    ("channel.chat.message", CHAT_MESSAGE_RULES),
    ("channel.chat.notification", CHAT_MESSAGE_RULES),
    ("channel.subscription.message", SUBSCRIPTION_MESSAGE_RULES),
];

fn rule_for(kind: &str, key: &str) -> Option<&'static FlattenRule> {
    SCHEMAS
        .iter()
        .find(|(schema_kind, _)| *schema_kind == kind)
        .and_then(|(_, rules)| rules.iter().find(|rule| rule.key == key))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeWarning {
    /// No classifier rule claimed the kind, the fallback source was used.
    UnknownKindFallback(String),
    /// A producer field would have overwritten a core field.
    CoreFieldCollision(String),
    /// Two producer fields flattened to the same key, the later one was dropped.
    DuplicateField(String),
    /// A list held nested values and was replaced by its JSON text.
    ListStringified(String),
}

impl NormalizeWarning {
    pub fn code(&self) -> &'static str {
        match self {
            NormalizeWarning::UnknownKindFallback(_) => "unknown_kind_fallback",
            NormalizeWarning::CoreFieldCollision(_) => "core_field_collision",
            NormalizeWarning::DuplicateField(_) => "duplicate_field",
            NormalizeWarning::ListStringified(_) => "list_stringified",
        }
    }
}

impl fmt::Display for NormalizeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizeWarning::UnknownKindFallback(kind) => {
                write!(f, "unknown kind {kind}, using fallback source")
            }
            NormalizeWarning::CoreFieldCollision(field) => {
                write!(f, "dropped field {field} colliding with a core field")
            }
            NormalizeWarning::DuplicateField(field) => {
                write!(f, "dropped duplicate flattened field {field}")
            }
            NormalizeWarning::ListStringified(field) => {
                write!(f, "stringified non-flat list in field {field}")
            }
        }
    }
}

#[derive(Default)]
struct Flattened {
    fields: BTreeMap<String, FieldValue>,
    warnings: Vec<NormalizeWarning>,
}

impl Flattened {
    fn place(&mut self, key: String, value: FieldValue) {
        if CORE_FIELDS.contains(&key.as_str()) {
            self.warnings.push(NormalizeWarning::CoreFieldCollision(key));
        } else if self.fields.contains_key(&key) {
            self.warnings.push(NormalizeWarning::DuplicateField(key));
        } else {
            self.fields.insert(key, value);
        }
    }

    /// Generic prefixing: records recurse with `<prefix>_<key>`, everything
    /// else lands under `prefix`.
    fn flatten_into(&mut self, prefix: String, value: Value) {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    self.flatten_into(format!("{prefix}_{key}"), child);
                }
            }
            other => {
                let value = self.field_value(&prefix, other);
                self.place(prefix, value);
            }
        }
    }

    fn flatten_record(&mut self, kind: &str, key: String, record: Map<String, Value>) {
        let Some(rule) = rule_for(kind, &key) else {
            self.flatten_into(key, Value::Object(record));
            return;
        };

        for (field, child) in record {
            match rule.extractions.iter().find(|e| e.field == field) {
                Some(extraction) => self.flatten_into(extraction.target.to_string(), child),
                None => self.flatten_into(format!("{key}_{field}"), child),
            }
        }
    }

    fn field_value(&mut self, key: &str, value: Value) -> FieldValue {
        match value {
            Value::Array(items) => match flat_list(&items) {
                Some(list) => FieldValue::List(list),
                None => {
                    self.warnings
                        .push(NormalizeWarning::ListStringified(key.to_string()));
                    FieldValue::Scalar(Scalar::String(Value::Array(items).to_string()))
                }
            },
            other => FieldValue::Scalar(to_scalar(other).unwrap_or(Scalar::Null)),
        }
    }
}

fn to_scalar(value: Value) -> Option<Scalar> {
    match value {
        Value::Null => Some(Scalar::Null),
        Value::Bool(b) => Some(Scalar::Bool(b)),
        Value::Number(n) => Some(Scalar::Number(n)),
        Value::String(s) => Some(Scalar::String(s)),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Converts a list whose elements are scalars or one-level records of
/// scalars. Returns `None` as soon as an element would nest further.
fn flat_list(items: &[Value]) -> Option<Vec<ListItem>> {
    items
        .iter()
        .map(|item| match item {
            Value::Object(record) => record
                .iter()
                .map(|(k, v)| to_scalar(v.clone()).map(|s| (k.clone(), s)))
                .collect::<Option<BTreeMap<String, Scalar>>>()
                .map(ListItem::Record),
            other => to_scalar(other.clone()).map(ListItem::Scalar),
        })
        .collect()
}

/// Rewrites a validated payload into flat canonical fields. Top-level
/// non-record values are placed first, so they win over flattened keys.
pub fn flatten(
    kind: &str,
    payload: Map<String, Value>,
) -> (BTreeMap<String, FieldValue>, Vec<NormalizeWarning>) {
    let mut out = Flattened::default();
    let mut records = Vec::new();

    for (key, value) in payload {
        match value {
            Value::Object(record) => records.push((key, record)),
            other => {
                let value = out.field_value(&key, other);
                out.place(key, value);
            }
        }
    }

    for (key, record) in records {
        out.flatten_record(kind, key, record);
    }

    (out.fields, out.warnings)
}

#[derive(Clone)]
pub struct Normalizer {
    timesource: Arc<dyn TimeSource + Send + Sync>,
}

impl Normalizer {
    pub fn new<T: TimeSource + Send + Sync + 'static>(timesource: T) -> Self {
        Self {
            timesource: Arc::new(timesource),
        }
    }

    /// Builds the canonical event. Cannot fail once the payload is validated;
    /// warnings are logged and counted.
    #[instrument(skip_all, fields(kind = kind))]
    pub fn normalize(&self, kind: &str, payload: ValidatedPayload) -> CanonicalEvent {
        let (event, warnings) = self.normalize_detailed(kind, payload);
        for warning in warnings {
            counter!("pipeline_normalize_warnings_total", "warning" => warning.code()).increment(1);
            tracing::warn!(
                correlation_id = event.correlation_id.as_str(),
                warning = warning.code(),
                "{warning}"
            );
        }
        event
    }

    pub fn normalize_detailed(
        &self,
        kind: &str,
        payload: ValidatedPayload,
    ) -> (CanonicalEvent, Vec<NormalizeWarning>) {
        let classification = classify_detailed(kind);
        let (fields, mut warnings) = flatten(kind, payload.into_inner());
        if classification.is_fallback() {
            counter!("pipeline_unknown_kind_fallback_total").increment(1);
            warnings.insert(0, NormalizeWarning::UnknownKindFallback(kind.to_string()));
        }

        let event = CanonicalEvent {
            id: event_id(),
            kind: kind.to_string(),
            source: classification.source,
            timestamp: self.timesource.current_time(),
            correlation_id: correlation_id(),
            fields,
        };
        (event, warnings)
    }
}
