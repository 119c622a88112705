use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Ok,
}

/// Returned to the producer once an event has been validated, normalized and
/// routed. Persistence may still be in flight.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Ack {
    pub status: AckStatus,
    pub id: String,
    pub correlation_id: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("event kind is empty")]
    EmptyKind,
    #[error("event kind is {length} characters long, the limit is {max}")]
    KindTooLong { length: usize, max: usize },
    #[error("payload is {size} bytes, the limit is {max}")]
    OversizedPayload { size: usize, max: usize },
    #[error("field {0} contains control characters")]
    InvalidCharacters(String),
    #[error("payload nesting exceeds {max} levels")]
    ExcessiveNesting { max: usize },
    #[error("{kind} event submitted without required field {field}")]
    MissingRequiredField { kind: String, field: String },
    #[error("{kind} event field {field} must be a {expected}")]
    InvalidFieldType {
        kind: String,
        field: String,
        expected: &'static str,
    },
}

impl ValidationError {
    /// Stable identifier for the rejection reason, used in responses and metrics.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::EmptyKind => "empty_kind",
            ValidationError::KindTooLong { .. } => "kind_too_long",
            ValidationError::OversizedPayload { .. } => "oversized_payload",
            ValidationError::InvalidCharacters(_) => "invalid_characters",
            ValidationError::ExcessiveNesting { .. } => "excessive_nesting",
            ValidationError::MissingRequiredField { .. } => "missing_required_field",
            ValidationError::InvalidFieldType { .. } => "invalid_field_type",
        }
    }
}

/// Failure reported by a history store client.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("history store request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("history store rejected the event with status {0}")]
    Rejected(u16),
    #[error("history store unavailable: {0}")]
    Unavailable(String),
}

/// A valuable event that could not be written to the history store. Never
/// surfaced to producers, only logged and counted.
#[derive(Error, Debug)]
pub enum PersistenceFailure {
    #[error("failed to persist {kind} event {correlation_id}: {cause}")]
    Store {
        kind: String,
        correlation_id: String,
        cause: StoreError,
    },
    #[error("timed out persisting {kind} event {correlation_id}")]
    Timeout { kind: String, correlation_id: String },
    #[error("no async runtime to persist {kind} event {correlation_id}")]
    NoRuntime { kind: String, correlation_id: String },
}

impl PersistenceFailure {
    pub fn cause(&self) -> &'static str {
        match self {
            PersistenceFailure::Store { .. } => "store_error",
            PersistenceFailure::Timeout { .. } => "timeout",
            PersistenceFailure::NoRuntime { .. } => "no_runtime",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscribeError {
    #[error("unknown topic {0}")]
    UnknownTopic(String),
    #[error("unknown discriminator {discriminator} for topic {topic}")]
    UnknownDiscriminator {
        topic: String,
        discriminator: String,
    },
}

/// Errors of the HTTP ingress adapter.
#[derive(Error, Debug)]
pub enum IngressError {
    #[error("failed to parse request: {0}")]
    RequestParsingError(#[from] serde_json::Error),
    #[error("request body must be a JSON object")]
    NotAnObject,
    #[error("{source}")]
    Validation {
        kind: String,
        #[source]
        source: ValidationError,
    },
}

impl IngressError {
    pub fn code(&self) -> &'static str {
        match self {
            IngressError::RequestParsingError(_) => "request_parsing_error",
            IngressError::NotAnObject => "not_an_object",
            IngressError::Validation { source, .. } => source.code(),
        }
    }
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        let kind = match &self {
            IngressError::Validation { kind, .. } => Some(kind.clone()),
            _ => None,
        };
        let body = json!({
            "error": self.code(),
            "kind": kind,
            "reason": self.to_string(),
        });
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}
