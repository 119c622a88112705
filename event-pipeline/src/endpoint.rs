use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::{debug_handler, Json};
use serde_json::Value;
use tracing::{instrument, warn};

use crate::api::{Ack, IngressError};
use crate::router;
use crate::validation::printable_kind;

#[instrument(skip_all, fields(kind = %printable_kind(&kind)))]
#[debug_handler]
pub async fn event(
    state: State<router::State>,
    Path(kind): Path<String>,
    body: Bytes,
) -> Result<Json<Ack>, IngressError> {
    let payload = match serde_json::from_slice::<Value>(&body) {
        Ok(Value::Object(payload)) => payload,
        Ok(_) => {
            warn!("event: request body is not a JSON object");
            return Err(IngressError::NotAnObject);
        }
        Err(err) => {
            warn!("event: request payload parsing error: {err}");
            return Err(IngressError::RequestParsingError(err));
        }
    };

    state
        .pipeline
        .process_event(&kind, payload)
        .map(Json)
        .map_err(|source| IngressError::Validation { kind, source })
}
