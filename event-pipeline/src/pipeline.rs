use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::api::{Ack, AckStatus, ValidationError};
use crate::normalize::Normalizer;
use crate::persistence::PersistenceGate;
use crate::prometheus::{report_received_event, report_rejected_event};
use crate::routing::EventRouter;
use crate::topics::TopicBus;
use crate::validation::{printable_kind, Validator};

/// The single entry point for producers: validate, normalize, route, then
/// hand valuable events to the persistence gate. Cheap to clone and safe to
/// call from any number of tasks at once; the topic registry is the only
/// shared mutable state.
#[derive(Clone)]
pub struct Pipeline {
    validator: Validator,
    normalizer: Normalizer,
    router: EventRouter,
    gate: PersistenceGate,
}

impl Pipeline {
    pub fn new(
        validator: Validator,
        normalizer: Normalizer,
        router: EventRouter,
        gate: PersistenceGate,
    ) -> Self {
        Self {
            validator,
            normalizer,
            router,
            gate,
        }
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn bus(&self) -> &TopicBus {
        self.router.bus()
    }

    pub fn persistence(&self) -> &PersistenceGate {
        &self.gate
    }

    /// Returns once the event has been delivered to live subscribers. A
    /// rejected payload is neither routed nor persisted.
    #[instrument(skip_all, fields(kind = %printable_kind(kind)))]
    pub fn process_event(
        &self,
        kind: &str,
        payload: Map<String, Value>,
    ) -> Result<Ack, ValidationError> {
        report_received_event();

        let payload = self.validator.validate(kind, payload).map_err(|err| {
            report_rejected_event(err.code());
            err
        })?;

        let event = self.normalizer.normalize(kind, payload);
        let ack = Ack {
            status: AckStatus::Ok,
            id: event.id.clone(),
            correlation_id: event.correlation_id.clone(),
        };

        let envelope = self.router.route(event);
        let scheduled = self.gate.maybe_persist(envelope);
        debug!(
            correlation_id = ack.correlation_id.as_str(),
            persisted = scheduled,
            "event processed"
        );

        Ok(ack)
    }
}
