use std::sync::Arc;

use metrics::counter;
use tracing::{instrument, trace};

use crate::event::{CanonicalEvent, EventEnvelope};
use crate::topics::{BaseTopic, TopicBus};

/// Publishes every canonical event to the unified and dashboard topics.
#[derive(Clone)]
pub struct EventRouter {
    bus: TopicBus,
}

impl EventRouter {
    pub fn new(bus: TopicBus) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &TopicBus {
        &self.bus
    }

    /// Wraps the event in an envelope and publishes it once per base topic.
    /// Never fails; the shared envelope is returned for the persistence step.
    #[instrument(skip_all, fields(kind = event.kind.as_str()))]
    pub fn route(&self, event: CanonicalEvent) -> Arc<EventEnvelope> {
        let source = event.source;
        let envelope = Arc::new(EventEnvelope::event(event));

        for base in BaseTopic::ALL {
            let delivered = self.bus.publish(base, &envelope);
            trace!(topic = base.as_str(), delivered, "published");
        }

        counter!("pipeline_events_routed_total", "source" => source.as_str()).increment(1);
        envelope
    }
}
