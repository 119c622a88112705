use async_trait::async_trait;
use tracing::info;

use crate::api::StoreError;
use crate::event::CanonicalEvent;
use crate::stores::HistoryStore;

/// Logs valuable events instead of storing them, for local development.
pub struct PrintStore {}

#[async_trait]
impl HistoryStore for PrintStore {
    async fn store(&self, event: CanonicalEvent) -> Result<(), StoreError> {
        info!(
            kind = event.kind.as_str(),
            correlation_id = event.correlation_id.as_str(),
            "history event: {event:?}"
        );
        Ok(())
    }
}
