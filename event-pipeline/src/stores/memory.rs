use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::api::StoreError;
use crate::event::CanonicalEvent;
use crate::stores::HistoryStore;

/// Keeps stored events in memory. Clones share the same records.
#[derive(Clone, Default)]
pub struct MemoryStore {
    events: Arc<Mutex<Vec<CanonicalEvent>>>,
}

impl MemoryStore {
    pub fn len(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn events(&self) -> Vec<CanonicalEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn store(&self, event: CanonicalEvent) -> Result<(), StoreError> {
        self.events
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?
            .push(event);
        Ok(())
    }
}
