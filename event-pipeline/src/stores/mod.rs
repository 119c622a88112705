use async_trait::async_trait;

use crate::api::StoreError;
use crate::event::CanonicalEvent;

pub mod http;
pub mod memory;
pub mod print;

/// Durable storage for valuable events. Takes ownership of the record.
#[async_trait]
pub trait HistoryStore {
    async fn store(&self, event: CanonicalEvent) -> Result<(), StoreError>;
}
