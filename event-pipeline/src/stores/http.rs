use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::api::StoreError;
use crate::event::CanonicalEvent;
use crate::stores::HistoryStore;

/// Posts canonical events as JSON to `<base_url>/events`.
pub struct HttpStore {
    client: Client,
    endpoint: String,
}

impl HttpStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/events", base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl HistoryStore for HttpStore {
    async fn store(&self, event: CanonicalEvent) -> Result<(), StoreError> {
        let response = self.client.post(&self.endpoint).json(&event).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Rejected(status.as_u16()));
        }

        debug!(
            correlation_id = event.correlation_id.as_str(),
            "event stored"
        );
        Ok(())
    }
}
