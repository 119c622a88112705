use std::future::Future;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::Config;
use crate::normalize::Normalizer;
use crate::persistence::PersistenceGate;
use crate::pipeline::Pipeline;
use crate::router;
use crate::routing::EventRouter;
use crate::stores::http::HttpStore;
use crate::stores::print::PrintStore;
use crate::time::SystemTime;
use crate::topics::TopicBus;
use crate::validation::Validator;

pub fn create_pipeline(config: &Config) -> anyhow::Result<Pipeline> {
    let timeout = config.persistence_timeout();
    let gate = match &config.history_store_url {
        Some(url) => {
            let store = HttpStore::new(url, timeout)?;
            info!(endpoint = store.endpoint(), "persisting valuable events over HTTP");
            PersistenceGate::new(store, timeout)
        }
        None => {
            // Print store is only meant for local development
            warn!("no history store configured, valuable events will only be logged");
            PersistenceGate::new(PrintStore {}, timeout)
        }
    }
    .with_additional_kinds(config.additional_valuable_kinds());

    Ok(Pipeline::new(
        Validator::new(config.validation_limits()),
        Normalizer::new(SystemTime {}),
        EventRouter::new(TopicBus::new()),
        gate,
    ))
}

/// Serves the HTTP ingress until `shutdown` resolves, then waits for the
/// persistence writes still in flight.
pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let pipeline = create_pipeline(&config)?;
    let app = router::router(pipeline.clone(), config.export_prometheus);

    info!(address = %listener.local_addr()?, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    let pending = pipeline.persistence().pending();
    info!(pending, "HTTP server stopped, flushing persistence writes");
    pipeline.persistence().flush().await;
    Ok(())
}
