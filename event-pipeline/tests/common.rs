#![allow(dead_code)]

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Once;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde_json::{Map, Value};
use tracing::Level;

use event_pipeline::config::Config;
use event_pipeline::normalize::Normalizer;
use event_pipeline::persistence::PersistenceGate;
use event_pipeline::pipeline::Pipeline;
use event_pipeline::routing::EventRouter;
use event_pipeline::stores::memory::MemoryStore;
use event_pipeline::time::SystemTime;
use event_pipeline::topics::TopicBus;
use event_pipeline::validation::Validator;

pub static DEFAULT_CONFIG: Lazy<Config> = Lazy::new(|| Config {
    address: SocketAddr::from_str("127.0.0.1:0").unwrap(),
    history_store_url: None,
    persistence_timeout_ms: 1000,
    persist_additional_kinds: None,
    max_payload_bytes: 100_000,
    max_nesting_depth: 10,
    max_kind_length: 100,
    export_prometheus: false,
    log_level: Level::INFO,
    log_json: false,
});

static TRACING_INIT: Once = Once::new();
pub fn setup_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_writer(tracing_subscriber::fmt::TestWriter::new())
            .init()
    });
}

pub struct TestPipeline {
    pub pipeline: Pipeline,
    pub store: MemoryStore,
}

impl TestPipeline {
    pub fn new() -> Self {
        setup_tracing();
        let store = MemoryStore::default();
        let pipeline = Pipeline::new(
            Validator::default(),
            Normalizer::new(SystemTime {}),
            EventRouter::new(TopicBus::new()),
            PersistenceGate::new(store.clone(), Duration::from_secs(5)),
        );
        Self { pipeline, store }
    }

    /// Waits for detached history writes, then returns how many were stored.
    pub async fn stored(&self) -> usize {
        self.pipeline.persistence().flush().await;
        self.store.len()
    }
}

pub fn payload(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("test payload must be an object"),
    }
}
