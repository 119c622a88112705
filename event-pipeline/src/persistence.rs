use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, instrument};

use crate::api::PersistenceFailure;
use crate::event::{CanonicalEvent, EventEnvelope};
use crate::prometheus::{report_event_persisted, report_persistence_failure};
use crate::stores::HistoryStore;

pub const DEFAULT_PERSISTENCE_TIMEOUT: Duration = Duration::from_secs(5);

/// Kinds worth keeping in the history store. Anything not listed, including
/// kinds nobody has seen yet, stays ephemeral.
pub const VALUABLE_KINDS: &[&str] = &[
    "channel.follow",
    "channel.subscribe",
    "channel.subscription.gift",
    "channel.subscription.message",
    "channel.cheer",
    "channel.raid",
    "channel.chat.message",
    "stream.online",
    "stream.offline",
    "obs.stream_started",
    "obs.stream_stopped",
    "obs.recording_started",
    "obs.recording_stopped",
    "system.service_started",
    "ironmon.init",
];

/// Forwards valuable events to the history store in detached, tracked tasks.
#[derive(Clone)]
pub struct PersistenceGate {
    store: Arc<dyn HistoryStore + Send + Sync>,
    additional_kinds: Arc<HashSet<String>>,
    timeout: Duration,
    tracker: TaskTracker,
    flushing: Arc<Mutex<()>>,
}

impl PersistenceGate {
    pub fn new<S: HistoryStore + Send + Sync + 'static>(store: S, timeout: Duration) -> Self {
        Self {
            store: Arc::new(store),
            additional_kinds: Arc::new(HashSet::new()),
            timeout,
            tracker: TaskTracker::new(),
            flushing: Arc::new(Mutex::new(())),
        }
    }

    /// Extends the built-in allow-list.
    pub fn with_additional_kinds<I>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        self.additional_kinds = Arc::new(kinds.into_iter().collect());
        self
    }

    pub fn is_valuable(&self, kind: &str) -> bool {
        VALUABLE_KINDS.contains(&kind) || self.additional_kinds.contains(kind)
    }

    /// Schedules a write for valuable events and returns immediately. Returns
    /// whether a write was scheduled. Failures are logged and counted, never
    /// returned.
    #[instrument(skip_all, fields(kind = envelope.payload.kind.as_str()))]
    pub fn maybe_persist(&self, envelope: Arc<EventEnvelope>) -> bool {
        if !self.is_valuable(&envelope.payload.kind) {
            return false;
        }

        let event = match Arc::try_unwrap(envelope) {
            Ok(envelope) => envelope.payload,
            Err(shared) => shared.payload.clone(),
        };

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                report_failure(PersistenceFailure::NoRuntime {
                    kind: event.kind,
                    correlation_id: event.correlation_id,
                });
                return false;
            }
        };

        let store = self.store.clone();
        let timeout = self.timeout;
        self.tracker.spawn_on(
            async move {
                match persist(store.as_ref(), event, timeout).await {
                    Ok(()) => report_event_persisted(),
                    Err(failure) => report_failure(failure),
                }
            },
            &handle,
        );
        true
    }

    /// Number of writes still in flight.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Waits for every write scheduled so far, including writes scheduled
    /// while waiting. Concurrent callers, including clones of this gate,
    /// take turns so one flush never reopens the tracker under another.
    pub async fn flush(&self) {
        let _turn = self.flushing.lock().await;
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

async fn persist(
    store: &(dyn HistoryStore + Send + Sync),
    event: CanonicalEvent,
    timeout: Duration,
) -> Result<(), PersistenceFailure> {
    let kind = event.kind.clone();
    let correlation_id = event.correlation_id.clone();

    match tokio::time::timeout(timeout, store.store(event)).await {
        Ok(Ok(())) => {
            debug!(
                kind = kind.as_str(),
                correlation_id = correlation_id.as_str(),
                "event persisted"
            );
            Ok(())
        }
        Ok(Err(cause)) => Err(PersistenceFailure::Store {
            kind,
            correlation_id,
            cause,
        }),
        Err(_) => Err(PersistenceFailure::Timeout {
            kind,
            correlation_id,
        }),
    }
}

fn report_failure(failure: PersistenceFailure) {
    report_persistence_failure(failure.cause());
    error!(cause = failure.cause(), "{failure}");
}
