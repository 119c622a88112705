use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures::Stream;
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::SubscribeError;
use crate::event::{CanonicalEvent, EventEnvelope, Source};

/// The two topics every routed event is published to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BaseTopic {
    Events,
    Dashboard,
}

impl BaseTopic {
    pub const ALL: [BaseTopic; 2] = [BaseTopic::Events, BaseTopic::Dashboard];

    pub fn as_str(&self) -> &'static str {
        match self {
            BaseTopic::Events => "events",
            BaseTopic::Dashboard => "dashboard",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ContentCategory {
    ChatMessages,
    Follows,
    Subscriptions,
    Cheers,
    Raids,
    ObsStatus,
}

impl ContentCategory {
    pub const ALL: [ContentCategory; 6] = [
        ContentCategory::ChatMessages,
        ContentCategory::Follows,
        ContentCategory::Subscriptions,
        ContentCategory::Cheers,
        ContentCategory::Raids,
        ContentCategory::ObsStatus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentCategory::ChatMessages => "chat_messages",
            ContentCategory::Follows => "follows",
            ContentCategory::Subscriptions => "subscriptions",
            ContentCategory::Cheers => "cheers",
            ContentCategory::Raids => "raids",
            ContentCategory::ObsStatus => "obs_status",
        }
    }

    pub fn matches(&self, kind: &str) -> bool {
        match self {
            ContentCategory::ChatMessages => kind == "channel.chat.message",
            ContentCategory::Follows => kind == "channel.follow",
            ContentCategory::Subscriptions => {
                kind == "channel.subscribe" || kind.starts_with("channel.subscription.")
            }
            ContentCategory::Cheers => kind == "channel.cheer",
            ContentCategory::Raids => kind == "channel.raid",
            ContentCategory::ObsStatus => kind.starts_with("obs."),
        }
    }
}

/// Subscriber-side predicate of a scoped view.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TopicFilter {
    All,
    Source(Source),
    Category(ContentCategory),
}

impl TopicFilter {
    pub fn matches(&self, event: &CanonicalEvent) -> bool {
        match self {
            TopicFilter::All => true,
            TopicFilter::Source(source) => event.source == *source,
            TopicFilter::Category(category) => category.matches(&event.kind),
        }
    }
}

/// A parsed subscription name: `events`, `dashboard`, or `<base>:<discriminator>`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TopicName {
    pub base: BaseTopic,
    pub filter: TopicFilter,
}

impl TopicName {
    pub fn unscoped(base: BaseTopic) -> Self {
        Self {
            base,
            filter: TopicFilter::All,
        }
    }
}

impl FromStr for TopicName {
    type Err = SubscribeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, discriminator) = match s.split_once(':') {
            Some((base, discriminator)) => (base, Some(discriminator)),
            None => (s, None),
        };

        let base = BaseTopic::ALL
            .into_iter()
            .find(|b| b.as_str() == base)
            .ok_or_else(|| SubscribeError::UnknownTopic(s.to_string()))?;

        let Some(discriminator) = discriminator else {
            return Ok(TopicName::unscoped(base));
        };

        let filter = if let Ok(source) = discriminator.parse::<Source>() {
            TopicFilter::Source(source)
        } else if let Some(category) = ContentCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == discriminator)
        {
            TopicFilter::Category(category)
        } else {
            return Err(SubscribeError::UnknownDiscriminator {
                topic: base.as_str().to_string(),
                discriminator: discriminator.to_string(),
            });
        };

        Ok(TopicName { base, filter })
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.filter {
            TopicFilter::All => f.write_str(self.base.as_str()),
            TopicFilter::Source(source) => write!(f, "{}:{}", self.base.as_str(), source),
            TopicFilter::Category(category) => {
                write!(f, "{}:{}", self.base.as_str(), category.as_str())
            }
        }
    }
}

struct Subscriber {
    id: u64,
    filter: TopicFilter,
    sender: mpsc::UnboundedSender<Arc<EventEnvelope>>,
}

#[derive(Default)]
struct Registry {
    topics: DashMap<BaseTopic, Vec<Subscriber>>,
    next_id: AtomicU64,
}

/// Registry of live subscribers per base topic. A topic entry exists only
/// while it has at least one subscriber and holds no event history.
///
/// Each subscriber owns an unbounded mailbox: publishing never waits on a
/// slow reader and never skips one that is still attached.
#[derive(Clone, Default)]
pub struct TopicBus {
    inner: Arc<Registry>,
}

impl TopicBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, topic: &str) -> Result<Subscription, SubscribeError> {
        let name: TopicName = topic.parse()?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();

        let count = {
            let mut subscribers = self.inner.topics.entry(name.base).or_default();
            subscribers.push(Subscriber {
                id,
                filter: name.filter,
                sender,
            });
            subscribers.len()
        };
        report_subscribers(name.base, count);
        debug!(topic = %name, subscriber = id, "subscribed");

        Ok(Subscription {
            id,
            name,
            receiver,
            bus: self.clone(),
        })
    }

    /// Delivers the envelope to every matching subscriber of `base` without
    /// blocking. Subscribers whose receiving side is gone are unregistered.
    /// Returns how many subscribers received it.
    pub fn publish(&self, base: BaseTopic, envelope: &Arc<EventEnvelope>) -> usize {
        let mut delivered = 0;
        let (before, remaining) = {
            let Some(mut subscribers) = self.inner.topics.get_mut(&base) else {
                return 0;
            };

            let before = subscribers.len();
            subscribers.retain(|subscriber| {
                if !subscriber.filter.matches(&envelope.payload) {
                    return true;
                }
                match subscriber.sender.send(envelope.clone()) {
                    Ok(()) => {
                        delivered += 1;
                        true
                    }
                    Err(_) => {
                        report_dropped_delivery(base, "closed");
                        false
                    }
                }
            });
            (before, subscribers.len())
        };

        if remaining == 0 {
            self.remove_if_empty(base);
        } else if remaining != before {
            report_subscribers(base, remaining);
        }
        delivered
    }

    pub fn subscriber_count(&self, base: BaseTopic) -> usize {
        self.inner
            .topics
            .get(&base)
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }

    /// Number of base topics that currently have subscribers.
    pub fn active_topics(&self) -> usize {
        self.inner.topics.len()
    }

    /// Runs `handler` for every envelope on `topic` in a dedicated task. Handler
    /// errors are logged and the handler keeps receiving; a panic ends only
    /// this task. Must be called from within a Tokio runtime.
    pub fn spawn_handler<F, Fut, E>(
        &self,
        topic: &str,
        mut handler: F,
    ) -> Result<JoinHandle<()>, SubscribeError>
    where
        F: FnMut(Arc<EventEnvelope>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let mut subscription = self.subscribe(topic)?;
        Ok(tokio::spawn(async move {
            while let Some(envelope) = subscription.recv().await {
                if let Err(err) = handler(envelope).await {
                    let base = subscription.name.base.as_str();
                    counter!("pipeline_subscriber_handler_errors_total", "topic" => base)
                        .increment(1);
                    warn!(topic = %subscription.name, "subscriber handler failed: {err}");
                }
            }
        }))
    }

    fn unregister(&self, base: BaseTopic, id: u64) {
        let remaining = {
            let Some(mut subscribers) = self.inner.topics.get_mut(&base) else {
                return;
            };
            subscribers.retain(|subscriber| subscriber.id != id);
            subscribers.len()
        };

        if remaining == 0 {
            self.remove_if_empty(base);
        } else {
            report_subscribers(base, remaining);
        }
    }

    fn remove_if_empty(&self, base: BaseTopic) {
        if self
            .inner
            .topics
            .remove_if(&base, |_, subscribers| subscribers.is_empty())
            .is_some()
        {
            report_subscribers(base, 0);
            debug!(topic = base.as_str(), "last subscriber left, topic torn down");
        }
    }
}

fn report_subscribers(base: BaseTopic, count: usize) {
    gauge!("pipeline_topic_subscribers", "topic" => base.as_str()).set(count as f64);
}

fn report_dropped_delivery(base: BaseTopic, cause: &'static str) {
    counter!(
        "pipeline_subscriber_events_dropped_total",
        "topic" => base.as_str(),
        "cause" => cause
    )
    .increment(1);
}

/// A live view on one topic. Only sees events published after it was
/// created; unregisters itself when dropped.
pub struct Subscription {
    id: u64,
    name: TopicName,
    receiver: mpsc::UnboundedReceiver<Arc<EventEnvelope>>,
    bus: TopicBus,
}

impl Subscription {
    pub fn topic(&self) -> &TopicName {
        &self.name
    }

    pub async fn recv(&mut self) -> Option<Arc<EventEnvelope>> {
        self.receiver.recv().await
    }

    /// Returns an already buffered envelope, if any.
    pub fn try_recv(&mut self) -> Option<Arc<EventEnvelope>> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = Arc<EventEnvelope>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.unregister(self.name.base, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::CanonicalEvent;
    use futures::StreamExt;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use time::OffsetDateTime;

    fn envelope(kind: &str, source: Source) -> Arc<EventEnvelope> {
        Arc::new(EventEnvelope::event(CanonicalEvent {
            id: format!("id-{kind}"),
            kind: kind.to_string(),
            source,
            timestamp: OffsetDateTime::UNIX_EPOCH,
            correlation_id: "0123456789abcdef".to_string(),
            fields: BTreeMap::new(),
        }))
    }

    #[test]
    fn parses_topic_names() {
        assert_eq!(
            "events".parse::<TopicName>(),
            Ok(TopicName::unscoped(BaseTopic::Events))
        );
        assert_eq!(
            "dashboard:internal-stream".parse::<TopicName>(),
            Ok(TopicName {
                base: BaseTopic::Dashboard,
                filter: TopicFilter::Source(Source::InternalStream),
            })
        );
        assert_eq!(
            "events:chat_messages".parse::<TopicName>(),
            Ok(TopicName {
                base: BaseTopic::Events,
                filter: TopicFilter::Category(ContentCategory::ChatMessages),
            })
        );
        for name in ["events:chat", "dashboard:obs_status", "events"] {
            assert_eq!(name.parse::<TopicName>().unwrap().to_string(), name);
        }
    }

    #[test]
    fn rejects_unknown_topics() {
        assert_eq!(
            "alerts".parse::<TopicName>(),
            Err(SubscribeError::UnknownTopic("alerts".to_string()))
        );
        assert_eq!(
            "events:weather".parse::<TopicName>(),
            Err(SubscribeError::UnknownDiscriminator {
                topic: "events".to_string(),
                discriminator: "weather".to_string(),
            })
        );
        assert!(TopicBus::default().subscribe("events:").is_err());
    }

    #[test]
    fn publish_without_subscribers_is_a_no_op() {
        let bus = TopicBus::default();
        assert_eq!(
            bus.publish(BaseTopic::Events, &envelope("channel.follow", Source::Chat)),
            0
        );
        assert_eq!(bus.active_topics(), 0);
    }

    #[test]
    fn topics_live_as_long_as_their_subscribers() {
        let bus = TopicBus::default();
        let first = bus.subscribe("events").unwrap();
        let second = bus.subscribe("events:chat").unwrap();
        assert_eq!(bus.active_topics(), 1);
        assert_eq!(bus.subscriber_count(BaseTopic::Events), 2);

        drop(first);
        assert_eq!(bus.subscriber_count(BaseTopic::Events), 1);
        drop(second);
        assert_eq!(bus.active_topics(), 0);
    }

    #[tokio::test]
    async fn scoped_views_filter_on_the_subscriber_side() {
        let bus = TopicBus::default();
        let mut all = bus.subscribe("dashboard").unwrap();
        let mut broadcast = bus.subscribe("dashboard:broadcast").unwrap();
        let mut follows = bus.subscribe("dashboard:follows").unwrap();

        assert_eq!(
            bus.publish(BaseTopic::Dashboard, &envelope("channel.follow", Source::Chat)),
            2
        );
        assert_eq!(
            bus.publish(BaseTopic::Dashboard, &envelope("obs.scene_changed", Source::Broadcast)),
            2
        );

        assert_eq!(all.recv().await.unwrap().payload.kind, "channel.follow");
        assert_eq!(all.recv().await.unwrap().payload.kind, "obs.scene_changed");
        assert_eq!(broadcast.recv().await.unwrap().payload.kind, "obs.scene_changed");
        assert!(broadcast.try_recv().is_none());
        assert_eq!(follows.recv().await.unwrap().payload.kind, "channel.follow");
        assert!(follows.try_recv().is_none());
    }

    #[tokio::test]
    async fn subscribers_only_see_later_events() {
        let bus = TopicBus::default();
        let mut early = bus.subscribe("events").unwrap();
        bus.publish(BaseTopic::Events, &envelope("stream.online", Source::Chat));

        let mut late = bus.subscribe("events").unwrap();
        bus.publish(BaseTopic::Events, &envelope("stream.offline", Source::Chat));

        assert_eq!(early.next().await.unwrap().payload.kind, "stream.online");
        assert_eq!(early.next().await.unwrap().payload.kind, "stream.offline");
        assert_eq!(late.next().await.unwrap().payload.kind, "stream.offline");
        assert!(late.try_recv().is_none());
    }

    #[tokio::test]
    async fn idle_subscribers_receive_every_event_once_they_read() {
        let bus = TopicBus::default();
        let mut idle = bus.subscribe("events").unwrap();
        let mut reader = bus.subscribe("events").unwrap();

        for i in 0..2000 {
            let kind = format!("chat.{i}");
            assert_eq!(
                bus.publish(BaseTopic::Events, &envelope(&kind, Source::Chat)),
                2
            );
            assert_eq!(reader.recv().await.unwrap().payload.kind, kind);
        }

        for i in 0..2000 {
            assert_eq!(idle.try_recv().unwrap().payload.kind, format!("chat.{i}"));
        }
        assert!(idle.try_recv().is_none());
        assert_eq!(bus.subscriber_count(BaseTopic::Events), 2);
    }

    #[test]
    fn closed_receivers_are_unregistered_on_publish() {
        let bus = TopicBus::default();
        let mut gone = bus.subscribe("events").unwrap();
        let _kept = bus.subscribe("events").unwrap();
        gone.receiver.close();

        assert_eq!(
            bus.publish(BaseTopic::Events, &envelope("chat.one", Source::Chat)),
            1
        );
        assert_eq!(bus.subscriber_count(BaseTopic::Events), 1);
    }

    #[tokio::test]
    async fn failing_handlers_keep_receiving_and_do_not_affect_others() {
        let bus = TopicBus::default();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

        let failing = bus
            .spawn_handler("events", |_envelope| async { Err::<(), _>("boom") })
            .unwrap();
        let panicking = bus
            .spawn_handler("events", |envelope| async move {
                if envelope.payload.kind == "chat.panic" {
                    panic!("handler panicked");
                }
                Ok::<(), String>(())
            })
            .unwrap();
        let counting = bus
            .spawn_handler("events", move |envelope| {
                let seen_tx = seen_tx.clone();
                async move {
                    seen_tx
                        .send(envelope.payload.kind.clone())
                        .map_err(|e| e.to_string())
                }
            })
            .unwrap();

        for kind in ["chat.one", "chat.panic", "chat.two"] {
            bus.publish(BaseTopic::Events, &envelope(kind, Source::Chat));
        }

        for expected in ["chat.one", "chat.panic", "chat.two"] {
            let kind = tokio::time::timeout(Duration::from_secs(1), seen_rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(kind, expected);
        }

        let panicked = tokio::time::timeout(Duration::from_secs(1), panicking)
            .await
            .unwrap();
        assert!(panicked.unwrap_err().is_panic());
        assert!(!failing.is_finished());
        assert_eq!(bus.subscriber_count(BaseTopic::Events), 2);

        failing.abort();
        counting.abort();
    }
}
