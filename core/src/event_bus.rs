//! In-process pub/sub of typed events.
//!
//! Every subscriber owns a bounded queue. Publishing never blocks: when a
//! subscriber's queue is full the event is dropped for that subscriber and a
//! counter incremented, so a slow observer can never stall a state machine.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use mcpproxy_protocol::Event;
use mcpproxy_protocol::EventKind;
use tokio::sync::mpsc;
use tracing::trace;

pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

struct SubscriberEntry {
    /// `None` subscribes to every kind.
    kinds: Option<HashSet<EventKind>>,
    tx: mpsc::Sender<Event>,
    dropped: Arc<AtomicU64>,
}

#[derive(Default)]
struct BusInner {
    subscribers: RwLock<Vec<SubscriberEntry>>,
    dropped_total: AtomicU64,
}

/// Cheaply cloneable handle to the bus.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

/// Receiving side of one subscription, owned by the subscriber.
pub struct EventSubscription {
    rx: mpsc::Receiver<Event>,
    dropped: Arc<AtomicU64>,
}

impl EventSubscription {
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Number of events dropped for this subscriber because its queue was
    /// full at publication time.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to the given kinds (`None` = all) with the default queue
    /// capacity.
    pub fn subscribe(&self, kinds: Option<HashSet<EventKind>>) -> EventSubscription {
        self.subscribe_with_capacity(kinds, DEFAULT_SUBSCRIBER_CAPACITY)
    }

    pub fn subscribe_with_capacity(
        &self,
        kinds: Option<HashSet<EventKind>>,
        capacity: usize,
    ) -> EventSubscription {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        let entry = SubscriberEntry {
            kinds,
            tx,
            dropped: Arc::clone(&dropped),
        };
        let mut subscribers = self
            .inner
            .subscribers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        subscribers.push(entry);
        EventSubscription { rx, dropped }
    }

    /// Deliver `event` to every interested subscriber without blocking.
    /// Subscribers whose receiver has been dropped are pruned here.
    pub fn publish(&self, event: Event) {
        trace!("event: {:?} from `{}`", event.kind(), event.server_name);
        let kind = event.kind();
        let mut subscribers = self
            .inner
            .subscribers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        subscribers.retain(|entry| {
            if entry.tx.is_closed() {
                return false;
            }
            let interested = match &entry.kinds {
                Some(kinds) => kinds.contains(&kind),
                None => true,
            };
            if !interested {
                return true;
            }
            match entry.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    entry.dropped.fetch_add(1, Ordering::Relaxed);
                    self.inner.dropped_total.fetch_add(1, Ordering::Relaxed);
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Total events dropped across all subscribers since startup.
    pub fn dropped_total(&self) -> u64 {
        self.inner.dropped_total.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpproxy_protocol::EventPayload;
    use pretty_assertions::assert_eq;

    fn tools_updated(server: &str, count: usize) -> Event {
        Event::now(server, EventPayload::ToolsUpdated { tool_count: count })
    }

    #[tokio::test]
    async fn filtered_subscribers_only_see_their_kinds() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(Some(HashSet::from([EventKind::ToolsUpdated])));

        bus.publish(Event::now("calc", EventPayload::ServerConfigChanged));
        bus.publish(tools_updated("calc", 2));

        let event = sub.recv().await.expect("event");
        assert_eq!(event.kind(), EventKind::ToolsUpdated);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn full_queue_drops_and_counts_instead_of_blocking() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe_with_capacity(None, 2);

        for i in 0..5 {
            bus.publish(tools_updated("calc", i));
        }

        assert_eq!(sub.dropped(), 3);
        assert_eq!(bus.dropped_total(), 3);

        // The two oldest events are the ones that made it through.
        let first = sub.recv().await.expect("first");
        match first.payload {
            EventPayload::ToolsUpdated { tool_count } => assert_eq!(tool_count, 0),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropped_receivers_are_pruned_on_publish() {
        let bus = EventBus::new();
        let sub = bus.subscribe(None);
        assert_eq!(bus.subscriber_count(), 1);

        drop(sub);
        bus.publish(tools_updated("calc", 1));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn publish_order_is_preserved_per_subscriber() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(None);
        for i in 0..10 {
            bus.publish(tools_updated("calc", i));
        }
        for i in 0..10 {
            let event = sub.recv().await.expect("event");
            match event.payload {
                EventPayload::ToolsUpdated { tool_count } => assert_eq!(tool_count, i),
                other => panic!("unexpected payload {other:?}"),
            }
        }
    }
}
