//! C6 — typed pub/sub with filters, bounded history and concurrent,
//! per-subscriber-ordered delivery.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use discovery_core::{Event, EventKind, Priority};
use futures::future::join_all;
use tokio::sync::RwLock;
use uuid::Uuid;

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &Event);
}

/// Wraps a plain closure so callers don't need to hand-write an
/// [`EventHandler`] impl for the common case.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&Event) + Send + Sync,
{
    async fn handle_event(&self, event: &Event) {
        (self.0)(event)
    }
}

#[derive(Default, Clone)]
pub struct Filter {
    pub event_types: Option<HashSet<String>>,
    pub sources: Option<HashSet<String>>,
    pub min_priority: Option<Priority>,
    pub predicate: Option<Arc<dyn Fn(&Event) -> bool + Send + Sync>>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn matches(&self, event: &Event) -> bool {
        if let Some(types) = &self.event_types {
            if !types.contains(event.kind.type_name()) {
                return false;
            }
        }
        if let Some(sources) = &self.sources {
            if !sources.contains(&event.source) {
                return false;
            }
        }
        if let Some(min) = self.min_priority {
            if event.priority < min {
                return false;
            }
        }
        if let Some(pred) = &self.predicate {
            if !pred(event) {
                return false;
            }
        }
        true
    }
}

struct Subscription {
    id: Uuid,
    handler: Arc<dyn EventHandler>,
    filter: Filter,
    event_count: AtomicU64,
    last_event_time: RwLock<Option<DateTime<Utc>>>,
}

pub struct Statistics {
    pub total_published: u64,
    pub subscription_count: usize,
    pub uptime_s: f64,
    pub history_size: usize,
}

/// Owns the subscription table and the bounded history ring exclusively
///. Subscriptions and history sit behind separate
/// locks, never held across a callback invocation.
pub struct EventBus {
    max_history: usize,
    subscriptions: RwLock<Vec<Arc<Subscription>>>,
    history: RwLock<VecDeque<Event>>,
    total_published: AtomicU64,
    started_at: DateTime<Utc>,
    shutdown: RwLock<bool>,
}

impl EventBus {
    pub fn new(max_history: usize) -> Self {
        EventBus {
            max_history,
            subscriptions: RwLock::new(Vec::new()),
            history: RwLock::new(VecDeque::new()),
            total_published: AtomicU64::new(0),
            started_at: Utc::now(),
            shutdown: RwLock::new(false),
        }
    }

    pub async fn subscribe(&self, handler: Arc<dyn EventHandler>, filter: Option<Filter>) -> Uuid {
        let id = Uuid::new_v4();
        let sub = Arc::new(Subscription {
            id,
            handler,
            filter: filter.unwrap_or_default(),
            event_count: AtomicU64::new(0),
            last_event_time: RwLock::new(None),
        });
        self.subscriptions.write().await.push(sub);
        id
    }

    pub async fn unsubscribe(&self, id: Uuid) -> bool {
        let mut subs = self.subscriptions.write().await;
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Appends to history, then dispatches to every matching subscriber
    /// concurrently. A failing callback (panic caught at the join point by
    /// virtue of `handle_event` never returning `Result`) never blocks or
    /// skips others. Returns the number of subscribers the event was
    /// delivered to.
    pub async fn publish(&self, event: Event) -> usize {
        if *self.shutdown.read().await {
            return 0;
        }

        self.total_published.fetch_add(1, Ordering::Relaxed);
        {
            let mut history = self.history.write().await;
            if history.len() == self.max_history {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        let subs: Vec<Arc<Subscription>> = self.subscriptions.read().await.clone();
        let matching: Vec<Arc<Subscription>> = subs
            .into_iter()
            .filter(|s| s.filter.matches(&event))
            .collect();
        let delivered = matching.len();

        let tasks = matching.into_iter().map(|sub| {
            let event = event.clone();
            async move {
                sub.handler.handle_event(&event).await;
                sub.event_count.fetch_add(1, Ordering::Relaxed);
                *sub.last_event_time.write().await = Some(event.timestamp);
            }
        });
        join_all(tasks).await;
        delivered
    }

    pub async fn event_history(
        &self,
        types: Option<&HashSet<String>>,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Vec<Event> {
        let history = self.history.read().await;
        let mut out: Vec<Event> = history
            .iter()
            .rev()
            .filter(|e| types.map(|t| t.contains(e.kind.type_name())).unwrap_or(true))
            .filter(|e| since.map(|s| e.timestamp >= s).unwrap_or(true))
            .cloned()
            .collect();
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        out
    }

    pub async fn statistics(&self) -> Statistics {
        Statistics {
            total_published: self.total_published.load(Ordering::Relaxed),
            subscription_count: self.subscriptions.read().await.len(),
            uptime_s: (Utc::now() - self.started_at).num_milliseconds() as f64 / 1000.0,
            history_size: self.history.read().await.len(),
        }
    }

    /// Clears subscriptions and history; subsequent `publish` calls become
    /// no-ops delivering zero.
    pub async fn shutdown(&self) {
        *self.shutdown.write().await = true;
        self.subscriptions.write().await.clear();
        self.history.write().await.clear();
    }
}

pub fn device_event_type(kind: &EventKind) -> &'static str {
    kind.type_name()
}

#[cfg(test)]
mod tests {
    use super::*;
    use discovery_core::Device;
    use std::sync::Mutex as StdMutex;

    fn device_discovered_event(source: &str, priority: Priority) -> Event {
        Event {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            priority,
            source: source.to_string(),
            metadata: Default::default(),
            kind: EventKind::DeviceDiscovered {
                device: Device::new("id-1", "10.0.0.1", "mdns"),
                protocol: "mdns".to_string(),
                is_new: true,
            },
        }
    }

    struct RecordingHandler(Arc<StdMutex<Vec<Uuid>>>);

    #[async_trait::async_trait]
    impl EventHandler for RecordingHandler {
        async fn handle_event(&self, event: &Event) {
            self.0.lock().unwrap().push(event.event_id);
        }
    }

    #[tokio::test]
    async fn publish_delivers_to_matching_subscribers_in_order() {
        let bus = EventBus::new(100);
        let seen = Arc::new(StdMutex::new(Vec::new()));
        bus.subscribe(Arc::new(RecordingHandler(seen.clone())), None)
            .await;

        let e1 = device_discovered_event("mdns", Priority::Normal);
        let e2 = device_discovered_event("mdns", Priority::Normal);
        bus.publish(e1.clone()).await;
        bus.publish(e2.clone()).await;

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![e1.event_id, e2.event_id]);
    }

    #[tokio::test]
    async fn min_priority_filter_drops_low_priority_events() {
        let bus = EventBus::new(100);
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let filter = Filter {
            min_priority: Some(Priority::High),
            ..Filter::new()
        };
        bus.subscribe(Arc::new(RecordingHandler(seen.clone())), Some(filter))
            .await;

        bus.publish(device_discovered_event("mdns", Priority::Low)).await;
        let delivered = bus.publish(device_discovered_event("mdns", Priority::Critical)).await;

        assert_eq!(delivered, 1);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn history_is_capped_and_newest_first() {
        let bus = EventBus::new(2);
        bus.publish(device_discovered_event("a", Priority::Normal)).await;
        bus.publish(device_discovered_event("b", Priority::Normal)).await;
        bus.publish(device_discovered_event("c", Priority::Normal)).await;

        let history = bus.event_history(None, None, None).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].source, "c");
        assert_eq!(history[1].source, "b");
    }

    #[tokio::test]
    async fn shutdown_clears_state_and_publish_becomes_noop() {
        let bus = EventBus::new(10);
        bus.subscribe(Arc::new(RecordingHandler(Arc::new(StdMutex::new(Vec::new())))), None)
            .await;
        bus.publish(device_discovered_event("a", Priority::Normal)).await;

        bus.shutdown().await;
        let delivered = bus.publish(device_discovered_event("a", Priority::Normal)).await;
        assert_eq!(delivered, 0);
        assert_eq!(bus.event_history(None, None, None).await.len(), 0);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = EventBus::new(10);
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let id = bus
            .subscribe(Arc::new(RecordingHandler(seen.clone())), None)
            .await;
        assert!(bus.unsubscribe(id).await);
        bus.publish(device_discovered_event("a", Priority::Normal)).await;
        assert!(seen.lock().unwrap().is_empty());
    }
}
