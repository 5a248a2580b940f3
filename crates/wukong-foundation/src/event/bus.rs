//! Event bus (C1) — typed publish/subscribe with per-listener error isolation.
//!
//! Listeners register by tag prefix or category; a listener error is caught
//! and never interrupts emission or surfaces to the publisher (spec §4.1,
//! §7 "Listener errors are sinks"). Within one tag, listeners run in
//! registration order (spec §5 "Ordering guarantees"); there is no ordering
//! guarantee across tags.

use super::types::{EventCategory, WukongEvent};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Implemented by anything that wants to observe bus events.
///
/// `on_event` must not panic; if it returns an `Err` the bus logs it (or
/// routes it to an error handler) and continues — a listener can never
/// interrupt publication (spec §4.1).
#[async_trait]
pub trait EventListener: Send + Sync {
    fn name(&self) -> &str;

    /// Tag prefixes this listener wants (e.g. `"step:"`). `None` = all tags.
    fn tag_prefixes(&self) -> Option<Vec<String>> {
        None
    }

    async fn on_event(&self, event: &WukongEvent) -> Result<(), String>;
}

/// Optional sink for listener errors. If absent, listener errors are logged
/// at `error` level and otherwise dropped.
#[async_trait]
pub trait ListenerErrorHandler: Send + Sync {
    async fn on_listener_error(&self, listener_name: &str, event: &WukongEvent, error: &str);
}

#[derive(Debug, Clone)]
pub struct EventBusConfig {
    pub history_size: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { history_size: 200 }
    }
}

struct Registered {
    listener: Arc<dyn EventListener>,
    prefixes: Option<Vec<String>>,
}

pub struct EventBus {
    config: EventBusConfig,
    listeners: RwLock<Vec<(ListenerId, Registered)>>,
    listener_counter: AtomicU64,
    history: RwLock<Vec<WukongEvent>>,
    error_handler: RwLock<Option<Arc<dyn ListenerErrorHandler>>>,
    event_count: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    pub fn with_config(config: EventBusConfig) -> Self {
        Self {
            config,
            listeners: RwLock::new(Vec::new()),
            listener_counter: AtomicU64::new(0),
            history: RwLock::new(Vec::new()),
            error_handler: RwLock::new(None),
            event_count: AtomicU64::new(0),
        }
    }

    /// Install a sink for listener errors; without one they are just logged.
    pub async fn set_error_handler(&self, handler: Arc<dyn ListenerErrorHandler>) {
        *self.error_handler.write().await = Some(handler);
    }

    pub async fn subscribe(&self, listener: Arc<dyn EventListener>) -> ListenerId {
        let id = ListenerId(self.listener_counter.fetch_add(1, Ordering::SeqCst));
        let prefixes = listener.tag_prefixes();
        let mut listeners = self.listeners.write().await;
        listeners.push((id, Registered { listener, prefixes }));
        id
    }

    pub async fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().await;
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Publish an event, awaiting every listener's handler in registration
    /// order (spec §5: "within a tag, listeners execute in registration
    /// order"; across emitters/tags there is no ordering guarantee).
    pub async fn publish(&self, event: WukongEvent) {
        self.event_count.fetch_add(1, Ordering::SeqCst);
        trace!(tag = %event.tag, "publishing event");

        {
            let mut history = self.history.write().await;
            history.push(event.clone());
            if history.len() > self.config.history_size {
                history.remove(0);
            }
        }

        let listeners = self.listeners.read().await;
        for (_, registered) in listeners.iter() {
            let matches = match &registered.prefixes {
                Some(prefixes) => prefixes.iter().any(|p| event.tag.starts_with(p.as_str())),
                None => true,
            };
            if !matches {
                continue;
            }

            if let Err(err) = registered.listener.on_event(&event).await {
                let handler = self.error_handler.read().await;
                match handler.as_ref() {
                    Some(h) => h.on_listener_error(registered.listener.name(), &event, &err).await,
                    None => error!(
                        listener = registered.listener.name(),
                        tag = %event.tag,
                        error = %err,
                        "event listener failed"
                    ),
                }
            }
        }
    }

    pub async fn history(&self, limit: Option<usize>) -> Vec<WukongEvent> {
        let history = self.history.read().await;
        let limit = limit.unwrap_or(history.len());
        history.iter().rev().take(limit).cloned().collect()
    }

    pub async fn history_by_category(&self, category: EventCategory) -> Vec<WukongEvent> {
        let history = self.history.read().await;
        history.iter().filter(|e| e.category == category).cloned().collect()
    }

    pub async fn listener_count(&self) -> usize {
        self.listeners.read().await.len()
    }

    pub fn event_count(&self) -> u64 {
        self.event_count.load(Ordering::SeqCst)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::types::events;
    use std::sync::atomic::AtomicUsize;

    struct CountingListener {
        name: String,
        count: AtomicUsize,
    }

    #[async_trait]
    impl EventListener for CountingListener {
        fn name(&self) -> &str {
            &self.name
        }

        async fn on_event(&self, _event: &WukongEvent) -> Result<(), String> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingListener;

    #[async_trait]
    impl EventListener for FailingListener {
        fn name(&self) -> &str {
            "failing"
        }

        async fn on_event(&self, _event: &WukongEvent) -> Result<(), String> {
            Err("boom".to_string())
        }
    }

    #[tokio::test]
    async fn publish_delivers_to_subscribed_listeners() {
        let bus = EventBus::new();
        let listener = Arc::new(CountingListener {
            name: "test".to_string(),
            count: AtomicUsize::new(0),
        });
        bus.subscribe(listener.clone()).await;

        bus.publish(events::session::created("s1")).await;
        assert_eq!(listener.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn listener_error_does_not_interrupt_emission() {
        let bus = EventBus::new();
        bus.subscribe(Arc::new(FailingListener)).await;
        let listener = Arc::new(CountingListener {
            name: "after".to_string(),
            count: AtomicUsize::new(0),
        });
        bus.subscribe(listener.clone()).await;

        bus.publish(events::session::created("s1")).await;
        assert_eq!(listener.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tag_prefix_filters_out_unrelated_events() {
        struct StepOnly(AtomicUsize);
        #[async_trait]
        impl EventListener for StepOnly {
            fn name(&self) -> &str {
                "step_only"
            }
            fn tag_prefixes(&self) -> Option<Vec<String>> {
                Some(vec!["step:".to_string()])
            }
            async fn on_event(&self, _event: &WukongEvent) -> Result<(), String> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let bus = EventBus::new();
        let listener = Arc::new(StepOnly(AtomicUsize::new(0)));
        bus.subscribe(listener.clone()).await;

        bus.publish(events::session::created("s1")).await;
        bus.publish(events::step::started("s1", 1)).await;

        assert_eq!(listener.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let bus = EventBus::with_config(EventBusConfig { history_size: 3 });
        for i in 0..10 {
            bus.publish(events::step::started("s1", i)).await;
        }
        assert_eq!(bus.history(None).await.len(), 3);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let listener = Arc::new(CountingListener {
            name: "test".to_string(),
            count: AtomicUsize::new(0),
        });
        let id = bus.subscribe(listener.clone()).await;
        bus.unsubscribe(id).await;

        bus.publish(events::session::created("s1")).await;
        assert_eq!(listener.count.load(Ordering::SeqCst), 0);
    }
}
