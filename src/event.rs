// src/event.rs

//! Async event bus
//!
//! Transport for the page-level contracts: marker clicks, the custom
//! terms-modal event, loader lifecycle notifications, and uncaught page
//! errors. Delivery is synchronous fan-out to subscription channels; there
//! is no worker pool, persistence, or replay.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::channel::mpsc;
use futures::StreamExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, ErrorKind, EventOperation, Result};
use crate::manager::{ManagedState, Manager, ManagerStatus};
use crate::types::Metadata;

/// Base event trait that all events must implement
pub trait Event: Send + Sync + Debug {
    /// Get the event type identifier
    fn event_type(&self) -> &'static str;

    /// Get the event source
    fn source(&self) -> &str;

    /// Get event metadata
    fn metadata(&self) -> &Metadata;

    /// Get event as Any for downcasting
    fn as_any(&self) -> &dyn Any;

    /// Get event timestamp (default implementation)
    fn timestamp(&self) -> DateTime<Utc> {
        Utc::now()
    }

    /// Get event priority (default is normal)
    fn priority(&self) -> EventPriority {
        EventPriority::Normal
    }
}

/// Event priority levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventPriority {
    /// Low priority events (background diagnostics)
    Low = 0,
    /// Normal priority events
    Normal = 50,
    /// High priority events (user actions)
    High = 100,
}

impl Default for EventPriority {
    fn default() -> Self {
        Self::Normal
    }
}

/// Event handler trait for processing events
#[async_trait]
pub trait EventHandler: Send + Sync + Debug {
    /// Handle an event
    async fn handle(&self, event: &dyn Event) -> Result<()>;

    /// Get handler name for debugging
    fn name(&self) -> &str;
}

/// Event subscription filter
#[derive(Debug, Clone)]
pub struct EventFilter {
    /// Event types to match (empty means all)
    pub event_types: Vec<String>,
    /// Source patterns to match
    pub source_patterns: Vec<String>,
    /// Minimum priority level
    pub min_priority: EventPriority,
}

impl EventFilter {
    /// Create a new event filter
    pub fn new() -> Self {
        Self {
            event_types: Vec::new(),
            source_patterns: Vec::new(),
            min_priority: EventPriority::Low,
        }
    }

    /// Add event type filter
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_types.push(event_type.into());
        self
    }

    /// Add source pattern filter
    pub fn with_source_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.source_patterns.push(pattern.into());
        self
    }

    /// Set minimum priority
    pub fn with_min_priority(mut self, priority: EventPriority) -> Self {
        self.min_priority = priority;
        self
    }

    /// Check if an event matches this filter
    pub fn matches(&self, event: &dyn Event) -> bool {
        if !self.event_types.is_empty()
            && !self.event_types.contains(&event.event_type().to_string())
        {
            return false;
        }

        if !self.source_patterns.is_empty() {
            let source = event.source();
            if !self
                .source_patterns
                .iter()
                .any(|pattern| pattern == "*" || source.contains(pattern.as_str()))
            {
                return false;
            }
        }

        if event.priority() < self.min_priority {
            return false;
        }

        true
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Event subscription
pub struct EventSubscription {
    pub id: Uuid,
    pub filter: EventFilter,
    pub sender: mpsc::UnboundedSender<Arc<dyn Event>>,
    pub created_at: DateTime<Utc>,
    pub active: bool,
}

impl Debug for EventSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSubscription")
            .field("id", &self.id)
            .field("filter", &self.filter)
            .field("created_at", &self.created_at)
            .field("active", &self.active)
            .finish()
    }
}

/// Event statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventStats {
    pub total_published: u64,
    pub total_processed: u64,
    pub total_failed: u64,
    pub events_by_type: HashMap<String, u64>,
    pub avg_processing_time_ms: f64,
    pub active_subscriptions: usize,
}

/// Event bus manager
pub struct EventBusManager {
    state: ManagedState,
    subscriptions: Arc<DashMap<Uuid, EventSubscription>>,
    stats: Arc<RwLock<EventStats>>,
}

impl Debug for EventBusManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBusManager")
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

impl EventBusManager {
    /// Create a new event bus manager
    pub fn new() -> Self {
        Self {
            state: ManagedState::new(Uuid::new_v4(), "event_bus_manager"),
            subscriptions: Arc::new(DashMap::new()),
            stats: Arc::new(RwLock::new(EventStats::default())),
        }
    }

    /// Publish an event to the bus
    pub fn publish<E: Event + 'static>(&self, event: E) -> Result<()> {
        let event_arc: Arc<dyn Event> = Arc::new(event);

        {
            let mut stats = self.stats.write();
            stats.total_published += 1;
            *stats
                .events_by_type
                .entry(event_arc.event_type().to_string())
                .or_insert(0) += 1;
        }

        self.fan_out(event_arc);
        Ok(())
    }

    fn fan_out(&self, event: Arc<dyn Event>) {
        let start_time = Instant::now();

        let matching: Vec<Uuid> = self
            .subscriptions
            .iter()
            .filter_map(|entry| {
                let subscription = entry.value();
                if subscription.active && subscription.filter.matches(event.as_ref()) {
                    Some(subscription.id)
                } else {
                    None
                }
            })
            .collect();

        let mut failed_deliveries = 0;
        for subscription_id in matching {
            if let Some(subscription) = self.subscriptions.get(&subscription_id) {
                if subscription
                    .sender
                    .unbounded_send(Arc::clone(&event))
                    .is_err()
                {
                    failed_deliveries += 1;
                    drop(subscription);
                    // Receiver gone; drop the dead subscription
                    self.subscriptions.remove(&subscription_id);
                }
            }
        }

        let processing_time = start_time.elapsed();
        let mut stats = self.stats.write();
        stats.total_processed += 1;
        if failed_deliveries > 0 {
            stats.total_failed += 1;
        }
        let total_processed = stats.total_processed;
        stats.avg_processing_time_ms = (stats.avg_processing_time_ms
            * (total_processed - 1) as f64
            + processing_time.as_millis() as f64)
            / total_processed as f64;
        stats.active_subscriptions = self.subscriptions.len();
    }

    /// Subscribe to events with a filter
    pub fn subscribe(&self, filter: EventFilter) -> mpsc::UnboundedReceiver<Arc<dyn Event>> {
        let (sender, receiver) = mpsc::unbounded::<Arc<dyn Event>>();
        let subscription_id = Uuid::new_v4();

        let subscription = EventSubscription {
            id: subscription_id,
            filter,
            sender,
            created_at: Utc::now(),
            active: true,
        };

        self.subscriptions.insert(subscription_id, subscription);
        self.stats.write().active_subscriptions = self.subscriptions.len();

        receiver
    }

    /// Subscribe with a handler driven by a spawned task
    pub fn subscribe_with_handler<H: EventHandler + 'static>(
        &self,
        filter: EventFilter,
        handler: Arc<H>,
    ) -> tokio::task::JoinHandle<()> {
        let mut receiver = self.subscribe(filter);
        let handler_name = handler.name().to_string();

        tokio::spawn(async move {
            while let Some(event) = receiver.next().await {
                if let Err(e) = handler.handle(event.as_ref()).await {
                    tracing::error!("Handler '{}' failed to process event: {}", handler_name, e);
                }
            }
        })
    }

    /// Unsubscribe from events
    pub fn unsubscribe(&self, subscription_id: Uuid) -> Result<()> {
        self.subscriptions.remove(&subscription_id).ok_or_else(|| {
            Error::new(
                ErrorKind::Event {
                    event_type: None,
                    subscriber_id: Some(subscription_id),
                    operation: EventOperation::Unsubscribe,
                },
                "Subscription not found",
            )
        })?;

        self.stats.write().active_subscriptions = self.subscriptions.len();
        tracing::debug!("Removed subscription: {}", subscription_id);
        Ok(())
    }

    /// Get event bus statistics
    pub fn stats(&self) -> EventStats {
        self.stats.read().clone()
    }
}

impl Default for EventBusManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Manager for EventBusManager {
    fn name(&self) -> &str {
        "event_bus_manager"
    }

    fn id(&self) -> Uuid {
        self.state.id()
    }

    async fn initialize(&mut self) -> Result<()> {
        self.state
            .set_state(crate::manager::ManagerState::Initializing)
            .await;
        self.state
            .set_state(crate::manager::ManagerState::Running)
            .await;
        tracing::info!("Event bus manager initialized");
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.state
            .set_state(crate::manager::ManagerState::ShuttingDown)
            .await;

        self.subscriptions.clear();

        self.state
            .set_state(crate::manager::ManagerState::Shutdown)
            .await;
        tracing::info!("Event bus manager shut down");
        Ok(())
    }

    async fn status(&self) -> ManagerStatus {
        let mut status = self.state.status().await;
        let stats = self.stats();

        status.add_metadata(
            "total_published",
            serde_json::Value::from(stats.total_published),
        );
        status.add_metadata("total_failed", serde_json::Value::from(stats.total_failed));
        status.add_metadata(
            "active_subscriptions",
            serde_json::Value::from(stats.active_subscriptions),
        );

        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Debug, Clone)]
    struct TestEvent {
        source: String,
        metadata: Metadata,
    }

    impl Event for TestEvent {
        fn event_type(&self) -> &'static str {
            "test.event"
        }

        fn source(&self) -> &str {
            &self.source
        }

        fn metadata(&self) -> &Metadata {
            &self.metadata
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn test_event() -> TestEvent {
        TestEvent {
            source: "test".to_string(),
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_event_publishing() {
        let mut bus = EventBusManager::new();
        bus.initialize().await.unwrap();

        bus.publish(test_event()).unwrap();

        let stats = bus.stats();
        assert_eq!(stats.total_published, 1);
        assert_eq!(stats.events_by_type.get("test.event"), Some(&1));

        bus.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_event_subscription_receives_matching() {
        let mut bus = EventBusManager::new();
        bus.initialize().await.unwrap();

        let filter = EventFilter::new().with_event_type("test.event");
        let mut receiver = bus.subscribe(filter);

        bus.publish(test_event()).unwrap();

        let received = tokio::time::timeout(Duration::from_millis(100), receiver.next())
            .await
            .expect("delivery should be immediate")
            .expect("channel open");
        assert_eq!(received.event_type(), "test.event");

        bus.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_handler_subscription_processes_events() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        #[derive(Debug)]
        struct CountingHandler {
            seen: AtomicUsize,
        }

        #[async_trait]
        impl EventHandler for CountingHandler {
            async fn handle(&self, _event: &dyn Event) -> Result<()> {
                self.seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }

            fn name(&self) -> &str {
                "counting_handler"
            }
        }

        let bus = EventBusManager::new();
        let handler = Arc::new(CountingHandler {
            seen: AtomicUsize::new(0),
        });
        let task = bus.subscribe_with_handler(
            EventFilter::new().with_event_type("test.event"),
            Arc::clone(&handler),
        );

        bus.publish(test_event()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(handler.seen.load(Ordering::SeqCst), 1);
        task.abort();
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_subscription() {
        let bus = EventBusManager::new();
        let receiver = bus.subscribe(EventFilter::new());
        let id = bus.subscriptions.iter().next().unwrap().id;

        bus.unsubscribe(id).unwrap();
        assert!(bus.unsubscribe(id).is_err());
        drop(receiver);
    }

    #[test]
    fn test_event_filter() {
        let filter = EventFilter::new()
            .with_event_type("test.event")
            .with_source_pattern("test")
            .with_min_priority(EventPriority::Normal);

        assert!(filter.matches(&test_event()));

        let filter_no_match = EventFilter::new().with_event_type("other.event");
        assert!(!filter_no_match.matches(&test_event()));
    }
}
