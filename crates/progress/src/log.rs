//! Bounded status & event log.

use alejo_core::{Clock, ComponentId, EventType, LifecycleEvent, SystemClock, Time};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::debug;

/// Default number of retained events.
pub const DEFAULT_LOG_CAPACITY: usize = 500;

const SUBSCRIBER_BUFFER: usize = 256;

/// Filter for querying the log. All set fields must match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    /// Only events for this component
    pub component: Option<ComponentId>,

    /// Only these event types
    pub event_types: Option<Vec<EventType>>,

    /// Inclusive lower bound
    pub since: Option<Time>,

    /// Inclusive upper bound
    pub until: Option<Time>,

    /// Keep only the most recent N matches
    pub limit: Option<usize>,
}

impl EventFilter {
    /// Match everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to one component.
    pub fn component(mut self, id: impl Into<ComponentId>) -> Self {
        self.component = Some(id.into());
        self
    }

    /// Restrict to one event type (may be called repeatedly).
    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.event_types.get_or_insert_with(Vec::new).push(event_type);
        self
    }

    /// Restrict to a time range.
    pub fn between(mut self, since: Time, until: Time) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    /// Keep only the most recent `limit` matches.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether an event passes the filter (ignoring `limit`).
    pub fn matches(&self, event: &LifecycleEvent) -> bool {
        if let Some(component) = &self.component {
            if event.component_id.as_ref() != Some(component) {
                return false;
            }
        }

        if let Some(types) = &self.event_types {
            if !types.contains(&event.event_type) {
                return false;
            }
        }

        if let Some(since) = self.since {
            if event.timestamp < since {
                return false;
            }
        }

        if let Some(until) = self.until {
            if event.timestamp > until {
                return false;
            }
        }

        true
    }
}

/// Append-only log of lifecycle events with a fixed capacity.
///
/// When full, the oldest entry is evicted. Every append is mirrored to
/// `tracing` and broadcast to subscribers before `record` returns, so a
/// listener sees a transition before the orchestrator moves on.
pub struct EventLog {
    entries: Mutex<VecDeque<LifecycleEvent>>,
    capacity: usize,
    evicted: AtomicU64,
    sender: broadcast::Sender<LifecycleEvent>,
    clock: Arc<dyn Clock>,
}

impl EventLog {
    /// Create a log keeping at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self::with_clock(capacity, Arc::new(SystemClock))
    }

    /// Create a log stamping events with `clock`.
    pub fn with_clock(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        let (sender, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            evicted: AtomicU64::new(0),
            sender,
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<LifecycleEvent>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an event stamped with the log's clock.
    pub fn record(
        &self,
        event_type: EventType,
        component: Option<&ComponentId>,
        details: serde_json::Value,
    ) -> LifecycleEvent {
        let now = self.clock.now();
        let event = match component {
            Some(id) => LifecycleEvent::component(now, event_type, id.clone(), details),
            None => LifecycleEvent::system(now, event_type, details),
        };
        self.append(event.clone());
        event
    }

    /// Append a prepared event.
    pub fn append(&self, event: LifecycleEvent) {
        debug!(
            target: "alejo::lifecycle",
            event = %event.event_type,
            component = event.component_id.as_ref().map(|c| c.as_str()).unwrap_or("-"),
            details = %event.details,
        );

        {
            let mut entries = self.lock();
            while entries.len() >= self.capacity {
                entries.pop_front();
                self.evicted.fetch_add(1, Ordering::Relaxed);
            }
            entries.push_back(event.clone());
        }

        // No receivers is fine
        let _ = self.sender.send(event);
    }

    /// Query events in insertion order.
    pub fn query(&self, filter: &EventFilter) -> Vec<LifecycleEvent> {
        let entries = self.lock();
        let mut matches: Vec<_> = entries.iter().filter(|e| filter.matches(e)).cloned().collect();

        if let Some(limit) = filter.limit {
            let skip = matches.len().saturating_sub(limit);
            matches.drain(..skip);
        }

        matches
    }

    /// All retained events.
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.lock().iter().cloned().collect()
    }

    /// Events for one component.
    pub fn for_component(&self, id: &ComponentId) -> Vec<LifecycleEvent> {
        self.query(&EventFilter::new().component(id.clone()))
    }

    /// Subscribe to new events.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// Retained event count.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Maximum retained events.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events dropped to respect the capacity.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Drop all retained events.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}
