//! Per-component timeline derived from the event log.

use alejo_core::{ComponentId, ComponentState, EventType, LifecycleEvent, Time};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Start, end and outcome of one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentTimeline {
    /// Component
    pub component_id: ComponentId,

    /// Last `Started` event
    pub start: Option<Time>,

    /// Terminal event
    pub end: Option<Time>,

    /// `end - start` in milliseconds
    pub duration_ms: Option<i64>,

    /// Latest known state
    pub status: ComponentState,

    /// Failed primary attempts seen
    pub failed_attempts: u32,

    /// Whether a fallback was invoked
    pub used_fallback: bool,
}

impl ComponentTimeline {
    fn new(component_id: ComponentId) -> Self {
        Self {
            component_id,
            start: None,
            end: None,
            duration_ms: None,
            status: ComponentState::Pending,
            failed_attempts: 0,
            used_fallback: false,
        }
    }

    fn apply(&mut self, event: &LifecycleEvent) {
        match event.event_type {
            EventType::Started => {
                self.start = Some(event.timestamp);
                self.end = None;
                self.duration_ms = None;
                self.status = ComponentState::Initializing;
                self.failed_attempts = 0;
                self.used_fallback = false;
            }
            EventType::AttemptFailed => self.failed_attempts += 1,
            EventType::FallbackStarted => self.used_fallback = true,
            EventType::Initialized => self.finish(event.timestamp, ComponentState::Initialized),
            EventType::FallbackSucceeded => self.finish(event.timestamp, ComponentState::Fallback),
            EventType::Failed => self.finish(event.timestamp, ComponentState::Failed),
            EventType::Deferred => self.status = ComponentState::Deferred,
            EventType::Resumed => self.status = ComponentState::Pending,
            _ => {}
        }
    }

    fn finish(&mut self, at: Time, status: ComponentState) {
        self.end = Some(at);
        self.status = status;
        self.duration_ms = self.start.map(|start| (at - start).num_milliseconds());
    }
}

/// Aggregate statistics over a timeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimelineStats {
    /// Components seen
    pub total: usize,
    /// Reached `Initialized`
    pub initialized: usize,
    /// Reached `Fallback`
    pub fallback: usize,
    /// Reached `Failed`
    pub failed: usize,
    /// Currently deferred
    pub deferred: usize,
    /// Started but not finished
    pub in_progress: usize,
    /// Mean duration of finished components
    pub average_duration_ms: Option<f64>,
    /// Longest finished component
    pub slowest: Option<(ComponentId, i64)>,
    /// First start to last end
    pub total_span_ms: Option<i64>,
}

/// Timeline of every component that appears in a set of events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    entries: Vec<ComponentTimeline>,
}

impl Timeline {
    /// Fold events in timestamp order (stable for equal timestamps).
    pub fn from_events(events: &[LifecycleEvent]) -> Self {
        let mut ordered: Vec<&LifecycleEvent> = events.iter().collect();
        ordered.sort_by_key(|e| e.timestamp);

        let mut index: HashMap<ComponentId, usize> = HashMap::new();
        let mut entries: Vec<ComponentTimeline> = Vec::new();

        for event in ordered {
            let Some(id) = &event.component_id else {
                continue;
            };

            let slot = *index.entry(id.clone()).or_insert_with(|| {
                entries.push(ComponentTimeline::new(id.clone()));
                entries.len() - 1
            });
            entries[slot].apply(event);
        }

        // Started components first, by start time; the rest keep first-seen order
        entries.sort_by(|a, b| match (a.start, b.start) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });

        Self { entries }
    }

    /// All entries, earliest start first.
    pub fn entries(&self) -> &[ComponentTimeline] {
        &self.entries
    }

    /// Entry for one component.
    pub fn get(&self, id: &str) -> Option<&ComponentTimeline> {
        self.entries.iter().find(|e| e.component_id.as_str() == id)
    }

    /// Compute aggregate statistics.
    pub fn stats(&self) -> TimelineStats {
        let mut stats = TimelineStats {
            total: self.entries.len(),
            ..Default::default()
        };

        let mut durations = Vec::new();
        for entry in &self.entries {
            match entry.status {
                ComponentState::Initialized => stats.initialized += 1,
                ComponentState::Fallback => stats.fallback += 1,
                ComponentState::Failed => stats.failed += 1,
                ComponentState::Deferred => stats.deferred += 1,
                ComponentState::Initializing => stats.in_progress += 1,
                ComponentState::Pending => {}
            }

            if let Some(ms) = entry.duration_ms {
                durations.push(ms);
                let slower = stats.slowest.as_ref().map_or(true, |(_, best)| ms > *best);
                if slower {
                    stats.slowest = Some((entry.component_id.clone(), ms));
                }
            }
        }

        if !durations.is_empty() {
            let sum: i64 = durations.iter().sum();
            stats.average_duration_ms = Some(sum as f64 / durations.len() as f64);
        }

        let first_start = self.entries.iter().filter_map(|e| e.start).min();
        let last_end = self.entries.iter().filter_map(|e| e.end).max();
        if let (Some(start), Some(end)) = (first_start, last_end) {
            stats.total_span_ms = Some((end - start).num_milliseconds());
        }

        stats
    }
}
