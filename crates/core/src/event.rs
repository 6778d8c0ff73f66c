//! Lifecycle events - atoms of the initialization timeline.

use crate::id::{ComponentId, EventId};
use crate::Time;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A component was registered
    Registered,
    /// A fallback candidate was registered
    FallbackRegistered,
    /// An initialization run started
    RunStarted,
    /// An initialization run finished
    RunCompleted,
    /// A run stopped on an essential failure
    RunAborted,
    /// A wave was dispatched
    WaveStarted,
    /// Every member of a wave settled
    WaveCompleted,
    /// Pending -> Initializing
    Started,
    /// A primary attempt failed
    AttemptFailed,
    /// Waiting before the next attempt
    Retrying,
    /// Initializing -> Initialized
    Initialized,
    /// Fallback routine invoked
    FallbackStarted,
    /// Initializing -> Fallback
    FallbackSucceeded,
    /// Initializing -> Failed
    Failed,
    /// Pending -> Deferred
    Deferred,
    /// Deferred -> Pending on explicit load
    Resumed,
    /// Phase membership computed
    PhasesAssigned,
}

impl EventType {
    /// Whether this event ends a component's run.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Initialized | Self::FallbackSucceeded | Self::Failed)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Registered => "registered",
            Self::FallbackRegistered => "fallback_registered",
            Self::RunStarted => "run_started",
            Self::RunCompleted => "run_completed",
            Self::RunAborted => "run_aborted",
            Self::WaveStarted => "wave_started",
            Self::WaveCompleted => "wave_completed",
            Self::Started => "started",
            Self::AttemptFailed => "attempt_failed",
            Self::Retrying => "retrying",
            Self::Initialized => "initialized",
            Self::FallbackStarted => "fallback_started",
            Self::FallbackSucceeded => "fallback_succeeded",
            Self::Failed => "failed",
            Self::Deferred => "deferred",
            Self::Resumed => "resumed",
            Self::PhasesAssigned => "phases_assigned",
        };
        f.write_str(s)
    }
}

/// A single entry of the status log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Unique identifier
    pub id: EventId,

    /// When it happened
    pub timestamp: Time,

    /// What happened
    pub event_type: EventType,

    /// Component concerned, `None` for run/wave events
    pub component_id: Option<ComponentId>,

    /// Free-form details
    pub details: serde_json::Value,
}

impl LifecycleEvent {
    /// Create an event for a component.
    pub fn component(
        timestamp: Time,
        event_type: EventType,
        component_id: ComponentId,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: EventId::new(),
            timestamp,
            event_type,
            component_id: Some(component_id),
            details,
        }
    }

    /// Create a run-level event.
    pub fn system(timestamp: Time, event_type: EventType, details: serde_json::Value) -> Self {
        Self {
            id: EventId::new(),
            timestamp,
            event_type,
            component_id: None,
            details,
        }
    }
}
