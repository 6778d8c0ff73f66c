//! ALEJO core data models.
//!
//! This crate defines the data structures shared by the component
//! initialization orchestrator: descriptors, runtime status, fallback
//! records, loading phases and lifecycle events.

#![warn(missing_docs)]

// Core identities
mod id;

// Components
mod component;
mod status;
mod routine;

// Scheduling inputs
mod phase;
mod clock;

// Timeline
mod event;

// Re-exports
pub use id::*;

pub use component::{
    ComponentDescriptor, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY_BASE_MS, DEFAULT_TIMEOUT_MS,
};
pub use status::{ComponentState, FailureCause, RuntimeStatus};
pub use routine::{FallbackRecord, FnRoutine, Routine, RoutineOutput};
pub use phase::{ParseLevelError, Phase, ResourceLevel, ResourceReadings, ResourceSnapshot};
pub use clock::{Clock, ManualClock, SystemClock};
pub use event::{EventType, LifecycleEvent};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
