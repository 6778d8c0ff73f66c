//! Status tracking
//!
//! Bounded lifecycle event log and the timeline derived from it.

#![warn(missing_docs)]

pub mod log;
pub mod timeline;

pub use log::{EventFilter, EventLog, DEFAULT_LOG_CAPACITY};
pub use timeline::{ComponentTimeline, Timeline, TimelineStats};
