//! Runtime status of a component.

use crate::Time;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentState {
    /// Registered, not yet scheduled
    Pending,
    /// Primary or fallback routine is running
    Initializing,
    /// Primary routine succeeded
    Initialized,
    /// Degraded routine succeeded
    Fallback,
    /// Primary and fallback exhausted
    Failed,
    /// Withheld from the current run
    Deferred,
}

impl ComponentState {
    /// Whether the state ends a run for this component.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Initialized | Self::Fallback | Self::Failed)
    }

    /// Whether dependents may rely on this component.
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Initialized | Self::Fallback)
    }

    /// Whether `self -> next` is an allowed transition.
    ///
    /// ```text
    /// Pending -> Initializing -> {Initialized | Fallback | Failed}
    /// Pending <-> Deferred
    /// ```
    pub fn can_transition_to(self, next: ComponentState) -> bool {
        use ComponentState::*;
        matches!(
            (self, next),
            (Pending, Initializing)
                | (Pending, Deferred)
                | (Deferred, Pending)
                | (Initializing, Initialized)
                | (Initializing, Fallback)
                | (Initializing, Failed)
        )
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Initializing => write!(f, "initializing"),
            Self::Initialized => write!(f, "initialized"),
            Self::Fallback => write!(f, "fallback"),
            Self::Failed => write!(f, "failed"),
            Self::Deferred => write!(f, "deferred"),
        }
    }
}

/// Why a component ended up `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureCause {
    /// Primary exhausted, no fallback registered
    Primary {
        /// Last primary error
        message: String,
        /// Attempts made
        attempts: u32,
    },
    /// Primary exhausted and the fallback failed too
    Fallback {
        /// Last primary error
        primary: String,
        /// Fallback error (or timeout)
        fallback: String,
        /// Whether the fallback hit its deadline
        timed_out: bool,
    },
    /// A dependency failed so this component never ran
    DependencyFailed {
        /// The failed dependency
        dependency: String,
    },
    /// The routine panicked
    Panicked {
        /// Panic description
        message: String,
    },
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary { message, attempts } => {
                write!(f, "primary failed after {} attempt(s): {}", attempts, message)
            }
            Self::Fallback {
                primary,
                fallback,
                timed_out,
            } => {
                if *timed_out {
                    write!(f, "primary failed: {}; fallback timed out: {}", primary, fallback)
                } else {
                    write!(f, "primary failed: {}; fallback failed: {}", primary, fallback)
                }
            }
            Self::DependencyFailed { dependency } => {
                write!(f, "dependency `{}` failed", dependency)
            }
            Self::Panicked { message } => write!(f, "routine panicked: {}", message),
        }
    }
}

/// Mutable runtime status, one per registered descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeStatus {
    /// Current state
    pub state: ComponentState,

    /// When initialization started
    pub started_at: Option<Time>,

    /// When a terminal state was reached
    pub ended_at: Option<Time>,

    /// Whether the degraded routine is in use
    pub using_fallback: bool,

    /// Failure details, if any
    pub last_error: Option<FailureCause>,

    /// Primary attempts made in the last run
    pub attempt_count: u32,

    /// Whether the fallback in use keeps accessibility features intact
    pub preserves_accessibility: Option<bool>,

    /// Whether the fallback in use is a stub
    pub fallback_is_stub: Option<bool>,
}

impl RuntimeStatus {
    /// Fresh status for a newly registered component.
    pub fn pending() -> Self {
        Self {
            state: ComponentState::Pending,
            started_at: None,
            ended_at: None,
            using_fallback: false,
            last_error: None,
            attempt_count: 0,
            preserves_accessibility: None,
            fallback_is_stub: None,
        }
    }

    /// Duration between start and end, when both are known.
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.ended_at? - self.started_at?)
    }
}

impl Default for RuntimeStatus {
    fn default() -> Self {
        Self::pending()
    }
}
