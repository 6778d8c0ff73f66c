//! Error taxonomy of the orchestrator.

use crate::orchestrator::InitializationReport;
use alejo_core::{ComponentId, FailureCause};
use thiserror::Error;

/// Result alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Invalid registry contents. Fatal, raised before any component starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// A descriptor names a dependency that was never registered
    #[error("component `{component}` depends on unknown component `{dependency}`")]
    UnknownDependency {
        /// Dependent component
        component: ComponentId,
        /// Missing dependency
        dependency: ComponentId,
    },

    /// The same id was registered twice
    #[error("component `{0}` is already registered")]
    DuplicateComponent(ComponentId),

    /// The dependency graph is not acyclic
    #[error("dependency cycle closed at `{closed_at}`: {}", format_path(.path))]
    Cycle {
        /// Component whose visit closed the cycle
        closed_at: ComponentId,
        /// The cycle, starting and ending at `closed_at`
        path: Vec<ComponentId>,
    },

    /// A fallback was registered after its component was scheduled
    #[error("component `{0}` is already scheduled; fallbacks can no longer change")]
    FallbackAfterSchedule(ComponentId),

    /// An explicit request named an unregistered component
    #[error("unknown component `{0}`")]
    UnknownComponent(ComponentId),
}

fn format_path(path: &[ComponentId]) -> String {
    path.iter().map(ComponentId::as_str).collect::<Vec<_>>().join(" -> ")
}

/// The primary routine failed on every attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("component `{component}` failed after {attempts} attempt(s): {message}")]
pub struct ComponentFailure {
    /// Component
    pub component: ComponentId,
    /// Attempts made
    pub attempts: u32,
    /// Last error
    pub message: String,
}

/// The fallback routine failed or missed its deadline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("fallback `{fallback}` of `{component}` {}: {message}", outcome(.timed_out))]
pub struct FallbackFailure {
    /// Component
    pub component: ComponentId,
    /// Fallback candidate name
    pub fallback: String,
    /// Error text
    pub message: String,
    /// Whether the deadline fired
    pub timed_out: bool,
}

fn outcome(timed_out: &bool) -> &'static str {
    if *timed_out {
        "timed out"
    } else {
        "failed"
    }
}

/// Primary and fallback both failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{primary}; {fallback}")]
pub struct AggregateFailure {
    /// Original failure
    pub primary: ComponentFailure,
    /// Fallback failure
    #[source]
    pub fallback: FallbackFailure,
}

impl AggregateFailure {
    /// Structured cause for the runtime status.
    pub fn cause(&self) -> FailureCause {
        FailureCause::Fallback {
            primary: self.primary.message.clone(),
            fallback: self.fallback.message.clone(),
            timed_out: self.fallback.timed_out,
        }
    }
}

/// One essential component that ended `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EssentialFailure {
    /// Component
    pub component: ComponentId,
    /// Why it failed
    pub cause: FailureCause,
}

/// Errors returned by the orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Invalid registry
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Essential components failed; no further waves were dispatched
    #[error("essential component(s) failed: {}", format_failures(.failures))]
    EssentialAbort {
        /// Every essential failure of the aborted wave
        failures: Vec<EssentialFailure>,
        /// What happened before the abort
        report: Box<InitializationReport>,
    },

    /// Another run or load is in flight
    #[error("an initialization run is already in progress")]
    RunInProgress,
}

fn format_failures(failures: &[EssentialFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.component, f.cause))
        .collect::<Vec<_>>()
        .join(", ")
}

impl OrchestratorError {
    /// The configuration error, if this is one.
    pub fn as_configuration(&self) -> Option<&ConfigurationError> {
        match self {
            Self::Configuration(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_cycle_message_names_path() {
        let err = ConfigurationError::Cycle {
            closed_at: ComponentId::new("a"),
            path: vec![ComponentId::new("a"), ComponentId::new("b"), ComponentId::new("a")],
        };
        assert_eq!(err.to_string(), "dependency cycle closed at `a`: a -> b -> a");
    }

    #[test]
    fn test_aggregate_carries_both_causes() {
        let aggregate = AggregateFailure {
            primary: ComponentFailure {
                component: ComponentId::new("tts"),
                attempts: 3,
                message: "engine crashed".to_string(),
            },
            fallback: FallbackFailure {
                component: ComponentId::new("tts"),
                fallback: "default".to_string(),
                message: "deadline of 50ms exceeded".to_string(),
                timed_out: true,
            },
        };

        let text = aggregate.to_string();
        assert!(text.contains("engine crashed"));
        assert!(text.contains("timed out"));
        assert!(aggregate.source().is_some());
        assert!(matches!(aggregate.cause(), FailureCause::Fallback { timed_out: true, .. }));
    }

    #[test]
    fn test_essential_abort_lists_every_failure() {
        let err = OrchestratorError::EssentialAbort {
            failures: vec![
                EssentialFailure {
                    component: ComponentId::new("storage"),
                    cause: FailureCause::Primary {
                        message: "disk".to_string(),
                        attempts: 1,
                    },
                },
                EssentialFailure {
                    component: ComponentId::new("auth"),
                    cause: FailureCause::Primary {
                        message: "token".to_string(),
                        attempts: 1,
                    },
                },
            ],
            report: Box::default(),
        };

        let text = err.to_string();
        assert!(text.contains("storage"));
        assert!(text.contains("auth"));
    }
}
