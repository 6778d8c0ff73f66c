//! Execution layer - dependency resolution, phasing, fallbacks and runs.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod registry;
pub mod selector;
pub mod dependency;
pub mod scheduler;
pub mod engine;
pub mod telemetry;
pub mod orchestrator;

pub use config::{ConservationThresholds, EngineConfig, OrchestratorConfig, PhaseThresholds};
pub use error::{
    AggregateFailure, ComponentFailure, ConfigurationError, EssentialFailure, FallbackFailure,
    OrchestratorError, Result,
};
pub use registry::{ComponentRegistry, RegisteredComponent, SharedRegistry};
pub use selector::{FallbackSelection, FallbackSelector, FirstRegisteredSelector, PrioritySelector};
pub use dependency::{DependencyResolver, ExecutionPlan};
pub use scheduler::{PhaseAssigner, PhaseAssignment};
pub use engine::FallbackEngine;
pub use telemetry::{StaticTelemetry, TelemetryProvider};
pub use orchestrator::{
    ComponentOutcome, ComponentSnapshot, InitOptions, InitializationPlan, InitializationReport,
    LoadReport,
    Orchestrator, StateCounts, StatusSnapshot,
};
