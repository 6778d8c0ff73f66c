//! Orchestrator configuration.

use crate::selector::FallbackSelection;
use alejo_core::{Phase, ResourceLevel, ResourceReadings};
use alejo_progress::DEFAULT_LOG_CAPACITY;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the fallback execution engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Linear backoff between retries; when false every retry waits the base delay
    pub progressive_backoff: bool,

    /// Optional deadline for each primary attempt
    pub primary_timeout_ms: Option<u64>,

    /// How to choose among several fallback candidates
    pub fallback_selection: FallbackSelection,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            progressive_backoff: true,
            primary_timeout_ms: None,
            fallback_selection: FallbackSelection::PriorityBased,
        }
    }
}

impl EngineConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable linear backoff.
    pub fn with_progressive_backoff(mut self, enabled: bool) -> Self {
        self.progressive_backoff = enabled;
        self
    }

    /// Guard every primary attempt with a deadline.
    pub fn with_primary_timeout(mut self, timeout: Duration) -> Self {
        self.primary_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Set the fallback selection strategy.
    pub fn with_fallback_selection(mut self, selection: FallbackSelection) -> Self {
        self.fallback_selection = selection;
        self
    }

    /// Primary deadline as a duration.
    pub fn primary_timeout(&self) -> Option<Duration> {
        self.primary_timeout_ms.map(Duration::from_millis)
    }
}

/// Resource level required by each phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseThresholds {
    /// Level for the Core phase
    pub core: ResourceLevel,
    /// Level for the Standard phase
    pub standard: ResourceLevel,
    /// Level for the Enhanced phase
    pub enhanced: ResourceLevel,
    /// Level for the Optional phase
    pub optional: ResourceLevel,
    /// Priorities below this go to the Optional phase
    pub low_priority_below: i64,
    /// More dependencies than this makes a component Enhanced
    pub enhanced_dependency_count: usize,
}

impl Default for PhaseThresholds {
    fn default() -> Self {
        Self {
            core: Phase::Core.default_required_level(),
            standard: Phase::Standard.default_required_level(),
            enhanced: Phase::Enhanced.default_required_level(),
            optional: Phase::Optional.default_required_level(),
            low_priority_below: 0,
            enhanced_dependency_count: 3,
        }
    }
}

impl PhaseThresholds {
    /// Level required to admit `phase`. Critical is always admitted.
    pub fn required_level(&self, phase: Phase) -> ResourceLevel {
        match phase {
            Phase::Critical => ResourceLevel::Minimal,
            Phase::Core => self.core,
            Phase::Standard => self.standard,
            Phase::Enhanced => self.enhanced,
            Phase::Optional => self.optional,
        }
    }
}

/// When resource conservation considers the device constrained.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConservationThresholds {
    /// CPU usage above this is high pressure
    pub cpu_high: f32,
    /// Memory usage above this is high pressure
    pub memory_high: f32,
    /// Battery below this (and not charging) is constrained
    pub battery_low: f32,
}

impl Default for ConservationThresholds {
    fn default() -> Self {
        Self {
            cpu_high: 80.0,
            memory_high: 85.0,
            battery_low: 20.0,
        }
    }
}

impl ConservationThresholds {
    /// Whether the readings show sustained constraint.
    pub fn is_constrained(&self, readings: &ResourceReadings) -> bool {
        let on_low_battery = readings
            .battery_level
            .map_or(false, |level| level < self.battery_low && !readings.charging);

        readings.cpu_usage > self.cpu_high
            || readings.memory_usage > self.memory_high
            || on_low_battery
    }
}

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Retained status log entries
    pub log_capacity: usize,
    /// Fallback engine settings
    pub engine: EngineConfig,
    /// Phase admission levels
    pub phases: PhaseThresholds,
    /// Resource-conservation limits
    pub conservation: ConservationThresholds,
    /// Level assumed when telemetry is unavailable
    pub default_level: ResourceLevel,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            log_capacity: DEFAULT_LOG_CAPACITY,
            engine: EngineConfig::default(),
            phases: PhaseThresholds::default(),
            conservation: ConservationThresholds::default(),
            default_level: ResourceLevel::Medium,
        }
    }
}

impl OrchestratorConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the log capacity.
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }

    /// Set the engine configuration.
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Set phase thresholds.
    pub fn with_phases(mut self, phases: PhaseThresholds) -> Self {
        self.phases = phases;
        self
    }

    /// Set conservation thresholds.
    pub fn with_conservation(mut self, conservation: ConservationThresholds) -> Self {
        self.conservation = conservation;
        self
    }
}
