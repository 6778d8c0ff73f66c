//! JSON manifest describing a component set with simulated routines.

use alejo_core::{ComponentDescriptor, FallbackRecord, ResourceReadings, Routine, RoutineOutput};
use alejo_execution::{Orchestrator, OrchestratorConfig, StaticTelemetry};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Built-in component set used by `alejo demo`.
pub const DEMO_MANIFEST: &str = include_str!("../../../demos/boot.json");

/// How a simulated routine behaves.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Behavior {
    /// Time each call takes
    pub delay_ms: u64,
    /// Fail this many calls before succeeding
    pub fail_times: u32,
    /// Fail every call
    pub always_fail: bool,
    /// Output on success; defaults to `{"ready": true}`
    pub output: Option<serde_json::Value>,
}

/// Routine driven by a [`Behavior`].
pub struct SimulatedRoutine {
    name: String,
    behavior: Behavior,
    calls: AtomicU32,
}

impl SimulatedRoutine {
    /// Create a routine.
    pub fn new(name: impl Into<String>, behavior: Behavior) -> Self {
        Self {
            name: name.into(),
            behavior,
            calls: AtomicU32::new(0),
        }
    }

    /// Calls made so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Routine for SimulatedRoutine {
    async fn execute(&self) -> anyhow::Result<RoutineOutput> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.behavior.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.behavior.delay_ms)).await;
        }

        if self.behavior.always_fail {
            anyhow::bail!("{} unavailable", self.name);
        }
        if call <= self.behavior.fail_times {
            anyhow::bail!("{} failed on call {}", self.name, call);
        }

        Ok(self.behavior.output.clone().unwrap_or_else(|| json!({ "ready": true })))
    }

    fn on_timeout(&self) {
        tracing::debug!("{} abandoned after its deadline", self.name);
    }
}

/// A fallback entry.
#[derive(Debug, Clone, Deserialize)]
pub struct FallbackManifest {
    /// Candidate name
    #[serde(default = "default_fallback_name")]
    pub name: String,
    /// Keeps accessibility features
    #[serde(default)]
    pub preserves_accessibility: bool,
    /// No-op placeholder
    #[serde(default)]
    pub is_stub: bool,
    /// Simulated behavior
    #[serde(default)]
    pub behavior: Behavior,
}

fn default_fallback_name() -> String {
    "default".to_string()
}

/// A component entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ComponentManifest {
    /// Descriptor fields
    #[serde(flatten)]
    pub descriptor: ComponentDescriptor,
    /// Primary behavior
    #[serde(default)]
    pub behavior: Behavior,
    /// Fallback candidates
    #[serde(default)]
    pub fallbacks: Vec<FallbackManifest>,
}

/// Whole manifest.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Manifest {
    /// Orchestrator configuration
    pub config: OrchestratorConfig,
    /// Fixed telemetry readings
    pub telemetry: Option<ResourceReadings>,
    /// Components in registration order
    pub components: Vec<ComponentManifest>,
}

impl Manifest {
    /// Parse a manifest.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("invalid manifest")
    }

    /// Read a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("in {}", path.display()))
    }

    /// The built-in demo set.
    pub fn demo() -> Result<Self> {
        Self::parse(DEMO_MANIFEST)
    }

    /// Build an orchestrator with every component and fallback registered.
    pub fn build(&self) -> Result<Orchestrator> {
        let mut orchestrator = Orchestrator::new(self.config.clone());
        if let Some(readings) = self.telemetry {
            orchestrator = orchestrator.with_telemetry(Arc::new(StaticTelemetry::new(readings)));
        }

        for component in &self.components {
            let id = component.descriptor.id.clone();
            let routine = Arc::new(SimulatedRoutine::new(
                id.to_string(),
                component.behavior.clone(),
            ));
            orchestrator.register_component(component.descriptor.clone(), routine)?;

            for fallback in &component.fallbacks {
                let routine: Arc<dyn Routine> = Arc::new(SimulatedRoutine::new(
                    format!("{}/{}", id, fallback.name),
                    fallback.behavior.clone(),
                ));
                let mut record = FallbackRecord::new(routine).named(fallback.name.clone());
                if fallback.preserves_accessibility {
                    record = record.preserving_accessibility();
                }
                if fallback.is_stub {
                    record = record.stub();
                }
                orchestrator.register_fallback(id.clone(), record)?;
            }
        }

        Ok(orchestrator)
    }
}
