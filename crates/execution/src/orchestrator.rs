//! Orchestrator - registration, initialization runs and deferred loading.
//!
//! A run goes through four steps:
//!
//! 1. validate the whole registry (unknown dependencies, cycles)
//! 2. assign phases for the current resource level and defer what is not admitted
//! 3. plan waves over the admitted components
//! 4. dispatch each wave concurrently and wait for every member before the next
//!
//! An essential component ending `Failed` stops dispatch at the wave boundary.

use crate::config::OrchestratorConfig;
use crate::dependency::{DependencyResolver, ExecutionPlan};
use crate::engine::FallbackEngine;
use crate::error::{ConfigurationError, EssentialFailure, OrchestratorError, Result};
use crate::registry::{ComponentRegistry, SharedRegistry};
use crate::scheduler::{PhaseAssigner, PhaseAssignment};
use crate::telemetry::TelemetryProvider;
use alejo_core::{
    Clock, ComponentDescriptor, ComponentId, ComponentState, EventType, FailureCause,
    FallbackRecord, LifecycleEvent, Phase, ResourceLevel, ResourceSnapshot, Routine, RuntimeStatus,
    SystemClock, Time,
};
use alejo_progress::{EventFilter, EventLog, Timeline};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Options for one initialization run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InitOptions {
    /// Use this level instead of asking telemetry
    pub resource_level: Option<ResourceLevel>,

    /// Run phases one at a time and stop early under resource pressure
    pub conserve_resources: bool,
}

impl InitOptions {
    /// Run at a fixed resource level.
    pub fn at_level(mut self, level: ResourceLevel) -> Self {
        self.resource_level = Some(level);
        self
    }

    /// Enable resource conservation.
    pub fn conserving(mut self) -> Self {
        self.conserve_resources = true;
        self
    }
}

/// Final status of one component in a run.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentOutcome {
    /// Component
    pub component: ComponentId,
    /// Wave it ran in
    pub wave: usize,
    /// Status after the wave
    pub status: RuntimeStatus,
}

/// Result of an initialization run or deferred load.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InitializationReport {
    /// Level the phases were assigned for
    pub level: Option<ResourceLevel>,
    /// Ready on the primary routine
    pub initialized: Vec<ComponentId>,
    /// Ready on a fallback
    pub fallback: Vec<ComponentId>,
    /// Failed
    pub failed: Vec<ComponentId>,
    /// Deferred after the run
    pub deferred: Vec<ComponentId>,
    /// Dispatched waves
    pub waves: Vec<Vec<ComponentId>>,
    /// Wall time of the run
    pub duration_ms: u64,
    /// Per-component outcomes in dispatch order
    pub outcomes: Vec<ComponentOutcome>,
}

impl InitializationReport {
    fn record(&mut self, component: ComponentId, wave: usize, status: RuntimeStatus) {
        match status.state {
            ComponentState::Initialized => self.initialized.push(component.clone()),
            ComponentState::Fallback => self.fallback.push(component.clone()),
            ComponentState::Failed => self.failed.push(component.clone()),
            _ => {}
        }
        self.outcomes.push(ComponentOutcome {
            component,
            wave,
            status,
        });
    }

    /// Outcome of a component.
    pub fn outcome(&self, id: &str) -> Option<&ComponentOutcome> {
        self.outcomes.iter().find(|o| o.component.as_str() == id)
    }

    /// Components that ran.
    pub fn ran(&self) -> usize {
        self.outcomes.len()
    }
}

/// Result of loading deferred components.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    /// Components taken out of the deferred set
    pub loaded: usize,
    /// The run over them
    pub report: InitializationReport,
}

/// Phases and waves a run would use, without running anything.
#[derive(Debug, Clone, Serialize)]
pub struct InitializationPlan {
    /// Resource snapshot used
    pub snapshot: ResourceSnapshot,
    /// Phase membership
    pub assignment: PhaseAssignment,
    /// Waves over the admitted components
    pub plan: ExecutionPlan,
}

/// One component in a [`StatusSnapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct ComponentSnapshot {
    /// Descriptor
    pub descriptor: ComponentDescriptor,
    /// Runtime status
    pub status: RuntimeStatus,
    /// Registered fallback candidates
    pub fallbacks: usize,
}

/// Component counts per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    /// Pending
    pub pending: usize,
    /// Initializing
    pub initializing: usize,
    /// Initialized
    pub initialized: usize,
    /// Fallback
    pub fallback: usize,
    /// Failed
    pub failed: usize,
    /// Deferred
    pub deferred: usize,
}

impl StateCounts {
    fn add(&mut self, state: ComponentState) {
        match state {
            ComponentState::Pending => self.pending += 1,
            ComponentState::Initializing => self.initializing += 1,
            ComponentState::Initialized => self.initialized += 1,
            ComponentState::Fallback => self.fallback += 1,
            ComponentState::Failed => self.failed += 1,
            ComponentState::Deferred => self.deferred += 1,
        }
    }
}

/// Point-in-time view of every registered component.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    /// When it was taken
    pub taken_at: Time,
    /// Components in registration order
    pub components: Vec<ComponentSnapshot>,
    /// Counts per state
    pub counts: StateCounts,
}

impl StatusSnapshot {
    /// Entry of a component.
    pub fn get(&self, id: &str) -> Option<&ComponentSnapshot> {
        self.components.iter().find(|c| c.descriptor.id.as_str() == id)
    }

    /// State of a component.
    pub fn state(&self, id: &str) -> Option<ComponentState> {
        self.get(id).map(|c| c.status.state)
    }
}

enum BatchOutcome {
    Completed,
    Aborted(Vec<EssentialFailure>),
}

/// Component initialization orchestrator.
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: SharedRegistry,
    log: Arc<EventLog>,
    clock: Arc<dyn Clock>,
    telemetry: Option<Arc<dyn TelemetryProvider>>,
    engine: FallbackEngine,
    resolver: DependencyResolver,
    assigner: PhaseAssigner,
    run_lock: Mutex<()>,
}

impl Orchestrator {
    /// Create an orchestrator on the system clock, without telemetry.
    pub fn new(config: OrchestratorConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let registry = SharedRegistry::new(ComponentRegistry::new());
        let log = Arc::new(EventLog::with_clock(config.log_capacity, clock.clone()));
        let engine = FallbackEngine::new(
            registry.clone(),
            log.clone(),
            clock.clone(),
            config.engine.clone(),
        );
        let assigner = PhaseAssigner::new(config.phases.clone());

        Self {
            config,
            registry,
            log,
            clock,
            telemetry: None,
            engine,
            resolver: DependencyResolver::new(),
            assigner,
            run_lock: Mutex::new(()),
        }
    }

    /// Use another clock. Call before registering anything: the log is
    /// recreated.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.log = Arc::new(EventLog::with_clock(self.config.log_capacity, clock.clone()));
        self.engine = FallbackEngine::new(
            self.registry.clone(),
            self.log.clone(),
            clock.clone(),
            self.config.engine.clone(),
        );
        self.clock = clock;
        self
    }

    /// Read resource levels from `telemetry`.
    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetryProvider>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Register a component with its primary routine.
    pub fn register_component(
        &self,
        descriptor: ComponentDescriptor,
        routine: Arc<dyn Routine>,
    ) -> Result<()> {
        let details = json!({
            "priority": descriptor.priority,
            "essential": descriptor.essential,
            "accessibility": descriptor.accessibility,
            "optional": descriptor.optional,
            "dependencies": descriptor.dependencies,
        });
        let id = descriptor.id.clone();

        self.registry.write().register(descriptor, routine)?;
        debug!("Registered component {}", id);
        self.log.record(EventType::Registered, Some(&id), details);
        Ok(())
    }

    /// Register a fallback for `id`; the component may be registered later.
    pub fn register_fallback(
        &self,
        id: impl Into<ComponentId>,
        record: FallbackRecord,
    ) -> Result<()> {
        let id = id.into();
        let name = record.name.clone();
        let preserves_accessibility = record.preserves_accessibility;
        let is_stub = record.is_stub;

        let replaced = self.registry.write().register_fallback(id.clone(), record)?;
        debug!("Registered fallback `{}` for {}", name, id);
        self.log.record(
            EventType::FallbackRegistered,
            Some(&id),
            json!({
                "fallback": name,
                "preserves_accessibility": preserves_accessibility,
                "is_stub": is_stub,
                "replaced": replaced,
            }),
        );
        Ok(())
    }

    /// Run every pending component admitted at the current resource level.
    ///
    /// Components that already reached a terminal state are not rerun.
    pub async fn run_initialization(&self, options: InitOptions) -> Result<InitializationReport> {
        let _guard = self.run_lock.try_lock().map_err(|_| OrchestratorError::RunInProgress)?;
        let started = Instant::now();

        self.validate()?;

        let snapshot = self.resource_snapshot(options.resource_level).await;
        let assignment = self.assign(&snapshot);
        self.apply_assignment(&assignment);

        info!(
            "Starting initialization at {} level: {} admitted, {} deferred",
            snapshot.level,
            assignment.admitted.len(),
            assignment.deferred.len()
        );
        self.log.record(
            EventType::RunStarted,
            None,
            json!({
                "level": snapshot.level,
                "admitted": assignment.admitted,
                "deferred": assignment.deferred,
                "conserve_resources": options.conserve_resources,
            }),
        );

        let mut report = InitializationReport {
            level: Some(snapshot.level),
            ..Default::default()
        };
        let outcome = if options.conserve_resources {
            self.run_conserving(&assignment, &mut report).await?
        } else {
            self.run_batch(&assignment.admitted, &mut report).await?
        };

        self.finish(report, outcome, started)
    }

    /// Load deferred components: the given ids, or all of them.
    ///
    /// Dependencies that are not ready yet are loaded too, whether still
    /// deferred or left pending by an aborted run.
    pub async fn load_deferred(&self, ids: Option<&[ComponentId]>) -> Result<LoadReport> {
        let _guard = self.run_lock.try_lock().map_err(|_| OrchestratorError::RunInProgress)?;
        let targets = self.deferred_targets(ids)?;
        self.load(targets, "requested").await
    }

    /// Load deferred components whose phase is admitted at the level
    /// telemetry reports now.
    pub async fn reevaluate_deferred(&self) -> Result<LoadReport> {
        let _guard = self.run_lock.try_lock().map_err(|_| OrchestratorError::RunInProgress)?;

        let snapshot = self.resource_snapshot(None).await;
        let targets = {
            let registry = self.registry.read();
            let assignment = self.assigner.assign_phases(&registry, &snapshot);
            let admitted: Vec<ComponentId> = assignment
                .admitted
                .into_iter()
                .filter(|id| registry.state(id.as_str()) == Some(ComponentState::Deferred))
                .collect();
            with_unready_dependencies(&registry, admitted)
        };

        debug!(
            "Re-evaluated deferred components at {} level: {} to load",
            snapshot.level,
            targets.len()
        );
        self.load(targets, "resources_improved").await
    }

    /// Phases and waves a run would use at `level` (or the telemetry
    /// level), without changing any state.
    pub async fn plan_initialization(
        &self,
        level: Option<ResourceLevel>,
    ) -> Result<InitializationPlan> {
        self.validate()?;
        let snapshot = self.resource_snapshot(level).await;

        let registry = self.registry.read();
        let assignment = self.assigner.assign_phases(&registry, &snapshot);
        let plan = self.resolver.plan(&registry, &assignment.admitted)?;
        Ok(InitializationPlan {
            snapshot,
            assignment,
            plan,
        })
    }

    /// Status of every component.
    pub fn status(&self) -> StatusSnapshot {
        let registry = self.registry.read();
        let mut counts = StateCounts::default();
        let components = registry
            .iter()
            .map(|c| {
                counts.add(c.status.state);
                ComponentSnapshot {
                    descriptor: c.descriptor.clone(),
                    status: c.status.clone(),
                    fallbacks: registry.fallbacks(c.descriptor.id.as_str()).len(),
                }
            })
            .collect();

        StatusSnapshot {
            taken_at: self.clock.now(),
            components,
            counts,
        }
    }

    /// Logged events matching `filter`.
    pub fn event_log(&self, filter: &EventFilter) -> Vec<LifecycleEvent> {
        self.log.query(filter)
    }

    /// The underlying log.
    pub fn log(&self) -> &Arc<EventLog> {
        &self.log
    }

    /// Timeline derived from the retained events.
    pub fn timeline(&self) -> Timeline {
        Timeline::from_events(&self.log.events())
    }

    /// Live feed of every new log entry.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.log.subscribe()
    }

    /// Wait until `id` reaches a terminal state and return it.
    pub async fn wait_for(&self, id: &str) -> Result<ComponentState> {
        let mut rx = self
            .registry
            .read()
            .watch(id)
            .ok_or_else(|| ConfigurationError::UnknownComponent(ComponentId::new(id)))?;

        let reached = rx.wait_for(|state| state.is_terminal()).await.map(|state| *state);
        Ok(reached.unwrap_or_else(|_| *rx.borrow()))
    }

    fn validate(&self) -> Result<()> {
        let registry = self.registry.read();
        self.resolver.validate(&registry)?;
        Ok(())
    }

    async fn resource_snapshot(&self, level: Option<ResourceLevel>) -> ResourceSnapshot {
        if let Some(level) = level {
            return ResourceSnapshot::at(level);
        }

        let Some(telemetry) = &self.telemetry else {
            return ResourceSnapshot::at(self.config.default_level);
        };

        match telemetry.readings().await {
            Ok(readings) => ResourceSnapshot::from_readings(readings),
            Err(e) => {
                warn!(
                    "Telemetry unavailable, assuming {} level: {:#}",
                    self.config.default_level, e
                );
                ResourceSnapshot::at(self.config.default_level)
            }
        }
    }

    async fn is_constrained(&self) -> bool {
        let Some(telemetry) = &self.telemetry else {
            return false;
        };

        match telemetry.readings().await {
            Ok(readings) => self.config.conservation.is_constrained(&readings),
            Err(e) => {
                warn!("Telemetry unavailable during conservation check: {:#}", e);
                false
            }
        }
    }

    fn assign(&self, snapshot: &ResourceSnapshot) -> PhaseAssignment {
        let assignment = {
            let registry = self.registry.read();
            self.assigner.assign_phases(&registry, snapshot)
        };

        let phases: serde_json::Map<String, serde_json::Value> = assignment
            .phases
            .iter()
            .map(|(phase, members)| (phase.to_string(), json!(members)))
            .collect();
        self.log.record(
            EventType::PhasesAssigned,
            None,
            json!({ "level": snapshot.level, "phases": phases }),
        );
        assignment
    }

    /// Defer what is not admitted; resume previously deferred work that is.
    fn apply_assignment(&self, assignment: &PhaseAssignment) {
        for id in &assignment.deferred {
            let phase = assignment.phase_of(id.as_str());
            self.defer(id, json!({
                "phase": phase,
                "level": assignment.level,
                "required_level": phase.map(|p| self.assigner.thresholds().required_level(p)),
            }));
        }

        for id in &assignment.admitted {
            self.resume(id, "admitted");
        }
    }

    fn defer(&self, id: &ComponentId, details: serde_json::Value) {
        let moved = {
            let mut registry = self.registry.write();
            registry.state(id.as_str()) == Some(ComponentState::Pending)
                && registry.transition(id.as_str(), ComponentState::Deferred)
        };
        if moved {
            debug!("Deferred {}", id);
            self.log.record(EventType::Deferred, Some(id), details);
        }
    }

    fn resume(&self, id: &ComponentId, reason: &str) -> bool {
        let moved = {
            let mut registry = self.registry.write();
            registry.state(id.as_str()) == Some(ComponentState::Deferred)
                && registry.transition(id.as_str(), ComponentState::Pending)
        };
        if moved {
            debug!("Resumed {}", id);
            self.log.record(EventType::Resumed, Some(id), json!({ "reason": reason }));
        }
        moved
    }

    /// Phase by phase; before each phase after Core, stop and defer the
    /// rest if the device is constrained.
    async fn run_conserving(
        &self,
        assignment: &PhaseAssignment,
        report: &mut InitializationReport,
    ) -> Result<BatchOutcome> {
        let admitted: Vec<(Phase, Vec<ComponentId>)> = assignment
            .phases
            .iter()
            .map(|(phase, members)| {
                let members: Vec<ComponentId> =
                    members
                        .iter()
                        .filter(|m| assignment.is_admitted(m.as_str()))
                        .cloned()
                        .collect();
                (*phase, members)
            })
            .filter(|(_, members)| !members.is_empty())
            .collect();

        for (index, (phase, members)) in admitted.iter().enumerate() {
            if *phase > Phase::Core && self.is_constrained().await {
                warn!("Resources constrained before {} phase, deferring remaining phases", phase);
                for (later, rest) in &admitted[index..] {
                    for id in rest {
                        self.defer(id, json!({ "phase": later, "reason": "conservation" }));
                    }
                }
                break;
            }

            debug!("Running {} phase ({} component(s))", phase, members.len());
            if let BatchOutcome::Aborted(failures) = self.run_batch(members, report).await? {
                return Ok(BatchOutcome::Aborted(failures));
            }
        }

        Ok(BatchOutcome::Completed)
    }

    async fn load(&self, targets: Vec<ComponentId>, reason: &str) -> Result<LoadReport> {
        if targets.is_empty() {
            debug!("No deferred components to load");
            return Ok(LoadReport::default());
        }

        let started = Instant::now();
        self.validate()?;

        let mut resumed = 0;
        for id in &targets {
            if self.resume(id, reason) {
                resumed += 1;
            }
        }

        info!(
            "Loading {} deferred component(s), {} in total with pending dependencies",
            resumed,
            targets.len()
        );
        self.log.record(
            EventType::RunStarted,
            None,
            json!({ "deferred_load": true, "admitted": targets, "reason": reason }),
        );

        let mut report = InitializationReport::default();
        let outcome = self.run_batch(&targets, &mut report).await?;
        let report = self.finish(report, outcome, started)?;
        Ok(LoadReport {
            loaded: resumed,
            report,
        })
    }

    /// Requested deferred ids plus their unready dependencies, in
    /// registration order.
    fn deferred_targets(&self, ids: Option<&[ComponentId]>) -> Result<Vec<ComponentId>> {
        let registry = self.registry.read();

        let requested: Vec<ComponentId> = match ids {
            Some(ids) => {
                if let Some(unknown) = ids.iter().find(|id| !registry.contains(id.as_str())) {
                    return Err(ConfigurationError::UnknownComponent(unknown.clone()).into());
                }
                ids.iter()
                    .filter(|id| registry.state(id.as_str()) == Some(ComponentState::Deferred))
                    .cloned()
                    .collect()
            }
            None => registry.ids_in_state(ComponentState::Deferred),
        };

        Ok(with_unready_dependencies(&registry, requested))
    }

    async fn run_batch(
        &self,
        ids: &[ComponentId],
        report: &mut InitializationReport,
    ) -> Result<BatchOutcome> {
        let plan = {
            let registry = self.registry.read();
            self.resolver.plan(&registry, ids)?
        };

        for wave in plan.waves {
            let index = report.waves.len();
            debug!("Dispatching wave {} ({} component(s))", index, wave.len());
            self.log.record(
                EventType::WaveStarted,
                None,
                json!({ "wave": index, "components": wave }),
            );

            let settled = self.dispatch_wave(&wave).await;

            let mut failures = Vec::new();
            for (id, status) in settled {
                if status.state == ComponentState::Failed && self.is_essential(&id) {
                    let cause = status.last_error.clone().unwrap_or_else(|| FailureCause::Primary {
                        message: "unknown failure".to_string(),
                        attempts: status.attempt_count,
                    });
                    failures.push(EssentialFailure {
                        component: id.clone(),
                        cause,
                    });
                }
                report.record(id, index, status);
            }

            self.log.record(
                EventType::WaveCompleted,
                None,
                json!({ "wave": index, "essential_failures": failures.len() }),
            );
            report.waves.push(wave);

            if !failures.is_empty() {
                return Ok(BatchOutcome::Aborted(failures));
            }
        }

        Ok(BatchOutcome::Completed)
    }

    /// Run every member of a wave concurrently and wait for all of them.
    async fn dispatch_wave(&self, wave: &[ComponentId]) -> Vec<(ComponentId, RuntimeStatus)> {
        let mut settled = Vec::with_capacity(wave.len());
        let mut handles = Vec::with_capacity(wave.len());

        for id in wave {
            match self.blocking_dependency(id) {
                Some((dependency, ComponentState::Failed)) => {
                    settled.push((id.clone(), self.engine.fail_blocked(id, &dependency)));
                    continue;
                }
                Some((dependency, state)) => {
                    // Batches include their unready dependencies
                    error!("Not dispatching {}: dependency {} is {}", id, dependency, state);
                    self.defer(
                        id,
                        json!({ "reason": "dependency_not_ready", "dependency": dependency }),
                    );
                    let status = self
                        .registry
                        .read()
                        .status(id.as_str())
                        .cloned()
                        .unwrap_or_default();
                    settled.push((id.clone(), status));
                    continue;
                }
                None => {}
            }

            let engine = self.engine.clone();
            let task_id = id.clone();
            let handle = tokio::spawn(async move { engine.run_component(&task_id).await });
            handles.push((id.clone(), handle));
        }

        for (id, handle) in handles {
            let status = match handle.await {
                Ok(Ok(status)) => status,
                Ok(Err(e)) => {
                    error!("Could not run {}: {}", id, e);
                    self.registry.read().status(id.as_str()).cloned().unwrap_or_default()
                }
                Err(e) => self.engine.record_panic(&id, &panic_message(e)),
            };
            settled.push((id, status));
        }

        settled.sort_by_key(|(id, _)| wave.iter().position(|w| w == id));
        settled
    }

    /// First dependency of `id` that is not ready, with its state.
    fn blocking_dependency(&self, id: &ComponentId) -> Option<(ComponentId, ComponentState)> {
        let registry = self.registry.read();
        let descriptor = registry.descriptor(id.as_str())?;
        descriptor.dependencies.iter().find_map(|dep| {
            let state = registry.state(dep.as_str())?;
            (!state.is_ready()).then(|| (dep.clone(), state))
        })
    }

    fn is_essential(&self, id: &ComponentId) -> bool {
        self.registry.read().descriptor(id.as_str()).map_or(false, |d| d.essential)
    }

    fn finish(
        &self,
        mut report: InitializationReport,
        outcome: BatchOutcome,
        started: Instant,
    ) -> Result<InitializationReport> {
        report.deferred = self.registry.read().ids_in_state(ComponentState::Deferred);
        report.duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            BatchOutcome::Completed => {
                info!(
                    "Initialization finished in {}ms: {} initialized, {} fallback, {} failed, \
                     {} deferred",
                    report.duration_ms,
                    report.initialized.len(),
                    report.fallback.len(),
                    report.failed.len(),
                    report.deferred.len()
                );
                self.log.record(
                    EventType::RunCompleted,
                    None,
                    json!({
                        "initialized": report.initialized.len(),
                        "fallback": report.fallback.len(),
                        "failed": report.failed.len(),
                        "deferred": report.deferred.len(),
                        "duration_ms": report.duration_ms,
                    }),
                );
                Ok(report)
            }
            BatchOutcome::Aborted(failures) => {
                let names: Vec<&ComponentId> = failures.iter().map(|f| &f.component).collect();
                error!("Initialization aborted: essential component(s) failed: {:?}", names);
                self.log.record(
                    EventType::RunAborted,
                    None,
                    json!({ "essential_failures": names, "duration_ms": report.duration_ms }),
                );
                Err(OrchestratorError::EssentialAbort {
                    failures,
                    report: Box::new(report),
                })
            }
        }
    }
}

/// `requested` plus every transitive dependency still `Pending` or
/// `Deferred`, in registration order.
///
/// Failed dependencies are left out; their dependents fail as blocked.
fn with_unready_dependencies(
    registry: &ComponentRegistry,
    requested: Vec<ComponentId>,
) -> Vec<ComponentId> {
    let mut selected: HashSet<ComponentId> = HashSet::new();
    let mut stack = requested;
    while let Some(id) = stack.pop() {
        if !selected.insert(id.clone()) {
            continue;
        }
        if let Some(descriptor) = registry.descriptor(id.as_str()) {
            stack.extend(
                descriptor
                    .dependencies
                    .iter()
                    .filter(|dep| {
                        matches!(
                            registry.state(dep.as_str()),
                            Some(ComponentState::Pending | ComponentState::Deferred)
                        )
                    })
                    .cloned(),
            );
        }
    }

    registry.ids().iter().filter(|id| selected.contains(*id)).cloned().collect()
}

fn panic_message(e: JoinError) -> String {
    if !e.is_panic() {
        return e.to_string();
    }
    let payload = e.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "routine panicked".to_string()
    }
}
