//! Fallback execution engine - runs one component to a terminal state.

use crate::config::EngineConfig;
use crate::error::{AggregateFailure, ComponentFailure, ConfigurationError, FallbackFailure};
use crate::registry::SharedRegistry;
use crate::selector::FallbackSelector;
use alejo_core::{
    Clock, ComponentDescriptor, ComponentId, ComponentState, EventType, FailureCause, Routine,
    RoutineOutput, RuntimeStatus,
};
use alejo_progress::EventLog;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Runs a component's primary routine with retries, then its fallback.
///
/// ```text
/// Pending -> Initializing -> attempt (retry w/ backoff)* -> Initialized
///                                      \-> fallback (deadline) -> Fallback | Failed
/// ```
///
/// Each call only writes the status of the component it runs, so calls for
/// different components can proceed concurrently.
#[derive(Clone)]
pub struct FallbackEngine {
    registry: SharedRegistry,
    log: Arc<EventLog>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl FallbackEngine {
    /// Create an engine over a shared registry and log.
    pub fn new(
        registry: SharedRegistry,
        log: Arc<EventLog>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            log,
            clock,
            config,
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run a component to a terminal state.
    ///
    /// A component that is not `Pending` is left untouched and its current
    /// status returned.
    pub async fn run_component(
        &self,
        id: &ComponentId,
    ) -> Result<RuntimeStatus, ConfigurationError> {
        let (descriptor, routine) = {
            let registry = self.registry.read();
            let component = registry
                .get(id.as_str())
                .ok_or_else(|| ConfigurationError::UnknownComponent(id.clone()))?;
            (component.descriptor.clone(), component.routine.clone())
        };

        if !self.start(&descriptor, json!({})) {
            return Ok(self.snapshot(id));
        }

        let max_attempts = descriptor.retry_attempts.saturating_add(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = descriptor.retry_delay(attempt - 1, self.config.progressive_backoff);
                self.log.record(
                    EventType::Retrying,
                    Some(id),
                    json!({ "attempt": attempt, "delay_ms": delay.as_millis() as u64 }),
                );
                tokio::time::sleep(delay).await;
            }

            self.registry.write().update_status(id.as_str(), |s| s.attempt_count = attempt);

            match self.attempt(routine.as_ref()).await {
                Ok(output) => {
                    self.finish_initialized(id, attempt, output);
                    return Ok(self.snapshot(id));
                }
                Err(message) => {
                    debug!("{} attempt {}/{} failed: {}", id, attempt, max_attempts, message);
                    self.log.record(
                        EventType::AttemptFailed,
                        Some(id),
                        json!({ "attempt": attempt, "error": message }),
                    );
                    last_error = message;
                }
            }
        }

        let primary = ComponentFailure {
            component: id.clone(),
            attempts: max_attempts,
            message: last_error,
        };
        warn!("{}", primary);

        self.run_fallback(&descriptor, primary).await;
        Ok(self.snapshot(id))
    }

    /// Fail a component without running it because a dependency failed.
    pub fn fail_blocked(&self, id: &ComponentId, dependency: &ComponentId) -> RuntimeStatus {
        let descriptor = self.registry.read().descriptor(id.as_str()).cloned();
        let Some(descriptor) = descriptor else {
            return RuntimeStatus::pending();
        };

        if self.start(&descriptor, json!({ "blocked_by": dependency })) {
            warn!("{} skipped: dependency {} failed", id, dependency);
            self.finish_failed(
                id,
                FailureCause::DependencyFailed {
                    dependency: dependency.to_string(),
                },
                json!({}),
            );
        }
        self.snapshot(id)
    }

    /// Record that the task running `id` panicked.
    pub fn record_panic(&self, id: &ComponentId, message: &str) -> RuntimeStatus {
        let state = self.registry.read().state(id.as_str());
        if state == Some(ComponentState::Initializing) {
            error!("{} panicked during initialization: {}", id, message);
            let cause = FailureCause::Panicked {
                message: message.to_string(),
            };
            self.finish_failed(id, cause, json!({}));
        }
        self.snapshot(id)
    }

    /// Pending -> Initializing. Returns false if the component was not pending.
    fn start(&self, descriptor: &ComponentDescriptor, extra: serde_json::Value) -> bool {
        let id = &descriptor.id;
        let now = self.clock.now();
        {
            let mut registry = self.registry.write();
            if !registry.transition(id.as_str(), ComponentState::Initializing) {
                return false;
            }
            registry.update_status(id.as_str(), |s| {
                s.started_at = Some(now);
                s.ended_at = None;
                s.attempt_count = 0;
                s.using_fallback = false;
                s.last_error = None;
                s.preserves_accessibility = None;
                s.fallback_is_stub = None;
            });
        }

        let mut details = json!({
            "priority": descriptor.priority,
            "essential": descriptor.essential,
            "accessibility": descriptor.accessibility,
            "max_attempts": descriptor.retry_attempts.saturating_add(1),
        });
        if let (Some(map), serde_json::Value::Object(extra)) = (details.as_object_mut(), extra) {
            map.extend(extra);
        }

        debug!("Initializing {}", id);
        self.log.record(EventType::Started, Some(id), details);
        true
    }

    async fn attempt(&self, routine: &dyn Routine) -> Result<RoutineOutput, String> {
        match self.config.primary_timeout() {
            Some(deadline) => match tokio::time::timeout(deadline, routine.execute()).await {
                Ok(result) => result.map_err(|e| format!("{:#}", e)),
                Err(_) => {
                    routine.on_timeout();
                    Err(format!("attempt exceeded deadline of {}ms", deadline.as_millis()))
                }
            },
            None => routine.execute().await.map_err(|e| format!("{:#}", e)),
        }
    }

    async fn run_fallback(&self, descriptor: &ComponentDescriptor, primary: ComponentFailure) {
        let id = &descriptor.id;
        let now = self.clock.now();

        let record = {
            let mut registry = self.registry.write();
            let index = self
                .config
                .fallback_selection
                .select(descriptor, registry.fallbacks(id.as_str()));
            index.and_then(|index| registry.use_fallback(id.as_str(), index, now))
        };

        let Some(record) = record else {
            let cause = FailureCause::Primary {
                message: primary.message.clone(),
                attempts: primary.attempts,
            };
            self.finish_failed(id, cause, json!({ "fallback": null }));
            return;
        };

        info!("{} falling back to `{}`", id, record.name);
        self.log.record(
            EventType::FallbackStarted,
            Some(id),
            json!({
                "fallback": record.name,
                "preserves_accessibility": record.preserves_accessibility,
                "is_stub": record.is_stub,
                "usage_count": record.usage_count,
                "primary_error": primary.message,
            }),
        );

        let deadline = descriptor.timeout();
        let outcome = tokio::time::timeout(deadline, record.routine.execute()).await;

        let fallback_failure = match outcome {
            Ok(Ok(output)) => {
                let ended = self.clock.now();
                {
                    let mut registry = self.registry.write();
                    registry.update_status(id.as_str(), |s| {
                        s.ended_at = Some(ended);
                        s.using_fallback = true;
                        s.preserves_accessibility = Some(record.preserves_accessibility);
                        s.fallback_is_stub = Some(record.is_stub);
                        s.last_error = Some(FailureCause::Primary {
                            message: primary.message.clone(),
                            attempts: primary.attempts,
                        });
                    });
                    registry.transition(id.as_str(), ComponentState::Fallback);
                }

                warn!("{} running degraded via `{}`", id, record.name);
                self.log.record(
                    EventType::FallbackSucceeded,
                    Some(id),
                    json!({
                        "fallback": record.name,
                        "preserves_accessibility": record.preserves_accessibility,
                        "is_stub": record.is_stub,
                        "primary_error": primary.message,
                        "output": output,
                    }),
                );
                return;
            }
            Ok(Err(e)) => FallbackFailure {
                component: id.clone(),
                fallback: record.name.clone(),
                message: format!("{:#}", e),
                timed_out: false,
            },
            Err(_) => {
                record.routine.on_timeout();
                FallbackFailure {
                    component: id.clone(),
                    fallback: record.name.clone(),
                    message: format!("deadline of {}ms exceeded", deadline.as_millis()),
                    timed_out: true,
                }
            }
        };

        let aggregate = AggregateFailure {
            primary,
            fallback: fallback_failure,
        };
        self.finish_failed(
            id,
            aggregate.cause(),
            json!({
                "fallback": record.name,
                "primary_error": aggregate.primary.message,
                "fallback_error": aggregate.fallback.message,
                "timed_out": aggregate.fallback.timed_out,
            }),
        );
    }

    fn finish_initialized(&self, id: &ComponentId, attempts: u32, output: RoutineOutput) {
        let ended = self.clock.now();
        {
            let mut registry = self.registry.write();
            registry.update_status(id.as_str(), |s| s.ended_at = Some(ended));
            registry.transition(id.as_str(), ComponentState::Initialized);
        }

        info!("Initialized {} after {} attempt(s)", id, attempts);
        self.log.record(
            EventType::Initialized,
            Some(id),
            json!({ "attempts": attempts, "output": output }),
        );
    }

    fn finish_failed(&self, id: &ComponentId, cause: FailureCause, extra: serde_json::Value) {
        let ended = self.clock.now();
        {
            let mut registry = self.registry.write();
            let stored = cause.clone();
            registry.update_status(id.as_str(), |s| {
                s.ended_at = Some(ended);
                s.last_error = Some(stored);
            });
            registry.transition(id.as_str(), ComponentState::Failed);
        }

        error!("{} failed: {}", id, cause);
        let mut details = json!({ "error": cause.to_string(), "cause": cause });
        if let (Some(map), serde_json::Value::Object(extra)) = (details.as_object_mut(), extra) {
            map.extend(extra);
        }
        self.log.record(EventType::Failed, Some(id), details);
    }

    fn snapshot(&self, id: &ComponentId) -> RuntimeStatus {
        self.registry.read().status(id.as_str()).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ComponentRegistry;
    use crate::selector::FallbackSelection;
    use alejo_core::{ComponentDescriptor, FallbackRecord, FnRoutine, SystemClock};
    use alejo_progress::EventFilter;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails `failures` times, then succeeds.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl Routine for Flaky {
        async fn execute(&self) -> anyhow::Result<RoutineOutput> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                anyhow::bail!("flaky failure #{}", call)
            }
            Ok(json!({ "ready": true }))
        }
    }

    /// Never finishes; counts timeout notifications.
    struct Stalls {
        timeouts: AtomicU32,
    }

    #[async_trait::async_trait]
    impl Routine for Stalls {
        async fn execute(&self) -> anyhow::Result<RoutineOutput> {
            std::future::pending::<()>().await;
            Ok(json!(null))
        }

        fn on_timeout(&self) {
            self.timeouts.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn rejecting() -> Arc<dyn Routine> {
        Arc::new(FnRoutine::new(|| async { Err(anyhow::anyhow!("primary rejected")) }))
    }

    fn resolving() -> Arc<dyn Routine> {
        Arc::new(FnRoutine::new(|| async { Ok(json!({ "ready": true })) }))
    }

    fn setup(config: EngineConfig) -> (FallbackEngine, SharedRegistry, Arc<EventLog>) {
        let registry = SharedRegistry::new(ComponentRegistry::new());
        let log = Arc::new(EventLog::new(100));
        let engine =
            FallbackEngine::new(registry.clone(), log.clone(), Arc::new(SystemClock), config);
        (engine, registry, log)
    }

    fn assert_elapsed(started: tokio::time::Instant, expected_ms: u64) {
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(expected_ms), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(expected_ms + 5), "elapsed {:?}", elapsed);
    }

    fn types(log: &EventLog, id: &str) -> Vec<EventType> {
        log.query(&EventFilter::new().component(id)).iter().map(|e| e.event_type).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_initializes() {
        let (engine, registry, log) = setup(EngineConfig::default());
        let routine = Flaky::new(2);
        registry
            .write()
            .register(ComponentDescriptor::new("voice").with_retry(3, 100), routine.clone())
            .unwrap();

        let started = tokio::time::Instant::now();
        let status = engine.run_component(&ComponentId::new("voice")).await.unwrap();

        assert_eq!(status.state, ComponentState::Initialized);
        assert_eq!(status.attempt_count, 3);
        assert!(!status.using_fallback);
        assert_eq!(routine.calls.load(Ordering::SeqCst), 3);
        // Linear backoff: 100ms + 200ms
        assert_elapsed(started, 300);
        assert_eq!(
            types(&log, "voice"),
            vec![
                EventType::Started,
                EventType::AttemptFailed,
                EventType::Retrying,
                EventType::AttemptFailed,
                EventType::Retrying,
                EventType::Initialized,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_delay_without_progressive_backoff() {
        let (engine, registry, _log) =
            setup(EngineConfig::default().with_progressive_backoff(false));
        registry
            .write()
            .register(ComponentDescriptor::new("voice").with_retry(3, 100), Flaky::new(3))
            .unwrap();

        let started = tokio::time::Instant::now();
        let status = engine.run_component(&ComponentId::new("voice")).await.unwrap();
        assert_eq!(status.state, ComponentState::Initialized);
        assert_eq!(status.attempt_count, 4);
        assert_elapsed(started, 300);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_after_primary_exhausted() {
        let (engine, registry, log) = setup(EngineConfig::default());
        {
            let mut registry = registry.write();
            registry
                .register(ComponentDescriptor::new("Z").with_retry(1, 10), rejecting())
                .unwrap();
            registry
                .register_fallback(ComponentId::new("Z"), FallbackRecord::new(resolving()))
                .unwrap();
        }

        let status = engine.run_component(&ComponentId::new("Z")).await.unwrap();
        assert_eq!(status.state, ComponentState::Fallback);
        assert!(status.using_fallback);
        assert_eq!(status.preserves_accessibility, Some(false));
        assert_eq!(registry.read().fallbacks("Z")[0].usage_count, 1);

        let succeeded = log.query(&EventFilter::new().event_type(EventType::FallbackSucceeded));
        assert_eq!(succeeded[0].details["output"], json!({ "ready": true }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_and_fallback_fail() {
        let (engine, registry, log) = setup(EngineConfig::default());
        {
            let mut registry = registry.write();
            registry
                .register(ComponentDescriptor::new("tts").with_retry(0, 10), rejecting())
                .unwrap();
            let broken: Arc<dyn Routine> =
                Arc::new(FnRoutine::new(|| async { Err(anyhow::anyhow!("fallback broken")) }));
            registry
                .register_fallback(ComponentId::new("tts"), FallbackRecord::new(broken))
                .unwrap();
        }

        let status = engine.run_component(&ComponentId::new("tts")).await.unwrap();
        assert_eq!(status.state, ComponentState::Failed);
        assert!(matches!(status.last_error, Some(FailureCause::Fallback { timed_out: false, .. })));

        let failed = log.query(&EventFilter::new().event_type(EventType::Failed));
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].details["primary_error"], "primary rejected");
        assert_eq!(failed[0].details["fallback_error"], "fallback broken");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_deadline() {
        let (engine, registry, _log) = setup(EngineConfig::default());
        let stalls = Arc::new(Stalls {
            timeouts: AtomicU32::new(0),
        });
        {
            let mut registry = registry.write();
            registry
                .register(
                    ComponentDescriptor::new("vision")
                        .with_retry(0, 10)
                        .with_timeout_ms(50),
                    rejecting(),
                )
                .unwrap();
            registry
                .register_fallback(ComponentId::new("vision"), FallbackRecord::new(stalls.clone()))
                .unwrap();
        }

        let started = tokio::time::Instant::now();
        let status = engine.run_component(&ComponentId::new("vision")).await.unwrap();
        assert_eq!(status.state, ComponentState::Failed);
        assert!(matches!(status.last_error, Some(FailureCause::Fallback { timed_out: true, .. })));
        assert_eq!(stalls.timeouts.load(Ordering::SeqCst), 1);
        assert_elapsed(started, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_deadline_counts_as_failed_attempt() {
        let config = EngineConfig::default().with_primary_timeout(Duration::from_millis(20));
        let (engine, registry, _log) = setup(config);
        let stalls = Arc::new(Stalls {
            timeouts: AtomicU32::new(0),
        });
        registry
            .write()
            .register(ComponentDescriptor::new("camera").with_retry(1, 10), stalls.clone())
            .unwrap();

        let status = engine.run_component(&ComponentId::new("camera")).await.unwrap();
        assert_eq!(status.state, ComponentState::Failed);
        assert_eq!(status.attempt_count, 2);
        assert_eq!(stalls.timeouts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_fallback_fails_with_primary_cause() {
        let (engine, registry, _log) = setup(EngineConfig::default());
        registry
            .write()
            .register(ComponentDescriptor::new("mic").with_retry(2, 5), rejecting())
            .unwrap();

        let status = engine.run_component(&ComponentId::new("mic")).await.unwrap();
        assert_eq!(status.state, ComponentState::Failed);
        assert_eq!(
            status.last_error,
            Some(FailureCause::Primary {
                message: "primary rejected".to_string(),
                attempts: 3,
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_accessibility_component_uses_preserving_fallback() {
        let config =
            EngineConfig::default().with_fallback_selection(FallbackSelection::PriorityBased);
        let (engine, registry, _log) = setup(config);
        {
            let mut registry = registry.write();
            registry
                .register(
                    ComponentDescriptor::new("reader").accessibility().with_retry(0, 1),
                    rejecting(),
                )
                .unwrap();
            let mut popular = FallbackRecord::new(resolving()).named("popular");
            popular.usage_count = 99;
            registry.register_fallback(ComponentId::new("reader"), popular).unwrap();
            registry
                .register_fallback(
                    ComponentId::new("reader"),
                    FallbackRecord::new(resolving()).named("aria").preserving_accessibility(),
                )
                .unwrap();
        }

        let status = engine.run_component(&ComponentId::new("reader")).await.unwrap();
        assert_eq!(status.state, ComponentState::Fallback);
        assert_eq!(status.preserves_accessibility, Some(true));
        assert_eq!(registry.read().fallbacks("reader")[1].usage_count, 1);
    }

    #[tokio::test]
    async fn test_non_pending_component_not_rerun() {
        let (engine, registry, log) = setup(EngineConfig::default());
        let routine = Flaky::new(0);
        registry.write().register(ComponentDescriptor::new("voice"), routine.clone()).unwrap();

        let id = ComponentId::new("voice");
        engine.run_component(&id).await.unwrap();
        let status = engine.run_component(&id).await.unwrap();

        assert_eq!(status.state, ComponentState::Initialized);
        assert_eq!(routine.calls.load(Ordering::SeqCst), 1);
        assert_eq!(types(&log, "voice").len(), 2);
    }

    #[tokio::test]
    async fn test_blocked_component_fails_without_running() {
        let (engine, registry, _log) = setup(EngineConfig::default());
        let routine = Flaky::new(0);
        registry
            .write()
            .register(ComponentDescriptor::new("vision").depends_on("camera"), routine.clone())
            .unwrap();

        let status = engine.fail_blocked(&ComponentId::new("vision"), &ComponentId::new("camera"));
        assert_eq!(status.state, ComponentState::Failed);
        assert_eq!(
            status.last_error,
            Some(FailureCause::DependencyFailed {
                dependency: "camera".to_string(),
            })
        );
        assert_eq!(routine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_component() {
        let (engine, _registry, _log) = setup(EngineConfig::default());
        let err = engine.run_component(&ComponentId::new("ghost")).await.unwrap_err();
        assert_eq!(err, ConfigurationError::UnknownComponent(ComponentId::new("ghost")));
    }
}
