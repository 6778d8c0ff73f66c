//! Component registry - descriptors, runtime status and fallbacks.

use crate::error::ConfigurationError;
use alejo_core::{
    ComponentDescriptor, ComponentId, ComponentState, FallbackRecord, Routine, RuntimeStatus, Time,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;
use tracing::warn;

/// A registered component.
pub struct RegisteredComponent {
    /// Immutable descriptor
    pub descriptor: ComponentDescriptor,

    /// Primary routine
    pub routine: Arc<dyn Routine>,

    /// Runtime status
    pub status: RuntimeStatus,

    /// Registration order, used to break priority ties
    pub sequence: usize,

    signal: watch::Sender<ComponentState>,
}

/// Holds every registered component.
///
/// The registry itself does no scheduling; it is shared between the
/// orchestrator and the engine tasks through [`SharedRegistry`].
#[derive(Default)]
pub struct ComponentRegistry {
    order: Vec<ComponentId>,
    components: HashMap<ComponentId, RegisteredComponent>,
    fallbacks: HashMap<ComponentId, Vec<FallbackRecord>>,
}

impl ComponentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component with its primary routine.
    pub fn register(
        &mut self,
        descriptor: ComponentDescriptor,
        routine: Arc<dyn Routine>,
    ) -> Result<(), ConfigurationError> {
        if self.components.contains_key(&descriptor.id) {
            return Err(ConfigurationError::DuplicateComponent(descriptor.id));
        }

        let id = descriptor.id.clone();
        let (signal, _) = watch::channel(ComponentState::Pending);
        let component = RegisteredComponent {
            descriptor,
            routine,
            status: RuntimeStatus::pending(),
            sequence: self.order.len(),
            signal,
        };

        self.order.push(id.clone());
        self.components.insert(id, component);
        Ok(())
    }

    /// Register a fallback candidate. A candidate with the same name is
    /// replaced; returns whether a replacement happened.
    ///
    /// The component itself may be registered later, but once it has left
    /// `Pending`/`Deferred` its fallbacks are frozen.
    pub fn register_fallback(
        &mut self,
        id: ComponentId,
        record: FallbackRecord,
    ) -> Result<bool, ConfigurationError> {
        if let Some(component) = self.components.get(&id) {
            if !matches!(
                component.status.state,
                ComponentState::Pending | ComponentState::Deferred
            ) {
                return Err(ConfigurationError::FallbackAfterSchedule(id));
            }
        }

        let candidates = self.fallbacks.entry(id).or_default();
        match candidates.iter_mut().find(|c| c.name == record.name) {
            Some(existing) => {
                *existing = record;
                Ok(true)
            }
            None => {
                candidates.push(record);
                Ok(false)
            }
        }
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.components.contains_key(id)
    }

    /// Look up a component.
    pub fn get(&self, id: &str) -> Option<&RegisteredComponent> {
        self.components.get(id)
    }

    /// Descriptor of a component.
    pub fn descriptor(&self, id: &str) -> Option<&ComponentDescriptor> {
        self.components.get(id).map(|c| &c.descriptor)
    }

    /// Status of a component.
    pub fn status(&self, id: &str) -> Option<&RuntimeStatus> {
        self.components.get(id).map(|c| &c.status)
    }

    /// State of a component.
    pub fn state(&self, id: &str) -> Option<ComponentState> {
        self.components.get(id).map(|c| c.status.state)
    }

    /// Registration sequence of a component.
    pub fn sequence(&self, id: &str) -> Option<usize> {
        self.components.get(id).map(|c| c.sequence)
    }

    /// Ids in registration order.
    pub fn ids(&self) -> &[ComponentId] {
        &self.order
    }

    /// Components in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredComponent> {
        self.order.iter().filter_map(|id| self.components.get(id))
    }

    /// Fallback candidates in registration order.
    pub fn fallbacks(&self, id: &str) -> &[FallbackRecord] {
        self.fallbacks.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Bump usage of a fallback and return a copy of it.
    pub fn use_fallback(&mut self, id: &str, index: usize, at: Time) -> Option<FallbackRecord> {
        let record = self.fallbacks.get_mut(id)?.get_mut(index)?;
        record.usage_count += 1;
        record.last_used_at = Some(at);
        Some(record.clone())
    }

    /// Move a component to `next`, notifying waiters.
    ///
    /// Returns false (and changes nothing) if the transition is not allowed.
    pub fn transition(&mut self, id: &str, next: ComponentState) -> bool {
        let Some(component) = self.components.get_mut(id) else {
            return false;
        };

        let current = component.status.state;
        if !current.can_transition_to(next) {
            warn!("Rejected transition of {} from {} to {}", id, current, next);
            return false;
        }

        component.status.state = next;
        component.signal.send_replace(next);
        true
    }

    /// Mutate a component's status fields (not its state).
    pub fn update_status(&mut self, id: &str, f: impl FnOnce(&mut RuntimeStatus)) {
        if let Some(component) = self.components.get_mut(id) {
            let state = component.status.state;
            f(&mut component.status);
            component.status.state = state;
        }
    }

    /// Receiver that tracks a component's state.
    pub fn watch(&self, id: &str) -> Option<watch::Receiver<ComponentState>> {
        self.components.get(id).map(|c| c.signal.subscribe())
    }

    /// Ids whose state is ready (`Initialized` or `Fallback`).
    pub fn ready(&self) -> HashSet<ComponentId> {
        self.iter()
            .filter(|c| c.status.state.is_ready())
            .map(|c| c.descriptor.id.clone())
            .collect()
    }

    /// Ids in `state`, registration order.
    pub fn ids_in_state(&self, state: ComponentState) -> Vec<ComponentId> {
        self.iter()
            .filter(|c| c.status.state == state)
            .map(|c| c.descriptor.id.clone())
            .collect()
    }

    /// Registered component count.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Registry shared between the orchestrator and engine tasks.
///
/// Locks are never held across an await point.
#[derive(Clone, Default)]
pub struct SharedRegistry(Arc<RwLock<ComponentRegistry>>);

impl SharedRegistry {
    /// Wrap a registry.
    pub fn new(registry: ComponentRegistry) -> Self {
        Self(Arc::new(RwLock::new(registry)))
    }

    /// Read access.
    pub fn read(&self) -> RwLockReadGuard<'_, ComponentRegistry> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write access.
    pub fn write(&self) -> RwLockWriteGuard<'_, ComponentRegistry> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alejo_core::FnRoutine;
    use serde_json::json;

    fn noop() -> Arc<dyn Routine> {
        Arc::new(FnRoutine::new(|| async { Ok(json!({})) }))
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = ComponentRegistry::new();
        registry.register(ComponentDescriptor::new("voice"), noop()).unwrap();

        let err = registry.register(ComponentDescriptor::new("voice"), noop()).unwrap_err();
        assert_eq!(err, ConfigurationError::DuplicateComponent(ComponentId::new("voice")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registration_order_and_sequence() {
        let mut registry = ComponentRegistry::new();
        registry.register(ComponentDescriptor::new("b"), noop()).unwrap();
        registry.register(ComponentDescriptor::new("a"), noop()).unwrap();

        assert_eq!(registry.ids(), &[ComponentId::new("b"), ComponentId::new("a")]);
        assert_eq!(registry.sequence("a"), Some(1));
        assert_eq!(registry.state("a"), Some(ComponentState::Pending));
    }

    #[test]
    fn test_fallback_registered_before_component_and_replaced_by_name() {
        let mut registry = ComponentRegistry::new();
        assert!(!registry
            .register_fallback(ComponentId::new("tts"), FallbackRecord::new(noop()))
            .unwrap());
        assert!(registry
            .register_fallback(ComponentId::new("tts"), FallbackRecord::new(noop()).stub())
            .unwrap());
        assert!(!registry
            .register_fallback(ComponentId::new("tts"), FallbackRecord::new(noop()).named("beep"))
            .unwrap());

        registry.register(ComponentDescriptor::new("tts"), noop()).unwrap();
        let candidates = registry.fallbacks("tts");
        assert_eq!(candidates.len(), 2);
        assert!(candidates[0].is_stub);
    }

    #[test]
    fn test_fallback_frozen_once_scheduled() {
        let mut registry = ComponentRegistry::new();
        registry.register(ComponentDescriptor::new("tts"), noop()).unwrap();
        assert!(registry.transition("tts", ComponentState::Initializing));

        let err = registry
            .register_fallback(ComponentId::new("tts"), FallbackRecord::new(noop()))
            .unwrap_err();
        assert_eq!(err, ConfigurationError::FallbackAfterSchedule(ComponentId::new("tts")));
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let mut registry = ComponentRegistry::new();
        registry.register(ComponentDescriptor::new("voice"), noop()).unwrap();

        assert!(!registry.transition("voice", ComponentState::Initialized));
        assert!(registry.transition("voice", ComponentState::Deferred));
        assert!(!registry.transition("voice", ComponentState::Initializing));
        assert_eq!(registry.state("voice"), Some(ComponentState::Deferred));
    }

    #[test]
    fn test_use_fallback_counts_usage() {
        let mut registry = ComponentRegistry::new();
        registry.register_fallback(ComponentId::new("tts"), FallbackRecord::new(noop())).unwrap();

        let at = chrono::Utc::now();
        let used = registry.use_fallback("tts", 0, at).unwrap();
        assert_eq!(used.usage_count, 1);
        assert_eq!(registry.fallbacks("tts")[0].last_used_at, Some(at));
        assert!(registry.use_fallback("tts", 3, at).is_none());
    }

    #[tokio::test]
    async fn test_watch_observes_transitions() {
        let mut registry = ComponentRegistry::new();
        registry.register(ComponentDescriptor::new("voice"), noop()).unwrap();
        let mut rx = registry.watch("voice").unwrap();

        registry.transition("voice", ComponentState::Initializing);
        registry.transition("voice", ComponentState::Initialized);

        let state = rx.wait_for(|s| s.is_terminal()).await.unwrap();
        assert_eq!(*state, ComponentState::Initialized);
    }
}
