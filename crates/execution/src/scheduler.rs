//! Progressive phase assignment.

use crate::config::PhaseThresholds;
use crate::registry::ComponentRegistry;
use alejo_core::{
    ComponentDescriptor, ComponentId, ComponentState, Phase, ResourceLevel, ResourceSnapshot,
};
use serde::Serialize;
use std::collections::HashMap;

/// Phase membership computed for one scheduling pass.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseAssignment {
    /// Level the pass was computed for
    pub level: ResourceLevel,

    /// Members of every phase, in phase order
    pub phases: Vec<(Phase, Vec<ComponentId>)>,

    /// Ids admitted at `level`, registration order
    pub admitted: Vec<ComponentId>,

    /// Ids held back at `level`, registration order
    pub deferred: Vec<ComponentId>,
}

impl PhaseAssignment {
    /// Members of `phase`.
    pub fn members(&self, phase: Phase) -> &[ComponentId] {
        self.phases
            .iter()
            .find(|(p, _)| *p == phase)
            .map(|(_, members)| members.as_slice())
            .unwrap_or(&[])
    }

    /// Effective phase of a component.
    pub fn phase_of(&self, id: &str) -> Option<Phase> {
        self.phases
            .iter()
            .find(|(_, members)| members.iter().any(|m| m.as_str() == id))
            .map(|(phase, _)| *phase)
    }

    /// Whether `id` was admitted.
    pub fn is_admitted(&self, id: &str) -> bool {
        self.admitted.iter().any(|a| a.as_str() == id)
    }
}

/// Buckets pending components into phases and admits them by resource level.
#[derive(Debug, Clone, Default)]
pub struct PhaseAssigner {
    thresholds: PhaseThresholds,
}

impl PhaseAssigner {
    /// Create an assigner.
    pub fn new(thresholds: PhaseThresholds) -> Self {
        Self { thresholds }
    }

    /// Thresholds in use.
    pub fn thresholds(&self) -> &PhaseThresholds {
        &self.thresholds
    }

    /// Phase a descriptor belongs to on its own.
    pub fn phase_of(&self, descriptor: &ComponentDescriptor) -> Phase {
        if descriptor.accessibility {
            Phase::Critical
        } else if descriptor.essential {
            Phase::Core
        } else if descriptor.optional || descriptor.priority < self.thresholds.low_priority_below {
            Phase::Optional
        } else if descriptor.dependencies.len() > self.thresholds.enhanced_dependency_count {
            Phase::Enhanced
        } else {
            Phase::Standard
        }
    }

    /// Whether `phase` runs at `level`.
    pub fn admits(&self, phase: Phase, level: ResourceLevel) -> bool {
        phase.is_exempt() || level >= self.thresholds.required_level(phase)
    }

    /// Assign every `Pending` or `Deferred` component to a phase.
    ///
    /// A dependency is pulled forward into the earliest phase of any
    /// component that (transitively) depends on it, so admitted work never
    /// waits on deferred work.
    pub fn assign_phases(
        &self,
        registry: &ComponentRegistry,
        snapshot: &ResourceSnapshot,
    ) -> PhaseAssignment {
        let candidates: Vec<&ComponentDescriptor> = registry
            .iter()
            .filter(|c| {
                matches!(
                    c.status.state,
                    ComponentState::Pending | ComponentState::Deferred
                )
            })
            .map(|c| &c.descriptor)
            .collect();

        let mut effective: HashMap<&ComponentId, Phase> =
            candidates.iter().map(|d| (&d.id, self.phase_of(d))).collect();

        // Acyclic graph: settles within one pass per level of depth
        let mut changed = true;
        while changed {
            changed = false;
            for descriptor in &candidates {
                let Some(&phase) = effective.get(&descriptor.id) else {
                    continue;
                };
                for dep in &descriptor.dependencies {
                    if let Some(current) = effective.get_mut(dep) {
                        if phase < *current {
                            *current = phase;
                            changed = true;
                        }
                    }
                }
            }
        }

        let mut phases: Vec<(Phase, Vec<ComponentId>)> =
            Phase::ALL.iter().map(|p| (*p, Vec::new())).collect();
        let mut admitted = Vec::new();
        let mut deferred = Vec::new();

        for descriptor in candidates {
            let phase = effective.get(&descriptor.id).copied().unwrap_or(Phase::Standard);
            if let Some((_, members)) = phases.iter_mut().find(|(p, _)| *p == phase) {
                members.push(descriptor.id.clone());
            }
            if self.admits(phase, snapshot.level) {
                admitted.push(descriptor.id.clone());
            } else {
                deferred.push(descriptor.id.clone());
            }
        }

        PhaseAssignment {
            level: snapshot.level,
            phases,
            admitted,
            deferred,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alejo_core::{FnRoutine, Routine};
    use serde_json::json;
    use std::sync::Arc;

    fn noop() -> Arc<dyn Routine> {
        Arc::new(FnRoutine::new(|| async { Ok(json!({})) }))
    }

    fn registry(descriptors: Vec<ComponentDescriptor>) -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        for d in descriptors {
            registry.register(d, noop()).unwrap();
        }
        registry
    }

    fn names(ids: &[ComponentId]) -> Vec<&str> {
        ids.iter().map(ComponentId::as_str).collect()
    }

    #[test]
    fn test_accessibility_never_deferred_at_minimal() {
        let registry = registry(vec![
            ComponentDescriptor::new("screen-reader").accessibility(),
            ComponentDescriptor::new("storage").essential(),
            ComponentDescriptor::new("voice"),
            ComponentDescriptor::new("wallpaper").optional(),
        ]);
        let assignment = PhaseAssigner::default()
            .assign_phases(&registry, &ResourceSnapshot::at(ResourceLevel::Minimal));

        assert!(assignment.is_admitted("screen-reader"));
        assert_eq!(names(&assignment.admitted), vec!["screen-reader", "storage"]);
        assert_eq!(names(&assignment.deferred), vec!["voice", "wallpaper"]);
    }

    #[test]
    fn test_bucketing() {
        let registry = registry(vec![
            ComponentDescriptor::new("a"),
            ComponentDescriptor::new("b"),
            ComponentDescriptor::new("c"),
            ComponentDescriptor::new("d"),
            ComponentDescriptor::new("dashboard")
                .depends_on("a")
                .depends_on("b")
                .depends_on("c")
                .depends_on("d"),
            ComponentDescriptor::new("tips").with_priority(-5),
        ]);
        let assigner = PhaseAssigner::default();

        let low = assigner.assign_phases(&registry, &ResourceSnapshot::at(ResourceLevel::Low));
        assert_eq!(low.phase_of("dashboard"), Some(Phase::Enhanced));
        assert_eq!(low.phase_of("tips"), Some(Phase::Optional));
        assert_eq!(low.phase_of("a"), Some(Phase::Standard));
        assert_eq!(names(&low.deferred), vec!["dashboard", "tips"]);

        let medium =
            assigner.assign_phases(&registry, &ResourceSnapshot::at(ResourceLevel::Medium));
        assert_eq!(names(&medium.deferred), vec!["tips"]);

        let high = assigner.assign_phases(&registry, &ResourceSnapshot::at(ResourceLevel::High));
        assert!(high.deferred.is_empty());
    }

    #[test]
    fn test_dependency_pulled_into_dependent_phase() {
        let registry = registry(vec![
            ComponentDescriptor::new("speech-engine").optional(),
            ComponentDescriptor::new("tts").accessibility().depends_on("speech-engine"),
        ]);
        let assignment = PhaseAssigner::default()
            .assign_phases(&registry, &ResourceSnapshot::at(ResourceLevel::Minimal));

        assert_eq!(assignment.phase_of("speech-engine"), Some(Phase::Critical));
        assert!(assignment.deferred.is_empty());
    }

    #[test]
    fn test_only_pending_and_deferred_considered() {
        let mut registry = registry(vec![
            ComponentDescriptor::new("voice"),
            ComponentDescriptor::new("vision"),
        ]);
        registry.transition("voice", ComponentState::Initializing);
        registry.transition("voice", ComponentState::Initialized);
        registry.transition("vision", ComponentState::Deferred);

        let assignment = PhaseAssigner::default()
            .assign_phases(&registry, &ResourceSnapshot::at(ResourceLevel::Optimal));
        assert_eq!(names(&assignment.admitted), vec!["vision"]);
        assert_eq!(assignment.phase_of("voice"), None);
    }

    #[test]
    fn test_configurable_thresholds() {
        let thresholds = PhaseThresholds {
            standard: ResourceLevel::High,
            ..PhaseThresholds::default()
        };
        let assigner = PhaseAssigner::new(thresholds);
        assert!(!assigner.admits(Phase::Standard, ResourceLevel::Medium));
        assert!(assigner.admits(Phase::Critical, ResourceLevel::Minimal));
        assert!(assigner.admits(Phase::Core, ResourceLevel::Minimal));
    }
}
