//! Dependency resolution and wave scheduling for components.

use crate::error::ConfigurationError;
use crate::registry::ComponentRegistry;
use alejo_core::ComponentId;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

/// Ordered execution plan for a set of admitted components.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionPlan {
    /// Dependency-respecting linear order
    pub order: Vec<ComponentId>,

    /// Disjoint groups; every member only depends on earlier groups
    pub waves: Vec<Vec<ComponentId>>,
}

impl ExecutionPlan {
    /// Whether there is nothing to run.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Wave index of a component.
    pub fn wave_of(&self, id: &str) -> Option<usize> {
        self.waves.iter().position(|wave| wave.iter().any(|c| c.as_str() == id))
    }
}

/// Resolves component dependencies.
pub struct DependencyResolver;

impl DependencyResolver {
    /// Create a new resolver.
    pub fn new() -> Self {
        Self
    }

    /// Check the whole registry: every dependency must be registered and
    /// the graph must be acyclic.
    pub fn validate(&self, registry: &ComponentRegistry) -> Result<(), ConfigurationError> {
        for component in registry.iter() {
            for dep in &component.descriptor.dependencies {
                if !registry.contains(dep.as_str()) {
                    return Err(ConfigurationError::UnknownDependency {
                        component: component.descriptor.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        self.linear_order(registry, registry.ids()).map(|_| ())
    }

    /// Depth-first topological order of `admitted`, visiting higher
    /// effective priority first and breaking ties by registration order.
    ///
    /// Dependencies outside `admitted` are ignored.
    pub fn linear_order(
        &self,
        registry: &ComponentRegistry,
        admitted: &[ComponentId],
    ) -> Result<Vec<ComponentId>, ConfigurationError> {
        let admitted_set: HashSet<&ComponentId> = admitted.iter().collect();
        let rank = |id: &ComponentId| {
            let priority = registry
                .descriptor(id.as_str())
                .map_or(i64::MIN, |d| d.effective_priority());
            let sequence = registry.sequence(id.as_str()).unwrap_or(usize::MAX);
            (Reverse(priority), sequence)
        };

        let mut candidates: Vec<&ComponentId> = admitted_set.iter().copied().collect();
        candidates.sort_by_key(|id| rank(*id));

        let mut walk = Walk {
            registry,
            admitted: &admitted_set,
            rank: &rank,
            visited: HashSet::new(),
            on_stack: HashSet::new(),
            stack: Vec::new(),
            order: Vec::with_capacity(candidates.len()),
        };

        for id in candidates {
            walk.visit(id)?;
        }

        Ok(walk.order)
    }

    /// Build the execution plan for `admitted`.
    ///
    /// Dependencies outside the admitted set are not ordered here; callers
    /// either include them or check that they are ready before dispatch.
    pub fn plan(
        &self,
        registry: &ComponentRegistry,
        admitted: &[ComponentId],
    ) -> Result<ExecutionPlan, ConfigurationError> {
        let order = self.linear_order(registry, admitted)?;
        let admitted_set: HashSet<&ComponentId> = order.iter().collect();

        let mut placed: HashMap<&ComponentId, usize> = HashMap::new();
        let mut remaining: Vec<&ComponentId> = order.iter().collect();
        let mut waves: Vec<Vec<ComponentId>> = Vec::new();

        while !remaining.is_empty() {
            let wave_index = waves.len();
            let wave: Vec<&ComponentId> = remaining
                .iter()
                .copied()
                .filter(|id| {
                    registry.descriptor(id.as_str()).map_or(true, |d| {
                        d.dependencies
                            .iter()
                            .filter(|dep| admitted_set.contains(dep))
                            .all(|dep| placed.get(dep).map_or(false, |w| *w < wave_index))
                    })
                })
                .collect();

            let Some(first) = remaining.first() else {
                break;
            };
            if wave.is_empty() {
                // Unreachable for an acyclic order; report rather than spin
                return Err(ConfigurationError::Cycle {
                    closed_at: (*first).clone(),
                    path: vec![(*first).clone()],
                });
            }

            for id in &wave {
                placed.insert(*id, wave_index);
            }
            remaining.retain(|id| !placed.contains_key(id));
            waves.push(wave.into_iter().cloned().collect());
        }

        Ok(ExecutionPlan { order, waves })
    }
}

impl Default for DependencyResolver {
    fn default() -> Self {
        Self::new()
    }
}

struct Walk<'a, R> {
    registry: &'a ComponentRegistry,
    admitted: &'a HashSet<&'a ComponentId>,
    rank: &'a R,
    visited: HashSet<ComponentId>,
    on_stack: HashSet<ComponentId>,
    stack: Vec<ComponentId>,
    order: Vec<ComponentId>,
}

impl<'a, R, K> Walk<'a, R>
where
    R: Fn(&ComponentId) -> K,
    K: Ord,
{
    fn visit(&mut self, id: &ComponentId) -> Result<(), ConfigurationError> {
        if self.visited.contains(id) {
            return Ok(());
        }

        if self.on_stack.contains(id) {
            let start = self.stack.iter().position(|s| s == id).unwrap_or(0);
            let mut path: Vec<ComponentId> = self.stack[start..].to_vec();
            path.push(id.clone());
            return Err(ConfigurationError::Cycle {
                closed_at: id.clone(),
                path,
            });
        }

        let registry = self.registry;
        let Some(descriptor) = registry.descriptor(id.as_str()) else {
            return Err(ConfigurationError::UnknownComponent(id.clone()));
        };

        let mut deps: Vec<&ComponentId> = Vec::new();
        for dep in &descriptor.dependencies {
            if !registry.contains(dep.as_str()) {
                return Err(ConfigurationError::UnknownDependency {
                    component: id.clone(),
                    dependency: dep.clone(),
                });
            }
            if self.admitted.contains(dep) {
                deps.push(dep);
            }
        }
        deps.sort_by_key(|dep| (self.rank)(*dep));

        self.on_stack.insert(id.clone());
        self.stack.push(id.clone());

        for dep in deps {
            self.visit(dep)?;
        }

        self.stack.pop();
        self.on_stack.remove(id);
        self.visited.insert(id.clone());
        self.order.push(id.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alejo_core::{ComponentDescriptor, FnRoutine, Routine};
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

    fn ids(names: &[&str]) -> Vec<ComponentId> {
        names.iter().map(|n| ComponentId::new(*n)).collect()
    }

    fn names(waves: &[Vec<ComponentId>]) -> Vec<Vec<&str>> {
        waves.iter().map(|w| w.iter().map(ComponentId::as_str).collect()).collect()
    }

    fn graph() -> Vec<ComponentDescriptor> {
        vec![
            ComponentDescriptor::new("config").with_priority(50),
            ComponentDescriptor::new("storage").depends_on("config").with_priority(80),
            ComponentDescriptor::new("voice").depends_on("config").with_priority(60),
            ComponentDescriptor::new("vision").depends_on("storage").depends_on("voice"),
            ComponentDescriptor::new("dashboard").depends_on("vision").depends_on("config"),
            ComponentDescriptor::new("reader").accessibility().with_priority(1),
        ]
    }

    #[test]
    fn test_simple_chain_waves() {
        let registry = registry(vec![
            ComponentDescriptor::new("A").with_priority(100),
            ComponentDescriptor::new("B").depends_on("A").with_priority(90),
        ]);
        let resolver = DependencyResolver::new();
        let plan = resolver.plan(&registry, registry.ids()).unwrap();
        assert_eq!(names(&plan.waves), vec![vec!["A"], vec!["B"]]);
        assert_eq!(plan.order, ids(&["A", "B"]));
    }

    #[test]
    fn test_order_independent_of_registration_order() {
        let base = graph();
        let n = base.len();
        let resolver = DependencyResolver::new();

        // Every rotation, forwards and backwards
        for shift in 0..n {
            for reverse in [false, true] {
                let mut descriptors = base.clone();
                descriptors.rotate_left(shift);
                if reverse {
                    descriptors.reverse();
                }

                let registry = registry(descriptors);
                let plan = resolver.plan(&registry, registry.ids()).unwrap();

                for component in registry.iter() {
                    let own = plan.wave_of(component.descriptor.id.as_str()).unwrap();
                    let own_pos = plan
                        .order
                        .iter()
                        .position(|c| *c == component.descriptor.id)
                        .unwrap();
                    for dep in &component.descriptor.dependencies {
                        assert!(plan.wave_of(dep.as_str()).unwrap() < own);
                        assert!(plan.order.iter().position(|c| c == dep).unwrap() < own_pos);
                    }
                }
            }
        }
    }

    #[test]
    fn test_accessibility_visited_first_despite_low_priority() {
        let registry = registry(vec![
            ComponentDescriptor::new("Y").essential().with_priority(900),
            ComponentDescriptor::new("X").accessibility().with_priority(10),
        ]);
        let plan = DependencyResolver::new().plan(&registry, registry.ids()).unwrap();
        assert_eq!(plan.order, ids(&["X", "Y"]));
        assert_eq!(plan.wave_of("X"), Some(0));
    }

    #[test]
    fn test_ties_broken_by_registration_order() {
        let registry = registry(vec![
            ComponentDescriptor::new("second").with_priority(5),
            ComponentDescriptor::new("first").with_priority(5),
            ComponentDescriptor::new("top").with_priority(6),
        ]);
        let order = DependencyResolver::new().linear_order(&registry, registry.ids()).unwrap();
        assert_eq!(order, ids(&["top", "second", "first"]));
    }

    #[test]
    fn test_unknown_dependency() {
        let registry = registry(vec![ComponentDescriptor::new("vision").depends_on("camera")]);
        let err = DependencyResolver::new().validate(&registry).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::UnknownDependency {
                component: ComponentId::new("vision"),
                dependency: ComponentId::new("camera"),
            }
        );
    }

    #[test]
    fn test_cycle_detected_and_named() {
        let registry = registry(vec![
            ComponentDescriptor::new("A").depends_on("B"),
            ComponentDescriptor::new("B").depends_on("A"),
        ]);
        let err = DependencyResolver::new().validate(&registry).unwrap_err();
        match err {
            ConfigurationError::Cycle { closed_at, path } => {
                assert!(closed_at.as_str() == "A" || closed_at.as_str() == "B");
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 3);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let registry = registry(vec![ComponentDescriptor::new("loop").depends_on("loop")]);
        assert!(matches!(
            DependencyResolver::new().validate(&registry),
            Err(ConfigurationError::Cycle { .. })
        ));
    }

    #[test]
    fn test_plan_restricted_to_admitted_subset() {
        let registry = registry(graph());
        let admitted = ids(&["vision", "dashboard"]);
        let plan = DependencyResolver::new().plan(&registry, &admitted).unwrap();
        assert_eq!(names(&plan.waves), vec![vec!["vision"], vec!["dashboard"]]);
    }

    #[test]
    fn test_diamond_waves() {
        let registry = registry(graph());
        let plan = DependencyResolver::new().plan(&registry, registry.ids()).unwrap();
        assert_eq!(
            names(&plan.waves),
            vec![
                vec!["reader", "config"],
                vec!["storage", "voice"],
                vec!["vision"],
                vec!["dashboard"],
            ]
        );
    }
}
