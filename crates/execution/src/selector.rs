//! Fallback candidate selection strategies.

use alejo_core::{ComponentDescriptor, FallbackRecord};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

/// Strategy for choosing which fallback to invoke.
pub trait FallbackSelector: Send + Sync {
    /// Index of the chosen candidate, `None` if there are none.
    ///
    /// `candidates` are in registration order.
    fn select(
        &self,
        descriptor: &ComponentDescriptor,
        candidates: &[FallbackRecord],
    ) -> Option<usize>;
}

/// Ranks candidates: accessibility preservation (for accessibility
/// components), then real implementations over stubs, then usage count,
/// then registration order.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrioritySelector;

impl FallbackSelector for PrioritySelector {
    fn select(
        &self,
        descriptor: &ComponentDescriptor,
        candidates: &[FallbackRecord],
    ) -> Option<usize> {
        candidates
            .iter()
            .enumerate()
            .min_by_key(|(index, record)| {
                let keeps_a11y = descriptor.accessibility && record.preserves_accessibility;
                (Reverse(keeps_a11y), record.is_stub, Reverse(record.usage_count), *index)
            })
            .map(|(index, _)| index)
    }
}

/// First registered candidate wins. Accessibility components still get the
/// first accessibility-preserving candidate when one exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstRegisteredSelector;

impl FallbackSelector for FirstRegisteredSelector {
    fn select(
        &self,
        descriptor: &ComponentDescriptor,
        candidates: &[FallbackRecord],
    ) -> Option<usize> {
        if descriptor.accessibility {
            if let Some(index) = candidates.iter().position(|r| r.preserves_accessibility) {
                return Some(index);
            }
        }
        if candidates.is_empty() {
            None
        } else {
            Some(0)
        }
    }
}

/// Selector strategies available.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackSelection {
    /// [`PrioritySelector`]
    #[default]
    PriorityBased,
    /// [`FirstRegisteredSelector`]
    FirstRegistered,
}

impl FallbackSelector for FallbackSelection {
    fn select(
        &self,
        descriptor: &ComponentDescriptor,
        candidates: &[FallbackRecord],
    ) -> Option<usize> {
        match self {
            Self::PriorityBased => PrioritySelector.select(descriptor, candidates),
            Self::FirstRegistered => FirstRegisteredSelector.select(descriptor, candidates),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alejo_core::{FnRoutine, Routine};
    use serde_json::json;
    use std::sync::Arc;

    fn record(name: &str, usage: u64) -> FallbackRecord {
        let routine: Arc<dyn Routine> = Arc::new(FnRoutine::new(|| async { Ok(json!({})) }));
        let mut record = FallbackRecord::new(routine).named(name);
        record.usage_count = usage;
        record
    }

    #[test]
    fn test_accessibility_component_prefers_preserving_candidate() {
        let reader = ComponentDescriptor::new("screen-reader").accessibility();
        let candidates = vec![
            record("popular", 40),
            record("aria-safe", 1).preserving_accessibility(),
        ];

        assert_eq!(PrioritySelector.select(&reader, &candidates), Some(1));
        assert_eq!(FirstRegisteredSelector.select(&reader, &candidates), Some(1));
    }

    #[test]
    fn test_regular_component_prefers_usage_then_order() {
        let voice = ComponentDescriptor::new("voice");
        let candidates = vec![record("a", 1), record("b", 5), record("c", 5)];
        assert_eq!(PrioritySelector.select(&voice, &candidates), Some(1));
        assert_eq!(FirstRegisteredSelector.select(&voice, &candidates), Some(0));
    }

    #[test]
    fn test_stub_ranks_below_real_fallback() {
        let voice = ComponentDescriptor::new("voice");
        let candidates = vec![record("noop", 10).stub(), record("text", 0)];
        assert_eq!(PrioritySelector.select(&voice, &candidates), Some(1));
    }

    #[test]
    fn test_no_candidates() {
        let voice = ComponentDescriptor::new("voice");
        assert_eq!(FallbackSelection::PriorityBased.select(&voice, &[]), None);
        assert_eq!(FallbackSelection::FirstRegistered.select(&voice, &[]), None);
    }
}
