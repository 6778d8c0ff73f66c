//! Component descriptor - the declarative half of a registered component.

use crate::id::ComponentId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Default number of retries after the first failed attempt.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 2;

/// Default base delay between retries, in milliseconds.
pub const DEFAULT_RETRY_DELAY_BASE_MS: u64 = 500;

/// Default deadline for a fallback routine, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Declarative description of a component to initialize.
///
/// Descriptors are immutable once registered; everything that changes during
/// a run lives in [`RuntimeStatus`](crate::RuntimeStatus).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    /// Unique identifier
    pub id: ComponentId,

    /// Components that must be ready before this one starts
    #[serde(default)]
    pub dependencies: BTreeSet<ComponentId>,

    /// Scheduling priority (higher = earlier)
    #[serde(default)]
    pub priority: i64,

    /// An unresolved failure aborts the whole run
    #[serde(default)]
    pub essential: bool,

    /// Accessibility components are scheduled first and never deferred
    #[serde(default)]
    pub accessibility: bool,

    /// User asked for this component to load late
    #[serde(default)]
    pub optional: bool,

    /// Retries after the first failed attempt
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Base delay between retries
    #[serde(default = "default_retry_delay_base_ms")]
    pub retry_delay_base_ms: u64,

    /// Deadline for the fallback routine
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_retry_delay_base_ms() -> u64 {
    DEFAULT_RETRY_DELAY_BASE_MS
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl ComponentDescriptor {
    /// Create a descriptor with default policy and no dependencies.
    pub fn new(id: impl Into<ComponentId>) -> Self {
        Self {
            id: id.into(),
            dependencies: BTreeSet::new(),
            priority: 0,
            essential: false,
            accessibility: false,
            optional: false,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay_base_ms: DEFAULT_RETRY_DELAY_BASE_MS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    /// Add a dependency.
    pub fn depends_on(mut self, id: impl Into<ComponentId>) -> Self {
        self.dependencies.insert(id.into());
        self
    }

    /// Set the scheduling priority.
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Mark as essential.
    pub fn essential(mut self) -> Self {
        self.essential = true;
        self
    }

    /// Mark as accessibility-critical.
    pub fn accessibility(mut self) -> Self {
        self.accessibility = true;
        self
    }

    /// Mark as user-deferred.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, attempts: u32, delay_base_ms: u64) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay_base_ms = delay_base_ms;
        self
    }

    /// Set the fallback deadline.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Priority used for ordering: accessibility components rank above any
    /// nominal priority.
    pub fn effective_priority(&self) -> i64 {
        if self.accessibility {
            i64::MAX
        } else {
            self.priority.min(i64::MAX - 1)
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn retry_delay(&self, retry: u32, progressive: bool) -> Duration {
        let base = Duration::from_millis(self.retry_delay_base_ms);
        if progressive {
            base.saturating_mul(retry.max(1))
        } else {
            base
        }
    }

    /// Fallback deadline as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessibility_outranks_any_priority() {
        let a11y = ComponentDescriptor::new("reader").with_priority(10).accessibility();
        let core = ComponentDescriptor::new("core").with_priority(i64::MAX);
        assert!(a11y.effective_priority() > core.effective_priority());
    }

    #[test]
    fn test_retry_delay_linear_and_fixed() {
        let desc = ComponentDescriptor::new("voice").with_retry(3, 100);
        assert_eq!(desc.retry_delay(1, true), Duration::from_millis(100));
        assert_eq!(desc.retry_delay(3, true), Duration::from_millis(300));
        assert_eq!(desc.retry_delay(3, false), Duration::from_millis(100));
    }

    #[test]
    fn test_deserialize_applies_defaults() {
        let desc: ComponentDescriptor =
            serde_json::from_str(r#"{"id": "vision", "dependencies": ["camera"]}"#).unwrap();
        assert_eq!(desc.id.as_str(), "vision");
        assert!(desc.dependencies.contains("camera"));
        assert_eq!(desc.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
        assert_eq!(desc.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert!(!desc.essential);
    }
}
