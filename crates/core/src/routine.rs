//! Routine capability and fallback records.

use crate::Time;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Output of a routine, e.g. `{"ready": true}`.
pub type RoutineOutput = serde_json::Value;

/// An initialization routine bound to a component at registration time.
#[async_trait]
pub trait Routine: Send + Sync {
    /// Run the routine once.
    async fn execute(&self) -> anyhow::Result<RoutineOutput>;

    /// Called when the routine was abandoned after its deadline.
    fn on_timeout(&self) {}
}

/// Adapter turning an async closure into a [`Routine`].
pub struct FnRoutine<F>(F);

impl<F, Fut> FnRoutine<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<RoutineOutput>> + Send,
{
    /// Wrap a closure.
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> Routine for FnRoutine<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<RoutineOutput>> + Send,
{
    async fn execute(&self) -> anyhow::Result<RoutineOutput> {
        (self.0)().await
    }
}

/// A degraded implementation registered for a component.
#[derive(Clone)]
pub struct FallbackRecord {
    /// Candidate name; registering the same name again replaces it
    pub name: String,

    /// The degraded routine
    pub routine: Arc<dyn Routine>,

    /// Whether accessibility features survive in this mode
    pub preserves_accessibility: bool,

    /// Whether this is a no-op placeholder
    pub is_stub: bool,

    /// Times this fallback was invoked
    pub usage_count: u64,

    /// Last invocation
    pub last_used_at: Option<Time>,
}

impl FallbackRecord {
    /// Create a fallback record named `"default"`.
    pub fn new(routine: Arc<dyn Routine>) -> Self {
        Self {
            name: "default".to_string(),
            routine,
            preserves_accessibility: false,
            is_stub: false,
            usage_count: 0,
            last_used_at: None,
        }
    }

    /// Set the candidate name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Mark as accessibility-preserving.
    pub fn preserving_accessibility(mut self) -> Self {
        self.preserves_accessibility = true;
        self
    }

    /// Mark as a stub.
    pub fn stub(mut self) -> Self {
        self.is_stub = true;
        self
    }
}

impl fmt::Debug for FallbackRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackRecord")
            .field("name", &self.name)
            .field("preserves_accessibility", &self.preserves_accessibility)
            .field("is_stub", &self.is_stub)
            .field("usage_count", &self.usage_count)
            .field("last_used_at", &self.last_used_at)
            .finish()
    }
}
