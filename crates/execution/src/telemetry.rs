//! Resource telemetry source.

use alejo_core::ResourceReadings;
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};

/// Read-only source of device resource readings.
#[async_trait]
pub trait TelemetryProvider: Send + Sync {
    /// Current readings.
    async fn readings(&self) -> anyhow::Result<ResourceReadings>;
}

/// Telemetry returning whatever was last set.
#[derive(Debug, Default)]
pub struct StaticTelemetry {
    readings: Mutex<Option<ResourceReadings>>,
}

impl StaticTelemetry {
    /// Provider reporting `readings`.
    pub fn new(readings: ResourceReadings) -> Self {
        Self {
            readings: Mutex::new(Some(readings)),
        }
    }

    /// Provider that always errors.
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// Replace the reported readings.
    pub fn set(&self, readings: ResourceReadings) {
        *self.readings.lock().unwrap_or_else(PoisonError::into_inner) = Some(readings);
    }
}

#[async_trait]
impl TelemetryProvider for StaticTelemetry {
    async fn readings(&self) -> anyhow::Result<ResourceReadings> {
        let readings = *self.readings.lock().unwrap_or_else(PoisonError::into_inner);
        readings.ok_or_else(|| anyhow::anyhow!("telemetry unavailable"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_telemetry() {
        let telemetry = StaticTelemetry::unavailable();
        assert!(telemetry.readings().await.is_err());

        let busy = ResourceReadings {
            cpu_usage: 90.0,
            ..ResourceReadings::idle()
        };
        telemetry.set(busy);
        assert_eq!(telemetry.readings().await.unwrap(), busy);
    }
}
