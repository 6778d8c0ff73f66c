//! Loading phases and resource levels.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Discrete resource level, ordered from worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceLevel {
    /// Barely enough for accessibility and essentials
    Minimal,
    /// Constrained
    Low,
    /// Typical
    Medium,
    /// Plenty of headroom
    High,
    /// Idle device on mains power
    Optimal,
}

impl ResourceLevel {
    /// All levels, worst first.
    pub const ALL: [ResourceLevel; 5] = [
        ResourceLevel::Minimal,
        ResourceLevel::Low,
        ResourceLevel::Medium,
        ResourceLevel::High,
        ResourceLevel::Optimal,
    ];

    /// Derive a level from raw readings.
    ///
    /// Headroom is `100 - max(cpu, memory)`; on battery the headroom is
    /// capped by the remaining charge.
    pub fn from_readings(readings: &ResourceReadings) -> Self {
        let pressure = readings.cpu_usage.max(readings.memory_usage).clamp(0.0, 100.0);
        let mut headroom = 100.0 - pressure;
        if let Some(battery) = readings.battery_level {
            if !readings.charging {
                headroom = headroom.min(battery.clamp(0.0, 100.0));
            }
        }

        match headroom {
            h if h < 10.0 => Self::Minimal,
            h if h < 30.0 => Self::Low,
            h if h < 50.0 => Self::Medium,
            h if h < 75.0 => Self::High,
            _ => Self::Optimal,
        }
    }
}

impl fmt::Display for ResourceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Minimal => write!(f, "minimal"),
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Optimal => write!(f, "optimal"),
        }
    }
}

/// Error parsing a [`ResourceLevel`].
#[derive(Debug, thiserror::Error)]
#[error("unknown resource level: {0}")]
pub struct ParseLevelError(String);

impl FromStr for ResourceLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "minimal" => Ok(Self::Minimal),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "optimal" => Ok(Self::Optimal),
            other => Err(ParseLevelError(other.to_string())),
        }
    }
}

/// Raw telemetry readings, percentages in `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceReadings {
    /// CPU usage
    pub cpu_usage: f32,

    /// Memory usage
    pub memory_usage: f32,

    /// Battery charge, `None` on mains-only devices
    pub battery_level: Option<f32>,

    /// Whether the device is charging
    pub charging: bool,
}

impl ResourceReadings {
    /// Idle device on mains power.
    pub fn idle() -> Self {
        Self {
            cpu_usage: 5.0,
            memory_usage: 20.0,
            battery_level: None,
            charging: true,
        }
    }
}

impl Default for ResourceReadings {
    fn default() -> Self {
        Self::idle()
    }
}

/// Read-only resource snapshot handed to the phase assigner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    /// Discrete level
    pub level: ResourceLevel,

    /// Readings the level was derived from, if any
    pub readings: Option<ResourceReadings>,
}

impl ResourceSnapshot {
    /// Snapshot with an explicit level.
    pub fn at(level: ResourceLevel) -> Self {
        Self {
            level,
            readings: None,
        }
    }

    /// Snapshot derived from readings.
    pub fn from_readings(readings: ResourceReadings) -> Self {
        Self {
            level: ResourceLevel::from_readings(&readings),
            readings: Some(readings),
        }
    }
}

/// Priority tier used to admit or defer pending components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Accessibility components, admitted at any level
    Critical,
    /// Essential components
    Core,
    /// Default bucket
    Standard,
    /// Heavy components (many dependencies)
    Enhanced,
    /// Low priority or user-deferred
    Optional,
}

impl Phase {
    /// All phases in admission order.
    pub const ALL: [Phase; 5] = [
        Phase::Critical,
        Phase::Core,
        Phase::Standard,
        Phase::Enhanced,
        Phase::Optional,
    ];

    /// Level required to admit this phase unless configured otherwise.
    pub fn default_required_level(self) -> ResourceLevel {
        match self {
            Self::Critical | Self::Core => ResourceLevel::Minimal,
            Self::Standard => ResourceLevel::Low,
            Self::Enhanced => ResourceLevel::Medium,
            Self::Optional => ResourceLevel::High,
        }
    }

    /// Critical is admitted regardless of resources.
    pub fn is_exempt(self) -> bool {
        self == Self::Critical
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::Core => write!(f, "core"),
            Self::Standard => write!(f, "standard"),
            Self::Enhanced => write!(f, "enhanced"),
            Self::Optional => write!(f, "optional"),
        }
    }
}
