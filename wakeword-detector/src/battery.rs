/// Battery impact estimation
///
/// Advisory only: the estimate is reported to consumers and never changes
/// engine behavior.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::trace;

/// Estimated cost of keeping the microphone pipeline running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatteryImpact {
    Low,
    Medium,
    High,
}

/// A battery reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryStatus {
    /// Charge level in `[0, 1]`
    pub level: f32,
    pub charging: bool,
}

impl BatteryStatus {
    /// Charging makes continuous capture cheap; otherwise the lower the
    /// charge, the more a continuous pipeline costs.
    pub fn impact(&self) -> BatteryImpact {
        if self.charging {
            BatteryImpact::Low
        } else if self.level >= 0.5 {
            BatteryImpact::Medium
        } else {
            BatteryImpact::High
        }
    }
}

/// Source of battery readings
#[cfg_attr(test, mockall::automock)]
pub trait BatteryProbe: Send {
    /// Current reading, or `None` when no battery information exists
    fn sample(&mut self) -> Option<BatteryStatus>;
}

/// Reads the first `BAT*` entry under `/sys/class/power_supply`
#[derive(Debug, Clone)]
pub struct SysfsBattery {
    root: PathBuf,
}

impl SysfsBattery {
    pub fn new() -> Self {
        Self::with_root("/sys/class/power_supply")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn battery_dir(&self) -> Option<PathBuf> {
        let mut batteries: Vec<PathBuf> = fs::read_dir(&self.root)
            .ok()?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with("BAT"))
            })
            .collect();
        batteries.sort();
        batteries.into_iter().next()
    }
}

impl Default for SysfsBattery {
    fn default() -> Self {
        Self::new()
    }
}

impl BatteryProbe for SysfsBattery {
    fn sample(&mut self) -> Option<BatteryStatus> {
        let dir = self.battery_dir()?;

        let capacity: f32 = fs::read_to_string(dir.join("capacity")).ok()?.trim().parse().ok()?;
        let status = fs::read_to_string(dir.join("status")).unwrap_or_default();
        let charging = matches!(status.trim(), "Charging" | "Full");

        let reading = BatteryStatus {
            level: (capacity / 100.0).clamp(0.0, 1.0),
            charging,
        };
        trace!(?reading, "battery sampled");

        Some(reading)
    }
}

/// Probe for hosts without a battery
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBattery;

impl BatteryProbe for NoBattery {
    fn sample(&mut self) -> Option<BatteryStatus> {
        None
    }
}
