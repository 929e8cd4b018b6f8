//! Per-entity controller record and its read-only projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One record per tracked entity.
///
/// `current_fee` is always within the configured fee bounds. `initialized`
/// flips to true on the first observation after registration and never back.
/// `observations` counts committed observations and serves as the record's
/// revision for staged updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerState {
    pub last_position: i64,
    pub volatility_estimate: u64,
    pub current_fee: u32,
    pub last_update_time: DateTime<Utc>,
    pub initialized: bool,
    pub observations: u64,
}

impl ControllerState {
    /// Fresh record: baseline position, zero estimate, default fee.
    pub fn new(baseline_position: i64, default_fee: u32, now: DateTime<Utc>) -> Self {
        Self {
            last_position: baseline_position,
            volatility_estimate: 0,
            current_fee: default_fee,
            last_update_time: now,
            initialized: false,
            observations: 0,
        }
    }

    pub fn metrics(&self) -> ControllerMetrics {
        ControllerMetrics {
            last_position: self.last_position,
            volatility_estimate: self.volatility_estimate,
            current_fee: self.current_fee,
            initialized: self.initialized,
            observations: self.observations,
            last_update_time: self.last_update_time,
        }
    }

    /// Stored time only moves forward.
    pub(crate) fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.last_update_time {
            self.last_update_time = at;
        }
    }
}

/// Snapshot returned by metrics queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerMetrics {
    pub last_position: i64,
    pub volatility_estimate: u64,
    pub current_fee: u32,
    pub initialized: bool,
    pub observations: u64,
    pub last_update_time: DateTime<Utc>,
}
