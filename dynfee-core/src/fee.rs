//! Volatility-to-fee mapping.
//!
//! Clamped linear interpolation between `(low_threshold, min_fee)` and
//! `(high_threshold, max_fee)`. Since `max_fee >= min_fee` is enforced at
//! construction, the slope is non-negative and the map is monotone
//! non-decreasing in the estimate; the clamps keep every output inside
//! `[min_fee, max_fee]`.

use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result};
use crate::math::LinearMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeMapper {
    min_fee: u32,
    max_fee: u32,
    low_threshold: u64,
    high_threshold: u64,
    map: LinearMap,
}

impl FeeMapper {
    pub fn new(min_fee: u32, max_fee: u32, low_threshold: u64, high_threshold: u64) -> Result<Self> {
        if high_threshold <= low_threshold {
            return Err(ControllerError::InvalidConfiguration(format!(
                "high_threshold ({high_threshold}) must be > low_threshold ({low_threshold})"
            )));
        }
        if max_fee < min_fee {
            return Err(ControllerError::InvalidConfiguration(format!(
                "max_fee ({max_fee}) is below min_fee ({min_fee})"
            )));
        }
        let map = LinearMap::new(low_threshold, high_threshold, min_fee as u64, max_fee as u64)?;
        Ok(Self {
            min_fee,
            max_fee,
            low_threshold,
            high_threshold,
            map,
        })
    }

    pub fn from_config(config: &ControllerConfig) -> Result<Self> {
        Self::new(
            config.min_fee,
            config.max_fee,
            config.low_threshold,
            config.high_threshold,
        )
    }

    pub fn min_fee(&self) -> u32 {
        self.min_fee
    }

    pub fn max_fee(&self) -> u32 {
        self.max_fee
    }

    pub fn volatility_to_fee(&self, estimate: u64) -> u32 {
        if estimate <= self.low_threshold {
            return self.min_fee;
        }
        if estimate >= self.high_threshold {
            return self.max_fee;
        }
        // LinearMap output lies between min_fee and max_fee, both u32.
        self.map.eval(estimate) as u32
    }
}
