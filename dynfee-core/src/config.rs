//! Controller configuration.
//!
//! All knobs are fixed at construction and immutable for a deployment. The
//! defaults are the reference constants: a 0.30 weight on the newest squared
//! displacement, fees between 5bp and 100bp (30bp until the first update),
//! and interpolation between squared displacements of 100 and 10000.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ControllerError, Result};

/// Largest Uniswap-style tick magnitude; a pool can move at most twice this.
pub const MAX_TICK: u64 = 887_272;

/// Fixed-point controller parameters. Fees are in hundredths of a basis point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    /// Weight of the newest squared displacement, as a fraction of `alpha_scale`.
    pub alpha_numerator: u64,
    pub alpha_scale: u64,
    pub min_fee: u32,
    pub max_fee: u32,
    /// Quoted from registration until the first post-bootstrap update.
    pub default_fee: u32,
    /// Estimates at or below this map to `min_fee`.
    pub low_threshold: u64,
    /// Estimates at or above this map to `max_fee`.
    pub high_threshold: u64,
    /// Bound the adapter enforces on `|displacement|` before observing.
    pub max_displacement: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            alpha_numerator: 3000,
            alpha_scale: 10_000,
            min_fee: 500,
            max_fee: 10_000,
            default_fee: 3000,
            low_threshold: 100,
            high_threshold: 10_000,
            max_displacement: 2 * MAX_TICK,
        }
    }
}

impl ControllerConfig {
    /// Fail fast on parameter sets the controller cannot honour.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(ControllerError::InvalidConfiguration(msg));

        if self.alpha_scale == 0 {
            return invalid("alpha_scale must be > 0".into());
        }
        if self.alpha_numerator == 0 {
            return invalid("alpha_numerator must be > 0".into());
        }
        if self.alpha_numerator > self.alpha_scale {
            return invalid(format!(
                "alpha_numerator ({}) exceeds alpha_scale ({})",
                self.alpha_numerator, self.alpha_scale
            ));
        }
        if self.high_threshold <= self.low_threshold {
            return invalid(format!(
                "high_threshold ({}) must be > low_threshold ({})",
                self.high_threshold, self.low_threshold
            ));
        }
        if self.max_fee < self.min_fee {
            return invalid(format!(
                "max_fee ({}) is below min_fee ({})",
                self.max_fee, self.min_fee
            ));
        }
        if !(self.min_fee..=self.max_fee).contains(&self.default_fee) {
            return invalid(format!(
                "default_fee ({}) outside [{}, {}]",
                self.default_fee, self.min_fee, self.max_fee
            ));
        }
        if self.max_displacement == 0 {
            return invalid("max_displacement must be > 0".into());
        }
        // The squared bound has to fit the u64 estimate.
        if self.max_displacement > u32::MAX as u64 {
            return invalid(format!(
                "max_displacement ({}) exceeds {}",
                self.max_displacement,
                u32::MAX
            ));
        }
        Ok(())
    }

    /// Load and validate a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ControllerError::InvalidConfiguration(format!("read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a config from a TOML string. Missing keys take defaults.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ControllerError::InvalidConfiguration(format!("parse TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ControllerError::InvalidConfiguration(format!("render TOML: {e}")))
    }

    /// Content hash of the parameter set, stable across runs and platforms.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::json!({
            "alpha_numerator": self.alpha_numerator,
            "alpha_scale": self.alpha_scale,
            "min_fee": self.min_fee,
            "max_fee": self.max_fee,
            "default_fee": self.default_fee,
            "low_threshold": self.low_threshold,
            "high_threshold": self.high_threshold,
            "max_displacement": self.max_displacement,
        });
        blake3::hash(canonical.to_string().as_bytes())
            .to_hex()
            .to_string()
    }
}
