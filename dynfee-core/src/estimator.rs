//! Recursive fixed-point volatility estimator.
//!
//! Recursive: E[t] = (alpha * d[t]^2 + (scale - alpha) * E[t-1]) / scale
//! where d[t] is the displacement between consecutive positions.
//! O(1) memory: no history is kept, past observations decay geometrically by
//! (scale - alpha) / scale per step.
//! Bootstrap: the first observation after registration only records the
//! position; the estimate stays at zero.

use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result};
use crate::math;
use crate::state::ControllerState;

/// Result of feeding one position into the estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimatorOutcome {
    /// First observation: position recorded, estimate untouched.
    Bootstrap,
    Updated { estimate: u64, displacement: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolatilityEstimator {
    alpha: u64,
    scale: u64,
}

impl VolatilityEstimator {
    pub fn new(alpha_numerator: u64, alpha_scale: u64) -> Result<Self> {
        if alpha_scale == 0 || alpha_numerator == 0 || alpha_numerator > alpha_scale {
            return Err(ControllerError::InvalidConfiguration(format!(
                "smoothing weight {alpha_numerator}/{alpha_scale} must lie in (0, 1]"
            )));
        }
        Ok(Self {
            alpha: alpha_numerator,
            scale: alpha_scale,
        })
    }

    pub fn from_config(config: &ControllerConfig) -> Result<Self> {
        Self::new(config.alpha_numerator, config.alpha_scale)
    }

    pub fn alpha(&self) -> u64 {
        self.alpha
    }

    pub fn scale(&self) -> u64 {
        self.scale
    }

    /// Pure step: next estimate and displacement, given the prior position and estimate.
    pub fn step(&self, last_position: i64, estimate: u64, new_position: i64) -> Result<(u64, i64)> {
        let displacement = new_position.checked_sub(last_position).ok_or_else(|| {
            ControllerError::ArithmeticOverflow(format!(
                "displacement {new_position} - {last_position} does not fit i64"
            ))
        })?;
        let squared = math::square(displacement)?;
        let next = math::weighted_average(squared, estimate, self.alpha, self.scale)?;
        Ok((next, displacement))
    }

    /// Apply one observation to `state`.
    ///
    /// On error `state` is left untouched.
    pub fn update(&self, state: &mut ControllerState, new_position: i64) -> Result<EstimatorOutcome> {
        if !state.initialized {
            state.last_position = new_position;
            state.initialized = true;
            return Ok(EstimatorOutcome::Bootstrap);
        }
        let (estimate, displacement) =
            self.step(state.last_position, state.volatility_estimate, new_position)?;
        state.last_position = new_position;
        state.volatility_estimate = estimate;
        Ok(EstimatorOutcome::Updated {
            estimate,
            displacement,
        })
    }

    /// One zero-displacement step.
    pub fn decay_once(&self, estimate: u64) -> u64 {
        // (scale - alpha) / scale <= 1, so the quotient never exceeds `estimate`.
        ((self.scale - self.alpha) as u128 * estimate as u128 / self.scale as u128) as u64
    }

    /// Number of zero-displacement observations needed for `from` to fall to
    /// `to` or below, counting integer truncation at every step.
    pub fn steps_to_decay(&self, from: u64, to: u64) -> u32 {
        let mut estimate = from;
        let mut steps = 0u32;
        // alpha > 0, so every step strictly shrinks a positive estimate.
        while estimate > to {
            estimate = self.decay_once(estimate);
            steps = steps.saturating_add(1);
        }
        steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn reference() -> VolatilityEstimator {
        VolatilityEstimator::new(3000, 10_000).unwrap()
    }

    fn fresh(baseline: i64) -> ControllerState {
        ControllerState::new(baseline, 3000, DateTime::from_timestamp(0, 0).unwrap())
    }

    #[test]
    fn rejects_weights_outside_unit_interval() {
        assert!(VolatilityEstimator::new(0, 10_000).is_err());
        assert!(VolatilityEstimator::new(10_001, 10_000).is_err());
        assert!(VolatilityEstimator::new(1, 0).is_err());
        assert!(VolatilityEstimator::new(10_000, 10_000).is_ok());
    }

    #[test]
    fn first_observation_is_bootstrap() {
        let est = reference();
        let mut state = fresh(0);
        let outcome = est.update(&mut state, 250).unwrap();
        assert_eq!(outcome, EstimatorOutcome::Bootstrap);
        assert!(state.initialized);
        assert_eq!(state.last_position, 250);
        assert_eq!(state.volatility_estimate, 0);
    }

    #[test]
    fn known_values() {
        // d = 100 -> squared 10000 -> 0.3 * 10000 = 3000
        // d = 0   -> 0.7 * 3000 = 2100
        // d = -10 -> (0.3 * 100 + 0.7 * 2100) = 30 + 1470 = 1500
        let est = reference();
        let mut state = fresh(0);
        est.update(&mut state, 0).unwrap();

        assert_eq!(
            est.update(&mut state, 100).unwrap(),
            EstimatorOutcome::Updated { estimate: 3000, displacement: 100 }
        );
        assert_eq!(
            est.update(&mut state, 100).unwrap(),
            EstimatorOutcome::Updated { estimate: 2100, displacement: 0 }
        );
        assert_eq!(
            est.update(&mut state, 90).unwrap(),
            EstimatorOutcome::Updated { estimate: 1500, displacement: -10 }
        );
        assert_eq!(state.last_position, 90);
    }

    #[test]
    fn sign_of_displacement_does_not_matter() {
        let est = reference();
        assert_eq!(est.step(0, 0, 50).unwrap().0, est.step(0, 0, -50).unwrap().0);
    }

    #[test]
    fn overflow_leaves_state_untouched() {
        let est = reference();
        let mut state = fresh(i64::MIN);
        est.update(&mut state, i64::MIN).unwrap();
        let before = state.clone();

        let err = est.update(&mut state, i64::MAX).unwrap_err();
        assert!(matches!(err, ControllerError::ArithmeticOverflow(_)));
        assert_eq!(state, before);

        // Representable displacement whose square does not fit u64.
        let err = est.update(&mut state, i64::MIN + (1 << 33)).unwrap_err();
        assert!(matches!(err, ControllerError::ArithmeticOverflow(_)));
        assert_eq!(state, before);
    }

    #[test]
    fn decay_once_matches_zero_displacement_update() {
        let est = reference();
        assert_eq!(est.decay_once(3000), 2100);
        assert_eq!(est.step(7, 3000, 7).unwrap().0, est.decay_once(3000));
    }

    #[test]
    fn full_weight_forgets_immediately() {
        let est = VolatilityEstimator::new(1, 1).unwrap();
        assert_eq!(est.decay_once(u64::MAX), 0);
        assert_eq!(est.steps_to_decay(u64::MAX, 0), 1);
    }

    #[test]
    fn steps_to_decay_counts_truncation() {
        let est = reference();
        // 10000 -> 7000 -> 4900 -> 3430 -> 2401
        assert_eq!(est.steps_to_decay(10_000, 3430), 3);
        assert_eq!(est.steps_to_decay(10_000, 3429), 4);
        assert_eq!(est.steps_to_decay(100, 100), 0);
        // Truncation reaches zero in finitely many steps.
        let n = est.steps_to_decay(10_000, 0);
        let mut e = 10_000;
        for _ in 0..n {
            e = est.decay_once(e);
        }
        assert_eq!(e, 0);
    }
}
