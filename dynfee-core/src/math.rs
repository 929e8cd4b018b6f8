//! Integer fixed-point helpers.
//!
//! Everything here is integer-only and widens to 128 bits for intermediates,
//! so no operation silently wraps. Division truncates toward zero.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MathError {
    /// `x_low == x_high`: the interpolation slope is undefined.
    #[error("degenerate interpolation range: x_low == x_high == {x}")]
    DegenerateRange { x: u64 },

    #[error("division by a zero scale")]
    ZeroScale,

    #[error("overflow computing {0}")]
    Overflow(&'static str),
}

/// `a * b / scale` with a 128-bit intermediate.
///
/// Fails only when `scale == 0` or the quotient does not fit `u64`.
pub fn scaled_mul_div(a: u64, b: u64, scale: u64) -> Result<u64, MathError> {
    if scale == 0 {
        return Err(MathError::ZeroScale);
    }
    let q = (a as u128 * b as u128) / scale as u128;
    u64::try_from(q).map_err(|_| MathError::Overflow("scaled product"))
}

/// Fixed-point weighted average: `(weight * newest + (scale - weight) * prior) / scale`.
///
/// With `weight <= scale` and both inputs in `u64`, the numerator is bounded by
/// `scale * max(newest, prior)`, which always fits `u128`, and the quotient is
/// bounded by `max(newest, prior)`.
pub fn weighted_average(newest: u64, prior: u64, weight: u64, scale: u64) -> Result<u64, MathError> {
    if scale == 0 {
        return Err(MathError::ZeroScale);
    }
    let rest = scale
        .checked_sub(weight)
        .ok_or(MathError::Overflow("smoothing complement"))?;
    let numerator = (weight as u128 * newest as u128)
        .checked_add(rest as u128 * prior as u128)
        .ok_or(MathError::Overflow("smoothing numerator"))?;
    u64::try_from(numerator / scale as u128).map_err(|_| MathError::Overflow("smoothed value"))
}

/// Square of a signed value as an unsigned 64-bit magnitude.
pub fn square(value: i64) -> Result<u64, MathError> {
    let wide = value as i128;
    u64::try_from(wide * wide).map_err(|_| MathError::Overflow("squared displacement"))
}

/// Clamped linear map from `[x_low, x_high]` onto `[y_low, y_high]`.
///
/// Construction rejects `x_low == x_high`; evaluation is then infallible.
/// The output range may be decreasing (`y_high < y_low`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearMap {
    x_low: u64,
    x_high: u64,
    y_low: u64,
    y_high: u64,
}

impl LinearMap {
    pub fn new(x_low: u64, x_high: u64, y_low: u64, y_high: u64) -> Result<Self, MathError> {
        if x_low == x_high {
            return Err(MathError::DegenerateRange { x: x_low });
        }
        // Normalise so x_low < x_high; swapping both ends keeps the same line.
        if x_low > x_high {
            return Ok(Self {
                x_low: x_high,
                x_high: x_low,
                y_low: y_high,
                y_high: y_low,
            });
        }
        Ok(Self {
            x_low,
            x_high,
            y_low,
            y_high,
        })
    }

    pub fn eval(&self, x: u64) -> u64 {
        if x <= self.x_low {
            return self.y_low;
        }
        if x >= self.x_high {
            return self.y_high;
        }
        let dy = self.y_high as i128 - self.y_low as i128;
        let dx = (x - self.x_low) as i128;
        let span = (self.x_high - self.x_low) as i128;
        // |dy * dx / span| < |dy|, so the sum stays between y_low and y_high.
        (self.y_low as i128 + dy * dx / span) as u64
    }
}

/// One-shot clamped linear interpolation.
///
/// Returns `y_low` for `x <= x_low`, `y_high` for `x >= x_high`, and
/// `y_low + (y_high - y_low) * (x - x_low) / (x_high - x_low)` in between.
pub fn interpolate(x: u64, x_low: u64, x_high: u64, y_low: u64, y_high: u64) -> Result<u64, MathError> {
    Ok(LinearMap::new(x_low, x_high, y_low, y_high)?.eval(x))
}
