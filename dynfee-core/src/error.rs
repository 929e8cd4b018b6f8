//! Error kinds surfaced by the controller.

use thiserror::Error;

use crate::math::MathError;

/// Errors from controller operations.
///
/// `UnknownEntity` is recoverable by the caller (re-initialize or abort the
/// transaction). The others indicate an integration or configuration fault
/// and are surfaced, not retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    #[error("entity '{0}' is already initialized")]
    AlreadyInitialized(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("arithmetic overflow: {0}")]
    ArithmeticOverflow(String),

    #[error("stale observation for '{entity}': staged against revision {staged}, record is at {current}")]
    StaleObservation {
        entity: String,
        staged: u64,
        current: u64,
    },
}

pub type Result<T> = std::result::Result<T, ControllerError>;

impl From<MathError> for ControllerError {
    fn from(err: MathError) -> Self {
        match err {
            MathError::DegenerateRange { .. } | MathError::ZeroScale => {
                Self::InvalidConfiguration(err.to_string())
            }
            MathError::Overflow(_) => Self::ArithmeticOverflow(err.to_string()),
        }
    }
}
