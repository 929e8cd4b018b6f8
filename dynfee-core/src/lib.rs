//! dynfee core: adaptive per-entity fee controller.
//!
//! This crate turns a stream of position observations into a bounded fee:
//! - Fixed-point helpers (scaled multiply/divide, clamped interpolation)
//! - Recursive O(1)-memory volatility estimator with a one-time bootstrap
//! - Monotone volatility-to-fee mapper
//! - Per-entity registry with staged, all-or-nothing updates
//! - Engine hook (initialize / pre-transaction / post-transaction)
//! - Observer fan-out of observation records
//! - Locked registry for callers without per-entity serialization

pub mod adapter;
pub mod clock;
pub mod config;
pub mod error;
pub mod estimator;
pub mod events;
pub mod fee;
pub mod ids;
pub mod math;
pub mod registry;
pub mod shared;
pub mod state;

pub use adapter::{FeeController, FeeDirective, PendingObservation, TransactionOutcome};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ControllerConfig;
pub use error::{ControllerError, Result};
pub use estimator::{EstimatorOutcome, VolatilityEstimator};
pub use events::{
    EventDispatcher, ObservationListener, ObservationRecord, RecordingListener, TracingListener,
};
pub use fee::FeeMapper;
pub use ids::PoolId;
pub use registry::{ControllerRegistry, EntityRecord, Observation, RegistrySnapshot, StagedObservation};
pub use shared::SharedRegistry;
pub use state::{ControllerMetrics, ControllerState};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: controller types can move to and be shared with
    /// an engine's worker threads.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<ControllerState>();
        require_sync::<ControllerState>();
        require_send::<ControllerConfig>();
        require_sync::<ControllerConfig>();
        require_send::<VolatilityEstimator>();
        require_sync::<VolatilityEstimator>();
        require_send::<FeeMapper>();
        require_sync::<FeeMapper>();
        require_send::<ObservationRecord>();
        require_sync::<ObservationRecord>();
        require_send::<ControllerError>();
        require_sync::<ControllerError>();

        require_send::<ControllerRegistry>();
        require_sync::<ControllerRegistry>();
        require_send::<SharedRegistry>();
        require_sync::<SharedRegistry>();

        // The hook holds boxed listeners, which are Send but not Sync.
        require_send::<FeeController>();
    }

    #[test]
    fn reference_defaults_wire_together() {
        let config = ControllerConfig::default();
        let estimator = VolatilityEstimator::from_config(&config).unwrap();
        let fees = FeeMapper::from_config(&config).unwrap();
        assert_eq!((estimator.alpha(), estimator.scale()), (3000, 10_000));
        assert_eq!((fees.min_fee(), fees.max_fee()), (500, 10_000));
    }
}
