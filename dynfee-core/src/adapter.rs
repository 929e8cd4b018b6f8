//! Engine hook: the three lifecycle calls an execution engine makes.
//!
//! - `initialize` when the engine creates an entity
//! - `pre_transaction` to fetch the fee for the transaction about to run
//! - `post_transaction` to report the resulting position
//!
//! The hook owns the registry and the event dispatcher. It enforces the
//! displacement bound before anything reaches the estimator, and it never
//! fails a transaction for want of a fee: unknown entities get
//! `FeeDirective::EngineDefault`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use tracing::warn;

use crate::clock::Clock;
use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result};
use crate::events::{EventDispatcher, ObservationListener, ObservationRecord};
use crate::ids::PoolId;
use crate::registry::{ControllerRegistry, StagedObservation};
use crate::state::ControllerMetrics;

/// What the engine should charge on the next transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeDirective {
    /// Use this fee (hundredths of a basis point).
    Override(u32),
    /// Entity not tracked; fall back to the engine's own fee.
    EngineDefault,
}

impl FeeDirective {
    pub fn fee(&self) -> Option<u32> {
        match self {
            Self::Override(fee) => Some(*fee),
            Self::EngineDefault => None,
        }
    }

    /// Resolve against the engine's default fee.
    pub fn or(self, engine_default: u32) -> u32 {
        self.fee().unwrap_or(engine_default)
    }
}

/// Engine report of a completed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutcome {
    /// Position after the transaction (e.g. the pool's current tick).
    pub position: i64,
    /// Engine timestamp, if it has one; otherwise the registry clock is used.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl TransactionOutcome {
    pub fn at_position(position: i64) -> Self {
        Self {
            position,
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.timestamp = Some(at);
        self
    }
}

/// An observation staged during a transaction, awaiting the engine's verdict.
///
/// Pass it to `FeeController::commit_post_transaction` when the transaction
/// succeeds; drop it if the engine aborts.
#[derive(Debug)]
#[must_use = "dropping a pending observation rolls it back"]
pub struct PendingObservation<K> {
    staged: StagedObservation<K>,
}

impl<K> PendingObservation<K> {
    pub fn entity(&self) -> &K {
        self.staged.entity()
    }

    pub fn fee(&self) -> u32 {
        self.staged.observation().fee
    }

    pub fn estimate(&self) -> u64 {
        self.staged.observation().estimate
    }
}

/// The controller as seen by the execution engine.
pub struct FeeController<K = PoolId> {
    registry: ControllerRegistry<K>,
    dispatcher: EventDispatcher<K>,
}

impl<K> FeeController<K>
where
    K: Eq + Hash + Clone + fmt::Display,
{
    pub fn new(config: ControllerConfig) -> Result<Self> {
        Ok(Self::from_registry(ControllerRegistry::new(config)?))
    }

    pub fn with_clock(config: ControllerConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self::from_registry(ControllerRegistry::with_clock(config, clock)?))
    }

    pub fn from_registry(registry: ControllerRegistry<K>) -> Self {
        Self {
            registry,
            dispatcher: EventDispatcher::new(),
        }
    }

    pub fn subscribe(&mut self, listener: impl ObservationListener<K> + 'static) {
        self.dispatcher.subscribe(listener);
    }

    /// Entity-initialization event.
    pub fn initialize(&mut self, id: K, baseline_position: i64) -> Result<()> {
        self.registry.initialize_entity(id, baseline_position)
    }

    /// Pre-transaction event: the fee for the transaction about to execute.
    pub fn pre_transaction(&self, id: &K) -> FeeDirective {
        match self.registry.quote_fee(id) {
            Ok(fee) => FeeDirective::Override(fee),
            Err(err) => {
                warn!(entity = %id, error = %err, "no controller record, using engine default fee");
                FeeDirective::EngineDefault
            }
        }
    }

    /// Post-transaction event for engines that never abort after reporting.
    pub fn post_transaction(&mut self, id: &K, outcome: &TransactionOutcome) -> Result<ObservationRecord<K>> {
        let pending = self.begin_post_transaction(id, outcome)?;
        self.commit_post_transaction(pending)
    }

    /// Stage the observation for `outcome` without committing it.
    pub fn begin_post_transaction(
        &self,
        id: &K,
        outcome: &TransactionOutcome,
    ) -> Result<PendingObservation<K>> {
        self.check_displacement(id, outcome.position)?;
        let staged = match outcome.timestamp {
            Some(at) => self.registry.stage_at(id, outcome.position, at)?,
            None => self.registry.stage(id, outcome.position)?,
        };
        Ok(PendingObservation { staged })
    }

    /// Commit a staged observation and publish its record.
    pub fn commit_post_transaction(&mut self, pending: PendingObservation<K>) -> Result<ObservationRecord<K>> {
        let entity = pending.staged.entity().clone();
        let observation = self.registry.commit(pending.staged)?;
        let record = ObservationRecord::new(entity, &observation);
        self.dispatcher.dispatch(&record);
        Ok(record)
    }

    /// Read-only metrics query for dashboards.
    pub fn metrics(&self, id: &K) -> Result<ControllerMetrics> {
        self.registry.get_metrics(id)
    }

    pub fn registry(&self) -> &ControllerRegistry<K> {
        &self.registry
    }

    pub fn into_registry(self) -> ControllerRegistry<K> {
        self.registry
    }

    /// Reject displacements beyond the configured bound before observing.
    ///
    /// The bootstrap observation measures no displacement, so it is not bounded.
    fn check_displacement(&self, id: &K, position: i64) -> Result<()> {
        let state = self
            .registry
            .state(id)
            .ok_or_else(|| ControllerError::UnknownEntity(id.to_string()))?;
        if !state.initialized {
            return Ok(());
        }
        let bound = self.registry.config().max_displacement;
        let magnitude = (position as i128 - state.last_position as i128).unsigned_abs();
        if magnitude > bound as u128 {
            warn!(entity = %id, position, last_position = state.last_position, bound, "displacement out of bounds");
            return Err(ControllerError::ArithmeticOverflow(format!(
                "displacement {magnitude} for '{id}' exceeds bound {bound}"
            )));
        }
        Ok(())
    }
}
