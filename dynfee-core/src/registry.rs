//! Per-entity controller registry.
//!
//! The registry owns one `ControllerState` per entity and is the only writer
//! of those records. It manages:
//! - Registration (baseline position, default fee, uninitialized)
//! - Read-only fee quotes and metrics
//! - Observations: bootstrap on the first one, estimator + fee mapper after
//! - Staged updates that commit whole or not at all
//!
//! Mutating operations take `&mut self`, so a registry owned by one engine
//! thread is single-writer by construction. See `SharedRegistry` for callers
//! without their own per-entity serialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result};
use crate::estimator::{EstimatorOutcome, VolatilityEstimator};
use crate::fee::FeeMapper;
use crate::ids::PoolId;
use crate::state::{ControllerMetrics, ControllerState};

/// Values produced by one observation.
///
/// On bootstrap `displacement` is 0 and the estimate and fee are unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub estimate: u64,
    pub fee: u32,
    pub displacement: i64,
    pub bootstrap: bool,
    pub observed_at: DateTime<Utc>,
}

/// A computed but uncommitted observation.
///
/// Committing installs `next` only if the stored record is still at
/// `base_revision`. Dropping it discards the update.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a staged observation does nothing until committed"]
pub struct StagedObservation<K> {
    entity: K,
    base_revision: u64,
    next: ControllerState,
    observation: Observation,
}

impl<K> StagedObservation<K> {
    pub fn entity(&self) -> &K {
        &self.entity
    }

    pub fn base_revision(&self) -> u64 {
        self.base_revision
    }

    /// The record that will be stored on commit.
    pub fn next_state(&self) -> &ControllerState {
        &self.next
    }

    pub fn observation(&self) -> &Observation {
        &self.observation
    }
}

/// Install `staged` into `slot` if `slot` is still at the staged base revision.
///
/// On `StaleObservation` the slot is left as it is.
pub(crate) fn install<K: fmt::Display>(
    slot: &mut ControllerState,
    staged: StagedObservation<K>,
) -> Result<Observation> {
    let StagedObservation {
        entity,
        base_revision,
        next,
        observation,
    } = staged;
    if slot.observations != base_revision {
        return Err(ControllerError::StaleObservation {
            entity: entity.to_string(),
            staged: base_revision,
            current: slot.observations,
        });
    }
    *slot = next;
    log_commit(&entity, &observation);
    Ok(observation)
}

fn log_commit<K: fmt::Display>(entity: &K, observation: &Observation) {
    debug!(
        entity = %entity,
        estimate = observation.estimate,
        fee = observation.fee,
        displacement = observation.displacement,
        bootstrap = observation.bootstrap,
        "observation committed"
    );
}

/// Stage the observation of `position` against `state`.
pub(crate) fn stage_record<K>(
    estimator: &VolatilityEstimator,
    fees: &FeeMapper,
    entity: K,
    state: &ControllerState,
    position: i64,
    at: DateTime<Utc>,
) -> Result<StagedObservation<K>> {
    let (next, observation) = next_record(estimator, fees, state, position, at)?;
    Ok(StagedObservation {
        entity,
        base_revision: state.observations,
        next,
        observation,
    })
}

/// Compute the record that follows `state` after observing `position`.
///
/// Pure: `state` is only read, so a failure leaves nothing half-applied.
fn next_record(
    estimator: &VolatilityEstimator,
    fees: &FeeMapper,
    state: &ControllerState,
    position: i64,
    at: DateTime<Utc>,
) -> Result<(ControllerState, Observation)> {
    let mut next = state.clone();
    let observation = match estimator.update(&mut next, position)? {
        EstimatorOutcome::Bootstrap => Observation {
            estimate: next.volatility_estimate,
            fee: next.current_fee,
            displacement: 0,
            bootstrap: true,
            observed_at: at,
        },
        EstimatorOutcome::Updated {
            estimate,
            displacement,
        } => {
            next.current_fee = fees.volatility_to_fee(estimate);
            Observation {
                estimate,
                fee: next.current_fee,
                displacement,
                bootstrap: false,
                observed_at: at,
            }
        }
    };
    next.observations += 1;
    next.touch(at);
    Ok((next, observation))
}

/// Owned map from entity id to controller record.
pub struct ControllerRegistry<K = PoolId> {
    config: ControllerConfig,
    estimator: VolatilityEstimator,
    fees: FeeMapper,
    records: HashMap<K, ControllerState>,
    clock: Arc<dyn Clock>,
}

impl<K> ControllerRegistry<K>
where
    K: Eq + Hash + Clone + fmt::Display,
{
    pub fn new(config: ControllerConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: ControllerConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let estimator = VolatilityEstimator::from_config(&config)?;
        let fees = FeeMapper::from_config(&config)?;
        Ok(Self {
            config,
            estimator,
            fees,
            records: HashMap::new(),
            clock,
        })
    }

    // ── Lifecycle ──────────────────────────────────────────────────────

    /// Register `id` at `baseline_position` with the default fee.
    pub fn initialize_entity(&mut self, id: K, baseline_position: i64) -> Result<()> {
        if self.records.contains_key(&id) {
            return Err(ControllerError::AlreadyInitialized(id.to_string()));
        }
        info!(entity = %id, baseline_position, fee = self.config.default_fee, "entity registered");
        let state = ControllerState::new(baseline_position, self.config.default_fee, self.clock.now());
        self.records.insert(id, state);
        Ok(())
    }

    /// Fee to apply to the next transaction. Read-only.
    pub fn quote_fee(&self, id: &K) -> Result<u32> {
        Ok(self.record(id)?.current_fee)
    }

    pub fn get_metrics(&self, id: &K) -> Result<ControllerMetrics> {
        Ok(self.record(id)?.metrics())
    }

    /// Observe a new position and commit the result.
    pub fn observe(&mut self, id: &K, position: i64) -> Result<Observation> {
        let at = self.clock.now();
        self.observe_at(id, position, at)
    }

    /// Like `observe`, with an engine-supplied timestamp.
    pub fn observe_at(&mut self, id: &K, position: i64, at: DateTime<Utc>) -> Result<Observation> {
        let staged = self.stage_at(id, position, at)?;
        self.commit(staged)
    }

    // ── Staged updates ─────────────────────────────────────────────────

    pub fn stage(&self, id: &K, position: i64) -> Result<StagedObservation<K>> {
        self.stage_at(id, position, self.clock.now())
    }

    /// Compute the next record for `id` without storing it.
    pub fn stage_at(&self, id: &K, position: i64, at: DateTime<Utc>) -> Result<StagedObservation<K>> {
        let current = self.record(id)?;
        stage_record(&self.estimator, &self.fees, id.clone(), current, position, at)
    }

    /// Install a staged record.
    ///
    /// Fails with `StaleObservation` if another observation was committed for
    /// the entity since staging; the stored record is then left as it is.
    pub fn commit(&mut self, staged: StagedObservation<K>) -> Result<Observation> {
        let slot = self
            .records
            .get_mut(staged.entity())
            .ok_or_else(|| ControllerError::UnknownEntity(staged.entity().to_string()))?;
        install(slot, staged)
    }

    // ── Read-only accessors ────────────────────────────────────────────

    pub fn state(&self, id: &K) -> Option<&ControllerState> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &K) -> bool {
        self.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn entities(&self) -> impl Iterator<Item = &K> {
        self.records.keys()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn estimator(&self) -> &VolatilityEstimator {
        &self.estimator
    }

    pub fn fee_mapper(&self) -> &FeeMapper {
        &self.fees
    }

    fn record(&self, id: &K) -> Result<&ControllerState> {
        self.records
            .get(id)
            .ok_or_else(|| ControllerError::UnknownEntity(id.to_string()))
    }
}

// ── Snapshots ──────────────────────────────────────────────────────────

/// Serializable copy of every record, ordered by entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot<K> {
    pub config_fingerprint: String,
    pub entities: Vec<EntityRecord<K>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord<K> {
    pub entity: K,
    pub state: ControllerState,
}

impl<K> ControllerRegistry<K>
where
    K: Eq + Hash + Clone + Ord + fmt::Display + Serialize,
{
    pub fn snapshot(&self) -> RegistrySnapshot<K> {
        let mut entities: Vec<EntityRecord<K>> = self
            .records
            .iter()
            .map(|(entity, state)| EntityRecord {
                entity: entity.clone(),
                state: state.clone(),
            })
            .collect();
        entities.sort_by(|a, b| a.entity.cmp(&b.entity));
        RegistrySnapshot {
            config_fingerprint: self.config.fingerprint(),
            entities,
        }
    }

    /// Rebuild a registry from a snapshot taken under the same config.
    pub fn restore(config: ControllerConfig, snapshot: RegistrySnapshot<K>) -> Result<Self> {
        let mut registry = Self::new(config)?;
        let fingerprint = registry.config.fingerprint();
        if snapshot.config_fingerprint != fingerprint {
            return Err(ControllerError::InvalidConfiguration(format!(
                "snapshot taken under config {}, restoring under {}",
                snapshot.config_fingerprint, fingerprint
            )));
        }
        for EntityRecord { entity, state } in snapshot.entities {
            let bounds = registry.fees.min_fee()..=registry.fees.max_fee();
            if !bounds.contains(&state.current_fee) {
                return Err(ControllerError::InvalidConfiguration(format!(
                    "entity '{entity}' has fee {} outside [{}, {}]",
                    state.current_fee,
                    bounds.start(),
                    bounds.end()
                )));
            }
            if registry.records.insert(entity.clone(), state).is_some() {
                return Err(ControllerError::AlreadyInitialized(entity.to_string()));
            }
        }
        Ok(registry)
    }

    /// BLAKE3 digest over all records; identical replays give identical digests.
    ///
    /// # Panics
    ///
    /// If `K`'s `Serialize` impl fails. Records are otherwise plain integers,
    /// bools and a timestamp.
    pub fn state_digest(&self) -> String {
        let snapshot = self.snapshot();
        let mut hasher = blake3::Hasher::new();
        hasher.update(snapshot.config_fingerprint.as_bytes());
        for record in &snapshot.entities {
            let line = serde_json::to_string(record)
                .expect("EntityRecord serialization failed");
            hasher.update(line.as_bytes());
            hasher.update(b"\n");
        }
        hasher.finalize().to_hex().to_string()
    }
}
