//! Thread-safe registry with a per-entity lock.
//!
//! For engines that do not serialize calls per entity themselves. The entity
//! map sits behind an `RwLock`; each record sits behind its own `Mutex`.
//! Registration takes the map write lock. Quotes and observations take the
//! map read lock and then the entity's mutex, so different entities proceed
//! in parallel while observations of one entity are totally ordered.
//! Staged updates follow the owned registry: `stage` computes without
//! storing, `commit` installs only if no other observation landed first.
//!
//! Records are replaced whole under the mutex, so a poisoned lock still
//! guards a consistent record and is recovered rather than propagated.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result};
use crate::estimator::VolatilityEstimator;
use crate::fee::FeeMapper;
use crate::ids::PoolId;
use crate::registry::{install, stage_record, Observation, StagedObservation};
use crate::state::{ControllerMetrics, ControllerState};

type Slot = Arc<Mutex<ControllerState>>;

pub struct SharedRegistry<K = PoolId> {
    config: ControllerConfig,
    estimator: VolatilityEstimator,
    fees: FeeMapper,
    records: RwLock<HashMap<K, Slot>>,
    clock: Arc<dyn Clock>,
}

impl<K> SharedRegistry<K>
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
            records: RwLock::new(HashMap::new()),
            clock,
        })
    }

    pub fn initialize_entity(&self, id: K, baseline_position: i64) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        if records.contains_key(&id) {
            return Err(ControllerError::AlreadyInitialized(id.to_string()));
        }
        info!(entity = %id, baseline_position, fee = self.config.default_fee, "entity registered");
        let state = ControllerState::new(baseline_position, self.config.default_fee, self.clock.now());
        records.insert(id, Arc::new(Mutex::new(state)));
        Ok(())
    }

    pub fn quote_fee(&self, id: &K) -> Result<u32> {
        let slot = self.slot(id)?;
        let fee = lock(&slot).current_fee;
        Ok(fee)
    }

    pub fn get_metrics(&self, id: &K) -> Result<ControllerMetrics> {
        let slot = self.slot(id)?;
        let metrics = lock(&slot).metrics();
        Ok(metrics)
    }

    /// Copy of the current record.
    pub fn state(&self, id: &K) -> Result<ControllerState> {
        let slot = self.slot(id)?;
        let state = lock(&slot).clone();
        Ok(state)
    }

    pub fn observe(&self, id: &K, position: i64) -> Result<Observation> {
        self.observe_at(id, position, self.clock.now())
    }

    /// Stage and commit under one hold of the entity's lock, so no other
    /// observation can land in between.
    pub fn observe_at(&self, id: &K, position: i64, at: DateTime<Utc>) -> Result<Observation> {
        let slot = self.slot(id)?;
        let mut guard = lock(&slot);
        let staged = stage_record(&self.estimator, &self.fees, id.clone(), &guard, position, at)?;
        install(&mut guard, staged)
    }

    pub fn stage(&self, id: &K, position: i64) -> Result<StagedObservation<K>> {
        self.stage_at(id, position, self.clock.now())
    }

    /// Compute the next record for `id` without storing it.
    ///
    /// The entity's lock is released on return. `commit` detects any
    /// observation committed in the meantime.
    pub fn stage_at(&self, id: &K, position: i64, at: DateTime<Utc>) -> Result<StagedObservation<K>> {
        let slot = self.slot(id)?;
        let guard = lock(&slot);
        stage_record(&self.estimator, &self.fees, id.clone(), &guard, position, at)
    }

    /// Install a staged record under the entity's lock.
    ///
    /// Fails with `StaleObservation` if another observation was committed for
    /// the entity since staging. Dropping the staged value instead rolls it back.
    pub fn commit(&self, staged: StagedObservation<K>) -> Result<Observation> {
        let slot = self.slot(staged.entity())?;
        let mut guard = lock(&slot);
        install(&mut guard, staged)
    }

    pub fn contains(&self, id: &K) -> bool {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Clone the entity's slot so the map lock is released before the entity lock is taken.
    fn slot(&self, id: &K) -> Result<Slot> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| ControllerError::UnknownEntity(id.to_string()))
    }
}

fn lock(slot: &Slot) -> MutexGuard<'_, ControllerState> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}
