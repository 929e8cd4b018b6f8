//! Observation scripts: CSV rows of `entity,position[,timestamp]`.
//!
//! The first row for an entity registers it at that position; every later
//! row is one transaction against it.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Read;

use dynfee_core::{FeeController, ObservationRecord, PoolId, TransactionOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScriptRow {
    pub entity: String,
    pub position: i64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// One replayed transaction: the fee charged and the record it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayLine {
    pub row: usize,
    /// Fee quoted before the transaction executed.
    pub charged_fee: u32,
    #[serde(flatten)]
    pub record: ObservationRecord,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplaySummary {
    pub rows: usize,
    pub registrations: usize,
    pub observations: usize,
}

pub fn read_script(input: impl Read) -> Result<Vec<ScriptRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(input);
    let mut rows = Vec::new();
    for (i, row) in reader.deserialize().enumerate() {
        // +2: one for the header, one for 1-based line numbers.
        let row: ScriptRow = row.with_context(|| format!("script line {}", i + 2))?;
        rows.push(row);
    }
    Ok(rows)
}

/// Drive `hook` through `rows`, calling `emit` for each transaction.
pub fn replay(
    hook: &mut FeeController,
    rows: &[ScriptRow],
    engine_default_fee: u32,
    mut emit: impl FnMut(&ReplayLine) -> Result<()>,
) -> Result<ReplaySummary> {
    let mut summary = ReplaySummary::default();
    for (i, row) in rows.iter().enumerate() {
        summary.rows += 1;
        let id = PoolId::new(row.entity.as_str());
        if !hook.registry().contains(&id) {
            hook.initialize(id, row.position)?;
            summary.registrations += 1;
            continue;
        }
        let charged_fee = hook.pre_transaction(&id).or(engine_default_fee);
        let mut outcome = TransactionOutcome::at_position(row.position);
        if let Some(at) = row.timestamp {
            outcome = outcome.with_timestamp(at);
        }
        let record = hook
            .post_transaction(&id, &outcome)
            .with_context(|| format!("row {} ({})", i + 1, row.entity))?;
        summary.observations += 1;
        emit(&ReplayLine {
            row: i + 1,
            charged_fee,
            record,
        })?;
    }
    Ok(summary)
}
