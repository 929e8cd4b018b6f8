//! Integration tests for the controller lifecycle.
//!
//! Tests:
//! 1. Reference scenario: bootstrap, rise, decay with exact values
//! 2. Error kinds: unknown entity, duplicate registration, bad config, overflow
//! 3. Engine hook: fallback fee, abort/rollback, record stream
//! 4. Independence of entities

use chrono::DateTime;
use std::sync::Arc;
use dynfee_core::{
    ControllerConfig, ControllerError, ControllerRegistry, FeeController, FeeDirective,
    ManualClock, PoolId, RecordingListener, TransactionOutcome,
};

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(DateTime::from_timestamp(1_700_000_000, 0).unwrap()))
}

fn registry() -> ControllerRegistry {
    ControllerRegistry::with_clock(ControllerConfig::default(), clock()).unwrap()
}

// ── 1. Reference scenario ────────────────────────────────────────────

#[test]
fn reference_scenario_rise_and_decay() {
    let mut reg = registry();
    let id = PoolId::from("eth-usdc-30");
    reg.initialize_entity(id.clone(), 0).unwrap();
    assert_eq!(reg.quote_fee(&id).unwrap(), 3000);

    // Bootstrap: fee unchanged, estimate stays 0.
    let boot = reg.observe(&id, 0).unwrap();
    assert!(boot.bootstrap);
    assert_eq!(reg.quote_fee(&id).unwrap(), 3000);
    assert_eq!(reg.get_metrics(&id).unwrap().volatility_estimate, 0);

    // displacement 100 -> squared 10000 -> estimate 3000 -> fee 3282
    let rise = reg.observe(&id, 100).unwrap();
    assert_eq!(rise.displacement, 100);
    assert_eq!(rise.estimate, 3000);
    assert_eq!(rise.fee, 3282);

    // zero displacement -> estimate 2100 -> fee 500 + 9500 * 2000 / 9900 = 2419
    let decay = reg.observe(&id, 100).unwrap();
    assert_eq!(decay.displacement, 0);
    assert_eq!(decay.estimate, 2100);
    assert_eq!(decay.fee, 2419);
    assert!(decay.fee < rise.fee);
    assert_eq!(reg.quote_fee(&id).unwrap(), 2419);
}

#[test]
fn bootstrap_ignores_displacement_from_baseline() {
    let mut reg = registry();
    let id = PoolId::from("p");
    reg.initialize_entity(id.clone(), 0).unwrap();
    // A large jump on the very first observation is only recorded.
    let boot = reg.observe(&id, 5_000).unwrap();
    assert!(boot.bootstrap);
    assert_eq!(boot.displacement, 0);
    let metrics = reg.get_metrics(&id).unwrap();
    assert_eq!(metrics.volatility_estimate, 0);
    assert_eq!(metrics.current_fee, 3000);
    assert_eq!(metrics.last_position, 5_000);

    // The second observation measures from the bootstrap position.
    let obs = reg.observe(&id, 5_010).unwrap();
    assert!(!obs.bootstrap);
    assert_eq!(obs.displacement, 10);
    assert_eq!(obs.estimate, 30);
    assert_eq!(obs.fee, 500);
}

#[test]
fn sustained_volatility_saturates_at_max_fee() {
    let mut reg = registry();
    let id = PoolId::from("p");
    reg.initialize_entity(id.clone(), 0).unwrap();
    reg.observe(&id, 0).unwrap();
    let mut position = 0;
    for _ in 0..20 {
        position = if position == 0 { 500 } else { 0 };
        reg.observe(&id, position).unwrap();
    }
    assert_eq!(reg.quote_fee(&id).unwrap(), 10_000);

    // Quiet market decays back to the floor.
    let estimate = reg.get_metrics(&id).unwrap().volatility_estimate;
    let steps = reg.estimator().steps_to_decay(estimate, 100);
    for _ in 0..steps {
        reg.observe(&id, position).unwrap();
    }
    assert_eq!(reg.quote_fee(&id).unwrap(), 500);
}

// ── 2. Error kinds ───────────────────────────────────────────────────

#[test]
fn error_kinds() {
    let mut reg = registry();
    let id = PoolId::from("p");
    assert_eq!(reg.quote_fee(&id), Err(ControllerError::UnknownEntity("p".into())));
    assert!(matches!(reg.observe(&id, 0), Err(ControllerError::UnknownEntity(_))));

    reg.initialize_entity(id.clone(), 0).unwrap();
    assert_eq!(
        reg.initialize_entity(id.clone(), 0),
        Err(ControllerError::AlreadyInitialized("p".into()))
    );

    let bad = ControllerConfig {
        max_fee: 100,
        min_fee: 200,
        default_fee: 150,
        ..Default::default()
    };
    assert!(matches!(
        ControllerRegistry::<PoolId>::new(bad),
        Err(ControllerError::InvalidConfiguration(_))
    ));

    reg.observe(&id, 0).unwrap();
    assert!(matches!(
        reg.observe(&id, 1 << 40),
        Err(ControllerError::ArithmeticOverflow(_))
    ));
}

#[test]
fn entities_are_independent() {
    let mut reg = registry();
    let calm = PoolId::from("calm");
    let wild = PoolId::from("wild");
    reg.initialize_entity(calm.clone(), 0).unwrap();
    reg.initialize_entity(wild.clone(), 0).unwrap();
    for position in [0, 1, 0, 1] {
        reg.observe(&calm, position).unwrap();
    }
    for position in [0, 400, -400, 400] {
        reg.observe(&wild, position).unwrap();
    }
    assert_eq!(reg.quote_fee(&calm).unwrap(), 500);
    assert_eq!(reg.quote_fee(&wild).unwrap(), 10_000);
    assert_eq!(reg.len(), 2);
}

// ── 3. Engine hook ───────────────────────────────────────────────────

#[test]
fn hook_end_to_end() {
    let mut hook = FeeController::with_clock(ControllerConfig::default(), clock()).unwrap();
    let recorder = RecordingListener::new();
    hook.subscribe(recorder.clone());

    let id = PoolId::from("p");
    assert_eq!(hook.pre_transaction(&id), FeeDirective::EngineDefault);

    hook.initialize(id.clone(), 0).unwrap();
    let mut applied = Vec::new();
    for position in [0, 100, 100] {
        applied.push(hook.pre_transaction(&id).or(0));
        hook.post_transaction(&id, &TransactionOutcome::at_position(position))
            .unwrap();
    }
    // Each transaction pays the fee computed after the previous one.
    assert_eq!(applied, vec![3000, 3000, 3282]);
    assert_eq!(hook.pre_transaction(&id), FeeDirective::Override(2419));

    let fees: Vec<u32> = recorder.records().iter().map(|r| r.fee).collect();
    assert_eq!(fees, vec![3000, 3282, 2419]);
}

#[test]
fn hook_abort_then_retry() {
    let mut hook = FeeController::with_clock(ControllerConfig::default(), clock()).unwrap();
    let recorder = RecordingListener::new();
    hook.subscribe(recorder.clone());
    let id = PoolId::from("p");
    hook.initialize(id.clone(), 0).unwrap();
    hook.post_transaction(&id, &TransactionOutcome::at_position(0)).unwrap();

    // Engine aborts after the hook staged its update.
    let aborted = hook
        .begin_post_transaction(&id, &TransactionOutcome::at_position(300))
        .unwrap();
    drop(aborted);
    assert_eq!(hook.pre_transaction(&id), FeeDirective::Override(3000));

    // The retried transaction lands as if the abort never happened.
    let pending = hook
        .begin_post_transaction(&id, &TransactionOutcome::at_position(100))
        .unwrap();
    let record = hook.commit_post_transaction(pending).unwrap();
    assert_eq!((record.estimate, record.fee), (3000, 3282));
    assert_eq!(recorder.len(), 2);
}

#[test]
fn hook_rejects_stale_pending_commit() {
    let mut hook = FeeController::with_clock(ControllerConfig::default(), clock()).unwrap();
    let id = PoolId::from("p");
    hook.initialize(id.clone(), 0).unwrap();
    let first = hook
        .begin_post_transaction(&id, &TransactionOutcome::at_position(1))
        .unwrap();
    let second = hook
        .begin_post_transaction(&id, &TransactionOutcome::at_position(2))
        .unwrap();
    hook.commit_post_transaction(first).unwrap();
    assert!(matches!(
        hook.commit_post_transaction(second),
        Err(ControllerError::StaleObservation { .. })
    ));
    assert_eq!(hook.metrics(&id).unwrap().last_position, 1);
}
