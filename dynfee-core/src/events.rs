//! Observability records and their fan-out.
//!
//! The core returns an `Observation`; the adapter wraps it in an
//! `ObservationRecord` and hands it to the `EventDispatcher`, which forwards
//! it to every subscribed listener. Listeners see records only after the
//! registry has committed, and have no path back into controller state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::ids::PoolId;
use crate::registry::Observation;

/// One record per committed observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationRecord<K = PoolId> {
    pub entity: K,
    pub estimate: u64,
    pub fee: u32,
    pub displacement: i64,
    pub bootstrap: bool,
    pub observed_at: DateTime<Utc>,
}

impl<K> ObservationRecord<K> {
    pub fn new(entity: K, observation: &Observation) -> Self {
        Self {
            entity,
            estimate: observation.estimate,
            fee: observation.fee,
            displacement: observation.displacement,
            bootstrap: observation.bootstrap,
            observed_at: observation.observed_at,
        }
    }
}

pub trait ObservationListener<K>: Send {
    fn on_observation(&mut self, record: &ObservationRecord<K>);
}

impl<K, F> ObservationListener<K> for F
where
    F: FnMut(&ObservationRecord<K>) + Send,
{
    fn on_observation(&mut self, record: &ObservationRecord<K>) {
        self(record)
    }
}

/// Forwards each record to all listeners, in subscription order.
pub struct EventDispatcher<K = PoolId> {
    listeners: Vec<Box<dyn ObservationListener<K>>>,
}

impl<K> EventDispatcher<K> {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, listener: impl ObservationListener<K> + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn dispatch(&mut self, record: &ObservationRecord<K>) {
        for listener in &mut self.listeners {
            listener.on_observation(record);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl<K> Default for EventDispatcher<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Buffers records in memory. Clones share the same buffer.
#[derive(Debug)]
pub struct RecordingListener<K = PoolId> {
    records: Arc<Mutex<Vec<ObservationRecord<K>>>>,
}

impl<K> Clone for RecordingListener<K> {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
        }
    }
}

impl<K> Default for RecordingListener<K> {
    fn default() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<K: Clone> RecordingListener<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ObservationRecord<K>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Take everything buffered so far.
    pub fn drain(&self) -> Vec<ObservationRecord<K>> {
        std::mem::take(&mut *self.records.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Clone + Send> ObservationListener<K> for RecordingListener<K> {
    fn on_observation(&mut self, record: &ObservationRecord<K>) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
    }
}

/// Logs every record through `tracing` at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingListener;

impl<K: fmt::Display> ObservationListener<K> for TracingListener {
    fn on_observation(&mut self, record: &ObservationRecord<K>) {
        info!(
            entity = %record.entity,
            estimate = record.estimate,
            fee = record.fee,
            displacement = record.displacement,
            bootstrap = record.bootstrap,
            "fee update"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fee: u32) -> ObservationRecord {
        ObservationRecord {
            entity: PoolId::from("p"),
            estimate: 0,
            fee,
            displacement: 0,
            bootstrap: false,
            observed_at: DateTime::from_timestamp(0, 0).unwrap(),
        }
    }

    #[test]
    fn dispatch_reaches_every_listener_in_order() {
        let first = RecordingListener::new();
        let second = RecordingListener::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut dispatcher = EventDispatcher::new();
        dispatcher.subscribe(first.clone());
        let tag = Arc::clone(&order);
        dispatcher.subscribe(move |r: &ObservationRecord| tag.lock().unwrap().push(r.fee));
        dispatcher.subscribe(second.clone());
        assert_eq!(dispatcher.listener_count(), 3);

        dispatcher.dispatch(&record(500));
        dispatcher.dispatch(&record(700));

        assert_eq!(first.records(), vec![record(500), record(700)]);
        assert_eq!(second.len(), 2);
        assert_eq!(*order.lock().unwrap(), vec![500, 700]);
    }

    #[test]
    fn drain_empties_the_shared_buffer() {
        let recorder = RecordingListener::new();
        let mut handle = recorder.clone();
        handle.on_observation(&record(1));
        assert_eq!(recorder.drain().len(), 1);
        assert!(recorder.is_empty());
    }

    #[test]
    fn empty_dispatcher_is_a_no_op() {
        let mut dispatcher: EventDispatcher = EventDispatcher::default();
        dispatcher.dispatch(&record(1));
        assert_eq!(dispatcher.listener_count(), 0);
    }

    #[test]
    fn records_serialize_as_flat_json() {
        let json = serde_json::to_value(record(900)).unwrap();
        assert_eq!(json["entity"], "p");
        assert_eq!(json["fee"], 900);
    }
}
