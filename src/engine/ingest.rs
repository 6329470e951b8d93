//! In-order delivery of resolved samples.
//!
//! Probe tasks finish in whatever order their replies arrive. The ingest
//! task is the single writer of the aggregator and the rolling store and
//! releases samples strictly by sequence, holding early arrivals until
//! the gap before them fills.

use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::state::{Aggregator, RollingStore, Sample};

/// Capacity of each export-tap channel
pub const SUBSCRIBER_CAPACITY: usize = 1024;

/// Holds out-of-order samples until their predecessors arrive
#[derive(Debug)]
pub struct Reorder {
    next: u64,
    buffered: BTreeMap<u64, Sample>,
}

impl Reorder {
    pub fn new(first_sequence: u64) -> Self {
        Self {
            next: first_sequence,
            buffered: BTreeMap::new(),
        }
    }

    /// Accept one sample and return every sample now ready, in order
    pub fn push(&mut self, sample: Sample) -> Vec<Sample> {
        if sample.sequence < self.next || self.buffered.contains_key(&sample.sequence) {
            tracing::warn!(sequence = sample.sequence, next = self.next, "dropping duplicate sample");
            return Vec::new();
        }
        self.buffered.insert(sample.sequence, sample);

        let mut ready = Vec::new();
        while let Some(sample) = self.buffered.remove(&self.next) {
            ready.push(sample);
            self.next += 1;
        }
        ready
    }

    /// Release everything still held, skipping gaps left by abandoned probes
    pub fn flush(&mut self) -> Vec<Sample> {
        let remaining = std::mem::take(&mut self.buffered);
        if let Some(last) = remaining.keys().next_back() {
            self.next = last + 1;
        }
        remaining.into_values().collect()
    }

    /// Number of samples waiting on an earlier sequence
    pub fn held(&self) -> usize {
        self.buffered.len()
    }
}

/// Everything ingestion writes to
#[derive(Clone)]
pub struct IngestSinks {
    pub aggregator: Arc<RwLock<Aggregator>>,
    pub rolling: Arc<RwLock<RollingStore>>,
    pub subscribers: Arc<Mutex<Vec<mpsc::Sender<Sample>>>>,
}

impl IngestSinks {
    fn apply(&self, sample: Sample) {
        {
            let mut rolling = self.rolling.write();
            let mut aggregator = self.aggregator.write();
            aggregator.ingest(&sample);
            rolling.push(sample.clone());
        }
        self.publish(sample);
    }

    /// Hand the sample to export taps without ever waiting on them
    fn publish(&self, sample: Sample) {
        let mut subscribers = self.subscribers.lock();
        if subscribers.is_empty() {
            return;
        }
        subscribers.retain(|tx| match tx.try_send(sample.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(sequence = sample.sequence, "export subscriber lagging, sample dropped");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }
}

/// Drain the sample channel into the sinks until every sender is gone
///
/// Export taps are closed on return. Returns the number of samples ingested.
pub async fn run_ingest(mut rx: mpsc::Receiver<Sample>, sinks: IngestSinks, first_sequence: u64) -> u64 {
    let mut reorder = Reorder::new(first_sequence);
    let mut ingested = 0u64;

    while let Some(sample) = rx.recv().await {
        for sample in reorder.push(sample) {
            sinks.apply(sample);
            ingested += 1;
        }
        if reorder.held() > 0 {
            tracing::trace!(held = reorder.held(), "waiting on earlier probe");
        }
    }

    for sample in reorder.flush() {
        sinks.apply(sample);
        ingested += 1;
    }

    // Closing the taps tells subscribers the session is over
    sinks.subscribers.lock().clear();

    tracing::debug!(ingested, "ingest finished");
    ingested
}
