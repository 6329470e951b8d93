//! Shared pending-reply tracking.
//!
//! The transport inserts an entry before each echo request leaves the
//! socket, and the receiver thread removes it when a matching reply
//! arrives. Whoever removes the entry owns its outcome: a reply hands the
//! result to the waiting probe, a timeout simply drops it.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;

use crate::probe::ReplyKind;

/// A matched reply handed from the receiver thread to the waiting probe
#[derive(Debug, Clone, Copy)]
pub struct Reply {
    pub kind: ReplyKind,
    pub responder: IpAddr,
    pub received_at: Instant,
}

/// An echo request that has been sent and is awaiting a reply
#[derive(Debug)]
pub struct PendingProbe {
    pub target: IpAddr,
    pub sent_at: Instant,
    pub reply: oneshot::Sender<Reply>,
}

/// Thread-safe map of pending probes keyed by wire sequence number
pub type PendingMap = Arc<Mutex<HashMap<u16, PendingProbe>>>;

/// Create a new empty pending map
pub fn new_pending_map() -> PendingMap {
    Arc::new(Mutex::new(HashMap::new()))
}

/// Keeps a probe's table entry alive exactly as long as its waiter
///
/// Dropping the guard removes the entry, whether the wait ended in a
/// timeout, a send failure or a cancelled task. An entry already taken by
/// the receiver is left alone.
#[derive(Debug)]
pub struct PendingGuard {
    pending: PendingMap,
    sequence: u16,
    sent_at: Instant,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let mut pending = self.pending.lock();
        // After sequence wrap the slot may belong to a newer probe
        if pending
            .get(&self.sequence)
            .is_some_and(|probe| probe.sent_at == self.sent_at)
        {
            pending.remove(&self.sequence);
        }
    }
}

/// Insert `probe` under `sequence`, tying the entry to the returned guard
pub fn register(pending: &PendingMap, sequence: u16, probe: PendingProbe) -> PendingGuard {
    let sent_at = probe.sent_at;
    pending.lock().insert(sequence, probe);
    PendingGuard {
        pending: pending.clone(),
        sequence,
        sent_at,
    }
}

/// Remove the entry for `sequence` if it was sent to `target`
///
/// Replies from a different address than the one probed are strays and
/// leave the entry in place.
pub fn take_matching(pending: &PendingMap, sequence: u16, target: IpAddr) -> Option<PendingProbe> {
    let mut pending = pending.lock();
    match pending.get(&sequence) {
        Some(probe) if probe.target == target => pending.remove(&sequence),
        _ => None,
    }
}
