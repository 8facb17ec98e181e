//! Per-key in-flight request deduplication.
//!
//! When a rank has already launched a remote fetch or update-forward for a
//! key, later callers for the same key park on the existing entry instead of
//! issuing their own RPC. When the owner completes, every waiter is woken
//! with the owner's result code; a successful code means "local state may
//! have changed, retry your operation from the top", which is how waiters
//! pick up the freshly cached value without a second wire round trip.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::core::error::ErrorCode;
use crate::ns::class::ValueClass;

/// Result of marking a key in-flight.
pub enum MarkOutcome {
    /// No prior entry existed; the caller owns the remote operation and must
    /// call [`InflightTable::complete`] exactly once.
    Owner,
    /// Another task owns the operation; await the receiver for its result.
    Waiter(oneshot::Receiver<ErrorCode>),
}

struct Entry {
    class_id: u32,
    key: Vec<u8>,
    waiters: Vec<oneshot::Sender<ErrorCode>>,
}

/// Table of keys with an outstanding remote operation, one per namespace.
#[derive(Default)]
pub struct InflightTable {
    entries: Mutex<HashMap<(u32, Vec<u8>), Entry>>,
}

impl InflightTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `key` in-flight for `class_id`, atomically deciding ownership.
    ///
    /// Lookup is by exact bytes first; on a miss, entries for the same class
    /// are scanned with the class's own key equivalence so that distinct
    /// encodings of one key still share a single flight.
    pub fn mark(&self, class_id: u32, class: &dyn ValueClass, key: &[u8]) -> MarkOutcome {
        let mut entries = self.entries.lock();

        let exact = (class_id, key.to_vec());
        if let Some(entry) = entries.get_mut(&exact) {
            let (tx, rx) = oneshot::channel();
            entry.waiters.push(tx);
            return MarkOutcome::Waiter(rx);
        }

        let equivalent = entries
            .values_mut()
            .find(|e| e.class_id == class_id && class.keys_equal(&e.key, key));
        if let Some(entry) = equivalent {
            let (tx, rx) = oneshot::channel();
            entry.waiters.push(tx);
            return MarkOutcome::Waiter(rx);
        }

        entries.insert(
            exact,
            Entry {
                class_id,
                key: key.to_vec(),
                waiters: Vec::new(),
            },
        );
        MarkOutcome::Owner
    }

    /// Complete the flight for `key`, waking every parked waiter with `rc`
    /// and removing the entry.
    ///
    /// Returns the number of waiters woken.
    pub fn complete(&self, class_id: u32, class: &dyn ValueClass, key: &[u8], rc: ErrorCode) -> usize {
        let mut entries = self.entries.lock();

        let exact = (class_id, key.to_vec());
        let entry = if entries.contains_key(&exact) {
            entries.remove(&exact)
        } else {
            let found = entries
                .keys()
                .find(|(cid, k)| *cid == class_id && class.keys_equal(k, key))
                .cloned();
            found.and_then(|k| entries.remove(&k))
        };

        let Some(entry) = entry else {
            return 0;
        };

        let woken = entry.waiters.len();
        for tx in entry.waiters {
            // A waiter that gave up (dropped its receiver) is fine to skip.
            let _ = tx.send(rc);
        }
        woken
    }

    /// Number of keys currently in flight, across all classes.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
