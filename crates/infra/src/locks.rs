//! Per-batch serialization of validate-then-commit sequences.
//!
//! Inventory is derived, so two commits drawing from the same batch must not both
//! validate against the same snapshot. Every ledger write holds the locks of all
//! batches it touches (source and destination) while it re-validates and persists.
//! Acquisition is all-or-nothing, so multi-batch writers cannot deadlock.

use std::collections::BTreeSet;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;

use flockledger_core::BatchId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("timed out after {waited:?} waiting for batches {batches:?}")]
    Timeout {
        batches: Vec<BatchId>,
        waited: Duration,
    },

    #[error("batch lock table poisoned")]
    Poisoned,
}

#[derive(Debug)]
pub struct BatchLocks {
    held: Mutex<BTreeSet<BatchId>>,
    released: Condvar,
    timeout: Duration,
}

impl BatchLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            held: Mutex::new(BTreeSet::new()),
            released: Condvar::new(),
            timeout,
        }
    }

    /// Block until every batch in `batches` is free, then hold them all.
    pub fn acquire(&self, batches: &[BatchId]) -> Result<BatchGuard<'_>, LockError> {
        let wanted: BTreeSet<BatchId> = batches.iter().copied().collect();
        let started = Instant::now();
        let deadline = started + self.timeout;

        let mut held = self.held.lock().map_err(|_| LockError::Poisoned)?;
        while wanted.iter().any(|b| held.contains(b)) {
            let now = Instant::now();
            if now >= deadline {
                return Err(LockError::Timeout {
                    batches: wanted.into_iter().collect(),
                    waited: now - started,
                });
            }
            tracing::debug!(batches = ?wanted, "waiting for batch locks");
            let (guard, _) = self
                .released
                .wait_timeout(held, deadline - now)
                .map_err(|_| LockError::Poisoned)?;
            held = guard;
        }
        held.extend(wanted.iter().copied());

        Ok(BatchGuard {
            locks: self,
            batches: wanted.into_iter().collect(),
        })
    }
}

impl Default for BatchLocks {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

/// Holds a set of batch locks until dropped.
#[derive(Debug)]
pub struct BatchGuard<'a> {
    locks: &'a BatchLocks,
    batches: Vec<BatchId>,
}

impl BatchGuard<'_> {
    pub fn batches(&self) -> &[BatchId] {
        &self.batches
    }

    pub fn covers(&self, batches: &[BatchId]) -> bool {
        batches.iter().all(|b| self.batches.contains(b))
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        let mut held = match self.locks.held.lock() {
            Ok(held) => held,
            Err(poisoned) => poisoned.into_inner(),
        };
        for batch in &self.batches {
            held.remove(batch);
        }
        drop(held);
        self.locks.released.notify_all();
    }
}
