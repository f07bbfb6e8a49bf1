//! Inventory aggregator: derives bird and egg balances on demand.
//!
//! Reads the batch registry, the daily record store and both movement stores, and
//! folds them with [`fold_balance`]. Results for "now" (no `as_of`) may be memoized
//! when caching is enabled; ledgers invalidate the affected batches on every
//! commit, and entries expire after the configured TTL regardless.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use flockledger_core::BatchId;
use flockledger_flock::{
    Balance, Batch, BirdCounts, DateRange, EggCounts, IntegrityWarning, Quantities, Stage,
    fold_balance, lowest_balance_from,
};

use crate::config::CacheSettings;
use crate::store::{BatchRegistry, DailyRecordStore, MovementStore, StoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InventoryError {
    #[error("batch {0} does not exist")]
    UnknownBatch(BatchId),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// A balance lookup for one quantity family.
///
/// The validator is generic over the family and asks for balances through this.
pub trait BalanceSource<Q: Quantities>: Send + Sync {
    fn balance(&self, batch_id: BatchId, as_of: Option<DateTime<Utc>>)
    -> Result<Balance<Q>, InventoryError>;

    /// What the batch holds at every instant from `from` on, per category.
    fn lowest_from(&self, batch_id: BatchId, from: DateTime<Utc>) -> Result<Q, InventoryError>;
}

/// Bird and egg balances of one batch at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub batch_id: BatchId,
    pub as_of: Option<DateTime<Utc>>,
    pub stage: Stage,
    pub birds: Balance<BirdCounts>,
    pub eggs: Balance<EggCounts>,
}

impl BalanceSnapshot {
    pub fn total_birds(&self) -> u64 {
        self.birds.quantities.total()
    }

    pub fn total_eggs(&self) -> u64 {
        self.eggs.quantities.total()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &IntegrityWarning> {
        self.birds.warnings.iter().chain(self.eggs.warnings.iter())
    }
}

pub struct InventoryAggregator {
    batches: Arc<dyn BatchRegistry>,
    daily: Arc<dyn DailyRecordStore>,
    bird_movements: Arc<dyn MovementStore<BirdCounts>>,
    egg_movements: Arc<dyn MovementStore<EggCounts>>,
    bird_cache: BalanceCache<BirdCounts>,
    egg_cache: BalanceCache<EggCounts>,
}

impl InventoryAggregator {
    pub fn new(
        batches: Arc<dyn BatchRegistry>,
        daily: Arc<dyn DailyRecordStore>,
        bird_movements: Arc<dyn MovementStore<BirdCounts>>,
        egg_movements: Arc<dyn MovementStore<EggCounts>>,
        cache: &CacheSettings,
    ) -> Self {
        let ttl = cache.enabled.then(|| Duration::from_secs(cache.ttl_secs));
        Self {
            batches,
            daily,
            bird_movements,
            egg_movements,
            bird_cache: BalanceCache::new(ttl),
            egg_cache: BalanceCache::new(ttl),
        }
    }

    /// Bird balance of a batch (`as_of = None` means the whole history).
    pub fn current_balance(
        &self,
        batch_id: BatchId,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Balance<BirdCounts>, InventoryError> {
        self.balance_with(batch_id, as_of, self.bird_movements.as_ref(), &self.bird_cache)
    }

    /// Egg balance of a batch per grade (`as_of = None` means the whole history).
    pub fn current_egg_balance(
        &self,
        batch_id: BatchId,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Balance<EggCounts>, InventoryError> {
        self.balance_with(batch_id, as_of, self.egg_movements.as_ref(), &self.egg_cache)
    }

    pub fn snapshot(
        &self,
        batch_id: BatchId,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<BalanceSnapshot, InventoryError> {
        let batch = self.batch(batch_id)?;
        Ok(BalanceSnapshot {
            batch_id,
            as_of,
            stage: self.resolve_stage(&batch)?,
            birds: self.current_balance(batch_id, as_of)?,
            eggs: self.current_egg_balance(batch_id, as_of)?,
        })
    }

    /// Stage used for business rules: the registry stage, promoted to Production as
    /// soon as Production daily records exist.
    pub fn resolve_stage(&self, batch: &Batch) -> Result<Stage, InventoryError> {
        if batch.stage == Stage::Production {
            return Ok(Stage::Production);
        }
        if self.daily.has_stage(batch.id, Stage::Production)? {
            return Ok(Stage::Production);
        }
        Ok(Stage::Rearing)
    }

    pub fn batch(&self, batch_id: BatchId) -> Result<Batch, InventoryError> {
        self.batches
            .get(batch_id)?
            .ok_or(InventoryError::UnknownBatch(batch_id))
    }

    /// Drop memoized balances for the given batches.
    pub fn invalidate(&self, batches: &[BatchId]) {
        for batch_id in batches {
            self.bird_cache.invalidate(*batch_id);
            self.egg_cache.invalidate(*batch_id);
        }
        tracing::debug!(?batches, "balance cache invalidated");
    }

    fn balance_with<Q: Quantities>(
        &self,
        batch_id: BatchId,
        as_of: Option<DateTime<Utc>>,
        movements: &dyn MovementStore<Q>,
        cache: &BalanceCache<Q>,
    ) -> Result<Balance<Q>, InventoryError> {
        if as_of.is_none() {
            if let Some(hit) = cache.lookup(batch_id) {
                return Ok(hit);
            }
        }
        let generation = cache.generation(batch_id);

        let batch = self.batch(batch_id)?;
        let range = match as_of {
            Some(t) => DateRange::until(t.date_naive()),
            None => DateRange::all(),
        };
        let daily = self.daily.list_by_batch(batch_id, range)?;
        let records = movements.list_by_batch(batch_id)?;
        let flows = records.iter().filter_map(|r| r.committed_flow(batch_id));

        let balance = fold_balance(&batch, &daily, flows, as_of);

        if as_of.is_none() {
            cache.store(batch_id, generation, &balance);
        }
        Ok(balance)
    }

    fn lowest_with<Q: Quantities>(
        &self,
        batch_id: BatchId,
        from: DateTime<Utc>,
        movements: &dyn MovementStore<Q>,
    ) -> Result<Q, InventoryError> {
        let batch = self.batch(batch_id)?;
        let daily = self.daily.list_by_batch(batch_id, DateRange::all())?;
        let records = movements.list_by_batch(batch_id)?;
        let flows = records.iter().filter_map(|r| r.committed_flow(batch_id));
        Ok(lowest_balance_from(&batch, &daily, flows, from))
    }
}

impl BalanceSource<BirdCounts> for InventoryAggregator {
    fn balance(
        &self,
        batch_id: BatchId,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Balance<BirdCounts>, InventoryError> {
        self.current_balance(batch_id, as_of)
    }

    fn lowest_from(
        &self,
        batch_id: BatchId,
        from: DateTime<Utc>,
    ) -> Result<BirdCounts, InventoryError> {
        self.lowest_with(batch_id, from, self.bird_movements.as_ref())
    }
}

impl BalanceSource<EggCounts> for InventoryAggregator {
    fn balance(
        &self,
        batch_id: BatchId,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Balance<EggCounts>, InventoryError> {
        self.current_egg_balance(batch_id, as_of)
    }

    fn lowest_from(
        &self,
        batch_id: BatchId,
        from: DateTime<Utc>,
    ) -> Result<EggCounts, InventoryError> {
        self.lowest_with(batch_id, from, self.egg_movements.as_ref())
    }
}

/// Memoized "now" balances for one quantity family.
///
/// Invalidation bumps a per-batch generation, so a fold that started before a
/// commit can never write its stale result back after the commit invalidated it.
struct BalanceCache<Q> {
    ttl: Option<Duration>,
    state: Mutex<CacheState<Q>>,
}

struct CacheState<Q> {
    entries: HashMap<BatchId, (Instant, Balance<Q>)>,
    generations: HashMap<BatchId, u64>,
}

impl<Q: Quantities> BalanceCache<Q> {
    fn new(ttl: Option<Duration>) -> Self {
        Self {
            ttl,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                generations: HashMap::new(),
            }),
        }
    }

    fn lookup(&self, batch_id: BatchId) -> Option<Balance<Q>> {
        let ttl = self.ttl?;
        let state = self.state.lock().ok()?;
        state
            .entries
            .get(&batch_id)
            .filter(|(stored_at, _)| stored_at.elapsed() < ttl)
            .map(|(_, balance)| balance.clone())
    }

    fn generation(&self, batch_id: BatchId) -> u64 {
        self.state
            .lock()
            .map(|s| s.generations.get(&batch_id).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn store(&self, batch_id: BatchId, generation: u64, balance: &Balance<Q>) {
        if self.ttl.is_none() {
            return;
        }
        if let Ok(mut state) = self.state.lock() {
            let current = state.generations.get(&batch_id).copied().unwrap_or(0);
            if current == generation {
                state.entries.insert(batch_id, (Instant::now(), balance.clone()));
            }
        }
    }

    fn invalidate(&self, batch_id: BatchId) {
        if let Ok(mut state) = self.state.lock() {
            state.entries.remove(&batch_id);
            *state.generations.entry(batch_id).or_insert(0) += 1;
        }
    }
}
