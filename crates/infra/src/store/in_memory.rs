use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::NaiveDate;

use flockledger_core::{
    AggregateRoot, BatchId, Entity, ExpectedVersion, FarmId, MovementId, PlantId,
};
use flockledger_flock::{Batch, DailyRecord, DateRange, Quantities, Stage};
use flockledger_movements::MovementRecord;

use super::{
    BatchRegistry, DailyRecordStore, FarmDirectory, InventoryContext, InventoryContextStore,
    MovementStore, StoreError,
};

/// In-memory batch registry.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryBatchRegistry {
    batches: RwLock<HashMap<BatchId, Batch>>,
}

impl InMemoryBatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, batch: Batch) -> Result<(), StoreError> {
        let mut batches = self.batches.write().map_err(|_| StoreError::Poisoned)?;
        batches.insert(*batch.id(), batch);
        Ok(())
    }
}

impl BatchRegistry for InMemoryBatchRegistry {
    fn get(&self, batch_id: BatchId) -> Result<Option<Batch>, StoreError> {
        let batches = self.batches.read().map_err(|_| StoreError::Poisoned)?;
        Ok(batches.get(&batch_id).cloned())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct DailyKey {
    batch_id: BatchId,
    date: NaiveDate,
    stage: Stage,
}

/// In-memory daily tracking rows, one per (batch, date, stage).
#[derive(Debug, Default)]
pub struct InMemoryDailyRecordStore {
    records: RwLock<HashMap<DailyKey, DailyRecord>>,
}

impl InMemoryDailyRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the row for the record's (batch, date, stage).
    pub fn upsert(&self, record: DailyRecord) -> Result<(), StoreError> {
        let key = DailyKey {
            batch_id: record.batch_id,
            date: record.date,
            stage: record.stage(),
        };
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        records.insert(key, record);
        Ok(())
    }

    /// Delete a row. Returns whether one existed.
    ///
    /// Every balance derived from this batch changes; cached balances must be
    /// invalidated by the caller.
    pub fn remove(&self, batch_id: BatchId, date: NaiveDate, stage: Stage) -> Result<bool, StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        Ok(records
            .remove(&DailyKey {
                batch_id,
                date,
                stage,
            })
            .is_some())
    }
}

impl DailyRecordStore for InMemoryDailyRecordStore {
    fn list_by_batch(
        &self,
        batch_id: BatchId,
        range: DateRange,
    ) -> Result<Vec<DailyRecord>, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        let mut out: Vec<DailyRecord> = records
            .values()
            .filter(|r| r.batch_id == batch_id && range.contains(r.date))
            .cloned()
            .collect();
        out.sort_by_key(|r| (r.date, r.stage()));
        Ok(out)
    }
}

/// In-memory farm and plant names.
#[derive(Debug, Default)]
pub struct InMemoryFarmDirectory {
    farms: RwLock<HashMap<FarmId, String>>,
    plants: RwLock<HashMap<PlantId, String>>,
}

impl InMemoryFarmDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_farm(&self, farm_id: FarmId, name: impl Into<String>) -> Result<(), StoreError> {
        let mut farms = self.farms.write().map_err(|_| StoreError::Poisoned)?;
        farms.insert(farm_id, name.into());
        Ok(())
    }

    pub fn add_plant(&self, plant_id: PlantId, name: impl Into<String>) -> Result<(), StoreError> {
        let mut plants = self.plants.write().map_err(|_| StoreError::Poisoned)?;
        plants.insert(plant_id, name.into());
        Ok(())
    }
}

impl FarmDirectory for InMemoryFarmDirectory {
    fn name_of(&self, farm_id: FarmId) -> Result<Option<String>, StoreError> {
        let farms = self.farms.read().map_err(|_| StoreError::Poisoned)?;
        Ok(farms.get(&farm_id).cloned())
    }

    fn plant_name(&self, plant_id: PlantId) -> Result<Option<String>, StoreError> {
        let plants = self.plants.read().map_err(|_| StoreError::Poisoned)?;
        Ok(plants.get(&plant_id).cloned())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryInventoryContexts {
    contexts: RwLock<HashMap<BatchId, InventoryContext>>,
}

impl InMemoryInventoryContexts {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InventoryContextStore for InMemoryInventoryContexts {
    fn get(&self, batch_id: BatchId) -> Result<Option<InventoryContext>, StoreError> {
        let contexts = self.contexts.read().map_err(|_| StoreError::Poisoned)?;
        Ok(contexts.get(&batch_id).cloned())
    }

    fn provision(&self, context: InventoryContext) -> Result<bool, StoreError> {
        let mut contexts = self.contexts.write().map_err(|_| StoreError::Poisoned)?;
        if contexts.contains_key(&context.batch_id) {
            return Ok(false);
        }
        contexts.insert(context.batch_id, context);
        Ok(true)
    }
}

/// In-memory movement records for one family (birds or eggs).
#[derive(Debug)]
pub struct InMemoryMovementStore<Q> {
    records: RwLock<HashMap<MovementId, MovementRecord<Q>>>,
    sequence: AtomicU64,
}

impl<Q> InMemoryMovementStore<Q> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }
}

impl<Q> Default for InMemoryMovementStore<Q> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Q: Quantities> MovementStore<Q> for InMemoryMovementStore<Q> {
    fn next_sequence(&self) -> Result<u64, StoreError> {
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn insert(&self, record: MovementRecord<Q>) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        let id = record.id_typed();
        if records.contains_key(&id) {
            return Err(StoreError::Duplicate(format!("movement {id}")));
        }
        records.insert(id, record);
        Ok(())
    }

    fn get(&self, id: MovementId) -> Result<Option<MovementRecord<Q>>, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        Ok(records.get(&id).cloned())
    }

    fn replace(
        &self,
        record: MovementRecord<Q>,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        let id = record.id_typed();
        let current = records
            .get(&id)
            .ok_or_else(|| StoreError::Missing(format!("movement {id}")))?;

        if !expected.matches(current.version()) {
            return Err(StoreError::Concurrency(format!(
                "movement {id}: expected {expected:?}, found {}",
                current.version()
            )));
        }

        records.insert(id, record);
        Ok(())
    }

    fn list_by_batch(&self, batch_id: BatchId) -> Result<Vec<MovementRecord<Q>>, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        let mut out: Vec<MovementRecord<Q>> = records
            .values()
            .filter(|r| r.touches(batch_id))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.occurred_at()
                .cmp(&b.occurred_at())
                .then_with(|| a.sequence().cmp(b.sequence()))
        });
        Ok(out)
    }
}
