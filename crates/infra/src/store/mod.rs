//! Storage boundary of the engine.
//!
//! The engine never owns a database. It reads batches, daily records and the farm
//! directory through read-only traits, and reads/writes movement records through
//! [`MovementStore`], which must offer an atomic compare-and-replace per record.
//! In-memory implementations back tests and local development.

pub mod in_memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use flockledger_core::{BatchId, ExpectedVersion, FarmId, MovementId, PlantId};
use flockledger_flock::{Batch, DailyRecord, DateRange, Stage};
use flockledger_movements::MovementRecord;

pub use in_memory::{
    InMemoryBatchRegistry, InMemoryDailyRecordStore, InMemoryFarmDirectory,
    InMemoryInventoryContexts, InMemoryMovementStore,
};

/// Storage failure.
///
/// Callers may retry, but a failed write is never assumed to have happened.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("record not found: {0}")]
    Missing(String),

    #[error("lock poisoned")]
    Poisoned,
}

/// Read-only batch master data.
pub trait BatchRegistry: Send + Sync {
    fn get(&self, batch_id: BatchId) -> Result<Option<Batch>, StoreError>;
}

/// Read-only access to daily tracking rows.
pub trait DailyRecordStore: Send + Sync {
    fn list_by_batch(
        &self,
        batch_id: BatchId,
        range: DateRange,
    ) -> Result<Vec<DailyRecord>, StoreError>;

    /// Whether any record of `stage` exists for the batch.
    fn has_stage(&self, batch_id: BatchId, stage: Stage) -> Result<bool, StoreError> {
        Ok(self
            .list_by_batch(batch_id, DateRange::all())?
            .iter()
            .any(|r| r.stage() == stage))
    }
}

/// Read-only farm and plant names.
pub trait FarmDirectory: Send + Sync {
    fn name_of(&self, farm_id: FarmId) -> Result<Option<String>, StoreError>;

    fn plant_name(&self, plant_id: PlantId) -> Result<Option<String>, StoreError>;
}

/// Marks a batch as holding an inventory record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryContext {
    pub batch_id: BatchId,
    pub farm_id: FarmId,
    pub opened_at: DateTime<Utc>,
    /// The movement whose processing provisioned this context, if any.
    pub opened_by: Option<MovementId>,
}

pub trait InventoryContextStore: Send + Sync {
    fn get(&self, batch_id: BatchId) -> Result<Option<InventoryContext>, StoreError>;

    /// Insert unless one already exists. Returns whether a context was created.
    fn provision(&self, context: InventoryContext) -> Result<bool, StoreError>;
}

/// Persistence contract for one movement family (birds or eggs).
pub trait MovementStore<Q>: Send + Sync {
    /// Next value of the human-readable sequence (1, 2, 3, ...).
    fn next_sequence(&self) -> Result<u64, StoreError>;

    /// Persist a new record. Fails with `Duplicate` if the id is taken.
    fn insert(&self, record: MovementRecord<Q>) -> Result<(), StoreError>;

    fn get(&self, id: MovementId) -> Result<Option<MovementRecord<Q>>, StoreError>;

    /// Replace a record if the stored version matches `expected`.
    fn replace(
        &self,
        record: MovementRecord<Q>,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError>;

    /// Every record whose source or destination batch is `batch_id`, in any state.
    fn list_by_batch(&self, batch_id: BatchId) -> Result<Vec<MovementRecord<Q>>, StoreError>;
}
