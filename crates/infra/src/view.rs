//! Read-side projection merging bird and egg movements per batch.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use flockledger_core::{BatchId, FarmId, MovementId, UserId};
use flockledger_flock::{BirdCounts, EggCounts, Flow, MovementKind, Quantities, Stage};
use flockledger_movements::{Destination, MovementRecord, MovementState, OperationKind};

use crate::aggregator::{InventoryAggregator, InventoryError};
use crate::store::{DailyRecordStore, FarmDirectory, MovementStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryQuantities {
    Birds(BirdCounts),
    Eggs(EggCounts),
}

/// One movement as listed on a batch's feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedEntry {
    pub kind: MovementKind,
    pub movement_id: MovementId,
    pub sequence: String,
    pub operation: OperationKind,
    pub state: MovementState,
    pub occurred_at: DateTime<Utc>,
    /// Direction as seen from the listed batch.
    pub direction: Flow,
    pub source_batch: BatchId,
    pub source_farm: FarmId,
    pub source_farm_name: Option<String>,
    pub destination: Option<Destination>,
    /// Batch code, farm name or plant name of the destination.
    pub destination_label: Option<String>,
    pub quantities: EntryQuantities,
    pub total: u64,
    pub responsible: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFeed {
    pub batch_id: BatchId,
    pub stage: Stage,
    pub entries: Vec<UnifiedEntry>,
}

pub struct UnifiedMovementView {
    aggregator: Arc<InventoryAggregator>,
    daily: Arc<dyn DailyRecordStore>,
    farms: Arc<dyn FarmDirectory>,
    birds: Arc<dyn MovementStore<BirdCounts>>,
    eggs: Arc<dyn MovementStore<EggCounts>>,
}

impl UnifiedMovementView {
    pub fn new(
        aggregator: Arc<InventoryAggregator>,
        daily: Arc<dyn DailyRecordStore>,
        farms: Arc<dyn FarmDirectory>,
        birds: Arc<dyn MovementStore<BirdCounts>>,
        eggs: Arc<dyn MovementStore<EggCounts>>,
    ) -> Self {
        Self {
            aggregator,
            daily,
            farms,
            birds,
            eggs,
        }
    }

    /// Bird and egg movements where `batch_id` is source or destination, newest
    /// first, at most `limit` of them.
    pub fn by_batch(&self, batch_id: BatchId, limit: usize) -> Result<BatchFeed, InventoryError> {
        self.aggregator.batch(batch_id)?;

        let stage = if self.daily.has_stage(batch_id, Stage::Production)? {
            Stage::Production
        } else {
            Stage::Rearing
        };

        let mut labels = Labels::new(&self.aggregator, self.farms.as_ref());
        let mut entries = Vec::new();
        for record in self.birds.list_by_batch(batch_id)? {
            let quantities = EntryQuantities::Birds(*record.quantities());
            entries.push(entry(&record, batch_id, quantities, &mut labels)?);
        }
        for record in self.eggs.list_by_batch(batch_id)? {
            let quantities = EntryQuantities::Eggs(*record.quantities());
            entries.push(entry(&record, batch_id, quantities, &mut labels)?);
        }

        entries.sort_by(|a, b| {
            b.occurred_at
                .cmp(&a.occurred_at)
                .then_with(|| b.sequence.cmp(&a.sequence))
        });
        entries.truncate(limit);

        Ok(BatchFeed {
            batch_id,
            stage,
            entries,
        })
    }
}

fn entry<Q: Quantities>(
    record: &MovementRecord<Q>,
    batch_id: BatchId,
    quantities: EntryQuantities,
    labels: &mut Labels<'_>,
) -> Result<UnifiedEntry, StoreError> {
    let draft = record.draft();
    let source = draft.source;
    Ok(UnifiedEntry {
        kind: record.kind(),
        movement_id: record.id_typed(),
        sequence: record.sequence().to_string(),
        operation: draft.operation,
        state: record.state(),
        occurred_at: record.occurred_at(),
        direction: record.flow_for(batch_id).unwrap_or(Flow::Outgoing),
        source_batch: source.batch_id,
        source_farm: source.farm_id,
        source_farm_name: labels.farm(source.farm_id)?,
        destination: draft.destination,
        destination_label: match draft.destination {
            Some(d) => labels.destination(d)?,
            None => None,
        },
        quantities,
        total: record.quantities().total(),
        responsible: draft.responsible,
    })
}

/// Name lookups memoized for the duration of one listing.
struct Labels<'a> {
    aggregator: &'a InventoryAggregator,
    farms: &'a dyn FarmDirectory,
    farm_names: HashMap<FarmId, Option<String>>,
}

impl<'a> Labels<'a> {
    fn new(aggregator: &'a InventoryAggregator, farms: &'a dyn FarmDirectory) -> Self {
        Self {
            aggregator,
            farms,
            farm_names: HashMap::new(),
        }
    }

    fn farm(&mut self, farm_id: FarmId) -> Result<Option<String>, StoreError> {
        if let Some(name) = self.farm_names.get(&farm_id) {
            return Ok(name.clone());
        }
        let name = self.farms.name_of(farm_id)?;
        self.farm_names.insert(farm_id, name.clone());
        Ok(name)
    }

    fn destination(&mut self, destination: Destination) -> Result<Option<String>, StoreError> {
        match destination {
            Destination::Batch { batch_id } => match self.aggregator.batch(batch_id) {
                Ok(batch) => Ok(Some(batch.code)),
                Err(InventoryError::UnknownBatch(_)) => Ok(None),
                Err(InventoryError::Storage(e)) => Err(e),
            },
            Destination::Farm { farm_id } => self.farm(farm_id),
            Destination::Plant { plant_id } => self.farms.plant_name(plant_id),
        }
    }
}
