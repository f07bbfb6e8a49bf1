use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use flockledger_core::{BatchId, Entity, FarmId};

use crate::stage::Stage;

/// Where a batch is housed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub farm_id: FarmId,
    pub nucleus: String,
    pub shed: String,
}

/// A cohort of birds managed together (lote).
///
/// Immutable from the engine's point of view. Its current inventory is never stored
/// here: it is derived from the opening counts plus daily records and movements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    /// Human-readable batch code shown on screens (e.g. "L-2024-07").
    pub code: String,
    pub location: Location,
    pub stage: Stage,
    pub initial_females: u64,
    pub initial_males: u64,
    /// Birds housed without sexing.
    #[serde(default)]
    pub initial_mixed: u64,
    pub encased_on: NaiveDate,
}

impl Batch {
    pub fn farm_id(&self) -> FarmId {
        self.location.farm_id
    }
}

impl Entity for Batch {
    type Id = BatchId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
