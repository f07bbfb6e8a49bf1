use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use flockledger_core::BatchId;

use crate::quantities::EggCounts;
use crate::stage::Stage;

/// Rearing-stage daily tracking row (seguimiento de levante).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RearingEntry {
    pub mortality_females: u64,
    pub mortality_males: u64,
    pub selection_females: u64,
    pub selection_males: u64,
    /// Birds removed because their sex was misclassified at intake.
    pub sexing_error_females: u64,
    pub sexing_error_males: u64,
    pub feed_grams: u64,
}

/// Production-stage daily tracking row (seguimiento de producción).
///
/// Sexing errors are no longer tracked once a batch is in production.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionEntry {
    pub mortality_females: u64,
    pub mortality_males: u64,
    pub selection_females: u64,
    pub selection_males: u64,
    pub feed_grams: u64,
    /// Eggs collected that day, per grade. `incubable` holds the incubable split.
    pub eggs: EggCounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "lowercase")]
pub enum DailyEntry {
    Rearing(RearingEntry),
    Production(ProductionEntry),
}

/// One day of tracking for one batch and stage.
///
/// Keyed by `(batch_id, date, stage)`; writers upsert on that key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub batch_id: BatchId,
    pub date: NaiveDate,
    pub entry: DailyEntry,
}

impl DailyRecord {
    pub fn rearing(batch_id: BatchId, date: NaiveDate, entry: RearingEntry) -> Self {
        Self {
            batch_id,
            date,
            entry: DailyEntry::Rearing(entry),
        }
    }

    pub fn production(batch_id: BatchId, date: NaiveDate, entry: ProductionEntry) -> Self {
        Self {
            batch_id,
            date,
            entry: DailyEntry::Production(entry),
        }
    }

    pub fn stage(&self) -> Stage {
        match self.entry {
            DailyEntry::Rearing(_) => Stage::Rearing,
            DailyEntry::Production(_) => Stage::Production,
        }
    }

    /// Female birds leaving the batch that day (mortality + selection + sexing error).
    pub fn female_losses(&self) -> u64 {
        match &self.entry {
            DailyEntry::Rearing(e) => {
                e.mortality_females + e.selection_females + e.sexing_error_females
            }
            DailyEntry::Production(e) => e.mortality_females + e.selection_females,
        }
    }

    /// Male birds leaving the batch that day (mortality + selection + sexing error).
    pub fn male_losses(&self) -> u64 {
        match &self.entry {
            DailyEntry::Rearing(e) => e.mortality_males + e.selection_males + e.sexing_error_males,
            DailyEntry::Production(e) => e.mortality_males + e.selection_males,
        }
    }

    /// Eggs collected that day; rearing records never carry eggs.
    pub fn eggs(&self) -> Option<&EggCounts> {
        match &self.entry {
            DailyEntry::Rearing(_) => None,
            DailyEntry::Production(e) => Some(&e.eggs),
        }
    }
}

/// Inclusive date window used when listing daily records. Open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn until(date: NaiveDate) -> Self {
        Self {
            from: None,
            to: Some(date),
        }
    }

    pub fn between(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from.is_none_or(|from| date >= from) && self.to.is_none_or(|to| date <= to)
    }
}
