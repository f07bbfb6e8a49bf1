//! Availability validation for proposed movements.
//!
//! Checks run in a fixed order and every failure is collected, so a caller can
//! present all problems at once:
//!
//! 1. something is requested
//! 2. the source batch exists, belongs to the source farm, and holds every
//!    requested quantity
//! 3. stage rules (production batches move one sex at a time, never mixed birds)
//! 4. the destination fits the operation and resolves

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use flockledger_core::{BatchId, FarmId, PlantId};
use flockledger_flock::{Quantities, StageConflict};
use flockledger_movements::{Destination, MovementDraft, MovementRecord, OperationKind};

use crate::aggregator::{BalanceSource, InventoryAggregator, InventoryError};
use crate::store::{FarmDirectory, StoreError};

/// One broken rule.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Violation {
    #[error("at least one quantity must be greater than zero")]
    NothingRequested,

    #[error("source batch {batch_id} does not exist")]
    UnknownSourceBatch { batch_id: BatchId },

    #[error("batch {batch_id} is not housed on farm {farm_id}")]
    SourceFarmMismatch { batch_id: BatchId, farm_id: FarmId },

    #[error("insufficient {category}: requested {requested}, available {available}")]
    InsufficientAvailability {
        category: String,
        requested: u64,
        available: u64,
    },

    #[error("{conflict}")]
    StageExclusivity { conflict: StageConflict },

    #[error("a transfer requires a destination")]
    MissingDestination,

    #[error("a sale cannot carry a destination")]
    UnexpectedDestination,

    #[error("a transfer cannot target its own source batch")]
    SelfTransfer,

    #[error("destination batch {batch_id} does not exist")]
    UnknownDestinationBatch { batch_id: BatchId },

    #[error("destination farm {farm_id} does not exist")]
    UnknownDestinationFarm { farm_id: FarmId },

    #[error("destination plant {plant_id} does not exist")]
    UnknownDestinationPlant { plant_id: PlantId },

    #[error(
        "reversal needs {requested} {category} back from batch {batch_id}, which holds {available}"
    )]
    ReversalExceedsDestination {
        batch_id: BatchId,
        category: String,
        requested: u64,
        available: u64,
    },

    #[error("{message}")]
    Malformed { message: String },
}

impl Violation {
    /// The quantity category this violation is about, if any.
    pub fn category(&self) -> Option<&str> {
        match self {
            Violation::InsufficientAvailability { category, .. }
            | Violation::ReversalExceedsDestination { category, .. } => Some(category.as_str()),
            _ => None,
        }
    }
}

/// Every violation found for one draft.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrors(pub Vec<Violation>);

impl ValidationErrors {
    pub fn violations(&self) -> &[Violation] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl core::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{v}")?;
        }
        Ok(())
    }
}

/// Outcome of a standalone pre-flight check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub ok: bool,
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    fn from_violations(violations: Vec<Violation>) -> Self {
        Self {
            ok: violations.is_empty(),
            violations,
        }
    }

    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.ok {
            Ok(())
        } else {
            Err(ValidationErrors(self.violations))
        }
    }
}

pub struct AvailabilityValidator {
    aggregator: Arc<InventoryAggregator>,
    farms: Arc<dyn FarmDirectory>,
}

impl AvailabilityValidator {
    pub fn new(aggregator: Arc<InventoryAggregator>, farms: Arc<dyn FarmDirectory>) -> Self {
        Self { aggregator, farms }
    }

    /// Validate a draft against the current derived inventory.
    ///
    /// Only storage failures are errors; broken rules are reported in the report.
    pub fn validate<Q>(&self, draft: &MovementDraft<Q>) -> Result<ValidationReport, StoreError>
    where
        Q: Quantities,
        InventoryAggregator: BalanceSource<Q>,
    {
        let mut violations = Vec::new();

        // (1)
        if draft.quantities.is_empty() {
            violations.push(Violation::NothingRequested);
        }

        // (2) + (3)
        let source = draft.source;
        match self.aggregator.batch(source.batch_id) {
            Ok(batch) => {
                if batch.farm_id() != source.farm_id {
                    violations.push(Violation::SourceFarmMismatch {
                        batch_id: source.batch_id,
                        farm_id: source.farm_id,
                    });
                }

                // A back-dated draft must also fit every later point of the history.
                let held = self.available::<Q>(source.batch_id, draft.occurred_at)?;
                for (category, requested) in draft.quantities.non_zero() {
                    let available = held.get(category);
                    if requested > available {
                        violations.push(Violation::InsufficientAvailability {
                            category: category.to_string(),
                            requested,
                            available,
                        });
                    }
                }

                let stage = self.aggregator.resolve_stage(&batch).map_err(storage)?;
                violations.extend(
                    draft
                        .quantities
                        .stage_conflicts(stage)
                        .into_iter()
                        .map(|conflict| Violation::StageExclusivity { conflict }),
                );
            }
            Err(InventoryError::UnknownBatch(batch_id)) => {
                violations.push(Violation::UnknownSourceBatch { batch_id });
            }
            Err(InventoryError::Storage(e)) => return Err(e),
        }

        // (4)
        match (draft.operation, draft.destination) {
            (OperationKind::Sale, Some(_)) => violations.push(Violation::UnexpectedDestination),
            (OperationKind::Transfer, None) => violations.push(Violation::MissingDestination),
            (OperationKind::Transfer, Some(destination)) => {
                if let Some(v) = self.check_destination(source.batch_id, destination)? {
                    violations.push(v);
                }
            }
            (OperationKind::Sale, None) => {}
        }

        Ok(ValidationReport::from_violations(violations))
    }

    /// Check that a completed movement can be taken back out of its destination
    /// batch without driving that batch negative.
    pub fn check_reversal<Q>(&self, record: &MovementRecord<Q>) -> Result<Vec<Violation>, StoreError>
    where
        Q: Quantities,
        InventoryAggregator: BalanceSource<Q>,
    {
        let Some(dest) = record.draft().destination_batch() else {
            return Ok(Vec::new());
        };
        if !record.is_completed() {
            return Ok(Vec::new());
        }

        let held = self.available::<Q>(dest, record.occurred_at())?;
        Ok(record
            .quantities()
            .non_zero()
            .into_iter()
            .filter(|(category, requested)| *requested > held.get(*category))
            .map(|(category, requested)| Violation::ReversalExceedsDestination {
                batch_id: dest,
                category: category.to_string(),
                requested,
                available: held.get(category),
            })
            .collect())
    }

    /// Quantities the batch holds at every instant from `from` on.
    fn available<Q>(&self, batch_id: BatchId, from: DateTime<Utc>) -> Result<Q, StoreError>
    where
        Q: Quantities,
        InventoryAggregator: BalanceSource<Q>,
    {
        match BalanceSource::<Q>::lowest_from(self.aggregator.as_ref(), batch_id, from) {
            Ok(held) => Ok(held),
            // Validated by the caller; a batch vanishing mid-check reads as empty.
            Err(InventoryError::UnknownBatch(_)) => Ok(Q::default()),
            Err(InventoryError::Storage(e)) => Err(e),
        }
    }

    fn check_destination(
        &self,
        source_batch: BatchId,
        destination: Destination,
    ) -> Result<Option<Violation>, StoreError> {
        let violation = match destination {
            Destination::Batch { batch_id } if batch_id == source_batch => {
                Some(Violation::SelfTransfer)
            }
            Destination::Batch { batch_id } => match self.aggregator.batch(batch_id) {
                Ok(_) => None,
                Err(InventoryError::UnknownBatch(_)) => {
                    Some(Violation::UnknownDestinationBatch { batch_id })
                }
                Err(InventoryError::Storage(e)) => return Err(e),
            },
            Destination::Farm { farm_id } => self
                .farms
                .name_of(farm_id)?
                .is_none()
                .then_some(Violation::UnknownDestinationFarm { farm_id }),
            Destination::Plant { plant_id } => self
                .farms
                .plant_name(plant_id)?
                .is_none()
                .then_some(Violation::UnknownDestinationPlant { plant_id }),
        };
        Ok(violation)
    }
}

fn storage(err: InventoryError) -> StoreError {
    match err {
        InventoryError::Storage(e) => e,
        InventoryError::UnknownBatch(id) => StoreError::Missing(format!("batch {id}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheSettings;
    use crate::store::{
        InMemoryBatchRegistry, InMemoryDailyRecordStore, InMemoryFarmDirectory,
        InMemoryMovementStore,
    };
    use chrono::{NaiveDate, TimeZone, Utc};
    use flockledger_core::UserId;
    use flockledger_flock::{
        Batch, BirdCounts, DailyRecord, EggCounts, EggGrade, Location, ProductionEntry,
        RearingEntry, Stage,
    };
    use flockledger_movements::Source;
    use proptest::prelude::*;

    struct Fixture {
        batches: Arc<InMemoryBatchRegistry>,
        daily: Arc<InMemoryDailyRecordStore>,
        farms: Arc<InMemoryFarmDirectory>,
        validator: AvailabilityValidator,
    }

    fn fixture() -> Fixture {
        let batches = Arc::new(InMemoryBatchRegistry::new());
        let daily = Arc::new(InMemoryDailyRecordStore::new());
        let farms = Arc::new(InMemoryFarmDirectory::new());
        let aggregator = Arc::new(InventoryAggregator::new(
            batches.clone(),
            daily.clone(),
            Arc::new(InMemoryMovementStore::<BirdCounts>::new()),
            Arc::new(InMemoryMovementStore::<EggCounts>::new()),
            &CacheSettings::default(),
        ));
        let validator = AvailabilityValidator::new(aggregator, farms.clone());
        Fixture {
            batches,
            daily,
            farms,
            validator,
        }
    }

    fn housed(f: &Fixture, stage: Stage, females: u64, males: u64) -> Batch {
        let farm_id = FarmId::new();
        f.farms.add_farm(farm_id, "Granja Norte").unwrap();
        let batch = Batch {
            id: BatchId::new(),
            code: "L-07".to_string(),
            location: Location {
                farm_id,
                nucleus: "N1".to_string(),
                shed: "G1".to_string(),
            },
            stage,
            initial_females: females,
            initial_males: males,
            initial_mixed: 0,
            encased_on: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        };
        f.batches.insert(batch.clone()).unwrap();
        batch
    }

    fn draft<Q>(batch: &Batch, operation: OperationKind, quantities: Q) -> MovementDraft<Q> {
        MovementDraft {
            operation,
            occurred_at: Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
            source: Source {
                batch_id: batch.id,
                farm_id: batch.farm_id(),
            },
            destination: None,
            quantities,
            responsible: UserId::new(),
            motive: None,
            description: None,
            notes: None,
        }
    }

    #[test]
    fn sale_within_availability_passes() {
        let f = fixture();
        let batch = housed(&f, Stage::Rearing, 500, 50);
        let report = f
            .validator
            .validate(&draft(&batch, OperationKind::Sale, BirdCounts::new(500, 50, 0)))
            .unwrap();
        assert!(report.ok, "{:?}", report.violations);
    }

    #[test]
    fn every_violation_is_collected() {
        let f = fixture();
        let batch = housed(&f, Stage::Rearing, 10, 10);
        let mut d = draft(&batch, OperationKind::Transfer, BirdCounts::new(11, 12, 0));
        d.source.farm_id = FarmId::new();

        let report = f.validator.validate(&d).unwrap();
        assert!(!report.ok);
        assert!(matches!(report.violations[0], Violation::SourceFarmMismatch { .. }));
        let categories: Vec<_> = report.violations.iter().filter_map(Violation::category).collect();
        assert_eq!(categories, vec!["female", "male"]);
        assert_eq!(report.violations.last(), Some(&Violation::MissingDestination));
    }

    #[test]
    fn empty_request_is_rejected() {
        let f = fixture();
        let batch = housed(&f, Stage::Rearing, 10, 10);
        let report = f
            .validator
            .validate(&draft(&batch, OperationKind::Sale, BirdCounts::default()))
            .unwrap();
        assert_eq!(report.violations, vec![Violation::NothingRequested]);
    }

    #[test]
    fn unknown_source_is_reported() {
        let f = fixture();
        let ghost = Batch {
            id: BatchId::new(),
            ..housed(&f, Stage::Rearing, 1, 1)
        };
        let report = f
            .validator
            .validate(&draft(&ghost, OperationKind::Sale, BirdCounts::females(1)))
            .unwrap();
        assert_eq!(
            report.violations,
            vec![Violation::UnknownSourceBatch { batch_id: ghost.id }]
        );
    }

    #[test]
    fn production_batches_move_one_sex_at_a_time() {
        let f = fixture();
        let batch = housed(&f, Stage::Production, 100, 100);
        let report = f
            .validator
            .validate(&draft(&batch, OperationKind::Sale, BirdCounts::new(50, 20, 0)))
            .unwrap();
        assert_eq!(
            report.violations,
            vec![Violation::StageExclusivity {
                conflict: StageConflict::FemalesAndMalesTogether
            }]
        );

        let females_only = f
            .validator
            .validate(&draft(&batch, OperationKind::Sale, BirdCounts::females(50)))
            .unwrap();
        assert!(females_only.ok);
    }

    #[test]
    fn production_records_promote_a_rearing_batch() {
        let f = fixture();
        let batch = housed(&f, Stage::Rearing, 100, 100);
        f.daily
            .upsert(DailyRecord::production(
                batch.id,
                NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
                ProductionEntry::default(),
            ))
            .unwrap();

        let report = f
            .validator
            .validate(&draft(&batch, OperationKind::Sale, BirdCounts::new(1, 1, 0)))
            .unwrap();
        assert!(report.violations.iter().any(|v| matches!(v, Violation::StageExclusivity { .. })));
    }

    #[test]
    fn egg_shortfall_names_the_grade() {
        let f = fixture();
        let batch = housed(&f, Stage::Production, 100, 10);
        f.daily
            .upsert(DailyRecord::production(
                batch.id,
                NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
                ProductionEntry {
                    eggs: EggCounts::of(EggGrade::Clean, 150),
                    ..ProductionEntry::default()
                },
            ))
            .unwrap();

        let report = f
            .validator
            .validate(&draft(
                &batch,
                OperationKind::Sale,
                EggCounts::of(EggGrade::Clean, 200),
            ))
            .unwrap();
        assert_eq!(
            report.violations,
            vec![Violation::InsufficientAvailability {
                category: "clean".to_string(),
                requested: 200,
                available: 150,
            }]
        );
        assert!(report.into_result().unwrap_err().to_string().contains("clean"));
    }

    #[test]
    fn back_dated_requests_must_fit_later_losses() {
        let f = fixture();
        let batch = housed(&f, Stage::Rearing, 100, 0);
        f.daily
            .upsert(DailyRecord::rearing(
                batch.id,
                NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
                RearingEntry {
                    mortality_females: 30,
                    ..RearingEntry::default()
                },
            ))
            .unwrap();

        let report = f
            .validator
            .validate(&draft(&batch, OperationKind::Sale, BirdCounts::females(80)))
            .unwrap();
        assert_eq!(
            report.violations,
            vec![Violation::InsufficientAvailability {
                category: "female".to_string(),
                requested: 80,
                available: 70,
            }]
        );
    }

    #[test]
    fn destinations_must_resolve() {
        let f = fixture();
        let batch = housed(&f, Stage::Rearing, 100, 100);
        let cases = [
            (
                Destination::Batch { batch_id: batch.id },
                Violation::SelfTransfer,
            ),
            (
                Destination::Batch {
                    batch_id: BatchId::from_uuid(uuid::Uuid::nil()),
                },
                Violation::UnknownDestinationBatch {
                    batch_id: BatchId::from_uuid(uuid::Uuid::nil()),
                },
            ),
            (
                Destination::Farm {
                    farm_id: FarmId::from_uuid(uuid::Uuid::nil()),
                },
                Violation::UnknownDestinationFarm {
                    farm_id: FarmId::from_uuid(uuid::Uuid::nil()),
                },
            ),
            (
                Destination::Plant {
                    plant_id: PlantId::from_uuid(uuid::Uuid::nil()),
                },
                Violation::UnknownDestinationPlant {
                    plant_id: PlantId::from_uuid(uuid::Uuid::nil()),
                },
            ),
        ];

        for (destination, expected) in cases {
            let mut d = draft(&batch, OperationKind::Transfer, BirdCounts::females(1));
            d.destination = Some(destination);
            let report = f.validator.validate(&d).unwrap();
            assert_eq!(report.violations, vec![expected]);
        }

        let plant = PlantId::new();
        f.farms.add_plant(plant, "Incubadora Sur").unwrap();
        let mut d = draft(&batch, OperationKind::Transfer, BirdCounts::females(1));
        d.destination = Some(Destination::Plant { plant_id: plant });
        assert!(f.validator.validate(&d).unwrap().ok);
    }

    #[test]
    fn sale_with_destination_is_rejected() {
        let f = fixture();
        let batch = housed(&f, Stage::Rearing, 100, 100);
        let mut d = draft(&batch, OperationKind::Sale, BirdCounts::females(1));
        d.destination = Some(Destination::Farm {
            farm_id: batch.farm_id(),
        });
        assert_eq!(
            f.validator.validate(&d).unwrap().violations,
            vec![Violation::UnexpectedDestination]
        );
    }

    #[test]
    fn violations_serialize_with_a_rule_tag() {
        let v = Violation::InsufficientAvailability {
            category: "female".to_string(),
            requested: 3,
            available: 1,
        };
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["rule"], "insufficient_availability");
        assert_eq!(json["available"], 1);
    }

    proptest! {
        #[test]
        fn requests_beyond_availability_always_fail(
            females in 0u64..200,
            males in 0u64..200,
            extra in 1u64..50,
        ) {
            let f = fixture();
            let batch = housed(&f, Stage::Rearing, females, males);
            let report = f
                .validator
                .validate(&draft(
                    &batch,
                    OperationKind::Sale,
                    BirdCounts::new(females + extra, males, 0),
                ))
                .unwrap();
            let expected = Violation::InsufficientAvailability {
                category: "female".to_string(),
                requested: females + extra,
                available: females,
            };
            prop_assert!(!report.ok);
            prop_assert!(report.violations.contains(&expected));
        }
    }
}
