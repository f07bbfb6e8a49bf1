//! End-to-end ledger behaviour over in-memory stores.

mod common;

use std::sync::Arc;

use flockledger_core::{BatchId, ExpectedVersion, MovementId, PlantId};
use flockledger_events::{EventBus, EventEnvelope, InMemoryEventBus};
use flockledger_flock::{
    BirdCategory, BirdCounts, DailyRecord, EggCounts, EggGrade, Flow, MovementKind,
    ProductionEntry, RearingEntry, Stage,
};
use flockledger_infra::store::{InventoryContextStore, MovementStore, StoreError};
use flockledger_infra::{
    EntryQuantities, FlockLedger, LedgerError, ProcessOptions, Settings, Violation,
};
use flockledger_movements::{
    Destination, MovementEvent, MovementPatch, MovementRecord, MovementState, OperationKind,
};
use flockledger_observability::LogSettings;

use common::{at, day, engine, house, sale, transfer};

#[test]
fn sale_after_mortality_leaves_490_females() {
    let (engine, stores) = engine();
    let batch = house(&stores, "L-01", Stage::Rearing, 1000, 100);
    stores
        .daily
        .upsert(DailyRecord::rearing(
            batch.id,
            day(1),
            RearingEntry {
                mortality_females: 10,
                ..RearingEntry::default()
            },
        ))
        .unwrap();

    let record = engine
        .birds
        .create(sale(&batch, at(2, 9), BirdCounts::females(500)))
        .unwrap();
    assert_eq!(record.sequence(), "MA-000001");
    assert_eq!(record.state(), MovementState::Pending);

    // Pending movements do not count.
    let before = engine.aggregator.current_balance(batch.id, None).unwrap();
    assert_eq!(before.get(BirdCategory::Female), 990);

    let processed = engine
        .birds
        .process(record.id_typed(), ProcessOptions::default())
        .unwrap();
    assert_eq!(processed.state(), MovementState::Completed);
    assert!(processed.processed_at().is_some());

    let after = engine.aggregator.current_balance(batch.id, None).unwrap();
    assert_eq!(after.get(BirdCategory::Female), 490);
    assert_eq!(after.get(BirdCategory::Male), 100);
    assert!(after.is_consistent());

    // Before the sale happened.
    let earlier = engine
        .aggregator
        .current_balance(batch.id, Some(at(1, 23)))
        .unwrap();
    assert_eq!(earlier.get(BirdCategory::Female), 990);
}

#[test]
fn production_batch_rejects_females_and_males_together() {
    let (engine, stores) = engine();
    let batch = house(&stores, "L-02", Stage::Production, 100, 100);

    let err = engine
        .birds
        .create(sale(&batch, at(2, 9), BirdCounts::new(50, 20, 0)))
        .unwrap_err();
    assert!(err.violations().iter().any(|v| matches!(v, Violation::StageExclusivity { .. })));
}

#[test]
fn egg_transfer_beyond_balance_names_the_grade() {
    let (engine, stores) = engine();
    let batch = house(&stores, "L-03", Stage::Production, 100, 10);
    let other = house(&stores, "L-04", Stage::Production, 100, 10);
    stores
        .daily
        .upsert(DailyRecord::production(
            batch.id,
            day(1),
            ProductionEntry {
                eggs: EggCounts::of(EggGrade::Clean, 150),
                ..ProductionEntry::default()
            },
        ))
        .unwrap();

    let err = engine
        .eggs
        .create(transfer(&batch, &other, at(2, 9), EggCounts::of(EggGrade::Clean, 200)))
        .unwrap_err();
    assert_eq!(
        err.violations(),
        &[Violation::InsufficientAvailability {
            category: "clean".to_string(),
            requested: 200,
            available: 150,
        }]
    );
    assert!(err.to_string().contains("clean"));
}

#[test]
fn processing_twice_is_a_state_conflict() {
    let (engine, stores) = engine();
    let batch = house(&stores, "L-05", Stage::Rearing, 1000, 0);
    let record = engine
        .birds
        .create(sale(&batch, at(2, 9), BirdCounts::females(100)))
        .unwrap();

    engine
        .birds
        .process(record.id_typed(), ProcessOptions::default())
        .unwrap();
    let second = engine
        .birds
        .process(record.id_typed(), ProcessOptions::default())
        .unwrap_err();
    assert!(matches!(second, LedgerError::StateConflict(_)), "{second:?}");

    let balance = engine.aggregator.current_balance(batch.id, None).unwrap();
    assert_eq!(balance.get(BirdCategory::Female), 900);
    assert_eq!(engine.birds.get(record.id_typed()).unwrap().sequence(), "MA-000001");
}

#[test]
fn cancelling_a_completed_movement_restores_the_balance() {
    let (engine, stores) = engine();
    let batch = house(&stores, "L-06", Stage::Rearing, 800, 80);
    let initial = engine.aggregator.current_balance(batch.id, None).unwrap();

    let record = engine
        .birds
        .create(sale(&batch, at(3, 9), BirdCounts::new(300, 30, 0)))
        .unwrap();
    engine
        .birds
        .process(record.id_typed(), ProcessOptions::default())
        .unwrap();
    assert_eq!(
        engine
            .aggregator
            .current_balance(batch.id, None)
            .unwrap()
            .quantities,
        BirdCounts::new(500, 50, 0)
    );

    let cancelled = engine
        .birds
        .cancel(record.id_typed(), "duplicated entry", at(4, 9))
        .unwrap();
    assert_eq!(cancelled.state(), MovementState::Cancelled);
    assert_eq!(cancelled.cancellation_reason(), Some("duplicated entry"));

    let restored = engine.aggregator.current_balance(batch.id, None).unwrap();
    assert_eq!(restored, initial);

    let again = engine
        .birds
        .cancel(record.id_typed(), "again", at(4, 10))
        .unwrap_err();
    assert!(matches!(again, LedgerError::StateConflict(_)));
}

#[test]
fn cancelling_a_pending_movement_has_no_effect_on_balances() {
    let (engine, stores) = engine();
    let batch = house(&stores, "L-07", Stage::Rearing, 50, 5);
    let record = engine
        .birds
        .create(sale(&batch, at(3, 9), BirdCounts::females(50)))
        .unwrap();

    engine
        .birds
        .cancel(record.id_typed(), "customer backed out", at(3, 10))
        .unwrap();
    let err = engine
        .birds
        .process(record.id_typed(), ProcessOptions::default())
        .unwrap_err();
    assert!(matches!(err, LedgerError::StateConflict(_)));
    assert_eq!(
        engine.aggregator.current_balance(batch.id, None).unwrap().quantities,
        BirdCounts::new(50, 5, 0)
    );
}

#[test]
fn transfer_moves_birds_and_provisions_the_destination() {
    let (engine, stores) = engine();
    let from = house(&stores, "L-08", Stage::Rearing, 400, 40);
    let to = house(&stores, "L-09", Stage::Rearing, 0, 0);

    let record = engine
        .birds
        .create(transfer(&from, &to, at(5, 9), BirdCounts::new(100, 10, 0)))
        .unwrap();
    assert!(stores.contexts.get(to.id).unwrap().is_none());

    engine
        .birds
        .process(record.id_typed(), ProcessOptions::default())
        .unwrap();

    let context = stores.contexts.get(to.id).unwrap().unwrap();
    assert_eq!(context.farm_id, to.farm_id());
    assert_eq!(context.opened_by, Some(record.id_typed()));

    let source = engine.aggregator.current_balance(from.id, None).unwrap();
    let destination = engine.aggregator.current_balance(to.id, None).unwrap();
    assert_eq!(source.quantities, BirdCounts::new(300, 30, 0));
    assert_eq!(destination.quantities, BirdCounts::new(100, 10, 0));
}

#[test]
fn provisioning_can_be_turned_off_per_call() {
    let (engine, stores) = engine();
    let from = house(&stores, "L-10", Stage::Rearing, 10, 0);
    let to = house(&stores, "L-11", Stage::Rearing, 0, 0);
    let record = engine
        .birds
        .create(transfer(&from, &to, at(5, 9), BirdCounts::females(5)))
        .unwrap();

    engine
        .birds
        .process(
            record.id_typed(),
            ProcessOptions {
                auto_create_destination_inventory: Some(false),
                ..ProcessOptions::default()
            },
        )
        .unwrap();
    assert!(stores.contexts.get(to.id).unwrap().is_none());
}

#[test]
fn reversal_is_blocked_once_the_destination_spent_the_birds() {
    let (engine, stores) = engine();
    let from = house(&stores, "L-12", Stage::Rearing, 100, 0);
    let to = house(&stores, "L-13", Stage::Rearing, 0, 0);

    let inbound = engine
        .birds
        .create(transfer(&from, &to, at(5, 9), BirdCounts::females(60)))
        .unwrap();
    engine
        .birds
        .process(inbound.id_typed(), ProcessOptions::default())
        .unwrap();

    let onward = engine
        .birds
        .create(sale(&to, at(6, 9), BirdCounts::females(50)))
        .unwrap();
    engine
        .birds
        .process(onward.id_typed(), ProcessOptions::default())
        .unwrap();

    let err = engine
        .birds
        .cancel(inbound.id_typed(), "wrong shed", at(7, 9))
        .unwrap_err();
    assert!(matches!(
        err.violations(),
        [Violation::ReversalExceedsDestination { requested: 60, available: 10, .. }]
    ));
    assert!(engine.birds.get(inbound.id_typed()).unwrap().is_completed());
}

#[test]
fn update_revalidates_the_whole_draft() {
    let (engine, stores) = engine();
    let batch = house(&stores, "L-14", Stage::Rearing, 100, 10);
    let record = engine
        .birds
        .create(sale(&batch, at(5, 9), BirdCounts::females(10)))
        .unwrap();

    let too_many = MovementPatch {
        quantities: Some(BirdCounts::new(101, 11, 0)),
        ..MovementPatch::default()
    };
    let err = engine.birds.update(record.id_typed(), too_many).unwrap_err();
    assert_eq!(err.violations().len(), 2);

    let plant = PlantId::new();
    stores.farms.add_plant(plant, "Planta Beneficio").unwrap();
    let to_plant = MovementPatch {
        operation: Some(OperationKind::Transfer),
        destination: Some(Some(Destination::Plant { plant_id: plant })),
        notes: Some("rerouted".to_string()),
        ..MovementPatch::default()
    };
    let updated = engine.birds.update(record.id_typed(), to_plant).unwrap();
    assert_eq!(updated.draft().operation, OperationKind::Transfer);
    assert_eq!(updated.draft().notes.as_deref(), Some("rerouted"));
    assert_eq!(updated.draft().quantities, BirdCounts::females(10));

    engine
        .birds
        .process(record.id_typed(), ProcessOptions::default())
        .unwrap();
    let late = engine
        .birds
        .update(record.id_typed(), MovementPatch::default())
        .unwrap_err();
    assert!(matches!(late, LedgerError::StateConflict(_)));
}

#[test]
fn committed_transitions_are_published() {
    let (engine, stores) = engine();
    let batch = house(&stores, "L-15", Stage::Rearing, 100, 10);

    let bus = Arc::new(InMemoryEventBus::<EventEnvelope<MovementEvent<BirdCounts>>>::new());
    let subscription = bus.subscribe();
    let FlockLedger { birds, .. } = engine;
    let birds = birds.with_publisher(bus.clone());

    let record = birds
        .create(sale(&batch, at(5, 9), BirdCounts::females(10)))
        .unwrap();
    birds
        .process(record.id_typed(), ProcessOptions::default())
        .unwrap();
    birds
        .cancel(record.id_typed(), "test", at(6, 9))
        .unwrap();

    let envelopes = subscription.drain();
    let types: Vec<_> = envelopes.iter().map(|e| e.event_type().to_string()).collect();
    assert_eq!(
        types,
        vec!["movement.created", "movement.processed", "movement.cancelled"]
    );
    let sequence: Vec<_> = envelopes.iter().map(|e| e.sequence_number()).collect();
    assert_eq!(sequence, vec![1, 2, 3]);
    assert!(envelopes.iter().all(|e| e.stream_type() == "movement.birds"));
    assert!(envelopes
        .iter()
        .all(|e| e.stream_id() == *record.id_typed().as_uuid()));
    match envelopes[2].payload() {
        MovementEvent::Cancelled(c) => assert!(c.was_completed),
        other => panic!("unexpected payload {other:?}"),
    }
}

#[test]
fn unified_view_merges_birds_and_eggs_newest_first() {
    let (engine, stores) = engine();
    let batch = house(&stores, "L-16", Stage::Rearing, 500, 50);
    let other = house(&stores, "L-17", Stage::Rearing, 0, 0);
    stores
        .daily
        .upsert(DailyRecord::production(
            batch.id,
            day(1),
            ProductionEntry {
                eggs: EggCounts::of(EggGrade::Incubable, 300),
                ..ProductionEntry::default()
            },
        ))
        .unwrap();

    let birds_out = engine
        .birds
        .create(transfer(&batch, &other, at(2, 9), BirdCounts::females(40)))
        .unwrap();
    let eggs_out = engine
        .eggs
        .create(sale(&batch, at(3, 9), EggCounts::of(EggGrade::Incubable, 120)))
        .unwrap();

    let feed = engine.view.by_batch(batch.id, 10).unwrap();
    assert_eq!(feed.stage, Stage::Production);
    assert_eq!(feed.entries.len(), 2);

    let newest = &feed.entries[0];
    assert_eq!(newest.kind, MovementKind::Eggs);
    assert_eq!(newest.movement_id, eggs_out.id_typed());
    assert_eq!(newest.sequence, "MH-000001");
    assert_eq!(newest.total, 120);
    assert_eq!(newest.direction, Flow::Outgoing);
    assert_eq!(newest.source_farm_name.as_deref(), Some("Granja L-16"));
    assert!(matches!(newest.quantities, EntryQuantities::Eggs(_)));

    let oldest = &feed.entries[1];
    assert_eq!(oldest.movement_id, birds_out.id_typed());
    assert_eq!(oldest.destination_label.as_deref(), Some("L-17"));

    let seen_from_destination = engine.view.by_batch(other.id, 10).unwrap();
    assert_eq!(seen_from_destination.stage, Stage::Rearing);
    assert_eq!(seen_from_destination.entries[0].direction, Flow::Incoming);

    let capped = engine.view.by_batch(batch.id, 1).unwrap();
    assert_eq!(capped.entries.len(), 1);
    assert_eq!(capped.entries[0].kind, MovementKind::Eggs);
}

#[test]
fn snapshot_reports_both_families() {
    let (engine, stores) = engine();
    let batch = house(&stores, "L-18", Stage::Production, 200, 20);
    stores
        .daily
        .upsert(DailyRecord::production(
            batch.id,
            day(1),
            ProductionEntry {
                mortality_females: 2,
                eggs: EggCounts::of(EggGrade::Clean, 90).with(EggGrade::Broken, 4),
                ..ProductionEntry::default()
            },
        ))
        .unwrap();

    let snapshot = engine.aggregator.snapshot(batch.id, None).unwrap();
    assert_eq!(snapshot.stage, Stage::Production);
    assert_eq!(snapshot.total_birds(), 218);
    assert_eq!(snapshot.total_eggs(), 94);
}

/// Bird store whose writes fail after the first insert.
struct FlakyStore {
    inner: flockledger_infra::store::InMemoryMovementStore<BirdCounts>,
}

impl MovementStore<BirdCounts> for FlakyStore {
    fn next_sequence(&self) -> Result<u64, StoreError> {
        self.inner.next_sequence()
    }

    fn insert(&self, record: MovementRecord<BirdCounts>) -> Result<(), StoreError> {
        self.inner.insert(record)
    }

    fn get(&self, id: MovementId) -> Result<Option<MovementRecord<BirdCounts>>, StoreError> {
        self.inner.get(id)
    }

    fn replace(
        &self,
        _record: MovementRecord<BirdCounts>,
        _expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("disk full".to_string()))
    }

    fn list_by_batch(
        &self,
        batch_id: BatchId,
    ) -> Result<Vec<MovementRecord<BirdCounts>>, StoreError> {
        self.inner.list_by_batch(batch_id)
    }
}

#[test]
fn storage_failures_surface_and_nothing_is_committed() {
    common::init_logging();
    let handles = flockledger_infra::InMemoryStores::default();
    let mut stores = handles.stores();
    stores.bird_movements = Arc::new(FlakyStore {
        inner: Default::default(),
    });
    let engine = FlockLedger::bootstrap(&Settings::default(), stores);
    let batch = house(&handles, "L-19", Stage::Rearing, 10, 0);

    let record = engine
        .birds
        .create(sale(&batch, at(2, 9), BirdCounts::females(5)))
        .unwrap();
    let err = engine
        .birds
        .process(record.id_typed(), ProcessOptions::default())
        .unwrap_err();
    assert_eq!(
        err,
        LedgerError::Storage(StoreError::Unavailable("disk full".to_string()))
    );
    assert!(engine.birds.get(record.id_typed()).unwrap().is_pending());
    assert_eq!(
        engine
            .aggregator
            .current_balance(batch.id, None)
            .unwrap()
            .get(BirdCategory::Female),
        10
    );
}

#[test]
fn failed_commit_provisions_no_destination_inventory() {
    common::init_logging();
    let handles = flockledger_infra::InMemoryStores::default();
    let mut stores = handles.stores();
    stores.bird_movements = Arc::new(FlakyStore {
        inner: Default::default(),
    });
    let engine = FlockLedger::bootstrap(&Settings::default(), stores);
    let from = house(&handles, "L-21", Stage::Rearing, 50, 0);
    let to = house(&handles, "L-22", Stage::Rearing, 0, 0);

    let record = engine
        .birds
        .create(transfer(&from, &to, at(2, 9), BirdCounts::females(20)))
        .unwrap();
    let err = engine
        .birds
        .process(record.id_typed(), ProcessOptions::default())
        .unwrap_err();
    assert!(matches!(err, LedgerError::Storage(_)), "{err:?}");
    assert!(engine.birds.get(record.id_typed()).unwrap().is_pending());
    assert!(handles.contexts.get(to.id).unwrap().is_none());
}

#[test]
fn back_dated_sale_cannot_spend_birds_that_arrive_later() {
    let (engine, stores) = engine();
    let from = house(&stores, "L-23", Stage::Rearing, 100, 0);
    let to = house(&stores, "L-24", Stage::Rearing, 0, 0);

    let inbound = engine
        .birds
        .create(transfer(&from, &to, at(10, 9), BirdCounts::females(100)))
        .unwrap();
    engine
        .birds
        .process(inbound.id_typed(), ProcessOptions::default())
        .unwrap();

    let err = engine
        .birds
        .create(sale(&to, at(2, 9), BirdCounts::females(100)))
        .unwrap_err();
    assert_eq!(
        err.violations(),
        &[Violation::InsufficientAvailability {
            category: "female".to_string(),
            requested: 100,
            available: 0,
        }]
    );

    let on_time = engine
        .birds
        .create(sale(&to, at(11, 9), BirdCounts::females(100)))
        .unwrap();
    engine
        .birds
        .process(on_time.id_typed(), ProcessOptions::default())
        .unwrap();
    let balance = engine.aggregator.current_balance(to.id, None).unwrap();
    assert_eq!(balance.get(BirdCategory::Female), 0);
    assert!(balance.is_consistent());
}

#[test]
fn back_dated_sale_cannot_undercut_a_later_sale() {
    let (engine, stores) = engine();
    let batch = house(&stores, "L-25", Stage::Rearing, 100, 0);

    let later = engine
        .birds
        .create(sale(&batch, at(10, 9), BirdCounts::females(80)))
        .unwrap();
    engine
        .birds
        .process(later.id_typed(), ProcessOptions::default())
        .unwrap();

    let err = engine
        .birds
        .create(sale(&batch, at(5, 9), BirdCounts::females(30)))
        .unwrap_err();
    assert!(matches!(
        err.violations(),
        [Violation::InsufficientAvailability { requested: 30, available: 20, .. }]
    ));
}

#[test]
fn cached_egg_balance_follows_process_and_cancel() {
    common::init_logging();
    let mut settings = Settings::default();
    settings.cache.enabled = true;
    let (engine, stores) = FlockLedger::in_memory(&settings);
    let batch = house(&stores, "L-26", Stage::Production, 100, 10);
    stores
        .daily
        .upsert(DailyRecord::production(
            batch.id,
            day(1),
            ProductionEntry {
                eggs: EggCounts::of(EggGrade::Clean, 150),
                ..ProductionEntry::default()
            },
        ))
        .unwrap();

    let clean = |engine: &FlockLedger| {
        engine
            .aggregator
            .current_egg_balance(batch.id, None)
            .unwrap()
            .get(EggGrade::Clean)
    };
    assert_eq!(clean(&engine), 150);

    let record = engine
        .eggs
        .create(sale(&batch, at(2, 9), EggCounts::of(EggGrade::Clean, 100)))
        .unwrap();
    assert_eq!(clean(&engine), 150);

    engine
        .eggs
        .process(record.id_typed(), ProcessOptions::default())
        .unwrap();
    assert_eq!(clean(&engine), 50);

    engine
        .eggs
        .cancel(record.id_typed(), "returned by the plant", at(3, 9))
        .unwrap();
    assert_eq!(clean(&engine), 150);
}

#[test]
fn settings_drive_sequence_numbers() {
    common::init_logging();
    let settings = Settings::from_toml(
        r#"
        [sequence]
        bird_prefix = "TA"
        width = 3
        "#,
    )
    .unwrap();
    assert_eq!(settings.log, LogSettings::default());
    let (engine, stores) = FlockLedger::in_memory(&settings);
    let batch = house(&stores, "L-20", Stage::Rearing, 10, 0);

    let record = engine
        .birds
        .create(sale(&batch, at(2, 9), BirdCounts::females(1)))
        .unwrap();
    assert_eq!(record.sequence(), "TA-001");
}
