#![allow(dead_code)]

use std::sync::Once;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use flockledger_core::{BatchId, FarmId, UserId};
use flockledger_flock::{Batch, Location, Stage};
use flockledger_infra::{FlockLedger, InMemoryStores, Settings};
use flockledger_movements::{Destination, MovementDraft, OperationKind, Source};
use flockledger_observability::{LogFormat, LogSettings};

static LOGGING: Once = Once::new();

pub fn init_logging() {
    LOGGING.call_once(|| {
        flockledger_observability::init_with(&LogSettings {
            filter: "warn".to_string(),
            format: LogFormat::Pretty,
        });
    });
}

pub fn engine() -> (FlockLedger, InMemoryStores) {
    init_logging();
    FlockLedger::in_memory(&Settings::default())
}

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
}

pub fn at(d: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, d, hour, 0, 0).unwrap()
}

pub fn house(
    stores: &InMemoryStores,
    code: &str,
    stage: Stage,
    females: u64,
    males: u64,
) -> Batch {
    let farm_id = FarmId::new();
    stores
        .farms
        .add_farm(farm_id, format!("Granja {code}"))
        .unwrap();
    let batch = Batch {
        id: BatchId::new(),
        code: code.to_string(),
        location: Location {
            farm_id,
            nucleus: "N1".to_string(),
            shed: "G1".to_string(),
        },
        stage,
        initial_females: females,
        initial_males: males,
        initial_mixed: 0,
        encased_on: day(1),
    };
    stores.batches.insert(batch.clone()).unwrap();
    batch
}

pub fn sale<Q>(batch: &Batch, occurred_at: DateTime<Utc>, quantities: Q) -> MovementDraft<Q> {
    MovementDraft {
        operation: OperationKind::Sale,
        occurred_at,
        source: Source {
            batch_id: batch.id,
            farm_id: batch.farm_id(),
        },
        destination: None,
        quantities,
        responsible: UserId::new(),
        motive: Some("venta".to_string()),
        description: None,
        notes: None,
    }
}

pub fn transfer<Q>(
    batch: &Batch,
    to: &Batch,
    occurred_at: DateTime<Utc>,
    quantities: Q,
) -> MovementDraft<Q> {
    MovementDraft {
        operation: OperationKind::Transfer,
        destination: Some(Destination::Batch { batch_id: to.id }),
        ..sale(batch, occurred_at, quantities)
    }
}
