//! Wiring: one aggregator, one validator, both ledgers and the view over shared
//! stores and a shared batch lock table.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use flockledger_flock::{BirdCounts, EggCounts};

use crate::aggregator::InventoryAggregator;
use crate::config::Settings;
use crate::ledger::{BirdMovementLedger, EggMovementLedger, LedgerParts, MovementLedger};
use crate::locks::BatchLocks;
use crate::store::{
    BatchRegistry, DailyRecordStore, FarmDirectory, InMemoryBatchRegistry,
    InMemoryDailyRecordStore, InMemoryFarmDirectory, InMemoryInventoryContexts,
    InMemoryMovementStore, InventoryContextStore, MovementStore,
};
use crate::validator::AvailabilityValidator;
use crate::view::UnifiedMovementView;

/// Storage backends the engine runs on.
#[derive(Clone)]
pub struct Stores {
    pub batches: Arc<dyn BatchRegistry>,
    pub daily: Arc<dyn DailyRecordStore>,
    pub farms: Arc<dyn FarmDirectory>,
    pub contexts: Arc<dyn InventoryContextStore>,
    pub bird_movements: Arc<dyn MovementStore<BirdCounts>>,
    pub egg_movements: Arc<dyn MovementStore<EggCounts>>,
}

/// Concrete handles to in-memory stores, for seeding master data in tests and
/// local runs.
#[derive(Clone, Default)]
pub struct InMemoryStores {
    pub batches: Arc<InMemoryBatchRegistry>,
    pub daily: Arc<InMemoryDailyRecordStore>,
    pub farms: Arc<InMemoryFarmDirectory>,
    pub contexts: Arc<InMemoryInventoryContexts>,
    pub bird_movements: Arc<InMemoryMovementStore<BirdCounts>>,
    pub egg_movements: Arc<InMemoryMovementStore<EggCounts>>,
}

impl InMemoryStores {
    pub fn stores(&self) -> Stores {
        Stores {
            batches: self.batches.clone(),
            daily: self.daily.clone(),
            farms: self.farms.clone(),
            contexts: self.contexts.clone(),
            bird_movements: self.bird_movements.clone(),
            egg_movements: self.egg_movements.clone(),
        }
    }
}

pub struct FlockLedger {
    pub aggregator: Arc<InventoryAggregator>,
    pub validator: Arc<AvailabilityValidator>,
    pub birds: BirdMovementLedger,
    pub eggs: EggMovementLedger,
    pub view: UnifiedMovementView,
}

impl FlockLedger {
    pub fn bootstrap(settings: &Settings, stores: Stores) -> Self {
        let aggregator = Arc::new(InventoryAggregator::new(
            stores.batches.clone(),
            stores.daily.clone(),
            stores.bird_movements.clone(),
            stores.egg_movements.clone(),
            &settings.cache,
        ));
        let validator = Arc::new(AvailabilityValidator::new(
            aggregator.clone(),
            stores.farms.clone(),
        ));
        let locks = Arc::new(BatchLocks::new(settings.locking.timeout()));

        let birds = MovementLedger::new(LedgerParts {
            store: stores.bird_movements.clone(),
            validator: validator.clone(),
            aggregator: aggregator.clone(),
            contexts: stores.contexts.clone(),
            locks: locks.clone(),
            sequence: settings.sequence.clone(),
            sequence_prefix: settings.sequence.bird_prefix.clone(),
            auto_create_destination_inventory: settings.ledger.auto_create_destination_inventory,
        });
        let eggs = MovementLedger::new(LedgerParts {
            store: stores.egg_movements.clone(),
            validator: validator.clone(),
            aggregator: aggregator.clone(),
            contexts: stores.contexts.clone(),
            locks,
            sequence: settings.sequence.clone(),
            sequence_prefix: settings.sequence.egg_prefix.clone(),
            auto_create_destination_inventory: settings.ledger.auto_create_destination_inventory,
        });

        let view = UnifiedMovementView::new(
            aggregator.clone(),
            stores.daily,
            stores.farms,
            stores.bird_movements,
            stores.egg_movements,
        );

        info!(
            cache_enabled = settings.cache.enabled,
            lock_timeout_ms = settings.locking.timeout_ms,
            "flock ledger ready"
        );

        Self {
            aggregator,
            validator,
            birds,
            eggs,
            view,
        }
    }

    /// Wire the engine over fresh in-memory stores and hand back their handles.
    pub fn in_memory(settings: &Settings) -> (Self, InMemoryStores) {
        let handles = InMemoryStores::default();
        (Self::bootstrap(settings, handles.stores()), handles)
    }

    /// Load settings from file and environment, set up logging, and wire the
    /// engine over in-memory stores.
    pub fn from_env() -> anyhow::Result<(Self, InMemoryStores)> {
        let settings = Settings::load().context("failed to load flockledger settings")?;
        flockledger_observability::init_with(&settings.log);
        Ok(Self::in_memory(&settings))
    }
}
