//! Infrastructure layer: stores, derived inventory, validation, ledgers and wiring.
//!
//! ```text
//! DailyRecordStore ─┐
//! BatchRegistry ────┼─▶ InventoryAggregator ─▶ AvailabilityValidator ─▶ MovementLedger<Q>
//! MovementStore<Q> ─┘            │                                          │
//!                                └──────────── UnifiedMovementView ◀────────┘
//! ```

pub mod aggregator;
pub mod config;
pub mod engine;
pub mod ledger;
pub mod locks;
pub mod store;
pub mod validator;
pub mod view;

pub use aggregator::{BalanceSnapshot, BalanceSource, InventoryAggregator, InventoryError};
pub use config::Settings;
pub use engine::{FlockLedger, InMemoryStores, Stores};
pub use ledger::{
    BirdMovementLedger, EggMovementLedger, LedgerError, LedgerParts, MovementLedger,
    MovementPublisher, ProcessOptions,
};
pub use locks::{BatchGuard, BatchLocks, LockError};
pub use store::StoreError;
pub use validator::{AvailabilityValidator, ValidationErrors, ValidationReport, Violation};
pub use view::{BatchFeed, EntryQuantities, UnifiedEntry, UnifiedMovementView};
