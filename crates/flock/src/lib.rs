//! Flock domain module: batches, daily tracking records and inventory quantities.
//!
//! This crate contains the business rules for deriving a batch's bird and egg
//! inventory, implemented purely as deterministic domain logic (no IO, no storage).
//! The infra layer loads records and hands them to [`fold::fold_balance`].

pub mod batch;
pub mod daily;
pub mod fold;
pub mod quantities;
pub mod stage;

pub use batch::{Batch, Location};
pub use daily::{DailyEntry, DailyRecord, DateRange, ProductionEntry, RearingEntry};
pub use fold::{Balance, Flow, IntegrityWarning, MovementFlow, fold_balance, lowest_balance_from};
pub use quantities::{
    BirdCategory, BirdCounts, EggCounts, EggGrade, MovementKind, Quantities, StageConflict,
};
pub use stage::Stage;
