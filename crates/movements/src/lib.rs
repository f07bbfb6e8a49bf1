//! Movement domain module: sales and transfers of birds and eggs.
//!
//! One state machine, [`MovementRecord`], is generic over the quantity map it carries.
//! Bird and egg movements are its two instantiations. Everything here is deterministic
//! domain logic; availability checks and persistence live in the infra layer.

pub mod draft;
pub mod record;

pub use draft::{Destination, MovementDraft, MovementPatch, OperationKind, Source};
pub use record::{
    BirdMovement, CancelMovement, EggMovement, MovementCancelled, MovementCommand,
    MovementCreated, MovementEvent, MovementProcessed, MovementRecord, MovementState,
    MovementUpdated, ProcessMovement, UpdateMovement,
};
