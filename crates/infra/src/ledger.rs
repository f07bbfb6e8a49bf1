//! Movement ledgers: the write side of the engine.
//!
//! One generic [`MovementLedger`] drives the movement state machine for any quantity
//! family; [`BirdMovementLedger`] and [`EggMovementLedger`] are its instantiations.
//!
//! ```text
//! load → lock affected batches → reload → handle (state check)
//!      → re-validate → apply → replace (expected version) → invalidate
//!      → provision destination → unlock → publish
//! ```
//!
//! Every step that changes a balance (`process`, `cancel`) runs while holding the
//! locks of all batches the movement touches, so two commits drawing from the same
//! batch never validate against the same snapshot.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use flockledger_core::{
    Aggregate, AggregateRoot, BatchId, DomainError, ExpectedVersion, MovementId, UserId,
};
use flockledger_events::{EventBus, EventEnvelope};
use flockledger_flock::{BirdCounts, EggCounts, Quantities};
use flockledger_movements::{
    CancelMovement, MovementCommand, MovementDraft, MovementEvent, MovementPatch, MovementRecord,
    ProcessMovement, UpdateMovement,
};

use crate::aggregator::{BalanceSource, InventoryAggregator, InventoryError};
use crate::config::SequenceSettings;
use crate::locks::{BatchGuard, BatchLocks, LockError};
use crate::store::{InventoryContext, InventoryContextStore, MovementStore, StoreError};
use crate::validator::{AvailabilityValidator, ValidationErrors, Violation};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The draft breaks one or more rules. Recoverable by fixing the input.
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    /// The record is in the wrong state, or changed underneath the caller.
    #[error("state conflict: {0}")]
    StateConflict(String),

    #[error("movement {0} not found")]
    NotFound(MovementId),

    /// Another write held the batches for longer than the lock timeout.
    #[error("batches {batches:?} are busy, retry later")]
    Busy { batches: Vec<BatchId> },

    #[error(transparent)]
    Storage(StoreError),

    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl LedgerError {
    /// Violations carried by a validation failure.
    pub fn violations(&self) -> &[Violation] {
        match self {
            LedgerError::Validation(errors) => errors.violations(),
            _ => &[],
        }
    }
}

impl From<ValidationErrors> for LedgerError {
    fn from(value: ValidationErrors) -> Self {
        LedgerError::Validation(value)
    }
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Concurrency(msg) => LedgerError::StateConflict(msg),
            other => LedgerError::Storage(other),
        }
    }
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(message) | DomainError::InvalidId(message) => {
                LedgerError::Validation(ValidationErrors(vec![Violation::Malformed { message }]))
            }
            DomainError::Conflict(msg) => LedgerError::StateConflict(msg),
        }
    }
}

impl From<LockError> for LedgerError {
    fn from(value: LockError) -> Self {
        match value {
            LockError::Timeout { batches, .. } => LedgerError::Busy { batches },
            LockError::Poisoned => LedgerError::Storage(StoreError::Poisoned),
        }
    }
}

impl From<InventoryError> for LedgerError {
    fn from(value: InventoryError) -> Self {
        match value {
            InventoryError::UnknownBatch(id) => {
                LedgerError::Invariant(format!("batch {id} disappeared during a commit"))
            }
            InventoryError::Storage(e) => LedgerError::Storage(e),
        }
    }
}

/// Options for [`MovementLedger::process`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOptions {
    #[serde(default)]
    pub processed_by: Option<UserId>,
    /// Defaults to now.
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    /// Provision an inventory context for a destination batch that lacks one.
    /// Defaults to `ledger.auto_create_destination_inventory`.
    #[serde(default)]
    pub auto_create_destination_inventory: Option<bool>,
}

/// Where committed movement events go.
pub trait MovementPublisher<Q>: Send + Sync {
    fn publish_event(&self, envelope: EventEnvelope<MovementEvent<Q>>) -> Result<(), String>;
}

impl<Q, B> MovementPublisher<Q> for B
where
    B: EventBus<EventEnvelope<MovementEvent<Q>>>,
{
    fn publish_event(&self, envelope: EventEnvelope<MovementEvent<Q>>) -> Result<(), String> {
        self.publish(envelope).map_err(|e| format!("{e:?}"))
    }
}

pub struct MovementLedger<Q: Quantities> {
    store: Arc<dyn MovementStore<Q>>,
    validator: Arc<AvailabilityValidator>,
    aggregator: Arc<InventoryAggregator>,
    contexts: Arc<dyn InventoryContextStore>,
    locks: Arc<BatchLocks>,
    sequence: SequenceSettings,
    sequence_prefix: String,
    auto_create_destination_inventory: bool,
    publisher: Option<Arc<dyn MovementPublisher<Q>>>,
}

pub type BirdMovementLedger = MovementLedger<BirdCounts>;
pub type EggMovementLedger = MovementLedger<EggCounts>;

/// Collaborators a ledger needs.
pub struct LedgerParts<Q: Quantities> {
    pub store: Arc<dyn MovementStore<Q>>,
    pub validator: Arc<AvailabilityValidator>,
    pub aggregator: Arc<InventoryAggregator>,
    pub contexts: Arc<dyn InventoryContextStore>,
    pub locks: Arc<BatchLocks>,
    pub sequence: SequenceSettings,
    /// `sequence.bird_prefix` or `sequence.egg_prefix`.
    pub sequence_prefix: String,
    pub auto_create_destination_inventory: bool,
}

impl<Q> MovementLedger<Q>
where
    Q: Quantities,
    InventoryAggregator: BalanceSource<Q>,
{
    pub fn new(parts: LedgerParts<Q>) -> Self {
        Self {
            store: parts.store,
            validator: parts.validator,
            aggregator: parts.aggregator,
            contexts: parts.contexts,
            locks: parts.locks,
            sequence: parts.sequence,
            sequence_prefix: parts.sequence_prefix,
            auto_create_destination_inventory: parts.auto_create_destination_inventory,
            publisher: None,
        }
    }

    /// Publish every committed transition on `publisher`.
    pub fn with_publisher(mut self, publisher: Arc<dyn MovementPublisher<Q>>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Validate `draft` and persist it as a pending movement.
    ///
    /// Pending movements do not affect any balance, so no batch lock is taken; the
    /// draft is validated again when it is processed.
    pub fn create(&self, draft: MovementDraft<Q>) -> Result<MovementRecord<Q>, LedgerError> {
        self.validator.validate(&draft)?.into_result()?;

        let n = self.store.next_sequence()?;
        let (record, event) =
            MovementRecord::create(MovementId::new(), self.sequence.format(&self.sequence_prefix, n), draft, Utc::now())?;
        self.store.insert(record.clone())?;

        info!(
            movement_id = %record.id_typed(),
            sequence = record.sequence(),
            batch_id = %record.draft().source.batch_id,
            kind = Q::KIND.as_str(),
            "movement created"
        );
        self.publish(&record, vec![event]);
        Ok(record)
    }

    /// Move a pending movement to `Completed`.
    ///
    /// Availability is checked again inside the critical section, so the stored
    /// balance can never be oversubscribed by concurrent commits.
    pub fn process(
        &self,
        id: MovementId,
        options: ProcessOptions,
    ) -> Result<MovementRecord<Q>, LedgerError> {
        let (guard, mut record) = self.lock_record(id, |r| r.draft().affected_batches())?;

        let processed_at = options.processed_at.unwrap_or_else(Utc::now);
        let events = record.handle(&MovementCommand::Process(ProcessMovement {
            processed_by: options.processed_by,
            occurred_at: processed_at,
        }))?;

        self.validator.validate(record.draft())?.into_result()?;

        let expected = ExpectedVersion::Exact(record.version());
        for event in &events {
            record.apply(event);
        }
        self.store.replace(record.clone(), expected)?;
        self.aggregator.invalidate(guard.batches());

        let auto_create = options
            .auto_create_destination_inventory
            .unwrap_or(self.auto_create_destination_inventory);
        if auto_create {
            // The movement is committed; a missing context is provisioned again on
            // the next transfer into the batch.
            if let Err(err) = self.provision_destination(&record, processed_at) {
                warn!(
                    movement_id = %record.id_typed(),
                    error = %err,
                    "inventory context provisioning failed"
                );
            }
        }
        drop(guard);

        info!(
            movement_id = %record.id_typed(),
            sequence = record.sequence(),
            batch_id = %record.draft().source.batch_id,
            kind = Q::KIND.as_str(),
            "movement processed"
        );
        self.publish(&record, events);
        Ok(record)
    }

    /// Replace fields of a pending movement. The whole patched draft is re-validated.
    pub fn update(
        &self,
        id: MovementId,
        patch: MovementPatch<Q>,
    ) -> Result<MovementRecord<Q>, LedgerError> {
        let (guard, mut record) = self.lock_record(id, |r| {
            let mut batches = r.draft().affected_batches();
            batches.extend(patch.apply_to(r.draft()).affected_batches());
            batches.sort();
            batches.dedup();
            batches
        })?;

        if record.is_pending() {
            let next = patch.apply_to(record.draft());
            self.validator.validate(&next)?.into_result()?;
        }
        let events = record.handle(&MovementCommand::Update(UpdateMovement {
            patch,
            occurred_at: Utc::now(),
        }))?;

        let expected = ExpectedVersion::Exact(record.version());
        for event in &events {
            record.apply(event);
        }
        self.store.replace(record.clone(), expected)?;
        drop(guard);

        info!(
            movement_id = %record.id_typed(),
            sequence = record.sequence(),
            batch_id = %record.draft().source.batch_id,
            kind = Q::KIND.as_str(),
            "movement updated"
        );
        self.publish(&record, events);
        Ok(record)
    }

    /// Cancel a pending or completed movement.
    ///
    /// A completed movement stays on file, marked cancelled, and stops contributing
    /// to every balance. Cancelling a transfer whose destination batch has already
    /// consumed the quantities is rejected.
    pub fn cancel(
        &self,
        id: MovementId,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<MovementRecord<Q>, LedgerError> {
        let (guard, mut record) = self.lock_record(id, |r| r.draft().affected_batches())?;

        let events = record.handle(&MovementCommand::Cancel(CancelMovement {
            reason: reason.into(),
            occurred_at: at,
        }))?;

        let was_completed = record.is_completed();
        if was_completed {
            let violations = self.validator.check_reversal(&record)?;
            if !violations.is_empty() {
                return Err(ValidationErrors(violations).into());
            }
        }

        let expected = ExpectedVersion::Exact(record.version());
        for event in &events {
            record.apply(event);
        }
        self.store.replace(record.clone(), expected)?;
        if was_completed {
            self.aggregator.invalidate(guard.batches());
        }
        drop(guard);

        info!(
            movement_id = %record.id_typed(),
            sequence = record.sequence(),
            batch_id = %record.draft().source.batch_id,
            kind = Q::KIND.as_str(),
            was_completed,
            "movement cancelled"
        );
        self.publish(&record, events);
        Ok(record)
    }

    pub fn get(&self, id: MovementId) -> Result<MovementRecord<Q>, LedgerError> {
        self.store.get(id)?.ok_or(LedgerError::NotFound(id))
    }

    /// Every movement touching `batch_id`, oldest first.
    pub fn list_by_batch(&self, batch_id: BatchId) -> Result<Vec<MovementRecord<Q>>, LedgerError> {
        Ok(self.store.list_by_batch(batch_id)?)
    }

    /// Load a record, lock the batches `batches_of` derives from it, and reload it
    /// under the lock. Fails if the record moved to other batches while waiting.
    fn lock_record<F>(
        &self,
        id: MovementId,
        batches_of: F,
    ) -> Result<(BatchGuard<'_>, MovementRecord<Q>), LedgerError>
    where
        F: Fn(&MovementRecord<Q>) -> Vec<BatchId>,
    {
        let record = self.get(id)?;
        let guard = self.locks.acquire(&batches_of(&record))?;

        let record = self.get(id)?;
        if !guard.covers(&batches_of(&record)) {
            return Err(LedgerError::StateConflict(format!(
                "movement {} changed while waiting for batch locks",
                record.sequence()
            )));
        }
        Ok((guard, record))
    }

    fn provision_destination(
        &self,
        record: &MovementRecord<Q>,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let Some(dest) = record.draft().destination_batch() else {
            return Ok(());
        };
        if self.contexts.get(dest)?.is_some() {
            return Ok(());
        }
        let batch = self.aggregator.batch(dest)?;
        let created = self.contexts.provision(InventoryContext {
            batch_id: dest,
            farm_id: batch.farm_id(),
            opened_at: at,
            opened_by: Some(record.id_typed()),
        })?;
        if created {
            info!(batch_id = %dest, movement_id = %record.id_typed(), "inventory context provisioned");
        }
        Ok(())
    }

    /// Publish after commit. The store is the source of truth, so a failed publish
    /// is logged and never undoes the transition.
    fn publish(&self, record: &MovementRecord<Q>, events: Vec<MovementEvent<Q>>) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        let stream_type = format!("movement.{}", Q::KIND.as_str());
        let first = record.version() + 1 - events.len() as u64;
        for (offset, event) in events.into_iter().enumerate() {
            let envelope = EventEnvelope::new(
                Uuid::now_v7(),
                *record.id_typed().as_uuid(),
                stream_type.clone(),
                first + offset as u64,
                event,
            );
            if let Err(error) = publisher.publish_event(envelope) {
                warn!(movement_id = %record.id_typed(), %error, "failed to publish movement event");
            }
        }
    }
}
