use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use flockledger_core::{
    Aggregate, AggregateRoot, BatchId, DomainError, DomainResult, MovementId, UserId,
};
use flockledger_events::Event;
use flockledger_flock::{BirdCounts, EggCounts, Flow, MovementFlow, MovementKind, Quantities};

use crate::draft::{MovementDraft, MovementPatch};

/// Movement lifecycle.
///
/// ```text
/// Pending ──process──▶ Completed
///    │                     │
///    └──cancel──▶ Cancelled ◀──cancel (reversal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementState {
    Pending,
    Completed,
    Cancelled,
}

impl MovementState {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementState::Pending => "pending",
            MovementState::Completed => "completed",
            MovementState::Cancelled => "cancelled",
        }
    }
}

impl core::fmt::Display for MovementState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate root: a bird or egg movement (traslado).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(deserialize = "Q: Quantities"))]
pub struct MovementRecord<Q> {
    id: MovementId,
    kind: MovementKind,
    sequence: String,
    #[serde(flatten)]
    draft: MovementDraft<Q>,
    state: MovementState,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    processed_by: Option<UserId>,
    cancelled_at: Option<DateTime<Utc>>,
    cancellation_reason: Option<String>,
    version: u64,
}

pub type BirdMovement = MovementRecord<BirdCounts>;
pub type EggMovement = MovementRecord<EggCounts>;

impl<Q: Quantities> MovementRecord<Q> {
    /// Open a new pending movement.
    ///
    /// Returns the record at version 1 together with the event describing it.
    pub fn create(
        id: MovementId,
        sequence: impl Into<String>,
        draft: MovementDraft<Q>,
        created_at: DateTime<Utc>,
    ) -> DomainResult<(Self, MovementEvent<Q>)> {
        let sequence = sequence.into();
        if sequence.trim().is_empty() {
            return Err(DomainError::validation("sequence cannot be empty"));
        }
        draft.check_shape()?;

        let mut record = Self {
            id,
            kind: Q::KIND,
            sequence: String::new(),
            draft: draft.clone(),
            state: MovementState::Pending,
            created_at,
            processed_at: None,
            processed_by: None,
            cancelled_at: None,
            cancellation_reason: None,
            version: 0,
        };

        let event = MovementEvent::Created(MovementCreated {
            movement_id: id,
            kind: Q::KIND,
            sequence,
            draft,
            occurred_at: created_at,
        });
        record.apply(&event);
        Ok((record, event))
    }

    pub fn id_typed(&self) -> MovementId {
        self.id
    }

    pub fn kind(&self) -> MovementKind {
        self.kind
    }

    pub fn sequence(&self) -> &str {
        &self.sequence
    }

    pub fn draft(&self) -> &MovementDraft<Q> {
        &self.draft
    }

    pub fn quantities(&self) -> &Q {
        &self.draft.quantities
    }

    pub fn state(&self) -> MovementState {
        self.state
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.draft.occurred_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        self.processed_at
    }

    pub fn processed_by(&self) -> Option<UserId> {
        self.processed_by
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.cancelled_at
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn is_pending(&self) -> bool {
        self.state == MovementState::Pending
    }

    pub fn is_completed(&self) -> bool {
        self.state == MovementState::Completed
    }

    /// Whether `batch_id` is the source or the destination batch.
    pub fn touches(&self, batch_id: BatchId) -> bool {
        self.draft.source.batch_id == batch_id || self.draft.destination_batch() == Some(batch_id)
    }

    /// Direction of this movement as seen from `batch_id`, if it touches it.
    pub fn flow_for(&self, batch_id: BatchId) -> Option<Flow> {
        if self.draft.source.batch_id == batch_id {
            Some(Flow::Outgoing)
        } else if self.draft.destination_batch() == Some(batch_id) {
            Some(Flow::Incoming)
        } else {
            None
        }
    }

    /// The committed effect of this movement on `batch_id`.
    ///
    /// Only completed movements have one; pending and cancelled records contribute
    /// nothing to any balance.
    pub fn committed_flow(&self, batch_id: BatchId) -> Option<MovementFlow<'_, Q>> {
        if !self.is_completed() {
            return None;
        }
        self.flow_for(batch_id).map(|flow| MovementFlow {
            flow,
            occurred_at: self.draft.occurred_at,
            quantities: &self.draft.quantities,
        })
    }
}

impl<Q> AggregateRoot for MovementRecord<Q> {
    type Id = MovementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: UpdateMovement (pending only; the patched draft replaces the old one).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(deserialize = "Q: Quantities"))]
pub struct UpdateMovement<Q> {
    pub patch: MovementPatch<Q>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ProcessMovement (pending → completed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessMovement {
    pub processed_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelMovement (pending or completed → cancelled).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelMovement {
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(deserialize = "Q: Quantities"))]
pub enum MovementCommand<Q> {
    Update(UpdateMovement<Q>),
    Process(ProcessMovement),
    Cancel(CancelMovement),
}

/// Event: MovementCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementCreated<Q> {
    pub movement_id: MovementId,
    pub kind: MovementKind,
    pub sequence: String,
    pub draft: MovementDraft<Q>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MovementUpdated. Carries the full replacement draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementUpdated<Q> {
    pub movement_id: MovementId,
    pub draft: MovementDraft<Q>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MovementProcessed. From here on the movement counts in balances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementProcessed<Q> {
    pub movement_id: MovementId,
    pub source_batch: BatchId,
    pub destination_batch: Option<BatchId>,
    pub quantities: Q,
    pub processed_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MovementCancelled.
///
/// When `was_completed` is set, the movement's effect disappears from every fold
/// that runs afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementCancelled {
    pub movement_id: MovementId,
    pub was_completed: bool,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementEvent<Q> {
    Created(MovementCreated<Q>),
    Updated(MovementUpdated<Q>),
    Processed(MovementProcessed<Q>),
    Cancelled(MovementCancelled),
}

impl<Q> MovementEvent<Q> {
    pub fn movement_id(&self) -> MovementId {
        match self {
            MovementEvent::Created(e) => e.movement_id,
            MovementEvent::Updated(e) => e.movement_id,
            MovementEvent::Processed(e) => e.movement_id,
            MovementEvent::Cancelled(e) => e.movement_id,
        }
    }
}

impl<Q: Quantities> Event for MovementEvent<Q> {
    fn event_type(&self) -> &'static str {
        match self {
            MovementEvent::Created(_) => "movement.created",
            MovementEvent::Updated(_) => "movement.updated",
            MovementEvent::Processed(_) => "movement.processed",
            MovementEvent::Cancelled(_) => "movement.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            MovementEvent::Created(e) => e.occurred_at,
            MovementEvent::Updated(e) => e.occurred_at,
            MovementEvent::Processed(e) => e.occurred_at,
            MovementEvent::Cancelled(e) => e.occurred_at,
        }
    }
}

impl<Q: Quantities> Aggregate for MovementRecord<Q> {
    type Command = MovementCommand<Q>;
    type Event = MovementEvent<Q>;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            MovementEvent::Created(e) => {
                self.id = e.movement_id;
                self.kind = e.kind;
                self.sequence = e.sequence.clone();
                self.draft = e.draft.clone();
                self.state = MovementState::Pending;
                self.created_at = e.occurred_at;
            }
            MovementEvent::Updated(e) => {
                self.draft = e.draft.clone();
            }
            MovementEvent::Processed(e) => {
                self.state = MovementState::Completed;
                self.processed_at = Some(e.occurred_at);
                self.processed_by = e.processed_by;
            }
            MovementEvent::Cancelled(e) => {
                self.state = MovementState::Cancelled;
                self.cancelled_at = Some(e.occurred_at);
                self.cancellation_reason = Some(e.reason.clone());
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            MovementCommand::Update(cmd) => self.handle_update(cmd),
            MovementCommand::Process(cmd) => self.handle_process(cmd),
            MovementCommand::Cancel(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl<Q: Quantities> MovementRecord<Q> {
    fn ensure_pending(&self, action: &str) -> Result<(), DomainError> {
        if self.state != MovementState::Pending {
            return Err(DomainError::conflict(format!(
                "cannot {action} movement {}: it is {}, expected pending",
                self.sequence, self.state
            )));
        }
        Ok(())
    }

    fn handle_update(&self, cmd: &UpdateMovement<Q>) -> Result<Vec<MovementEvent<Q>>, DomainError> {
        self.ensure_pending("update")?;

        let draft = cmd.patch.apply_to(&self.draft);
        draft.check_shape()?;

        Ok(vec![MovementEvent::Updated(MovementUpdated {
            movement_id: self.id,
            draft,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_process(&self, cmd: &ProcessMovement) -> Result<Vec<MovementEvent<Q>>, DomainError> {
        self.ensure_pending("process")?;

        Ok(vec![MovementEvent::Processed(MovementProcessed {
            movement_id: self.id,
            source_batch: self.draft.source.batch_id,
            destination_batch: self.draft.destination_batch(),
            quantities: self.draft.quantities.clone(),
            processed_by: cmd.processed_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelMovement) -> Result<Vec<MovementEvent<Q>>, DomainError> {
        if self.state == MovementState::Cancelled {
            return Err(DomainError::conflict(format!(
                "cannot cancel movement {}: it is already cancelled",
                self.sequence
            )));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("cancellation reason cannot be empty"));
        }

        Ok(vec![MovementEvent::Cancelled(MovementCancelled {
            movement_id: self.id,
            was_completed: self.state == MovementState::Completed,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
