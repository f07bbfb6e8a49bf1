use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use flockledger_core::{BatchId, DomainError, DomainResult, FarmId, PlantId, UserId};
use flockledger_flock::Quantities;

/// Sale or transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Birds or eggs leave the company; no destination.
    Sale,
    /// Birds or eggs go to exactly one destination.
    Transfer,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Sale => "sale",
            OperationKind::Transfer => "transfer",
        }
    }
}

/// Where a movement draws from. Both parts are required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub batch_id: BatchId,
    pub farm_id: FarmId,
}

/// Where a transfer goes. The variants are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Destination {
    Batch { batch_id: BatchId },
    Farm { farm_id: FarmId },
    Plant { plant_id: PlantId },
}

impl Destination {
    pub fn batch_id(&self) -> Option<BatchId> {
        match self {
            Destination::Batch { batch_id } => Some(*batch_id),
            _ => None,
        }
    }
}

/// Everything a caller supplies when proposing a movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementDraft<Q> {
    pub operation: OperationKind,
    pub occurred_at: DateTime<Utc>,
    pub source: Source,
    #[serde(default)]
    pub destination: Option<Destination>,
    pub quantities: Q,
    pub responsible: UserId,
    #[serde(default)]
    pub motive: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl<Q: Quantities> MovementDraft<Q> {
    /// Shape rules that need no stored state.
    ///
    /// Availability and destination resolution are checked by the infra validator,
    /// which reports every problem at once; this only guards the aggregate.
    pub fn check_shape(&self) -> DomainResult<()> {
        if self.quantities.is_empty() {
            return Err(DomainError::validation("at least one quantity must be positive"));
        }
        match (self.operation, &self.destination) {
            (OperationKind::Sale, Some(_)) => {
                Err(DomainError::validation("a sale cannot carry a destination"))
            }
            (OperationKind::Transfer, None) => {
                Err(DomainError::validation("a transfer requires a destination"))
            }
            _ => Ok(()),
        }
    }

    /// The destination batch, when the movement feeds another batch.
    pub fn destination_batch(&self) -> Option<BatchId> {
        self.destination.as_ref().and_then(Destination::batch_id)
    }

    /// Batches whose derived balance this movement changes once completed.
    pub fn affected_batches(&self) -> Vec<BatchId> {
        let mut batches = vec![self.source.batch_id];
        if let Some(dest) = self.destination_batch() {
            if dest != self.source.batch_id {
                batches.push(dest);
            }
        }
        batches
    }
}

/// A partial replacement for a pending movement's draft.
///
/// `destination: Some(None)` clears the destination (e.g. when turning a transfer
/// into a sale).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementPatch<Q> {
    #[serde(default)]
    pub operation: Option<OperationKind>,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source: Option<Source>,
    #[serde(default)]
    pub destination: Option<Option<Destination>>,
    #[serde(default)]
    pub quantities: Option<Q>,
    #[serde(default)]
    pub motive: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl<Q> Default for MovementPatch<Q> {
    fn default() -> Self {
        Self {
            operation: None,
            occurred_at: None,
            source: None,
            destination: None,
            quantities: None,
            motive: None,
            description: None,
            notes: None,
        }
    }
}

impl<Q: Clone> MovementPatch<Q> {
    /// Produce the full draft that results from applying this patch.
    pub fn apply_to(&self, draft: &MovementDraft<Q>) -> MovementDraft<Q> {
        let mut next = draft.clone();
        if let Some(operation) = self.operation {
            next.operation = operation;
        }
        if let Some(occurred_at) = self.occurred_at {
            next.occurred_at = occurred_at;
        }
        if let Some(source) = self.source {
            next.source = source;
        }
        if let Some(destination) = self.destination {
            next.destination = destination;
        }
        if let Some(quantities) = &self.quantities {
            next.quantities = quantities.clone();
        }
        if let Some(motive) = &self.motive {
            next.motive = Some(motive.clone());
        }
        if let Some(description) = &self.description {
            next.description = Some(description.clone());
        }
        if let Some(notes) = &self.notes {
            next.notes = Some(notes.clone());
        }
        next
    }
}
