//! Quantity maps carried by movements and produced by the balance fold.
//!
//! Birds are counted in three categories and eggs in twelve grades. Both shapes
//! implement [`Quantities`], which lets one ledger and one fold serve both.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use flockledger_core::ValueObject;

use crate::batch::Batch;
use crate::daily::DailyRecord;
use crate::stage::Stage;

/// What a movement carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementKind {
    Birds,
    Eggs,
}

impl MovementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementKind::Birds => "birds",
            MovementKind::Eggs => "eggs",
        }
    }
}

/// A stage rule broken by a requested quantity map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageConflict {
    /// Production batches move females and males in separate operations.
    FemalesAndMalesTogether,
    /// Production batches no longer hold unsexed birds.
    MixedInProduction,
}

impl core::fmt::Display for StageConflict {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            StageConflict::FemalesAndMalesTogether => {
                f.write_str("females and males cannot move together in production")
            }
            StageConflict::MixedInProduction => {
                f.write_str("mixed birds cannot move out of a production batch")
            }
        }
    }
}

/// A count as a signed delta. Counts beyond `i64::MAX` saturate.
pub fn signed(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

/// A non-negative count per category.
pub trait Quantities:
    ValueObject + Default + Eq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    type Category: Copy
        + Eq
        + Ord
        + core::hash::Hash
        + core::fmt::Debug
        + core::fmt::Display
        + Send
        + Sync
        + 'static;

    const KIND: MovementKind;

    /// Every category, in display order.
    fn categories() -> &'static [Self::Category];

    fn get(&self, category: Self::Category) -> u64;

    fn set(&mut self, category: Self::Category, value: u64);

    /// Counts a batch starts with before any record is applied.
    fn opening(batch: &Batch) -> Self;

    /// Signed per-category effect of one daily record on the balance.
    fn daily_effect(record: &DailyRecord) -> Vec<(Self::Category, i64)>;

    /// Stage rules the requested map breaks. Nothing by default.
    fn stage_conflicts(&self, _stage: Stage) -> Vec<StageConflict> {
        Vec::new()
    }

    fn is_empty(&self) -> bool {
        Self::categories().iter().all(|c| self.get(*c) == 0)
    }

    fn total(&self) -> u64 {
        Self::categories().iter().map(|c| self.get(*c)).sum()
    }

    /// Non-zero categories, in display order.
    fn non_zero(&self) -> Vec<(Self::Category, u64)> {
        Self::categories()
            .iter()
            .map(|c| (*c, self.get(*c)))
            .filter(|(_, q)| *q > 0)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Birds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BirdCategory {
    Female,
    Male,
    Mixed,
}

impl core::fmt::Display for BirdCategory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            BirdCategory::Female => "female",
            BirdCategory::Male => "male",
            BirdCategory::Mixed => "mixed",
        })
    }
}

/// Birds per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BirdCounts {
    pub females: u64,
    pub males: u64,
    #[serde(default)]
    pub mixed: u64,
}

impl BirdCounts {
    pub fn new(females: u64, males: u64, mixed: u64) -> Self {
        Self {
            females,
            males,
            mixed,
        }
    }

    pub fn females(females: u64) -> Self {
        Self::new(females, 0, 0)
    }

    pub fn males(males: u64) -> Self {
        Self::new(0, males, 0)
    }
}

impl ValueObject for BirdCounts {}

impl Quantities for BirdCounts {
    type Category = BirdCategory;

    const KIND: MovementKind = MovementKind::Birds;

    fn categories() -> &'static [BirdCategory] {
        &[BirdCategory::Female, BirdCategory::Male, BirdCategory::Mixed]
    }

    fn get(&self, category: BirdCategory) -> u64 {
        match category {
            BirdCategory::Female => self.females,
            BirdCategory::Male => self.males,
            BirdCategory::Mixed => self.mixed,
        }
    }

    fn set(&mut self, category: BirdCategory, value: u64) {
        match category {
            BirdCategory::Female => self.females = value,
            BirdCategory::Male => self.males = value,
            BirdCategory::Mixed => self.mixed = value,
        }
    }

    fn opening(batch: &Batch) -> Self {
        Self::new(batch.initial_females, batch.initial_males, batch.initial_mixed)
    }

    fn daily_effect(record: &DailyRecord) -> Vec<(BirdCategory, i64)> {
        vec![
            (BirdCategory::Female, signed(record.female_losses()).saturating_neg()),
            (BirdCategory::Male, signed(record.male_losses()).saturating_neg()),
        ]
    }

    fn stage_conflicts(&self, stage: Stage) -> Vec<StageConflict> {
        if stage != Stage::Production {
            return Vec::new();
        }
        let mut conflicts = Vec::new();
        if self.females > 0 && self.males > 0 {
            conflicts.push(StageConflict::FemalesAndMalesTogether);
        }
        if self.mixed > 0 {
            conflicts.push(StageConflict::MixedInProduction);
        }
        conflicts
    }
}

// ---------------------------------------------------------------------------
// Eggs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EggGrade {
    Incubable,
    Clean,
    Treated,
    Dirty,
    Deformed,
    White,
    DoubleYolk,
    Floor,
    Small,
    Broken,
    Discard,
    Other,
}

impl EggGrade {
    pub const ALL: [EggGrade; 12] = [
        EggGrade::Incubable,
        EggGrade::Clean,
        EggGrade::Treated,
        EggGrade::Dirty,
        EggGrade::Deformed,
        EggGrade::White,
        EggGrade::DoubleYolk,
        EggGrade::Floor,
        EggGrade::Small,
        EggGrade::Broken,
        EggGrade::Discard,
        EggGrade::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EggGrade::Incubable => "incubable",
            EggGrade::Clean => "clean",
            EggGrade::Treated => "treated",
            EggGrade::Dirty => "dirty",
            EggGrade::Deformed => "deformed",
            EggGrade::White => "white",
            EggGrade::DoubleYolk => "double_yolk",
            EggGrade::Floor => "floor",
            EggGrade::Small => "small",
            EggGrade::Broken => "broken",
            EggGrade::Discard => "discard",
            EggGrade::Other => "other",
        }
    }
}

impl core::fmt::Display for EggGrade {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Eggs per grade. Every grade is an independent counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EggCounts {
    pub incubable: u64,
    pub clean: u64,
    pub treated: u64,
    pub dirty: u64,
    pub deformed: u64,
    pub white: u64,
    pub double_yolk: u64,
    pub floor: u64,
    pub small: u64,
    pub broken: u64,
    pub discard: u64,
    pub other: u64,
}

impl EggCounts {
    /// Build a map holding `quantity` eggs of a single grade.
    pub fn of(grade: EggGrade, quantity: u64) -> Self {
        let mut counts = Self::default();
        counts.set(grade, quantity);
        counts
    }

    /// Builder-style setter.
    pub fn with(mut self, grade: EggGrade, quantity: u64) -> Self {
        self.set(grade, quantity);
        self
    }
}

impl ValueObject for EggCounts {}

impl Quantities for EggCounts {
    type Category = EggGrade;

    const KIND: MovementKind = MovementKind::Eggs;

    fn categories() -> &'static [EggGrade] {
        &EggGrade::ALL
    }

    fn get(&self, grade: EggGrade) -> u64 {
        match grade {
            EggGrade::Incubable => self.incubable,
            EggGrade::Clean => self.clean,
            EggGrade::Treated => self.treated,
            EggGrade::Dirty => self.dirty,
            EggGrade::Deformed => self.deformed,
            EggGrade::White => self.white,
            EggGrade::DoubleYolk => self.double_yolk,
            EggGrade::Floor => self.floor,
            EggGrade::Small => self.small,
            EggGrade::Broken => self.broken,
            EggGrade::Discard => self.discard,
            EggGrade::Other => self.other,
        }
    }

    fn set(&mut self, grade: EggGrade, value: u64) {
        let slot = match grade {
            EggGrade::Incubable => &mut self.incubable,
            EggGrade::Clean => &mut self.clean,
            EggGrade::Treated => &mut self.treated,
            EggGrade::Dirty => &mut self.dirty,
            EggGrade::Deformed => &mut self.deformed,
            EggGrade::White => &mut self.white,
            EggGrade::DoubleYolk => &mut self.double_yolk,
            EggGrade::Floor => &mut self.floor,
            EggGrade::Small => &mut self.small,
            EggGrade::Broken => &mut self.broken,
            EggGrade::Discard => &mut self.discard,
            EggGrade::Other => &mut self.other,
        };
        *slot = value;
    }

    fn opening(_batch: &Batch) -> Self {
        Self::default()
    }

    fn daily_effect(record: &DailyRecord) -> Vec<(EggGrade, i64)> {
        match record.eggs() {
            Some(eggs) => eggs
                .non_zero()
                .into_iter()
                .map(|(grade, q)| (grade, signed(q)))
                .collect(),
            None => Vec::new(),
        }
    }
}
