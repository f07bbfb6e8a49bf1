//! Derived inventory: folding history into a balance.
//!
//! A balance is never stored. It is recomputed from:
//!
//! ```text
//! opening counts
//!   - daily losses (or + daily egg collection)   date <= as_of
//!   - completed outgoing movements               occurred_at <= as_of
//!   + completed incoming movements               occurred_at <= as_of
//! ```
//!
//! The fold only sums, so the order in which records are supplied does not matter.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::batch::Batch;
use crate::daily::DailyRecord;
use crate::quantities::{Quantities, signed};

/// Direction of a movement relative to the batch being folded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flow {
    Outgoing,
    Incoming,
}

impl Flow {
    /// `quantity` as a signed change to the folded batch.
    pub fn signed(self, quantity: u64) -> i64 {
        match self {
            Flow::Outgoing => signed(quantity).saturating_neg(),
            Flow::Incoming => signed(quantity),
        }
    }
}

/// A completed movement as seen from one batch.
///
/// Callers pass only movements whose effect is committed; cancelled and pending
/// records contribute nothing.
#[derive(Debug, Clone, Copy)]
pub struct MovementFlow<'a, Q> {
    pub flow: Flow,
    pub occurred_at: DateTime<Utc>,
    pub quantities: &'a Q,
}

/// A category whose raw balance went below zero and was clamped.
///
/// This points at a data-entry or reconciliation defect in the history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityWarning {
    pub category: String,
    pub raw: i64,
}

impl core::fmt::Display for IntegrityWarning {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} balance is {} (clamped to 0)", self.category, self.raw)
    }
}

/// A derived balance: clamped quantities plus whatever had to be clamped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance<Q> {
    pub quantities: Q,
    pub warnings: Vec<IntegrityWarning>,
}

impl<Q: Quantities> Balance<Q> {
    pub fn is_consistent(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn get(&self, category: Q::Category) -> u64 {
        self.quantities.get(category)
    }
}

/// Fold a batch's history into its balance as of `as_of` (`None` = everything).
pub fn fold_balance<'a, Q, I>(
    batch: &Batch,
    daily: &[DailyRecord],
    movements: I,
    as_of: Option<DateTime<Utc>>,
) -> Balance<Q>
where
    Q: Quantities,
    I: IntoIterator<Item = MovementFlow<'a, Q>>,
{
    let opening = Q::opening(batch);
    let mut raw: BTreeMap<Q::Category, i64> = Q::categories()
        .iter()
        .map(|c| (*c, signed(opening.get(*c))))
        .collect();

    let cutoff_day = as_of.map(|t| t.date_naive());
    for record in daily {
        if record.batch_id != batch.id {
            continue;
        }
        if cutoff_day.is_some_and(|day| record.date > day) {
            continue;
        }
        for (category, delta) in Q::daily_effect(record) {
            let entry = raw.entry(category).or_insert(0);
            *entry = entry.saturating_add(delta);
        }
    }

    for movement in movements {
        if as_of.is_some_and(|t| movement.occurred_at > t) {
            continue;
        }
        for (category, quantity) in movement.quantities.non_zero() {
            let entry = raw.entry(category).or_insert(0);
            *entry = entry.saturating_add(movement.flow.signed(quantity));
        }
    }

    let mut quantities = Q::default();
    let mut warnings = Vec::new();
    for (category, value) in raw {
        if value < 0 {
            tracing::warn!(
                batch_id = %batch.id,
                kind = Q::KIND.as_str(),
                category = %category,
                raw = value,
                "negative derived balance clamped to zero"
            );
            warnings.push(IntegrityWarning {
                category: category.to_string(),
                raw: value,
            });
            quantities.set(category, 0);
        } else {
            quantities.set(category, value.unsigned_abs());
        }
    }

    Balance {
        quantities,
        warnings,
    }
}

/// Lowest balance per category the batch holds at any instant from `from` on.
///
/// A movement dated `from` can only take what is still there at every later
/// point; taking more would push some past balance below zero. Daily records count
/// from the start of their day, as in [`fold_balance`]. Negative lows read as zero.
pub fn lowest_balance_from<'a, Q, I>(
    batch: &Batch,
    daily: &[DailyRecord],
    movements: I,
    from: DateTime<Utc>,
) -> Q
where
    Q: Quantities,
    I: IntoIterator<Item = MovementFlow<'a, Q>>,
{
    let mut steps: Vec<(DateTime<Utc>, Vec<(Q::Category, i64)>)> = daily
        .iter()
        .filter(|r| r.batch_id == batch.id)
        .map(|r| (r.date.and_time(NaiveTime::default()).and_utc(), Q::daily_effect(r)))
        .collect();
    for movement in movements {
        let deltas = movement
            .quantities
            .non_zero()
            .into_iter()
            .map(|(category, q)| (category, movement.flow.signed(q)))
            .collect();
        steps.push((movement.occurred_at, deltas));
    }
    steps.sort_by_key(|(at, _)| *at);

    let opening = Q::opening(batch);
    let mut running: BTreeMap<Q::Category, i64> = Q::categories()
        .iter()
        .map(|c| (*c, signed(opening.get(*c))))
        .collect();
    let apply = |running: &mut BTreeMap<Q::Category, i64>, deltas: Vec<(Q::Category, i64)>| {
        for (category, delta) in deltas {
            let entry = running.entry(category).or_insert(0);
            *entry = entry.saturating_add(delta);
        }
    };

    let mut steps = steps.into_iter().peekable();
    while let Some((_, deltas)) = steps.next_if(|(at, _)| *at <= from) {
        apply(&mut running, deltas);
    }

    let mut lowest = running.clone();
    while let Some((at, deltas)) = steps.next() {
        apply(&mut running, deltas);
        // Steps at the same instant land together.
        while let Some((_, more)) = steps.next_if(|(next, _)| *next == at) {
            apply(&mut running, more);
        }
        for (category, value) in &running {
            let low = lowest.entry(*category).or_insert(*value);
            *low = (*low).min(*value);
        }
    }

    let mut quantities = Q::default();
    for (category, value) in lowest {
        quantities.set(category, u64::try_from(value).unwrap_or(0));
    }
    quantities
}
