//! The progress merge comparator.
//!
//! This is the single conflict-resolution rule used by the server's batch
//! save, the client's pull overlay and the deck consolidation repair.
//! A candidate replaces the existing record only if it has a strictly
//! greater `step`, or the same `step` and a strictly greater `last_at`.
//! Anything else keeps the existing record, so the side passed as
//! `existing` wins ties.
//!
//! Because the outcome depends only on the `(step, last_at)` ordering key,
//! folding any set of snapshots for one key yields a record with the maximum
//! ordering key regardless of arrival order.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::model::Progress;

/// What happened when a candidate was merged into a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
    /// The slot was empty.
    Inserted,
    /// The candidate was more advanced and replaced the existing record.
    Replaced,
    /// The existing record was at least as advanced.
    KeptExisting,
}

impl MergeOutcome {
    pub fn changed(self) -> bool {
        !matches!(self, MergeOutcome::KeptExisting)
    }
}

/// Compare two records by advancement: `step` first, then `last_at`.
pub fn advancement(a: &Progress, b: &Progress) -> Ordering {
    a.step.cmp(&b.step).then(a.last_at.cmp(&b.last_at))
}

/// Whether `candidate` should replace `existing`.
pub fn supersedes(candidate: &Progress, existing: &Progress) -> bool {
    advancement(candidate, existing) == Ordering::Greater
}

/// Merge `candidate` into `existing`, returning the surviving record.
///
/// The earliest known `added_at` is preserved on replacement since the
/// creation time of a card's progress never moves forward.
pub fn merge(existing: Option<&Progress>, candidate: &Progress) -> (Progress, MergeOutcome) {
    match existing {
        None => (*candidate, MergeOutcome::Inserted),
        Some(current) if supersedes(candidate, current) => (
            Progress {
                added_at: earliest_added(current.added_at, candidate.added_at),
                ..*candidate
            },
            MergeOutcome::Replaced,
        ),
        Some(current) => (*current, MergeOutcome::KeptExisting),
    }
}

/// Fold a sequence of snapshots for the same key, first one acting as existing.
pub fn merge_all<'a>(records: impl IntoIterator<Item = &'a Progress>) -> Option<Progress> {
    records
        .into_iter()
        .fold(None, |acc: Option<Progress>, next| Some(merge(acc.as_ref(), next).0))
}

fn earliest_added(a: i64, b: i64) -> i64 {
    match (a > 0, b > 0) {
        (true, true) => a.min(b),
        (true, false) => a,
        _ => b,
    }
}
