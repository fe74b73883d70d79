//! Per-card review transitions.

use crate::model::{Progress, Rating, Timestamp, MAX_STEP};
use crate::schedule::ScheduleConfig;

/// Apply one rating to `progress` at time `now`.
///
/// Every call is a distinct review: applying the same rating twice advances
/// the card twice. `added_at` and `hidden` are carried over unchanged.
pub fn rate(
    progress: &Progress,
    rating: Rating,
    now: Timestamp,
    schedule: &ScheduleConfig,
) -> Progress {
    let step = if rating.advances() {
        progress.step.saturating_add(1).min(MAX_STEP)
    } else {
        progress.step
    };
    Progress {
        step,
        due: schedule.compute_due(now, i32::from(step), rating),
        last_at: now,
        ..*progress
    }
}

/// Due time each rating would produce, for display next to the rating buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalPreview {
    pub hard: Timestamp,
    pub normal: Timestamp,
    pub easy: Timestamp,
}

impl IntervalPreview {
    pub fn get(&self, rating: Rating) -> Timestamp {
        match rating {
            Rating::Hard => self.hard,
            Rating::Normal => self.normal,
            Rating::Easy => self.easy,
        }
    }
}

pub fn preview_intervals(
    progress: &Progress,
    now: Timestamp,
    schedule: &ScheduleConfig,
) -> IntervalPreview {
    let due = |rating| rate(progress, rating, now, schedule).due;
    IntervalPreview {
        hard: due(Rating::Hard),
        normal: due(Rating::Normal),
        easy: due(Rating::Easy),
    }
}
