//! Per-user review statistics and the dashboard summary.

use std::collections::BTreeMap;

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Progress, Rating, Timestamp, MAX_STEP};

/// Number of days shown in the dashboard activity strip.
pub const ACTIVITY_DAYS: u64 = 7;

/// Activity recorded for one UTC day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyLog {
    pub reviews: u64,
    pub cards_created: u64,
}

/// Aggregate counters for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub total_reviews: u64,
    pub easy_count: u64,
    pub normal_count: u64,
    pub hard_count: u64,
    pub cards_created: u64,
    /// Consecutive UTC days with at least one review, ending at the last study day.
    pub current_streak: u32,
    pub longest_streak: u32,
    pub first_study: Option<Timestamp>,
    pub last_study: Option<Timestamp>,
    #[serde(default)]
    pub daily: BTreeMap<NaiveDate, DailyLog>,
}

/// UTC calendar day containing `ts`.
pub fn day_of(ts: Timestamp) -> NaiveDate {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .unwrap_or_default()
        .date_naive()
}

impl UserStats {
    pub fn record_review(&mut self, rating: Rating, now: Timestamp) {
        self.total_reviews += 1;
        match rating {
            Rating::Easy => self.easy_count += 1,
            Rating::Normal => self.normal_count += 1,
            Rating::Hard => self.hard_count += 1,
        }

        let today = day_of(now);
        match self.last_study.map(day_of) {
            None => self.current_streak = 1,
            Some(last) if last == today => {}
            Some(last) if last.checked_add_days(Days::new(1)) == Some(today) => {
                self.current_streak += 1
            }
            // A late-arriving review for an earlier day leaves the streak alone.
            Some(last) if today < last => {}
            Some(_) => self.current_streak = 1,
        }
        self.longest_streak = self.longest_streak.max(self.current_streak);

        self.first_study = Some(self.first_study.map_or(now, |first| first.min(now)));
        self.last_study = Some(self.last_study.map_or(now, |last| last.max(now)));
        self.daily.entry(today).or_default().reviews += 1;
    }

    pub fn record_card_created(&mut self, now: Timestamp) {
        self.cards_created += 1;
        self.daily.entry(day_of(now)).or_default().cards_created += 1;
    }

    pub fn record_card_deleted(&mut self) {
        self.cards_created = self.cards_created.saturating_sub(1);
    }

    pub fn day(&self, date: NaiveDate) -> DailyLog {
        self.daily.get(&date).copied().unwrap_or_default()
    }
}

/// Activity of one day in the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayActivity {
    pub date: NaiveDate,
    pub reviews: u64,
    pub cards_created: u64,
}

/// Summary shown on a user's dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub due_now: usize,
    pub total_cards: usize,
    /// Count of non-hidden progress records per step, 0 through 11.
    pub stage_distribution: Vec<usize>,
    /// The last seven days, oldest first, ending today.
    pub activity: Vec<DayActivity>,
    pub stats: UserStats,
}

impl Dashboard {
    pub fn build<'a>(
        stats: &UserStats,
        progress: impl IntoIterator<Item = &'a Progress>,
        now: Timestamp,
    ) -> Self {
        let mut stage_distribution = vec![0usize; usize::from(MAX_STEP) + 1];
        let mut due_now = 0;
        let mut total_cards = 0;
        for p in progress.into_iter().filter(|p| !p.hidden) {
            total_cards += 1;
            stage_distribution[usize::from(p.step.min(MAX_STEP))] += 1;
            if p.is_due(now) {
                due_now += 1;
            }
        }

        let today = day_of(now);
        let activity = (0..ACTIVITY_DAYS)
            .rev()
            .filter_map(|back| today.checked_sub_days(Days::new(back)))
            .map(|date| {
                let log = stats.day(date);
                DayActivity {
                    date,
                    reviews: log.reviews,
                    cards_created: log.cards_created,
                }
            })
            .collect();

        Self {
            due_now,
            total_cards,
            stage_distribution,
            activity,
            stats: stats.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: i64 = 86_400;

    #[test]
    fn counts_ratings() {
        let mut stats = UserStats::default();
        stats.record_review(Rating::Easy, DAY);
        stats.record_review(Rating::Hard, DAY + 10);
        stats.record_review(Rating::Normal, DAY + 20);
        stats.record_review(Rating::Easy, DAY + 30);
        assert_eq!(stats.total_reviews, 4);
        assert_eq!(stats.easy_count, 2);
        assert_eq!(stats.hard_count, 1);
        assert_eq!(stats.normal_count, 1);
        assert_eq!(stats.day(day_of(DAY)).reviews, 4);
    }

    #[test]
    fn streak_grows_on_consecutive_days_and_resets_on_gap() {
        let mut stats = UserStats::default();
        stats.record_review(Rating::Easy, 10 * DAY);
        assert_eq!(stats.current_streak, 1);
        stats.record_review(Rating::Easy, 10 * DAY + 500);
        assert_eq!(stats.current_streak, 1);
        stats.record_review(Rating::Easy, 11 * DAY + 5);
        stats.record_review(Rating::Easy, 12 * DAY + 5);
        assert_eq!(stats.current_streak, 3);
        stats.record_review(Rating::Easy, 20 * DAY);
        assert_eq!(stats.current_streak, 1);
        assert_eq!(stats.longest_streak, 3);
        assert_eq!(stats.first_study, Some(10 * DAY));
        assert_eq!(stats.last_study, Some(20 * DAY));
    }

    #[test]
    fn late_review_does_not_break_streak() {
        let mut stats = UserStats::default();
        stats.record_review(Rating::Easy, 10 * DAY);
        stats.record_review(Rating::Easy, 11 * DAY);
        stats.record_review(Rating::Normal, 3 * DAY);
        assert_eq!(stats.current_streak, 2);
        assert_eq!(stats.first_study, Some(3 * DAY));
        assert_eq!(stats.last_study, Some(11 * DAY));
    }

    #[test]
    fn created_counter_never_underflows() {
        let mut stats = UserStats::default();
        stats.record_card_created(0);
        stats.record_card_deleted();
        stats.record_card_deleted();
        assert_eq!(stats.cards_created, 0);
        assert_eq!(stats.day(day_of(0)).cards_created, 1);
    }

    #[test]
    fn dashboard_summarises_progress() {
        let mut stats = UserStats::default();
        stats.record_review(Rating::Easy, 30 * DAY);
        stats.record_review(Rating::Easy, 36 * DAY);
        stats.record_card_created(36 * DAY);

        let progress = [
            Progress { step: 0, due: 0, ..Progress::new(0) },
            Progress { step: 3, due: 50 * DAY, ..Progress::new(0) },
            Progress { step: 3, due: 10, ..Progress::new(0) },
            Progress { step: 11, due: 10, hidden: true, ..Progress::new(0) },
        ];
        let dash = Dashboard::build(&stats, &progress, 36 * DAY + 100);
        assert_eq!(dash.due_now, 2);
        assert_eq!(dash.total_cards, 3);
        assert_eq!(dash.stage_distribution.len(), 12);
        assert_eq!(dash.stage_distribution[3], 2);
        assert_eq!(dash.stage_distribution[11], 0);

        assert_eq!(dash.activity.len(), 7);
        assert_eq!(dash.activity[6].date, day_of(36 * DAY));
        assert_eq!(dash.activity[6].reviews, 1);
        assert_eq!(dash.activity[6].cards_created, 1);
        assert_eq!(dash.activity[0].date, day_of(30 * DAY));
        assert_eq!(dash.activity[0].reviews, 1);
    }
}
