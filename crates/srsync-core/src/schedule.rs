//! Due-date calculation.
//!
//! Intervals are measured in units of `unit_secs`. The exponent and the
//! halving rule are integer-only so every replica computes identical due
//! times for identical inputs, whatever unit length it is configured with.

use serde::{Deserialize, Serialize};

use crate::model::{Rating, Timestamp, LAST_ACTIVE_STEP};

/// Interval parameters of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Length of one interval unit in seconds.
    #[serde(default = "default_unit_secs")]
    pub unit_secs: i64,
    /// Interval, in units, for cards past the last active stage.
    #[serde(default = "default_ceiling_units")]
    pub ceiling_units: i64,
    /// Interval, in units, applied by a "hard" rating.
    #[serde(default = "default_hard_units")]
    pub hard_units: i64,
}

fn default_unit_secs() -> i64 {
    86_400
}
fn default_ceiling_units() -> i64 {
    512
}
fn default_hard_units() -> i64 {
    1
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            unit_secs: default_unit_secs(),
            ceiling_units: default_ceiling_units(),
            hard_units: default_hard_units(),
        }
    }
}

impl ScheduleConfig {
    /// One-second units: interval values equal the raw unit counts.
    pub fn normalized() -> Self {
        Self {
            unit_secs: 1,
            ..Self::default()
        }
    }

    /// Reject settings that would let a rating produce a non-advancing due time.
    pub fn validate(&self) -> Result<(), String> {
        if self.unit_secs <= 0 {
            return Err(format!("unit_secs must be positive, got {}", self.unit_secs));
        }
        if self.ceiling_units <= 0 {
            return Err(format!(
                "ceiling_units must be positive, got {}",
                self.ceiling_units
            ));
        }
        if self.hard_units <= 0 {
            return Err(format!(
                "hard_units must be positive, got {}",
                self.hard_units
            ));
        }
        Ok(())
    }

    /// The interval assigned to mastered cards, in seconds.
    pub fn ceiling_interval(&self) -> i64 {
        self.ceiling_units.saturating_mul(self.unit_secs)
    }

    /// The interval applied by a "hard" rating, in seconds.
    pub fn hard_interval(&self) -> i64 {
        self.hard_units.saturating_mul(self.unit_secs)
    }

    /// Compute the next due time for a card at the (post-increment) `step`.
    ///
    /// Hard ratings do not go through the stage formula: they always defer
    /// the card by the short fixed interval.
    pub fn compute_due(&self, now: Timestamp, step: i32, rating: Rating) -> Timestamp {
        if rating == Rating::Hard {
            return now.saturating_add(self.hard_interval());
        }
        now.saturating_add(self.interval_units(step, rating).saturating_mul(self.unit_secs))
    }

    /// Interval in units for an advancing rating at `step`.
    pub fn interval_units(&self, step: i32, rating: Rating) -> i64 {
        if step <= 0 {
            return 0;
        }
        if step > i32::from(LAST_ACTIVE_STEP) {
            return self.ceiling_units;
        }
        let base = 1i64 << (step - 1);
        match rating {
            Rating::Easy => base,
            // Floor division, then clamp so stage 1 still defers by one unit.
            Rating::Normal => (base / 2).max(1),
            Rating::Hard => self.hard_units,
        }
    }
}

/// [`ScheduleConfig::compute_due`] with the default (one-day) unit.
pub fn compute_due(now: Timestamp, step: i32, rating: Rating) -> Timestamp {
    ScheduleConfig::default().compute_due(now, step, rating)
}
