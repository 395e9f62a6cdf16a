use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DailyStatsRecord {
    pub user_id: String,
    pub date: NaiveDate,
    pub xp_earned: u64,
    pub lessons_completed: u32,
    pub time_spent_seconds: u64,
    /// Streak length as of the last update that day.
    pub streak_day: u32,
}

impl DailyStatsRecord {
    pub fn empty(user_id: &str, date: NaiveDate) -> Self {
        Self {
            user_id: user_id.to_string(),
            date,
            xp_earned: 0,
            lessons_completed: 0,
            time_spent_seconds: 0,
            streak_day: 0,
        }
    }
}

/// Deltas one event adds to the day's rollup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivityDelta {
    pub xp: u64,
    pub lessons_completed: u32,
    pub time_spent_seconds: u64,
    pub streak_snapshot: u32,
}
