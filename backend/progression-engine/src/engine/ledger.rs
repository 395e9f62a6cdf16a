use chrono::NaiveDate;

use crate::models::{ActivityDelta, DailyCommitment, DailyStatsRecord};

/// Levels past the first that still raise the daily goal.
const GOAL_LEVEL_CAP: u32 = 10;

/// Adds one event's deltas to the (user, date) rollup, creating it if needed.
///
/// A record for another date is never merged into; the day starts fresh.
pub fn record_activity(
    existing: Option<DailyStatsRecord>,
    user_id: &str,
    date: NaiveDate,
    delta: ActivityDelta,
) -> DailyStatsRecord {
    let mut record = match existing {
        Some(record) if record.date == date && record.user_id == user_id => record,
        _ => DailyStatsRecord::empty(user_id, date),
    };

    record.xp_earned = record.xp_earned.saturating_add(delta.xp);
    record.lessons_completed = record
        .lessons_completed
        .saturating_add(delta.lessons_completed);
    record.time_spent_seconds = record
        .time_spent_seconds
        .saturating_add(delta.time_spent_seconds);
    record.streak_day = delta.streak_snapshot;
    record
}

pub fn base_daily_goal(commitment: DailyCommitment) -> u32 {
    match commitment {
        DailyCommitment::Casual => 20,
        DailyCommitment::Regular => 30,
        DailyCommitment::Serious => 50,
        DailyCommitment::Intense => 80,
    }
}

/// Daily XP target: the commitment's base, +10% per level above 1, capped at +100%.
pub fn daily_xp_goal(commitment: DailyCommitment, level: u32) -> u32 {
    let steps = level.saturating_sub(1).min(GOAL_LEVEL_CAP);
    base_daily_goal(commitment) * (100 + 10 * steps) / 100
}
